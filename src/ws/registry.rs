use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use super::connection::{ConnId, Connection};
use super::scope::Scope;

/// A registered connection as the hub sees it.
#[derive(Debug)]
pub struct Member {
    pub handle: Weak<Connection>,
    pub user_id: String,
    pub scopes: HashSet<Scope>,
}

/// Membership map owned by the hub control loop.
///
/// `scopes` and `conns` are two views of the same relation and are always
/// updated together. Scope sets are pruned when they become empty.
#[derive(Debug, Default)]
pub struct Registry {
    scopes: HashMap<Scope, HashSet<ConnId>>,
    conns: HashMap<ConnId, Member>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. Returns false if it was already registered, in
    /// which case only the scopes are added.
    pub fn insert(&mut self, conn: &Arc<Connection>, scopes: impl IntoIterator<Item = Scope>) -> bool {
        let id = conn.id();
        let is_new = !self.conns.contains_key(&id);
        if is_new {
            self.conns.insert(
                id,
                Member {
                    handle: Arc::downgrade(conn),
                    user_id: conn.user_id().to_string(),
                    scopes: HashSet::new(),
                },
            );
        }
        for scope in scopes {
            self.subscribe(id, scope);
        }
        is_new
    }

    /// Add one membership entry. Returns false if the connection is unknown.
    pub fn subscribe(&mut self, id: ConnId, scope: Scope) -> bool {
        let Some(member) = self.conns.get_mut(&id) else {
            return false;
        };
        member.scopes.insert(scope.clone());
        self.scopes.entry(scope).or_default().insert(id);
        true
    }

    /// Remove one membership entry. Returns true if the entry existed.
    pub fn unsubscribe(&mut self, id: ConnId, scope: &Scope) -> bool {
        let Some(member) = self.conns.get_mut(&id) else {
            return false;
        };
        if !member.scopes.remove(scope) {
            return false;
        }
        self.detach(id, scope);
        true
    }

    /// Remove a connection together with all of its memberships.
    pub fn remove(&mut self, id: ConnId) -> Option<Member> {
        let member = self.conns.remove(&id)?;
        for scope in &member.scopes {
            self.detach(id, scope);
        }
        Some(member)
    }

    fn detach(&mut self, id: ConnId, scope: &Scope) {
        if let Some(set) = self.scopes.get_mut(scope) {
            set.remove(&id);
            if set.is_empty() {
                self.scopes.remove(scope);
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: ConnId) -> Option<&Member> {
        self.conns.get(&id)
    }

    /// Members of a scope with their handles. Empty for unknown scopes.
    pub fn members(&self, scope: &Scope) -> impl Iterator<Item = (ConnId, &Weak<Connection>)> + '_ {
        self.scopes
            .get(scope)
            .into_iter()
            .flatten()
            .filter_map(|id| self.conns.get(id).map(|m| (*id, &m.handle)))
    }

    pub fn scopes_of(&self, id: ConnId) -> Option<Vec<Scope>> {
        self.conns.get(&id).map(|m| {
            let mut scopes: Vec<Scope> = m.scopes.iter().cloned().collect();
            scopes.sort();
            scopes
        })
    }

    pub fn ids(&self) -> impl Iterator<Item = ConnId> + '_ {
        self.conns.keys().copied()
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn scope_count(&self) -> usize {
        self.scopes.len()
    }

    pub fn membership_count(&self) -> usize {
        self.scopes.values().map(HashSet::len).sum()
    }

    /// Both directions describe the same relation.
    #[cfg(test)]
    pub fn is_consistent(&self) -> bool {
        let forward = self.scopes.iter().all(|(scope, ids)| {
            !ids.is_empty()
                && ids
                    .iter()
                    .all(|id| self.conns.get(id).is_some_and(|m| m.scopes.contains(scope)))
        });
        let backward = self.conns.iter().all(|(id, m)| {
            m.scopes
                .iter()
                .all(|scope| self.scopes.get(scope).is_some_and(|ids| ids.contains(id)))
        });
        forward && backward
    }
}
