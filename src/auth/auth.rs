use std::collections::HashSet;

use axum::http::StatusCode;

use crate::models::{api_error, ApiError};
use crate::ws::scope::Scope;

const ADMIN_ROLE: &str = "admin";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PrincipalKind {
    User,
    Service,
}

/// Identity established by the auth middleware
#[derive(Clone, Debug)]
pub struct Principal {
    pub uid: String,
    pub kind: PrincipalKind,
    pub roles: Vec<String>,
    /// Scopes granted by the token. `None` means the token does not restrict scopes.
    pub scopes: Option<HashSet<String>>,
    /// Token expiry, seconds since the epoch
    pub expires_at: i64,
}

impl Principal {
    pub fn is_service(&self) -> bool {
        self.kind == PrincipalKind::Service
    }

    pub fn is_admin(&self) -> bool {
        self.roles.iter().any(|r| r == ADMIN_ROLE)
    }

    pub fn can_access(&self, scope: &Scope) -> bool {
        if self.is_service() || self.is_admin() {
            return true;
        }
        match &self.scopes {
            Some(granted) => granted.contains(scope.as_str()),
            None => true,
        }
    }
}

pub fn ensure_scope_access(principal: &Principal, scope: &Scope) -> Result<(), ApiError> {
    if principal.can_access(scope) {
        return Ok(());
    }
    Err(api_error(StatusCode::FORBIDDEN, format!("Access to scope '{}' denied", scope)))
}

pub fn ensure_service_or_admin(principal: &Principal) -> Result<(), ApiError> {
    if principal.is_service() || principal.is_admin() {
        return Ok(());
    }
    Err(api_error(StatusCode::FORBIDDEN, "Service or admin access required"))
}
