use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

const MAX_SCOPE_LEN: usize = 128;

/// A broadcast domain, usually one project or one team.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Scope(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("scope must not be empty")]
    Empty,
    #[error("scope exceeds {MAX_SCOPE_LEN} characters")]
    TooLong,
    #[error("scope contains invalid character '{0}'")]
    InvalidChar(char),
}

impl Scope {
    /// Parse a scope identifier. Surrounding whitespace is ignored; the rest
    /// must be ASCII alphanumerics or one of `-_.:`.
    pub fn parse(raw: &str) -> Result<Self, ScopeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ScopeError::Empty);
        }
        if trimmed.len() > MAX_SCOPE_LEN {
            return Err(ScopeError::TooLong);
        }
        if let Some(c) = trimmed
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')))
        {
            return Err(ScopeError::InvalidChar(c));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Parse a comma separated list, skipping blank entries and duplicates.
    pub fn parse_list(raw: &str) -> Result<Vec<Self>, ScopeError> {
        let mut scopes: Vec<Scope> = Vec::new();
        for part in raw.split(',').filter(|p| !p.trim().is_empty()) {
            let scope = Scope::parse(part)?;
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }
        Ok(scopes)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Scope {
    type Error = ScopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Scope::parse(&value)
    }
}

impl From<Scope> for String {
    fn from(scope: Scope) -> Self {
        scope.0
    }
}
