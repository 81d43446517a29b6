use chrono::Utc;
use moka::sync::Cache;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::auth::auth::Principal;

/// Validated principals keyed by the raw token
static PRINCIPAL_CACHE: OnceLock<Cache<String, Principal>> = OnceLock::new();

/// Get the principal cache, creating it on first use.
pub fn get_principal_cache() -> &'static Cache<String, Principal> {
    PRINCIPAL_CACHE.get_or_init(|| {
        info!("Principal cache initialized");
        Cache::builder()
            .max_capacity(100_000)
            .time_to_live(Duration::from_secs(5 * 60))
            .build()
    })
}

/// Cached principal for `token`, unless the token expired in the meantime.
pub fn get_cached_principal(token: &str) -> Option<Principal> {
    let cache = get_principal_cache();
    let principal = cache.get(token)?;
    if principal.expires_at <= Utc::now().timestamp() {
        cache.invalidate(token);
        return None;
    }
    Some(principal)
}

pub fn cache_principal(token: &str, principal: Principal) {
    get_principal_cache().insert(token.to_string(), principal);
}
