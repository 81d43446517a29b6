use std::collections::HashSet;

use axum::http::{self};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use thiserror::Error;
use tracing::info;

use crate::auth::auth::{Principal, PrincipalKind};
use crate::ws::userctx;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing Authorization header, auth_token cookie or token parameter")]
    MissingToken,
    #[error("Invalid {0} header")]
    InvalidHeader(&'static str),
    #[error("JWT validation failed: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
    #[error("JWT token does not contain '{0}' claim")]
    MissingClaim(&'static str),
    #[error("Invalid token type: {0}")]
    InvalidType(String),
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, AuthError> {
    // 1. Try to get token from Authorization header
    if let Some(auth_header) = req.headers().get(http::header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| AuthError::InvalidHeader("Authorization"))?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).to_string());
    }

    // 2. Try to get token from cookies
    if let Some(cookie_header) = req.headers().get(http::header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| AuthError::InvalidHeader("Cookie"))?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if c.name() == "auth_token" {
                return Ok(c.value().to_string());
            }
        }
    }

    // 3. Browsers cannot set headers on a WebSocket upgrade, so accept ?token=
    req.uri()
        .query()
        .into_iter()
        .flat_map(|q| q.split('&'))
        .find_map(|pair| pair.strip_prefix("token="))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or(AuthError::MissingToken)
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

fn string_array(claims: &serde_json::Value, name: &str) -> Option<Vec<String>> {
    claims.get(name).and_then(|v| v.as_array()).map(|values| {
        values
            .iter()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect()
    })
}

// Resolve the principal behind a token, using the cache when possible
pub fn get_principal(token: &str, secret: &str) -> Result<Principal, AuthError> {
    if let Some(principal) = userctx::get_cached_principal(token) {
        return Ok(principal);
    }

    let token_data = validate_jwt(token, secret)?;
    let claims = &token_data.claims;

    let uid = claims
        .get("sub")
        .and_then(|v| v.as_str())
        .ok_or(AuthError::MissingClaim("sub"))?
        .to_string();

    // Tokens without a type are treated as user tokens
    let kind = match claims.get("type").and_then(|v| v.as_str()).unwrap_or("user") {
        "user" => PrincipalKind::User,
        "service" => PrincipalKind::Service,
        other => return Err(AuthError::InvalidType(other.to_string())),
    };

    let expires_at = claims
        .get("exp")
        .and_then(|v| v.as_i64())
        .ok_or(AuthError::MissingClaim("exp"))?;

    let principal = Principal {
        uid,
        kind,
        roles: string_array(claims, "roles").unwrap_or_default(),
        scopes: string_array(claims, "scopes").map(|s| s.into_iter().collect::<HashSet<String>>()),
        expires_at,
    };

    info!("{:?} token validated successfully for {}", principal.kind, principal.uid);
    userctx::cache_principal(token, principal.clone());
    Ok(principal)
}
