/**
 * Authentication Extractor
 *
 * Resolves the caller's identity for chat routes. The token is looked up in
 * the `Authorization` header first, then the `token` query parameter, then
 * the `refresh_token` cookie, and verified with the `Authenticator` held in
 * `AppState`.
 */

use axum::extract::{FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::Deserialize;

use crate::backend::auth::{AuthError, Identity};
use crate::backend::server::state::AppState;

pub const TOKEN_COOKIE: &str = "refresh_token";

/// Authenticated caller of a chat route
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser(pub Identity);

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
}

fn query_token(parts: &Parts) -> Option<String> {
    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(query)| query.token)
}

fn cookie_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.to_string())
        })
}

/// First token found in the header, query string, or cookie
pub fn extract_token(parts: &Parts) -> Option<String> {
    bearer_token(parts)
        .or_else(|| query_token(parts))
        .or_else(|| cookie_token(parts))
        .filter(|token| !token.is_empty())
}

impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or_else(|| {
            tracing::warn!("[Auth] Missing credentials for {}", parts.uri.path());
            AuthError::MissingCredentials
        })?;

        let identity = state.authenticator.authenticate(&token).map_err(|e| {
            tracing::warn!("[Auth] Rejected token: {}", e);
            e
        })?;
        Ok(AuthenticatedUser(identity))
    }
}
