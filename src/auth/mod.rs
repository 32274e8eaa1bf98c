//! Bearer-token authentication and scope gating.
//!
//! # Purpose
//! Validates the OAuth2 client-credentials bearer token on protected
//! requests and checks the scope grammar before handlers touch the store.
//!
//! # Key invariants
//! - A token is only as valid as its `ver` claim: it must equal the
//!   client's current `token_version`, which every client update bumps.
//! - With auth disabled, every request acts as a wildcard principal.
pub mod scope;
pub mod secret;
pub mod token;

use crate::api::error::{api_forbidden, api_internal_message, api_unauthorized, ApiError};
use crate::app::AppState;
use crate::store::StoreError;
use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use std::collections::HashSet;
use uuid::Uuid;

/// The authenticated caller: a concrete client, or the wildcard principal
/// when auth is disabled.
#[derive(Debug, Clone)]
pub struct Principal {
    pub client_id: Option<Uuid>,
    pub scopes: HashSet<String>,
}

impl Principal {
    fn wildcard() -> Self {
        Self {
            client_id: None,
            scopes: HashSet::from(["*".to_string()]),
        }
    }
}

/// Validate the bearer token on a request and resolve it to a principal.
///
/// Checks, in order: header shape, signature and expiry, client existence,
/// `is_active`, and the token-version match. Every failure is a 401; the
/// distinction between "bad token" and "revoked token" stays in the logs.
pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, ApiError> {
    if !state.settings.auth_enabled {
        return Ok(Principal::wildcard());
    }

    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| api_unauthorized("missing bearer token"))?;

    let secret_key = state
        .settings
        .auth_secret_key
        .as_deref()
        .ok_or_else(|| api_internal_message("auth enabled without a secret key"))?;
    let algorithm = token::parse_algorithm(&state.settings.auth_algorithm)
        .map_err(|_| api_internal_message("unsupported auth algorithm"))?;

    let claims = token::verify_token(secret_key, algorithm, bearer).map_err(|err| {
        tracing::warn!(error = %err, "token verification failed");
        api_unauthorized("invalid token")
    })?;
    let client_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| api_unauthorized("invalid token subject"))?;

    let client = match state.store.client_auth_view(client_id).await {
        Ok(client) => client,
        Err(StoreError::NotFound(_)) => {
            tracing::warn!(%client_id, "token rejected: client not found");
            return Err(api_unauthorized("invalid token"));
        }
        Err(err) => {
            tracing::error!(error = ?err, "client lookup failed during auth");
            return Err(api_internal_message("failed to validate token"));
        }
    };
    if !client.is_active {
        tracing::warn!(%client_id, "token rejected: client disabled");
        return Err(api_unauthorized("client disabled"));
    }
    if claims.ver != client.token_version {
        tracing::warn!(
            %client_id,
            token_version = claims.ver,
            current_version = client.token_version,
            "token rejected: revoked"
        );
        return Err(api_unauthorized("token revoked"));
    }

    Ok(Principal {
        client_id: Some(client_id),
        scopes: claims.scope.split_whitespace().map(str::to_string).collect(),
    })
}

/// Authenticate and require `resource:action`, optionally narrowed to one
/// object. Handlers call this before touching the store.
pub async fn require_scope(
    state: &AppState,
    headers: &HeaderMap,
    resource: &str,
    action: &str,
    object_id: Option<&str>,
) -> Result<Principal, ApiError> {
    let principal = authenticate(state, headers).await?;
    if !scope::has_scope(&principal.scopes, resource, action, object_id) {
        return Err(api_forbidden("insufficient scope"));
    }
    Ok(principal)
}
