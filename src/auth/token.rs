//! JWT minting and verification for client tokens.
//!
//! Tokens are symmetric (HS256 by default) and carry the client id, its
//! granted scopes, and the client's `token_version` at issue time. The
//! version claim is the revocation mechanism: any client update bumps the
//! stored version and every outstanding token stops validating.
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientClaims {
    /// Client id.
    pub sub: String,
    /// Space-separated scopes granted at issue time.
    pub scope: String,
    /// Client `token_version` at issue time.
    pub ver: i32,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
}

/// Parse the configured algorithm name ("HS256", "HS384", "HS512").
pub fn parse_algorithm(name: &str) -> Result<Algorithm, TokenError> {
    Algorithm::from_str(name).map_err(|_| TokenError::UnsupportedAlgorithm(name.to_string()))
}

pub fn mint_token(
    secret_key: &str,
    algorithm: Algorithm,
    client_id: &str,
    scopes: &str,
    token_version: i32,
    ttl: Duration,
    now_epoch_seconds: i64,
) -> Result<String, TokenError> {
    let claims = ClientClaims {
        sub: client_id.to_string(),
        scope: scopes.to_string(),
        ver: token_version,
        iat: now_epoch_seconds,
        exp: now_epoch_seconds + ttl.as_secs() as i64,
    };
    let header = Header::new(algorithm);
    let key = EncodingKey::from_secret(secret_key.as_bytes());
    Ok(jsonwebtoken::encode(&header, &claims, &key)?)
}

/// Verify signature and expiry; the caller still has to compare `ver`
/// against the client's current `token_version` and check `is_active`.
pub fn verify_token(
    secret_key: &str,
    algorithm: Algorithm,
    token: &str,
) -> Result<ClientClaims, TokenError> {
    let key = DecodingKey::from_secret(secret_key.as_bytes());
    let validation = Validation::new(algorithm);
    let data = jsonwebtoken::decode::<ClientClaims>(token, &key, &validation)?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    const KEY: &str = "test-secret-key";

    #[test]
    fn mint_and_verify_round_trip() {
        let now = Utc::now().timestamp();
        let token = mint_token(
            KEY,
            Algorithm::HS256,
            "client-1",
            "topics:publish",
            3,
            Duration::from_secs(900),
            now,
        )
        .expect("mint");
        let claims = verify_token(KEY, Algorithm::HS256, &token).expect("verify");
        assert_eq!(claims.sub, "client-1");
        assert_eq!(claims.scope, "topics:publish");
        assert_eq!(claims.ver, 3);
        assert_eq!(claims.exp, now + 900);
    }

    #[test]
    fn wrong_key_fails() {
        let now = Utc::now().timestamp();
        let token = mint_token(
            KEY,
            Algorithm::HS256,
            "client-1",
            "*",
            1,
            Duration::from_secs(900),
            now,
        )
        .expect("mint");
        assert!(verify_token("other-key", Algorithm::HS256, &token).is_err());
    }

    #[test]
    fn expired_token_fails() {
        // Issue a token whose expiry is far enough in the past to defeat
        // the default validation leeway.
        let stale = Utc::now().timestamp() - 3600;
        let token = mint_token(
            KEY,
            Algorithm::HS256,
            "client-1",
            "*",
            1,
            Duration::from_secs(60),
            stale,
        )
        .expect("mint");
        assert!(verify_token(KEY, Algorithm::HS256, &token).is_err());
    }

    #[test]
    fn algorithm_names_parse() {
        assert!(parse_algorithm("HS256").is_ok());
        assert!(parse_algorithm("HS512").is_ok());
        assert!(parse_algorithm("ROT13").is_err());
    }
}
