//! Client secret generation and hashing.
//!
//! Secrets are random 32-character hex strings handed out exactly once at
//! client creation; only the Argon2id PHC hash is stored.
use anyhow::anyhow;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::RngCore;

/// Generate a fresh client secret (16 random bytes, hex encoded).
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a secret with Argon2id and a per-secret salt, returning the PHC
/// string stored in the `clients` table.
pub fn hash_secret(secret: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash secret: {e}"))?;
    Ok(hash.to_string())
}

/// Verify a presented secret against a stored PHC hash. Malformed hashes
/// verify as false rather than erroring; a client row with a corrupt hash
/// should fail authentication, not break the endpoint.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(secret.as_bytes(), &parsed)
        .is_ok()
}
