//! Password hashing and reset-token primitives.

use anyhow::anyhow;
use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use base64::{Engine as _, engine::general_purpose};
use sha2::{Digest, Sha256};

use crate::errors::{Error, Result};

/// Argon2 hashing parameters.
#[derive(Debug, Clone, Copy)]
pub struct Argon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Argon2Params {
    fn to_argon2(self) -> Result<Argon2<'static>> {
        let params = Params::new(self.memory_kib, self.iterations, self.parallelism, None)
            .map_err(|e| Error::from(anyhow!("create argon2 params: {e}")))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }
}

impl Default for Argon2Params {
    /// Secure defaults for production (Argon2id RFC recommendations)
    fn default() -> Self {
        Self {
            memory_kib: 19456, // 19 MB
            iterations: 2,
            parallelism: 1,
        }
    }
}

/// Hash a password with the given Argon2id parameters.
pub fn hash_password(password: &str, params: Argon2Params) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = params.to_argon2()?;

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| Error::from(anyhow!("hash password: {e}")))?;

    Ok(hash.to_string())
}

/// Verify a password against a stored hash.
///
/// Verification uses the parameters embedded in the hash itself, so hashes
/// created under older cost settings keep verifying after a config change.
pub fn verify_password(password: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| Error::from(anyhow!("parse stored hash: {e}")))?;

    let argon2 = Argon2::default();
    Ok(argon2.verify_password(password.as_bytes(), &parsed_hash).is_ok())
}

/// Generate an opaque reset token: 256 bits of randomness, base64url without
/// padding (43 characters).
pub fn generate_reset_token() -> String {
    let token_bytes: [u8; 32] = rand::random();
    general_purpose::URL_SAFE_NO_PAD.encode(token_bytes)
}

/// Digest under which a reset token is stored and looked up. The raw token
/// only ever travels in the reset email.
pub fn reset_token_digest(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    general_purpose::URL_SAFE_NO_PAD.encode(digest)
}
