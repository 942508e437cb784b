//! User lookup and API key verification for the relay handshake

use crate::error::{RelayError, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What the credential store knows about a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    /// PHC-formatted hash of the user's API key
    pub secret_hash: String,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// `Ok(None)` when the username is unknown; `Err` when the store itself failed
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>>;
}

#[async_trait]
pub trait SecretVerifier: Send + Sync {
    /// Check a presented secret against a stored hash
    async fn verify(&self, secret: &str, secret_hash: &str) -> Result<bool>;
}

/// Argon2 verification, run off the async executor
#[derive(Debug, Clone, Copy, Default)]
pub struct Argon2Verifier;

#[async_trait]
impl SecretVerifier for Argon2Verifier {
    async fn verify(&self, secret: &str, secret_hash: &str) -> Result<bool> {
        let secret = secret.to_owned();
        let secret_hash = secret_hash.to_owned();
        tokio::task::spawn_blocking(move || verify_secret(&secret, &secret_hash))
            .await
            .map_err(|e| RelayError::SecretVerification(e.to_string()))?
    }
}

/// Hash an API key for storage in the user table
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| RelayError::SecretVerification(e.to_string()))
}

fn verify_secret(secret: &str, secret_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(secret_hash)
        .map_err(|e| RelayError::SecretVerification(format!("malformed hash: {e}")))?;

    match Argon2::default().verify_password(secret.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(RelayError::SecretVerification(e.to_string())),
    }
}

/// Fixed user table loaded from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticUserDirectory {
    users: HashMap<String, UserRecord>,
}

impl StaticUserDirectory {
    pub fn new(users: impl IntoIterator<Item = (String, UserRecord)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserDirectory for StaticUserDirectory {
    async fn find_user(&self, username: &str) -> Result<Option<UserRecord>> {
        Ok(self.users.get(username).cloned())
    }
}
