//! Local user directory backing `trustctl login`. Stands in for the remote
//! user-record service: a JSON list of accounts with Argon2 PHC hashes.

use anyhow::{anyhow, Context, Result};
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use trust_core::login::{AuthenticatedAccount, Authenticator};
use trust_core::session::AccountStatus;
use trust_core::TrustError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub email: String,
    pub uid: String,
    pub status: AccountStatus,
    pub password_hash: String,
}

pub struct LocalDirectory {
    path: PathBuf,
}

impl LocalDirectory {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Re-read on every lookup so edits to the file apply without a restart.
    fn entries(&self) -> Result<Vec<DirectoryEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let data = std::fs::read_to_string(&self.path)
            .with_context(|| format!("read user directory {}", self.path.display()))?;
        let entries = serde_json::from_str(&data)
            .with_context(|| format!("parse user directory {}", self.path.display()))?;
        Ok(entries)
    }

    fn lookup(&self, email: &str, password: &str) -> Result<AuthenticatedAccount> {
        let entry = self
            .entries()?
            .into_iter()
            .find(|e| e.email.eq_ignore_ascii_case(email))
            .ok_or_else(|| anyhow!("unknown account"))?;
        let parsed = PasswordHash::new(&entry.password_hash)
            .map_err(|e| anyhow!("stored hash unusable: {e}"))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .map_err(|_| anyhow!("password mismatch"))?;
        Ok(AuthenticatedAccount {
            uid: entry.uid,
            status: entry.status,
        })
    }
}

#[async_trait]
impl Authenticator for LocalDirectory {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedAccount, TrustError> {
        self.lookup(email, password).map_err(|err| {
            debug!("directory rejected credentials: {err:#}");
            TrustError::Authentication
        })
    }
}

/// Argon2id PHC string for a directory entry.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    let salt = SaltString::encode_b64(&salt).map_err(|e| anyhow!("salt: {e}"))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("hash password: {e}"))?;
    Ok(hash.to_string())
}
