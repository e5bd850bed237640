use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable carrying the injected encryption key.
pub const ENCRYPTION_KEY_ENV: &str = "TRUST_ENCRYPTION_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ThrottleSettings {
    pub max_attempts: u32,
    pub cooldown_secs: u64,
    pub min_attempt_interval_ms: u64,
}

impl Default for ThrottleSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            cooldown_secs: 10,
            min_attempt_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CookieSettings {
    pub default_expiry_days: i64,
    pub default_path: String,
}

impl Default for CookieSettings {
    fn default() -> Self {
        Self {
            default_expiry_days: 365,
            default_path: "/".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SessionSettings {
    pub session_max_age_secs: i64,
    pub min_token_bytes: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            session_max_age_secs: 3600,
            min_token_bytes: 32,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TrustConfig {
    pub throttle: ThrottleSettings,
    pub cookies: CookieSettings,
    pub session: SessionSettings,
}

impl TrustConfig {
    /// Loads the JSON config at `path`; a missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config = serde_json::from_str(&data)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }
}

/// The injected key, if any. Absence is not an error.
pub fn encryption_key_from_env() -> Option<String> {
    std::env::var(ENCRYPTION_KEY_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
