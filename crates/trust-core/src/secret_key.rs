use crate::error::{Result, TrustError};
use crate::storage::KeyValueStore;
use base64::{engine::general_purpose, Engine as _};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use tracing::{debug, warn};
use zeroize::Zeroizing;

pub const KEY_LEN: usize = 32;
/// Session-scoped slot for the fallback key.
pub const APP_SECRET_KEY: &str = "app_secret_key";

const PASSPHRASE_SALT: &[u8] = b"trust-layer-v1";
const PASSPHRASE_INFO: &[u8] = b"secret-key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    Injected,
    SessionCached,
    Generated,
}

/// Process-lifetime symmetric key. Zeroized on drop, never printed.
#[derive(Clone)]
pub struct SecretKey {
    bytes: Zeroizing<[u8; KEY_LEN]>,
    source: KeySource,
}

impl SecretKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            bytes: Zeroizing::new(bytes),
            source: KeySource::Injected,
        }
    }

    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self {
            bytes,
            source: KeySource::Generated,
        }
    }

    /// Accepts either a base64-encoded 32-byte key or a passphrase, which is
    /// stretched with HKDF-SHA256.
    pub fn from_injected(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.is_empty() {
            return Err(TrustError::InvalidKey("empty injected key".into()));
        }
        if let Ok(decoded) = general_purpose::STANDARD.decode(value) {
            if decoded.len() == KEY_LEN {
                let decoded = Zeroizing::new(decoded);
                let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
                bytes.copy_from_slice(&decoded);
                return Ok(Self {
                    bytes,
                    source: KeySource::Injected,
                });
            }
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        Hkdf::<Sha256>::new(Some(PASSPHRASE_SALT), value.as_bytes())
            .expand(PASSPHRASE_INFO, &mut bytes[..])
            .map_err(|e| TrustError::InvalidKey(e.to_string()))?;
        Ok(Self {
            bytes,
            source: KeySource::Injected,
        })
    }

    /// Resolves the key for this process: injected value first, then the key
    /// cached in the session store, then a freshly generated one that is
    /// cached for the rest of the session. Nothing is written durably.
    pub fn resolve(injected: Option<&str>, session: &dyn KeyValueStore) -> Result<Self> {
        if let Some(value) = injected.filter(|v| !v.trim().is_empty()) {
            debug!("using injected encryption key");
            return Self::from_injected(value);
        }
        if let Some(encoded) = session.get(APP_SECRET_KEY)? {
            match Self::decode_cached(&encoded) {
                Ok(key) => return Ok(key),
                Err(err) => warn!("cached session key unusable, regenerating: {err}"),
            }
        }
        let key = Self::generate();
        let encoded = Zeroizing::new(general_purpose::STANDARD.encode(key.as_bytes()));
        session.set(APP_SECRET_KEY, &encoded)?;
        debug!("generated session-scoped encryption key");
        Ok(key)
    }

    fn decode_cached(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(general_purpose::STANDARD.decode(encoded)?);
        if decoded.len() != KEY_LEN {
            return Err(TrustError::InvalidKey("cached key length invalid".into()));
        }
        let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
        bytes.copy_from_slice(&decoded);
        Ok(Self {
            bytes,
            source: KeySource::SessionCached,
        })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    pub fn source(&self) -> KeySource {
        self.source
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretKey")
            .field("bytes", &"[REDACTED]")
            .field("source", &self.source)
            .finish()
    }
}
