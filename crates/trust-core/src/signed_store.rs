//! Tamper-evident, encrypted named entries on top of a [`CookieJar`].
//!
//! Every entry is stored as JSON `{data, timestamp, signature}` where `data` is
//! the sealed payload and `signature` is HMAC-SHA256 over
//! `json(data) + timestamp`. An entry whose signature does not verify is purged
//! and never decrypted.

use crate::clock::Clock;
use crate::config::CookieSettings;
use crate::crypto::CryptoCodec;
use crate::error::Result;
use crate::event_log::{SecurityEventLog, SecurityEventType};
use crate::storage::{CookieAttributes, CookieJar, SameSite, StoredCookie};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignedEntry {
    pub data: String,
    pub timestamp: i64,
    pub signature: String,
}

impl SignedEntry {
    pub fn signing_message(data: &str, timestamp: i64) -> Result<String> {
        Ok(format!("{}{}", serde_json::to_string(data)?, timestamp))
    }

    pub fn seal(codec: &CryptoCodec, data: String, timestamp: i64) -> Result<Self> {
        let signature = codec.sign(&Self::signing_message(&data, timestamp)?)?;
        Ok(Self {
            data,
            timestamp,
            signature,
        })
    }

    pub fn verify(&self, codec: &CryptoCodec) -> bool {
        match Self::signing_message(&self.data, self.timestamp) {
            Ok(message) => codec.verify(&message, &self.signature),
            Err(_) => false,
        }
    }
}

/// Caller-controlled persistence options. Transport flags are not here on
/// purpose: every entry is written `Secure`, `SameSite=Strict`, `HttpOnly`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieOptions {
    pub expires_in: Option<Duration>,
    pub path: Option<String>,
}

impl CookieOptions {
    pub fn expires_in_days(days: i64) -> Self {
        Self {
            expires_in: Some(Duration::try_days(days).unwrap_or(Duration::MAX)),
            path: None,
        }
    }

    pub fn max_age(max_age: Duration) -> Self {
        Self {
            expires_in: Some(max_age),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

pub struct SignedStore {
    codec: Arc<CryptoCodec>,
    jar: Arc<dyn CookieJar>,
    events: Arc<SecurityEventLog>,
    clock: Arc<dyn Clock>,
    settings: CookieSettings,
}

impl SignedStore {
    pub fn new(
        codec: Arc<CryptoCodec>,
        jar: Arc<dyn CookieJar>,
        events: Arc<SecurityEventLog>,
        clock: Arc<dyn Clock>,
        settings: CookieSettings,
    ) -> Self {
        Self {
            codec,
            jar,
            events,
            clock,
            settings,
        }
    }

    pub fn put<T: Serialize + ?Sized>(
        &self,
        name: &str,
        value: &T,
        options: CookieOptions,
    ) -> Result<()> {
        let now = self.clock.now();
        let data = self.codec.encrypt(value)?;
        let entry = SignedEntry::seal(&self.codec, data, now.timestamp_millis())?;
        let expires_in = options
            .expires_in
            .unwrap_or_else(|| {
                Duration::try_days(self.settings.default_expiry_days).unwrap_or(Duration::MAX)
            });
        let cookie = StoredCookie {
            value: serde_json::to_string(&entry)?,
            attributes: CookieAttributes {
                expires_at: now
                    .checked_add_signed(expires_in)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
                path: options
                    .path
                    .unwrap_or_else(|| self.settings.default_path.clone()),
                secure: true,
                same_site: SameSite::Strict,
                http_only: true,
            },
        };
        self.jar.write(name, cookie)?;
        debug!(name = %name, "signed entry written");
        Ok(())
    }

    /// Returns the decrypted value, or `None` when the entry is missing,
    /// expired, fails verification, or cannot be decrypted.
    pub fn get<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let raw = match self.jar.read(name, self.clock.now()) {
            Ok(Some(cookie)) => cookie.value,
            Ok(None) => return None,
            Err(err) => {
                warn!(name = %name, "cookie jar read failed: {err}");
                return None;
            }
        };
        let entry: SignedEntry = match serde_json::from_str(&raw) {
            Ok(entry) => entry,
            Err(err) => {
                self.discard(name, SecurityEventType::CookieCorrupted, &err.to_string());
                return None;
            }
        };
        if !entry.verify(&self.codec) {
            self.discard(name, SecurityEventType::CookieTampered, "signature mismatch");
            return None;
        }
        match self.codec.decrypt(&entry.data) {
            Ok(value) => Some(value),
            Err(err) => {
                self.events.record(
                    SecurityEventType::DecryptFailed,
                    json!({"name": name, "reason": err.to_string()}),
                );
                None
            }
        }
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.jar.delete(name)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.get::<serde_json::Value>(name).is_some()
    }

    fn discard(&self, name: &str, event_type: SecurityEventType, reason: &str) {
        self.events
            .record(event_type, json!({"name": name, "reason": reason}));
        if let Err(err) = self.remove(name) {
            warn!(name = %name, "failed to purge rejected entry: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::secret_key::SecretKey;
    use crate::storage::{KeyValueStore, MemoryCookieJar, MemoryStore};
    use chrono::Utc;

    struct Fixture {
        store: SignedStore,
        jar: Arc<MemoryCookieJar>,
        events: Arc<SecurityEventLog>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let codec = Arc::new(CryptoCodec::new(SecretKey::generate()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let session: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let events = Arc::new(SecurityEventLog::new(codec.clone(), session, clock.clone()));
        let jar = Arc::new(MemoryCookieJar::new());
        let store = SignedStore::new(
            codec,
            jar.clone(),
            events.clone(),
            clock.clone(),
            CookieSettings::default(),
        );
        Fixture {
            store,
            jar,
            events,
            clock,
        }
    }

    fn stored_entry(jar: &MemoryCookieJar, name: &str) -> SignedEntry {
        serde_json::from_str(&jar.raw(name).unwrap().value).unwrap()
    }

    #[test]
    fn put_get_roundtrip_with_strict_attributes() {
        let f = fixture();
        f.store
            .put("user_preferences", &vec!["a", "b"], CookieOptions::default())
            .unwrap();
        let value: Vec<String> = f.store.get("user_preferences").unwrap();
        assert_eq!(value, vec!["a", "b"]);

        let cookie = f.jar.raw("user_preferences").unwrap();
        assert!(cookie.attributes.secure);
        assert!(cookie.attributes.http_only);
        assert_eq!(cookie.attributes.same_site, SameSite::Strict);
        assert_eq!(cookie.attributes.path, "/");
        assert_eq!(
            cookie.attributes.expires_at,
            f.clock.now() + Duration::days(365)
        );
        assert!(!cookie.value.contains("\"a\""));
    }

    #[test]
    fn options_override_expiry_and_path_only() {
        let f = fixture();
        let options = CookieOptions::max_age(Duration::seconds(3600)).with_path("/app");
        f.store.put("user_session", "x", options).unwrap();
        let cookie = f.jar.raw("user_session").unwrap();
        assert_eq!(cookie.attributes.path, "/app");
        assert!(cookie.attributes.secure);
        assert_eq!(cookie.attributes.same_site, SameSite::Strict);

        f.clock.advance(Duration::seconds(3599));
        assert!(f.store.exists("user_session"));
        f.clock.advance(Duration::seconds(1));
        assert!(!f.store.exists("user_session"));
    }

    #[test]
    fn tampered_data_is_purged_once() {
        let f = fixture();
        f.store.put("cookie_consent", "true", CookieOptions::default()).unwrap();
        let mut entry = stored_entry(&f.jar, "cookie_consent");
        let mut bytes = entry.data.into_bytes();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        entry.data = String::from_utf8(bytes).unwrap();
        f.jar
            .overwrite_raw("cookie_consent", &serde_json::to_string(&entry).unwrap());

        assert_eq!(f.store.get::<String>("cookie_consent"), None);
        assert!(f.jar.raw("cookie_consent").is_none());
        assert_eq!(f.events.count(SecurityEventType::CookieTampered), 1);

        assert_eq!(f.store.get::<String>("cookie_consent"), None);
        assert_eq!(f.events.count(SecurityEventType::CookieTampered), 1);
    }

    #[test]
    fn tampered_timestamp_is_rejected() {
        let f = fixture();
        f.store.put("cookie_consent", "true", CookieOptions::default()).unwrap();
        let mut entry = stored_entry(&f.jar, "cookie_consent");
        entry.timestamp ^= 1;
        f.jar
            .overwrite_raw("cookie_consent", &serde_json::to_string(&entry).unwrap());
        assert!(!f.store.exists("cookie_consent"));
        assert_eq!(f.events.count(SecurityEventType::CookieTampered), 1);
    }

    #[test]
    fn unparseable_entry_is_purged() {
        let f = fixture();
        f.store.put("user_preferences", &1u8, CookieOptions::default()).unwrap();
        f.jar.overwrite_raw("user_preferences", "{not json");
        assert_eq!(f.store.get::<u8>("user_preferences"), None);
        assert!(f.jar.raw("user_preferences").is_none());
        assert_eq!(f.events.count(SecurityEventType::CookieCorrupted), 1);
    }

    #[test]
    fn entry_signed_under_other_key_is_tampered() {
        let f = fixture();
        let other = fixture();
        other
            .store
            .put("session_token", "abc", CookieOptions::default())
            .unwrap();
        let foreign = other.jar.raw("session_token").unwrap();
        f.jar.write("session_token", foreign).unwrap();
        assert_eq!(f.store.get::<String>("session_token"), None);
        assert_eq!(f.events.count(SecurityEventType::CookieTampered), 1);
    }

    #[test]
    fn wrong_type_is_absent_but_kept() {
        let f = fixture();
        f.store.put("user_preferences", "text", CookieOptions::default()).unwrap();
        assert_eq!(f.store.get::<u64>("user_preferences"), None);
        assert_eq!(f.events.count(SecurityEventType::DecryptFailed), 1);
        assert!(f.jar.raw("user_preferences").is_some());
    }

    #[test]
    fn oversized_expiry_saturates() {
        let f = fixture();
        let options = CookieOptions::expires_in_days(i64::MAX);
        f.store.put("cookie_consent", "true", options).unwrap();
        let cookie = f.jar.raw("cookie_consent").unwrap();
        assert_eq!(cookie.attributes.expires_at, DateTime::<Utc>::MAX_UTC);
        assert_eq!(f.store.get::<String>("cookie_consent").as_deref(), Some("true"));
    }

    #[test]
    fn remove_is_idempotent() {
        let f = fixture();
        f.store.remove("session_token").unwrap();
        f.store.put("session_token", "abc", CookieOptions::default()).unwrap();
        f.store.remove("session_token").unwrap();
        f.store.remove("session_token").unwrap();
        assert_eq!(f.store.get::<String>("session_token"), None);
        assert!(f.events.is_empty());
    }
}
