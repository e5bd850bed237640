use crate::clock::Clock;
use crate::crypto::CryptoCodec;
use crate::error::Result;
use crate::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Session-scoped key holding the encrypted audit trail.
pub const SECURITY_EVENTS_KEY: &str = "securityEvents";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    Info,
    Warn,
    Error,
    Critical,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    CookieTampered,
    CookieCorrupted,
    DecryptFailed,
    LoginSuccess,
    LoginFailed,
    LoginThrottled,
    CooldownStarted,
    PendingAccountLogin,
    SuspendedAccountAttempt,
    InactiveAccountAttempt,
    InvalidSessionToken,
    SessionInvalidated,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CookieTampered => "cookie_tampered",
            Self::CookieCorrupted => "cookie_corrupted",
            Self::DecryptFailed => "decrypt_failed",
            Self::LoginSuccess => "login_success",
            Self::LoginFailed => "login_failed",
            Self::LoginThrottled => "login_throttled",
            Self::CooldownStarted => "cooldown_started",
            Self::PendingAccountLogin => "pending_account_login",
            Self::SuspendedAccountAttempt => "suspended_account_attempt",
            Self::InactiveAccountAttempt => "inactive_account_attempt",
            Self::InvalidSessionToken => "invalid_session_token",
            Self::SessionInvalidated => "session_invalidated",
        }
    }

    pub fn severity(&self) -> EventSeverity {
        match self {
            Self::LoginSuccess | Self::PendingAccountLogin | Self::SessionInvalidated => {
                EventSeverity::Info
            }
            Self::LoginFailed | Self::LoginThrottled | Self::DecryptFailed => EventSeverity::Warn,
            Self::CooldownStarted
            | Self::InactiveAccountAttempt
            | Self::InvalidSessionToken
            | Self::CookieCorrupted => EventSeverity::Error,
            Self::CookieTampered | Self::SuspendedAccountAttempt => EventSeverity::Critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityEvent {
    pub event_type: SecurityEventType,
    pub severity: EventSeverity,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Append-only audit trail. Each event is encrypted on its own and pushed onto
/// a JSON array kept in the session store.
pub struct SecurityEventLog {
    codec: Arc<CryptoCodec>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    append_lock: Mutex<()>,
}

impl SecurityEventLog {
    pub fn new(
        codec: Arc<CryptoCodec>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            codec,
            store,
            clock,
            append_lock: Mutex::new(()),
        }
    }

    /// Records an event. Failures are logged and swallowed; auditing never
    /// breaks the operation being audited.
    pub fn record(&self, event_type: SecurityEventType, details: serde_json::Value) {
        let event = SecurityEvent {
            event_type,
            severity: event_type.severity(),
            details,
            timestamp: self.clock.now(),
        };
        Self::trace(&event);
        if let Err(err) = self.append(&event) {
            error!(event = event_type.as_str(), "failed to persist security event: {err}");
        }
    }

    fn trace(event: &SecurityEvent) {
        let kind = event.event_type.as_str();
        match event.severity {
            EventSeverity::Info => info!(event = kind, details = %event.details, "security event"),
            EventSeverity::Warn => warn!(event = kind, details = %event.details, "security event"),
            EventSeverity::Error | EventSeverity::Critical => {
                error!(event = kind, details = %event.details, "security event")
            }
        }
    }

    fn append(&self, event: &SecurityEvent) -> Result<()> {
        let sealed = self.codec.encrypt(event)?;
        let _guard = self.append_lock.lock();
        let mut entries = self.load_raw()?;
        entries.push(sealed);
        self.store
            .set(SECURITY_EVENTS_KEY, &serde_json::to_string(&entries)?)?;
        Ok(())
    }

    fn load_raw(&self) -> Result<Vec<String>> {
        match self.store.get(SECURITY_EVENTS_KEY)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(vec![]),
        }
    }

    /// Decrypts the trail in append order. Entries sealed under another key
    /// are skipped.
    pub fn events(&self) -> Vec<SecurityEvent> {
        let raw = match self.load_raw() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("security event log unreadable: {err}");
                return vec![];
            }
        };
        raw.iter()
            .filter_map(|sealed| match self.codec.decrypt::<SecurityEvent>(sealed) {
                Ok(event) => Some(event),
                Err(err) => {
                    debug!("skipping undecryptable security event: {err}");
                    None
                }
            })
            .collect()
    }

    pub fn count(&self, event_type: SecurityEventType) -> usize {
        self.events()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.load_raw().map(|raw| raw.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
