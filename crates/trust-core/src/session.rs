use crate::clock::Clock;
use crate::config::SessionSettings;
use crate::crypto::{random_token, SESSION_TOKEN_BYTES};
use crate::error::Result;
use crate::event_log::{SecurityEventLog, SecurityEventType};
use crate::signed_store::{CookieOptions, SignedStore};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SESSION_TOKEN: &str = "session_token";
pub const USER_SESSION: &str = "user_session";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Pending,
    Suspended,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub uid: String,
    pub email: String,
    /// Milliseconds since the epoch at which the record was minted.
    pub timestamp: i64,
    pub last_login: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardOutcome {
    Proceed { token: String },
    RedirectToLogin,
}

impl GuardOutcome {
    pub fn is_proceed(&self) -> bool {
        matches!(self, Self::Proceed { .. })
    }
}

/// Lowercase hex, at least two characters per random byte.
pub fn is_valid_token(token: &str, min_bytes: usize) -> bool {
    token.len() >= min_bytes * 2
        && token
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

pub struct SessionGuard {
    store: Arc<SignedStore>,
    events: Arc<SecurityEventLog>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
}

impl SessionGuard {
    pub fn new(
        store: Arc<SignedStore>,
        events: Arc<SecurityEventLog>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            store,
            events,
            clock,
            settings,
        }
    }

    /// Runs on every protected view. Mints a token when none is stored; a
    /// malformed token clears the session and sends the user to login.
    pub fn enter_protected_view(&self) -> GuardOutcome {
        match self.store.get::<String>(SESSION_TOKEN) {
            None => {
                let token = random_token(self.token_bytes());
                if let Err(err) = self
                    .store
                    .put(SESSION_TOKEN, &token, CookieOptions::default())
                {
                    warn!("failed to persist session token: {err}");
                }
                debug!("minted session token");
                GuardOutcome::Proceed { token }
            }
            Some(token) if is_valid_token(&token, self.token_bytes()) => {
                GuardOutcome::Proceed { token }
            }
            Some(token) => {
                self.events.record(
                    SecurityEventType::InvalidSessionToken,
                    json!({"length": token.len()}),
                );
                self.invalidate();
                GuardOutcome::RedirectToLogin
            }
        }
    }

    /// Token check plus a live `user_session` record.
    pub fn require_authenticated(&self) -> GuardOutcome {
        match self.enter_protected_view() {
            GuardOutcome::Proceed { token } => {
                if self.current_session().is_some() {
                    GuardOutcome::Proceed { token }
                } else {
                    GuardOutcome::RedirectToLogin
                }
            }
            GuardOutcome::RedirectToLogin => GuardOutcome::RedirectToLogin,
        }
    }

    pub fn establish(&self, uid: &str, email: &str) -> Result<SessionRecord> {
        let now = self.clock.now();
        let record = SessionRecord {
            uid: uid.to_string(),
            email: email.to_string(),
            timestamp: now.timestamp_millis(),
            last_login: now,
        };
        self.store.put(
            USER_SESSION,
            &record,
            CookieOptions::max_age(self.max_age()),
        )?;
        info!(uid = %uid, "session established");
        Ok(record)
    }

    /// The stored record, if present and younger than the session max age.
    pub fn current_session(&self) -> Option<SessionRecord> {
        let record = self.store.get::<SessionRecord>(USER_SESSION)?;
        let minted = DateTime::<Utc>::from_timestamp_millis(record.timestamp)?;
        if self.clock.now() - minted >= self.max_age() {
            debug!("session record past max age");
            return None;
        }
        Some(record)
    }

    pub fn invalidate(&self) {
        for name in [SESSION_TOKEN, USER_SESSION] {
            if let Err(err) = self.store.remove(name) {
                warn!(name, "failed to remove session entry: {err}");
            }
        }
        self.events
            .record(SecurityEventType::SessionInvalidated, json!({}));
    }

    /// Configuration may raise the token size but never below 256 bits.
    fn token_bytes(&self) -> usize {
        self.settings.min_token_bytes.max(SESSION_TOKEN_BYTES)
    }

    fn max_age(&self) -> Duration {
        Duration::try_seconds(self.settings.session_max_age_secs).unwrap_or(Duration::MAX)
    }
}
