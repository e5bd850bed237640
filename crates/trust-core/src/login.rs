//! The login entry point: throttle gate, credential check against the
//! external authenticator, then session setup according to account status.

use crate::clock::Clock;
use crate::crypto::hash;
use crate::error::Result;
use crate::event_log::{SecurityEventLog, SecurityEventType};
use crate::session::{AccountStatus, SessionGuard, SessionRecord};
use crate::throttle::{AttemptDecision, ThrottleGuard};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{error, info};
use zeroize::Zeroizing;

pub const INVALID_CREDENTIALS: &str = "Invalid email or password.";
pub const INVALID_INPUT: &str = "Please enter a valid email address and password.";
pub const ACCOUNT_SUSPENDED: &str =
    "Your account has been deactivated. Please contact support for assistance.";
pub const ACCOUNT_INACTIVE: &str =
    "Your account has been deactivated due to inactivity. Please contact support to reactivate it.";
pub const SESSION_UNAVAILABLE: &str = "Unable to start your session. Please try again.";

pub fn cooldown_message(retry_after_secs: u64) -> String {
    format!("Too many failed attempts. Please try again in {retry_after_secs} seconds.")
}

pub fn too_soon_message(retry_after_secs: u64) -> String {
    format!("Please wait {retry_after_secs} seconds before trying again.")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthenticatedAccount {
    pub uid: String,
    pub status: AccountStatus,
}

/// The remote user-record service. Any error means "credentials rejected".
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, email: &str, password: &str) -> Result<AuthenticatedAccount>;
}

pub struct Credentials {
    pub email: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into().trim().to_string(),
            password: Zeroizing::new(password.into()),
        }
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    fn is_well_formed(&self) -> bool {
        let Some((local, domain)) = self.email.split_once('@') else {
            return false;
        };
        !local.is_empty()
            && domain.contains('.')
            && !domain.starts_with('.')
            && !domain.ends_with('.')
            && !self.email.contains(char::is_whitespace)
            && !self.password.is_empty()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Proceed(SessionRecord),
    PendingApproval { uid: String },
    Rejected { message: String },
    Throttled { message: String, retry_after_secs: u64 },
    Invalid { message: String },
}

impl LoginOutcome {
    /// User-visible text, if any.
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Proceed(_) | Self::PendingApproval { .. } => None,
            Self::Rejected { message }
            | Self::Throttled { message, .. }
            | Self::Invalid { message } => Some(message),
        }
    }
}

pub struct LoginFlow {
    throttle: Arc<ThrottleGuard>,
    sessions: Arc<SessionGuard>,
    events: Arc<SecurityEventLog>,
    authenticator: Arc<dyn Authenticator>,
    clock: Arc<dyn Clock>,
}

impl LoginFlow {
    pub fn new(
        throttle: Arc<ThrottleGuard>,
        sessions: Arc<SessionGuard>,
        events: Arc<SecurityEventLog>,
        authenticator: Arc<dyn Authenticator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            throttle,
            sessions,
            events,
            authenticator,
            clock,
        }
    }

    pub async fn submit(&self, credentials: &Credentials) -> LoginOutcome {
        if !credentials.is_well_formed() {
            return LoginOutcome::Invalid {
                message: INVALID_INPUT.into(),
            };
        }
        let fingerprint = hash(&credentials.email.to_lowercase());

        match self.throttle.check(self.clock.now()) {
            AttemptDecision::Allowed => {}
            AttemptDecision::CoolingDown { retry_after_secs } => {
                self.events.record(
                    SecurityEventType::LoginThrottled,
                    json!({"account": fingerprint, "retryAfterSecs": retry_after_secs}),
                );
                return LoginOutcome::Throttled {
                    message: cooldown_message(retry_after_secs),
                    retry_after_secs,
                };
            }
            AttemptDecision::TooSoon { retry_after_ms } => {
                let retry_after_secs = (retry_after_ms.max(0) as u64).div_ceil(1000);
                self.events.record(
                    SecurityEventType::LoginThrottled,
                    json!({
                        "account": fingerprint,
                        "retryAfterSecs": retry_after_secs,
                        "reason": "min_interval",
                    }),
                );
                return LoginOutcome::Throttled {
                    message: too_soon_message(retry_after_secs),
                    retry_after_secs,
                };
            }
        }

        let account = match self
            .authenticator
            .authenticate(&credentials.email, credentials.password())
            .await
        {
            Ok(account) => account,
            Err(err) => return self.on_failure(&fingerprint, &err.to_string()),
        };

        match account.status {
            AccountStatus::Active => {
                self.throttle.record_success();
                match self.sessions.establish(&account.uid, &credentials.email) {
                    Ok(record) => {
                        self.events.record(
                            SecurityEventType::LoginSuccess,
                            json!({"uid": account.uid}),
                        );
                        info!(uid = %account.uid, "login succeeded");
                        LoginOutcome::Proceed(record)
                    }
                    Err(err) => {
                        error!("failed to persist session: {err}");
                        LoginOutcome::Rejected {
                            message: SESSION_UNAVAILABLE.into(),
                        }
                    }
                }
            }
            AccountStatus::Pending => {
                self.throttle.record_success();
                self.events.record(
                    SecurityEventType::PendingAccountLogin,
                    json!({"uid": account.uid}),
                );
                LoginOutcome::PendingApproval { uid: account.uid }
            }
            AccountStatus::Suspended => {
                self.events.record(
                    SecurityEventType::SuspendedAccountAttempt,
                    json!({"uid": account.uid, "account": fingerprint}),
                );
                LoginOutcome::Rejected {
                    message: ACCOUNT_SUSPENDED.into(),
                }
            }
            AccountStatus::Inactive => {
                self.events.record(
                    SecurityEventType::InactiveAccountAttempt,
                    json!({"uid": account.uid, "account": fingerprint}),
                );
                LoginOutcome::Rejected {
                    message: ACCOUNT_INACTIVE.into(),
                }
            }
        }
    }

    fn on_failure(&self, fingerprint: &str, reason: &str) -> LoginOutcome {
        let now = self.clock.now();
        let cooling = self.throttle.record_failure(now);
        self.events.record(
            SecurityEventType::LoginFailed,
            json!({"account": fingerprint, "reason": reason}),
        );
        if cooling {
            let retry_after_secs = self.throttle.time_remaining(now);
            LoginOutcome::Throttled {
                message: cooldown_message(retry_after_secs),
                retry_after_secs,
            }
        } else {
            LoginOutcome::Rejected {
                message: INVALID_CREDENTIALS.into(),
            }
        }
    }
}
