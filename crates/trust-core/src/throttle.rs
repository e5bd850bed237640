//! Login-attempt throttling.
//!
//! `ThrottleState` is a pure state machine: every transition takes an explicit
//! `now`. `ThrottleGuard` persists it in the session store so it survives
//! reloads, and `CooldownTicker` drives a once-per-second countdown while the
//! guard is cooling down.

use crate::clock::Clock;
use crate::config::ThrottleSettings;
use crate::event_log::{SecurityEventLog, SecurityEventType};
use crate::storage::KeyValueStore;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const LOGIN_ATTEMPTS_KEY: &str = "loginAttempts";
pub const COOLDOWN_END_KEY: &str = "cooldownEndTime";
pub const LAST_ATTEMPT_KEY: &str = "lastAttemptTime";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThrottlePolicy {
    pub max_attempts: u32,
    pub cooldown: Duration,
    pub min_interval: Duration,
}

impl Default for ThrottlePolicy {
    fn default() -> Self {
        Self::from(&ThrottleSettings::default())
    }
}

impl From<&ThrottleSettings> for ThrottlePolicy {
    fn from(settings: &ThrottleSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            cooldown: i64::try_from(settings.cooldown_secs)
                .ok()
                .and_then(Duration::try_seconds)
                .unwrap_or(Duration::MAX),
            min_interval: Duration::milliseconds(
                i64::try_from(settings.min_attempt_interval_ms).unwrap_or(i64::MAX),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottlePhase {
    Open,
    Cooling { until: DateTime<Utc> },
}

/// Verdict on a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptDecision {
    Allowed,
    /// Cooldown in force; whole seconds remaining.
    CoolingDown { retry_after_secs: u64 },
    /// Submitted before the minimum interval elapsed.
    TooSoon { retry_after_ms: i64 },
}

impl AttemptDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThrottleState {
    pub attempts: u32,
    pub cooldown_end_time: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
}

impl ThrottleState {
    pub fn phase(&self) -> ThrottlePhase {
        match self.cooldown_end_time {
            Some(until) => ThrottlePhase::Cooling { until },
            None => ThrottlePhase::Open,
        }
    }

    /// True unless cooling down. Reaching the end of the cooldown reopens the
    /// guard and resets the counter.
    pub fn can_attempt(&mut self, now: DateTime<Utc>) -> bool {
        match self.cooldown_end_time {
            Some(until) if now < until => false,
            Some(_) => {
                self.attempts = 0;
                self.cooldown_end_time = None;
                true
            }
            None => true,
        }
    }

    /// Gate for a new submission. The cooldown is checked first; the minimum
    /// interval only applies while open. An allowed submission stamps the
    /// interval timer, a rejected one leaves everything untouched.
    pub fn check(&mut self, now: DateTime<Utc>, policy: &ThrottlePolicy) -> AttemptDecision {
        if !self.can_attempt(now) {
            return AttemptDecision::CoolingDown {
                retry_after_secs: self.time_remaining(now),
            };
        }
        if let Some(last) = self.last_attempt_at {
            let elapsed = now - last;
            if elapsed < policy.min_interval {
                let wait = policy
                    .min_interval
                    .checked_sub(&elapsed)
                    .unwrap_or(Duration::MAX);
                return AttemptDecision::TooSoon {
                    retry_after_ms: wait.num_milliseconds(),
                };
            }
        }
        self.last_attempt_at = Some(now);
        AttemptDecision::Allowed
    }

    /// Counts a failure. Returns true when this failure started (or extended)
    /// a cooldown.
    pub fn record_failure(&mut self, now: DateTime<Utc>, policy: &ThrottlePolicy) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts < policy.max_attempts {
            return false;
        }
        // A cooldown past the representable range is a lockout.
        let until = now
            .checked_add_signed(policy.cooldown)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.cooldown_end_time = Some(match self.cooldown_end_time {
            Some(existing) if existing > until => existing,
            _ => until,
        });
        true
    }

    pub fn record_success(&mut self) {
        *self = Self::default();
    }

    /// Whole seconds until the cooldown ends, rounded up; 0 when open.
    pub fn time_remaining(&self, now: DateTime<Utc>) -> u64 {
        match self.cooldown_end_time {
            Some(until) if until > now => {
                let ms = (until - now).num_milliseconds() as u64;
                ms.div_ceil(1000)
            }
            _ => 0,
        }
    }
}

/// Persists [`ThrottleState`] under the session-scoped keys.
pub struct ThrottleGuard {
    store: Arc<dyn KeyValueStore>,
    events: Arc<SecurityEventLog>,
    policy: ThrottlePolicy,
    lock: Mutex<()>,
}

impl ThrottleGuard {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        events: Arc<SecurityEventLog>,
        policy: ThrottlePolicy,
    ) -> Self {
        Self {
            store,
            events,
            policy,
            lock: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &ThrottlePolicy {
        &self.policy
    }

    pub fn state(&self) -> ThrottleState {
        self.load()
    }

    pub fn can_attempt(&self, now: DateTime<Utc>) -> bool {
        self.transition(|state| state.can_attempt(now))
    }

    pub fn check(&self, now: DateTime<Utc>) -> AttemptDecision {
        let policy = self.policy;
        self.transition(|state| state.check(now, &policy))
    }

    pub fn record_failure(&self, now: DateTime<Utc>) -> bool {
        let policy = self.policy;
        let (cooling, state) = self.transition(|state| (state.record_failure(now, &policy), *state));
        if cooling {
            self.events.record(
                SecurityEventType::CooldownStarted,
                json!({
                    "attempts": state.attempts,
                    "cooldownEndTime": state.cooldown_end_time.map(|t| t.timestamp_millis()),
                }),
            );
        }
        cooling
    }

    pub fn record_success(&self) {
        let _guard = self.lock.lock();
        for key in [LOGIN_ATTEMPTS_KEY, COOLDOWN_END_KEY, LAST_ATTEMPT_KEY] {
            if let Err(err) = self.store.remove(key) {
                warn!(key, "failed to clear throttle state: {err}");
            }
        }
    }

    pub fn time_remaining(&self, now: DateTime<Utc>) -> u64 {
        self.load().time_remaining(now)
    }

    fn transition<R>(&self, f: impl FnOnce(&mut ThrottleState) -> R) -> R {
        let _guard = self.lock.lock();
        let mut state = self.load();
        let before = state;
        let out = f(&mut state);
        if state != before {
            self.save(&state);
        }
        out
    }

    fn load(&self) -> ThrottleState {
        ThrottleState {
            attempts: self
                .read_key(LOGIN_ATTEMPTS_KEY)
                .and_then(|n| match u32::try_from(n) {
                    Ok(n) => Some(n),
                    Err(_) => {
                        warn!("ignoring out-of-range attempt count");
                        None
                    }
                })
                .unwrap_or(0),
            cooldown_end_time: self
                .read_key(COOLDOWN_END_KEY)
                .and_then(DateTime::<Utc>::from_timestamp_millis),
            last_attempt_at: self
                .read_key(LAST_ATTEMPT_KEY)
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }

    fn read_key(&self, key: &str) -> Option<i64> {
        match self.store.get(key) {
            Ok(Some(raw)) => match raw.trim().parse::<i64>() {
                Ok(value) if value >= 0 => Some(value),
                _ => {
                    warn!(key, "ignoring malformed throttle value");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(key, "throttle state unreadable: {err}");
                None
            }
        }
    }

    fn save(&self, state: &ThrottleState) {
        let writes = [
            (LOGIN_ATTEMPTS_KEY, Some(state.attempts as i64).filter(|n| *n > 0)),
            (
                COOLDOWN_END_KEY,
                state.cooldown_end_time.map(|t| t.timestamp_millis()),
            ),
            (
                LAST_ATTEMPT_KEY,
                state.last_attempt_at.map(|t| t.timestamp_millis()),
            ),
        ];
        for (key, value) in writes {
            let result = match value {
                Some(v) => self.store.set(key, &v.to_string()),
                None => self.store.remove(key),
            };
            if let Err(err) = result {
                warn!(key, "failed to persist throttle state: {err}");
            }
        }
        debug!(attempts = state.attempts, "throttle state persisted");
    }
}

/// Emits the remaining cooldown seconds once per second until the guard
/// reopens, then sends a final `0` and stops. Dropping the ticker cancels it.
pub struct CooldownTicker {
    handle: JoinHandle<()>,
}

impl CooldownTicker {
    pub fn spawn(
        guard: Arc<ThrottleGuard>,
        clock: Arc<dyn Clock>,
        tx: mpsc::UnboundedSender<u64>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                interval.tick().await;
                let now = clock.now();
                if guard.can_attempt(now) {
                    let _ = tx.send(0);
                    break;
                }
                if tx.send(guard.time_remaining(now)).is_err() {
                    break;
                }
            }
        });
        Self { handle }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CooldownTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
