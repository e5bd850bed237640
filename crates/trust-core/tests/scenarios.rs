use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use trust_core::clock::{Clock, ManualClock};
use trust_core::config::TrustConfig;
use trust_core::event_log::SecurityEventType;
use trust_core::login::{
    too_soon_message, AuthenticatedAccount, Authenticator, Credentials, LoginOutcome,
    ACCOUNT_SUSPENDED, INVALID_CREDENTIALS,
};
use trust_core::preferences::{cookie_consent, set_cookie_consent, COOKIE_CONSENT};
use trust_core::session::{AccountStatus, GuardOutcome, SESSION_TOKEN, USER_SESSION};
use trust_core::signed_store::{CookieOptions, SignedEntry};
use trust_core::storage::{MemoryCookieJar, MemoryStore};
use trust_core::throttle::{AttemptDecision, ThrottlePhase};
use trust_core::{TrustError, TrustLayer};

struct Directory {
    accounts: HashMap<String, (String, AuthenticatedAccount)>,
}

impl Directory {
    fn new() -> Self {
        let mut accounts = HashMap::new();
        for (email, uid, status) in [
            ("ada@example.com", "uid-ada", AccountStatus::Active),
            ("pat@example.com", "uid-pat", AccountStatus::Pending),
            ("sam@example.com", "uid-sam", AccountStatus::Suspended),
            ("ian@example.com", "uid-ian", AccountStatus::Inactive),
        ] {
            accounts.insert(
                email.to_string(),
                (
                    "s3cret-pass".to_string(),
                    AuthenticatedAccount {
                        uid: uid.to_string(),
                        status,
                    },
                ),
            );
        }
        Self { accounts }
    }
}

#[async_trait]
impl Authenticator for Directory {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthenticatedAccount, TrustError> {
        match self.accounts.get(email) {
            Some((expected, account)) if expected == password => Ok(account.clone()),
            _ => Err(TrustError::Authentication),
        }
    }
}

struct Harness {
    layer: TrustLayer,
    jar: Arc<MemoryCookieJar>,
    session: Arc<MemoryStore>,
    clock: Arc<ManualClock>,
}

fn harness() -> Harness {
    let jar = Arc::new(MemoryCookieJar::new());
    let session = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let layer = TrustLayer::new(
        &TrustConfig::default(),
        None,
        jar.clone(),
        session.clone(),
        clock.clone(),
    )
    .unwrap();
    Harness {
        layer,
        jar,
        session,
        clock,
    }
}

// Failures are recorded on the guard directly: through `LoginFlow` the
// cooldown is checked first and the minimum interval only while open, so
// submissions spaced under the interval are refused without being counted.
#[test]
fn scenario_a_cooldown_boundaries() {
    let h = harness();
    let throttle = &h.layer.throttle;
    let t0 = h.clock.now();
    throttle.record_failure(t0);
    throttle.record_failure(t0 + Duration::milliseconds(400));
    assert!(throttle.record_failure(t0 + Duration::milliseconds(800)));

    let ThrottlePhase::Cooling { until } = throttle.state().phase() else {
        panic!("expected cooldown");
    };
    assert!(!throttle.can_attempt(until - Duration::milliseconds(1)));
    assert!(throttle.time_remaining(until - Duration::milliseconds(1)) > 0);
    assert_eq!(throttle.state().attempts, 3);

    assert!(throttle.can_attempt(until + Duration::milliseconds(1)));
    assert_eq!(throttle.state().attempts, 0);
    assert_eq!(throttle.state().phase(), ThrottlePhase::Open);
}

#[test]
fn scenario_b_corrupted_signature_is_dropped() {
    let h = harness();
    set_cookie_consent(&h.layer.store, true).unwrap();
    assert_eq!(cookie_consent(&h.layer.store), Some(true));

    let raw = h.jar.raw(COOKIE_CONSENT).unwrap().value;
    let mut entry: SignedEntry = serde_json::from_str(&raw).unwrap();
    let mut sig: Vec<char> = entry.signature.chars().collect();
    sig[10] = if sig[10] == '0' { '1' } else { '0' };
    entry.signature = sig.into_iter().collect();
    h.jar
        .overwrite_raw(COOKIE_CONSENT, &serde_json::to_string(&entry).unwrap());

    assert_eq!(h.layer.store.get::<String>(COOKIE_CONSENT), None);
    assert!(h.jar.raw(COOKIE_CONSENT).is_none());
    let events = h.layer.events.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_type, SecurityEventType::CookieTampered);
    assert_eq!(events[0].details["name"], COOKIE_CONSENT);
}

#[tokio::test]
async fn scenario_c_suspended_account_gets_no_session() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));
    let outcome = flow
        .submit(&Credentials::new("sam@example.com", "s3cret-pass"))
        .await;
    assert_eq!(
        outcome,
        LoginOutcome::Rejected {
            message: ACCOUNT_SUSPENDED.into()
        }
    );
    assert!(outcome.message().unwrap().contains("deactivated"));
    assert!(h.jar.raw(USER_SESSION).is_none());
    assert_eq!(
        h.layer
            .events
            .count(SecurityEventType::SuspendedAccountAttempt),
        1
    );
}

#[tokio::test]
async fn failed_logins_trigger_cooldown_then_recover() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));
    let wrong = Credentials::new("ada@example.com", "nope");

    for _ in 0..2 {
        assert_eq!(
            flow.submit(&wrong).await,
            LoginOutcome::Rejected {
                message: INVALID_CREDENTIALS.into()
            }
        );
        h.clock.advance(Duration::seconds(2));
    }
    let third = flow.submit(&wrong).await;
    assert!(matches!(
        third,
        LoginOutcome::Throttled {
            retry_after_secs: 10,
            ..
        }
    ));

    h.clock.advance(Duration::seconds(3));
    let right = Credentials::new("ada@example.com", "s3cret-pass");
    match flow.submit(&right).await {
        LoginOutcome::Throttled {
            retry_after_secs, ..
        } => assert_eq!(retry_after_secs, 7),
        other => panic!("expected throttled, got {other:?}"),
    }
    assert_eq!(h.layer.throttle.state().attempts, 3);

    h.clock.advance(Duration::seconds(7));
    let LoginOutcome::Proceed(record) = flow.submit(&right).await else {
        panic!("expected login to proceed");
    };
    assert_eq!(record.uid, "uid-ada");
    assert_eq!(h.layer.throttle.state().attempts, 0);
    assert_eq!(h.layer.sessions.current_session(), Some(record));
    assert!(h.layer.sessions.require_authenticated().is_proceed());
    assert_eq!(h.layer.events.count(SecurityEventType::LoginFailed), 3);
    assert_eq!(h.layer.events.count(SecurityEventType::CooldownStarted), 1);
    assert_eq!(h.layer.events.count(SecurityEventType::LoginSuccess), 1);
}

#[tokio::test]
async fn rapid_submissions_are_not_counted() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));
    let wrong = Credentials::new("ada@example.com", "nope");

    flow.submit(&wrong).await;
    h.clock.advance(Duration::milliseconds(500));
    let outcome = flow.submit(&wrong).await;
    assert_eq!(
        outcome,
        LoginOutcome::Throttled {
            message: too_soon_message(2),
            retry_after_secs: 2
        }
    );
    assert_eq!(h.layer.throttle.state().attempts, 1);
    assert_eq!(h.layer.events.count(SecurityEventType::LoginThrottled), 1);
    assert_eq!(
        h.layer.throttle.check(h.clock.now()),
        AttemptDecision::TooSoon {
            retry_after_ms: 1500
        }
    );
}

#[tokio::test]
async fn three_failures_within_one_second_count_once() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));
    let wrong = Credentials::new("ada@example.com", "nope");

    for _ in 0..3 {
        flow.submit(&wrong).await;
        h.clock.advance(Duration::milliseconds(300));
    }
    assert_eq!(h.layer.throttle.state().attempts, 1);
    assert_eq!(h.layer.throttle.state().phase(), ThrottlePhase::Open);
    assert_eq!(h.layer.events.count(SecurityEventType::LoginFailed), 1);
    assert_eq!(h.layer.events.count(SecurityEventType::LoginThrottled), 2);
}

#[tokio::test]
async fn pending_and_inactive_accounts() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));

    let outcome = flow
        .submit(&Credentials::new("pat@example.com", "s3cret-pass"))
        .await;
    assert_eq!(
        outcome,
        LoginOutcome::PendingApproval {
            uid: "uid-pat".into()
        }
    );
    assert!(h.jar.raw(USER_SESSION).is_none());

    h.clock.advance(Duration::seconds(2));
    let outcome = flow
        .submit(&Credentials::new("ian@example.com", "s3cret-pass"))
        .await;
    assert!(matches!(outcome, LoginOutcome::Rejected { .. }));
    assert!(h.jar.raw(USER_SESSION).is_none());
    assert_eq!(
        h.layer.events.count(SecurityEventType::InactiveAccountAttempt),
        1
    );
}

#[tokio::test]
async fn malformed_input_is_not_an_attempt() {
    let h = harness();
    let flow = h.layer.login_flow(Arc::new(Directory::new()));
    let outcome = flow.submit(&Credentials::new("not-an-email", "x")).await;
    assert!(matches!(outcome, LoginOutcome::Invalid { .. }));
    assert_eq!(h.layer.throttle.state().attempts, 0);
    assert!(h.layer.throttle.check(h.clock.now()).is_allowed());
}

#[test]
fn protected_view_recovers_from_tampered_token() {
    let h = harness();
    let GuardOutcome::Proceed { token } = h.layer.sessions.enter_protected_view() else {
        panic!("expected proceed");
    };
    let raw = h.jar.raw(SESSION_TOKEN).unwrap().value;
    let mut entry: SignedEntry = serde_json::from_str(&raw).unwrap();
    entry.timestamp += 1;
    h.jar
        .overwrite_raw(SESSION_TOKEN, &serde_json::to_string(&entry).unwrap());

    let GuardOutcome::Proceed { token: fresh } = h.layer.sessions.enter_protected_view() else {
        panic!("expected proceed");
    };
    assert_ne!(token, fresh);
    assert_eq!(h.layer.events.count(SecurityEventType::CookieTampered), 1);
    assert_eq!(
        h.layer.sessions.require_authenticated(),
        GuardOutcome::RedirectToLogin
    );
}

#[test]
fn session_scoped_key_survives_reload_but_not_session_end() {
    let h = harness();
    h.layer
        .store
        .put("user_preferences", "compact", CookieOptions::default())
        .unwrap();

    let reloaded = TrustLayer::new(
        &TrustConfig::default(),
        None,
        h.jar.clone(),
        h.session.clone(),
        h.clock.clone(),
    )
    .unwrap();
    assert_eq!(
        reloaded.store.get::<String>("user_preferences").as_deref(),
        Some("compact")
    );

    reloaded.end_session().unwrap();
    let next = TrustLayer::new(
        &TrustConfig::default(),
        None,
        h.jar.clone(),
        h.session.clone(),
        h.clock.clone(),
    )
    .unwrap();
    assert_eq!(next.store.get::<String>("user_preferences"), None);
    assert_eq!(next.events.count(SecurityEventType::CookieTampered), 1);
}

#[test]
fn injected_key_decrypts_across_sessions() {
    let jar = Arc::new(MemoryCookieJar::new());
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let config = TrustConfig::default();
    let first = TrustLayer::new(
        &config,
        Some("deployment passphrase"),
        jar.clone(),
        Arc::new(MemoryStore::new()),
        clock.clone(),
    )
    .unwrap();
    set_cookie_consent(&first.store, false).unwrap();

    let second = TrustLayer::new(
        &config,
        Some("deployment passphrase"),
        jar,
        Arc::new(MemoryStore::new()),
        clock,
    )
    .unwrap();
    assert_eq!(cookie_consent(&second.store), Some(false));
}
