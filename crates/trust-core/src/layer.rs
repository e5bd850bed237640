use crate::clock::Clock;
use crate::config::TrustConfig;
use crate::crypto::CryptoCodec;
use crate::error::Result;
use crate::event_log::SecurityEventLog;
use crate::login::{Authenticator, LoginFlow};
use crate::secret_key::SecretKey;
use crate::session::SessionGuard;
use crate::signed_store::SignedStore;
use crate::storage::{CookieJar, KeyValueStore};
use crate::throttle::{ThrottleGuard, ThrottlePolicy};
use std::sync::Arc;

/// Composition root. Owns the one [`SecretKey`] for the process and wires
/// every component over the injected storage media.
pub struct TrustLayer {
    pub codec: Arc<CryptoCodec>,
    pub events: Arc<SecurityEventLog>,
    pub store: Arc<SignedStore>,
    pub throttle: Arc<ThrottleGuard>,
    pub sessions: Arc<SessionGuard>,
    pub clock: Arc<dyn Clock>,
    session_store: Arc<dyn KeyValueStore>,
}

impl TrustLayer {
    pub fn new(
        config: &TrustConfig,
        injected_key: Option<&str>,
        jar: Arc<dyn CookieJar>,
        session_store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let key = SecretKey::resolve(injected_key, session_store.as_ref())?;
        Ok(Self::with_key(config, key, jar, session_store, clock))
    }

    pub fn with_key(
        config: &TrustConfig,
        key: SecretKey,
        jar: Arc<dyn CookieJar>,
        session_store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let codec = Arc::new(CryptoCodec::new(key));
        let events = Arc::new(SecurityEventLog::new(
            codec.clone(),
            session_store.clone(),
            clock.clone(),
        ));
        let store = Arc::new(SignedStore::new(
            codec.clone(),
            jar,
            events.clone(),
            clock.clone(),
            config.cookies.clone(),
        ));
        let throttle = Arc::new(ThrottleGuard::new(
            session_store.clone(),
            events.clone(),
            ThrottlePolicy::from(&config.throttle),
        ));
        let sessions = Arc::new(SessionGuard::new(
            store.clone(),
            events.clone(),
            clock.clone(),
            config.session.clone(),
        ));
        Self {
            codec,
            events,
            store,
            throttle,
            sessions,
            clock,
            session_store,
        }
    }

    pub fn login_flow(&self, authenticator: Arc<dyn Authenticator>) -> LoginFlow {
        LoginFlow::new(
            self.throttle.clone(),
            self.sessions.clone(),
            self.events.clone(),
            authenticator,
            self.clock.clone(),
        )
    }

    /// Ends the browsing session: drops every session-scoped key, including
    /// the fallback encryption key and the audit trail.
    pub fn end_session(&self) -> Result<()> {
        self.session_store.clear()
    }
}
