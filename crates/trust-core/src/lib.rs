//! trust-core: client-side trust layer
//!
//! Hardens a client that cannot fully trust its own storage:
//! - `crypto`: AES-256-GCM sealing, SHA-256 / HMAC-SHA256, random tokens
//! - `secret_key`: the process key, injected or generated per session
//! - `signed_store`: encrypted + HMAC-signed named entries over a cookie jar
//! - `throttle`: login failure counter, cooldown and minimum interval
//! - `session`: session token / user session record on protected views
//! - `login`: the login entry point wiring all of the above
//! - `event_log`: encrypted, append-only security audit trail
//! - `storage`: `KeyValueStore` / `CookieJar` capabilities and impls

pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod event_log;
pub mod layer;
pub mod login;
pub mod paths;
pub mod preferences;
pub mod secret_key;
pub mod session;
pub mod signed_store;
pub mod storage;
pub mod throttle;

pub use error::TrustError;
pub use layer::TrustLayer;
