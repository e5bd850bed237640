use crate::error::Result;
use crate::signed_store::{CookieOptions, SignedStore};
use serde::{Deserialize, Serialize};

pub const COOKIE_CONSENT: &str = "cookie_consent";
pub const USER_PREFERENCES: &str = "user_preferences";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct UserPreferences {
    pub theme: Theme,
    pub language: String,
    pub analytics: bool,
    pub remember_email: bool,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            theme: Theme::System,
            language: "en".into(),
            analytics: false,
            remember_email: false,
        }
    }
}

/// Consent is stored as the strings `"true"` / `"false"`.
pub fn set_cookie_consent(store: &SignedStore, accepted: bool) -> Result<()> {
    store.put(
        COOKIE_CONSENT,
        if accepted { "true" } else { "false" },
        CookieOptions::default(),
    )
}

/// `None` until the user has answered (or after the entry was rejected).
pub fn cookie_consent(store: &SignedStore) -> Option<bool> {
    match store.get::<String>(COOKIE_CONSENT)?.as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

pub fn load_preferences(store: &SignedStore) -> UserPreferences {
    store.get(USER_PREFERENCES).unwrap_or_default()
}

pub fn save_preferences(store: &SignedStore, prefs: &UserPreferences) -> Result<()> {
    store.put(USER_PREFERENCES, prefs, CookieOptions::default())
}
