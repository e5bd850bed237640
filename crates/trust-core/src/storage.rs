//! Storage capabilities the trust layer writes through.
//!
//! `KeyValueStore` is the session-scoped medium (cleared when the browsing
//! session ends). `CookieJar` is the durable medium; every cookie carries
//! persistence attributes and is dropped once it expires.

use crate::error::{Result, TrustError};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CookieAttributes {
    pub expires_at: DateTime<Utc>,
    pub path: String,
    pub secure: bool,
    pub same_site: SameSite,
    pub http_only: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredCookie {
    pub value: String,
    pub attributes: CookieAttributes,
}

impl StoredCookie {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.attributes.expires_at
    }
}

pub trait CookieJar: Send + Sync {
    /// Returns the raw cookie unless it is missing or expired at `now`.
    fn read(&self, name: &str, now: DateTime<Utc>) -> Result<Option<StoredCookie>>;
    fn write(&self, name: &str, cookie: StoredCookie) -> Result<()>;
    fn delete(&self, name: &str) -> Result<()>;
    fn names(&self) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.entries.write().clear();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryCookieJar {
    cookies: RwLock<BTreeMap<String, StoredCookie>>,
}

impl MemoryCookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the raw stored value, bypassing any signing. Test hook for
    /// simulating a hostile storage medium.
    pub fn overwrite_raw(&self, name: &str, value: &str) -> bool {
        match self.cookies.write().get_mut(name) {
            Some(cookie) => {
                cookie.value = value.to_string();
                true
            }
            None => false,
        }
    }

    pub fn raw(&self, name: &str) -> Option<StoredCookie> {
        self.cookies.read().get(name).cloned()
    }
}

impl CookieJar for MemoryCookieJar {
    fn read(&self, name: &str, now: DateTime<Utc>) -> Result<Option<StoredCookie>> {
        let mut guard = self.cookies.write();
        match guard.get(name) {
            Some(cookie) if cookie.is_expired(now) => {
                guard.remove(name);
                Ok(None)
            }
            Some(cookie) => Ok(Some(cookie.clone())),
            None => Ok(None),
        }
    }

    fn write(&self, name: &str, cookie: StoredCookie) -> Result<()> {
        self.cookies.write().insert(name.to_string(), cookie);
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.cookies.write().remove(name);
        Ok(())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.cookies.read().keys().cloned().collect())
    }
}

/// A JSON map persisted to a single file, rewritten atomically on every change.
#[derive(Debug)]
struct JsonMapFile {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonMapFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    fn load<V: DeserializeOwned>(&self) -> Result<BTreeMap<String, V>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&data)?)
    }

    fn store<V: Serialize>(&self, map: &BTreeMap<String, V>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        let mut file = fs::File::create(&tmp)?;
        file.write_all(serde_json::to_string_pretty(map)?.as_bytes())?;
        file.flush()?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<V, R>(&self, f: impl FnOnce(&mut BTreeMap<String, V>) -> R) -> Result<R>
    where
        V: Serialize + DeserializeOwned,
    {
        let _guard = self.lock.lock();
        let mut map = self.load()?;
        let out = f(&mut map);
        self.store(&map)?;
        Ok(out)
    }

    fn read<V: DeserializeOwned>(&self) -> Result<BTreeMap<String, V>> {
        let _guard = self.lock.lock();
        self.load()
    }

    fn delete_file(&self) -> Result<()> {
        let _guard = self.lock.lock();
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TrustError::Io(e)),
        }
    }
}

/// Session-scoped store backed by a file that is deleted when the session ends.
#[derive(Debug)]
pub struct FileStore {
    file: JsonMapFile,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file: JsonMapFile::new(path.as_ref().to_path_buf()),
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.file.read::<String>()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.file.update::<String, _>(|map| {
            map.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.file.update::<String, _>(|map| {
            map.remove(key);
        })
    }

    fn clear(&self) -> Result<()> {
        self.file.delete_file()
    }
}

/// Durable cookie jar backed by a JSON file.
#[derive(Debug)]
pub struct FileCookieJar {
    file: JsonMapFile,
}

impl FileCookieJar {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            file: JsonMapFile::new(path.as_ref().to_path_buf()),
        }
    }
}

impl CookieJar for FileCookieJar {
    fn read(&self, name: &str, now: DateTime<Utc>) -> Result<Option<StoredCookie>> {
        let cookie = match self.file.read::<StoredCookie>()?.remove(name) {
            Some(cookie) => cookie,
            None => return Ok(None),
        };
        if cookie.is_expired(now) {
            self.delete(name)?;
            return Ok(None);
        }
        Ok(Some(cookie))
    }

    fn write(&self, name: &str, cookie: StoredCookie) -> Result<()> {
        self.file.update::<StoredCookie, _>(|map| {
            map.insert(name.to_string(), cookie);
        })
    }

    fn delete(&self, name: &str) -> Result<()> {
        self.file.update::<StoredCookie, _>(|map| {
            map.remove(name);
        })
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self.file.read::<StoredCookie>()?.into_keys().collect())
    }
}
