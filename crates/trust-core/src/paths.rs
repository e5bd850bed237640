use directories::ProjectDirs;
use std::path::PathBuf;

pub const APP_QUALIFIER: &str = "com";
pub const APP_ORG: &str = "darklock";
pub const APP_NAME: &str = "trust";

/// Overrides the data directory.
pub const DATA_DIR_ENV: &str = "TRUST_DATA_DIR";

pub fn data_dir() -> anyhow::Result<PathBuf> {
    if let Ok(override_path) = std::env::var(DATA_DIR_ENV) {
        return Ok(PathBuf::from(override_path));
    }
    let dirs = ProjectDirs::from(APP_QUALIFIER, APP_ORG, APP_NAME)
        .ok_or_else(|| anyhow::anyhow!("cannot determine data directory"))?;
    Ok(dirs.data_dir().to_path_buf())
}

pub fn cookie_jar_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("cookies.json"))
}

/// Session-scoped state; deleting this file ends the browsing session.
pub fn session_store_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("session.json"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("config.json"))
}

pub fn users_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("users.json"))
}
