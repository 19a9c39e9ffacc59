//! Data directory layout

use std::path::{Path, PathBuf};

/// Agent data directory (~/.lostmode)
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".lostmode")
}

/// Static configuration location
pub fn config_path() -> PathBuf {
    data_dir().join("config.json")
}

/// Key-value preference store location
pub fn preferences_path() -> PathBuf {
    data_dir().join("preferences.json")
}

/// Last published agent status
pub fn status_path() -> PathBuf {
    data_dir().join("status.json")
}

/// Marker recording that administrative authority was granted
pub fn admin_marker_path() -> PathBuf {
    data_dir().join("admin.active")
}

/// Ensure directory exists
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}
