//! Configuration management for the lost-mode agent
//!
//! Two persisted documents live in the data directory: `config.json`, the
//! static server/timing/host parameters, and `preferences.json`, the small
//! key-value store written by the user-facing layer.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod paths;
pub mod preferences;

pub use paths::{admin_marker_path, config_path, data_dir, preferences_path, status_path};
pub use preferences::{
    FilePreferences, MemoryPreferences, PreferenceStore, Preferences, UserMode,
};

/// Errors in configuration storage
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("STORAGE FAULT: {0}")]
    Io(#[from] std::io::Error),

    #[error("CORRUPTED RECORD: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Backend server and endpoint paths
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_update_path")]
    pub update_path: String,
    #[serde(default = "default_devices_path")]
    pub devices_path: String,
    #[serde(default = "default_command_path")]
    pub command_path: String,
    #[serde(default = "default_login_path")]
    pub login_path: String,
    #[serde(default = "default_signup_path")]
    pub signup_path: String,
    #[serde(default = "default_add_device_path")]
    pub add_device_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            update_path: default_update_path(),
            devices_path: default_devices_path(),
            command_path: default_command_path(),
            login_path: default_login_path(),
            signup_path: default_signup_path(),
            add_device_path: default_add_device_path(),
        }
    }
}

impl ServerConfig {
    /// Join an endpoint path onto the base URL
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    pub fn update_url(&self) -> String {
        self.url(&self.update_path)
    }

    pub fn devices_url(&self) -> String {
        self.url(&self.devices_path)
    }

    pub fn command_url(&self) -> String {
        self.url(&self.command_path)
    }

    pub fn login_url(&self) -> String {
        self.url(&self.login_path)
    }

    pub fn signup_url(&self) -> String {
        self.url(&self.signup_path)
    }

    pub fn add_device_url(&self) -> String {
        self.url(&self.add_device_path)
    }
}

fn default_base_url() -> String {
    "http://192.168.1.147:5000".to_string()
}

fn default_update_path() -> String {
    "/update".to_string()
}

fn default_devices_path() -> String {
    "/devices".to_string()
}

fn default_command_path() -> String {
    "/command".to_string()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_signup_path() -> String {
    "/signup".to_string()
}

fn default_add_device_path() -> String {
    "/add_device".to_string()
}

/// Uplink timing and retry parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Total delivery attempts per report
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl NetworkConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    15_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_backoff_initial_ms() -> u64 {
    1_000
}

fn default_backoff_max_ms() -> u64 {
    8_000
}

/// Reporting cadence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_fastest_interval_ms")]
    pub fastest_interval_ms: u64,
    #[serde(default = "default_capability_recheck_ms")]
    pub capability_recheck_ms: u64,
    #[serde(default = "default_alert_duration_ms")]
    pub alert_duration_ms: u64,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            fastest_interval_ms: default_fastest_interval_ms(),
            capability_recheck_ms: default_capability_recheck_ms(),
            alert_duration_ms: default_alert_duration_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    10_000
}

fn default_fastest_interval_ms() -> u64 {
    5_000
}

fn default_capability_recheck_ms() -> u64 {
    10_000
}

fn default_alert_duration_ms() -> u64 {
    6_000
}

/// Host collaborators used by the `lostmode` binary
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    /// JSON file holding the latest position fix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_file: Option<String>,
    /// Program and arguments that lock the screen
    #[serde(default)]
    pub lock_command: Vec<String>,
    /// Program and arguments that play the alert sound
    #[serde(default)]
    pub alert_command: Vec<String>,
}

/// Root configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub reporting: ReportingConfig,
    #[serde(default)]
    pub host: HostConfig,
}

impl Config {
    /// Load configuration from the data directory
    pub async fn load() -> Result<Self> {
        let path = config_path();
        Self::load_from(&path).await
    }

    /// Load from specific location
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("◆ NO CONFIG AT {:?}, USING DEFAULTS", path);
            return Ok(Config::default());
        }

        debug!("◆ READING CONFIG FROM {:?}", path);
        let content = tokio::fs::read_to_string(path).await?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration
    pub async fn save(&self) -> Result<()> {
        let path = config_path();
        self.save_to(&path).await
    }

    /// Save to specific location
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        debug!("◆ WRITING CONFIG TO {:?}", path);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Location file, if one is configured
    pub fn location_file(&self) -> Option<&str> {
        self.host
            .location_file
            .as_deref()
            .filter(|p| !p.trim().is_empty())
    }
}

/// Initialize the data directory with default config and preferences
pub async fn init() -> Result<Config> {
    let config_path = config_path();

    if config_path.exists() {
        warn!("◆ CONFIG ALREADY PRESENT AT {:?}", config_path);
    } else {
        let config = Config::default();
        config.save().await?;
        info!("◆ CONFIG ESTABLISHED AT {:?}", config_path);
    }

    let prefs_path = preferences_path();
    if !prefs_path.exists() {
        Preferences::default().save_to(&prefs_path).await?;
        info!("◆ PREFERENCES ESTABLISHED AT {:?}", prefs_path);
    }

    Config::load().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining_tolerates_slashes() {
        let server = ServerConfig {
            base_url: "http://host:5000/".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(server.update_url(), "http://host:5000/update");
        assert_eq!(server.url("devices"), "http://host:5000/devices");
    }

    #[test]
    fn test_blank_location_file_is_absent() {
        let mut config = Config::default();
        assert!(config.location_file().is_none());

        config.host.location_file = Some("   ".to_string());
        assert!(config.location_file().is_none());

        config.host.location_file = Some("/tmp/fix.json".to_string());
        assert_eq!(config.location_file(), Some("/tmp/fix.json"));
    }
}
