//! Persisted key-value preferences
//!
//! Written by the user-facing layer (mode selection, login, device
//! registration). The agent only reads them, apart from storing a rotated
//! auth token.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::Result;

/// Mode chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserMode {
    #[default]
    Ai,
    Secure,
    Both,
}

impl UserMode {
    /// Parse a stored mode string; anything unknown falls back to `Ai`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "SECURE" => UserMode::Secure,
            "BOTH" => UserMode::Both,
            _ => UserMode::Ai,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserMode::Ai => "AI",
            UserMode::Secure => "SECURE",
            UserMode::Both => "BOTH",
        }
    }

    /// Whether location reporting must run in this mode
    pub fn requires_reporting(&self) -> bool {
        matches!(self, UserMode::Secure | UserMode::Both)
    }
}

/// Contents of `preferences.json`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_device_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
}

impl Preferences {
    pub fn mode(&self) -> UserMode {
        self.user_mode
            .as_deref()
            .map(UserMode::parse)
            .unwrap_or_default()
    }

    pub fn set_mode(&mut self, mode: UserMode) {
        self.user_mode = Some(mode.as_str().to_string());
    }

    /// Registered device id; non-positive ids count as unset
    pub fn device_id(&self) -> Option<i64> {
        self.selected_device_id.filter(|id| *id > 0)
    }

    /// Bearer token, ignoring empty values
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }

    /// Load from file; a missing file yields empty preferences
    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("◆ NO PREFERENCES AT {:?}", path);
            return Ok(Preferences::default());
        }
        let content = tokio::fs::read_to_string(path).await?;
        let prefs: Preferences = serde_json::from_str(&content)?;
        Ok(prefs)
    }

    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }
}

/// Read/write access to the preference store
#[async_trait]
pub trait PreferenceStore: Send + Sync {
    /// Current preferences, read fresh at each decision point
    async fn snapshot(&self) -> Preferences;

    /// Persist a token rotated by the backend
    async fn store_auth_token(&self, token: &str) -> Result<()>;
}

/// Preferences backed by a JSON file, re-read on every snapshot
#[derive(Debug, Clone)]
pub struct FilePreferences {
    path: PathBuf,
}

impl FilePreferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PreferenceStore for FilePreferences {
    async fn snapshot(&self) -> Preferences {
        match Preferences::load_from(&self.path).await {
            Ok(prefs) => prefs,
            Err(e) => {
                warn!("◆ UNREADABLE PREFERENCES {:?}: {}", self.path, e);
                Preferences::default()
            }
        }
    }

    async fn store_auth_token(&self, token: &str) -> Result<()> {
        let mut prefs = Preferences::load_from(&self.path).await?;
        prefs.auth_token = Some(token.to_string());
        prefs.save_to(&self.path).await?;
        info!("◆ AUTH TOKEN ROTATED");
        Ok(())
    }
}

/// In-memory preferences
#[derive(Debug, Default)]
pub struct MemoryPreferences {
    inner: RwLock<Preferences>,
}

impl MemoryPreferences {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            inner: RwLock::new(prefs),
        }
    }

    pub fn with_mode(mode: UserMode) -> Self {
        let mut prefs = Preferences::default();
        prefs.set_mode(mode);
        Self::new(prefs)
    }

    pub async fn set_mode(&self, mode: UserMode) {
        self.inner.write().await.set_mode(mode);
    }

    pub async fn set_device_id(&self, id: Option<i64>) {
        self.inner.write().await.selected_device_id = id;
    }
}

#[async_trait]
impl PreferenceStore for MemoryPreferences {
    async fn snapshot(&self) -> Preferences {
        self.inner.read().await.clone()
    }

    async fn store_auth_token(&self, token: &str) -> Result<()> {
        self.inner.write().await.auth_token = Some(token.to_string());
        Ok(())
    }
}
