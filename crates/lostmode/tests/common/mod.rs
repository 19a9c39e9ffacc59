//! Common test utilities for Lostmode integration tests
#![allow(dead_code)]

use assert_cmd::Command;
use std::path::PathBuf;
use tempfile::{tempdir, TempDir};

/// Isolated HOME with its own ~/.lostmode
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub data_dir: PathBuf,
}

impl TestEnv {
    pub fn new() -> anyhow::Result<Self> {
        let temp_dir = tempdir()?;
        let data_dir = temp_dir.path().join(".lostmode");
        std::fs::create_dir_all(&data_dir)?;

        Ok(Self { temp_dir, data_dir })
    }

    /// Path to a file in the data directory
    pub fn data_file(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Command with HOME pointed at the test environment
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_lostmode"));
        cmd.env("HOME", self.temp_dir.path());
        cmd.env_remove("RUST_LOG");
        cmd
    }

    /// Write a config that talks to `base_url`
    pub fn create_config(&self, base_url: &str) -> anyhow::Result<()> {
        let config = serde_json::json!({
            "server": { "base_url": base_url },
            "network": { "timeout_ms": 2000 },
            "host": {
                "location_file": self.data_file("fix.json").to_string_lossy(),
                "lock_command": ["true"]
            }
        });
        std::fs::write(
            self.data_file("config.json"),
            serde_json::to_string_pretty(&config)?,
        )?;
        Ok(())
    }

    /// Write preferences with a token and device id
    pub fn create_preferences(&self, mode: &str, token: &str, device_id: i64) -> anyhow::Result<()> {
        let prefs = serde_json::json!({
            "user_mode": mode,
            "auth_token": token,
            "selected_device_id": device_id,
        });
        std::fs::write(
            self.data_file("preferences.json"),
            serde_json::to_string_pretty(&prefs)?,
        )?;
        Ok(())
    }

    pub fn read_preferences(&self) -> anyhow::Result<serde_json::Value> {
        let content = std::fs::read_to_string(self.data_file("preferences.json"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new().expect("Failed to create test environment")
    }
}
