//! Host-side collaborators for a desktop or server install

use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::UNIX_EPOCH;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use lostmode_agent::{
    ActuatorError, AlertActuator, CapabilityProbe, CapabilitySet, LocationProvider, LockActuator,
    PositionError, PositionSample,
};
use lostmode_config::Config;

/// Fix as written by whatever feeds the location file
#[derive(Debug, Deserialize)]
struct FixRecord {
    lat: f64,
    lng: f64,
    #[serde(default)]
    accuracy: f64,
    #[serde(default)]
    timestamp: Option<i64>,
}

/// Reads the latest fix from a JSON file
pub struct FileLocationProvider {
    path: PathBuf,
}

impl FileLocationProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl LocationProvider for FileLocationProvider {
    async fn current_position(&self) -> Result<Option<PositionSample>, PositionError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PositionError::Unavailable(e.to_string())),
        };
        if content.trim().is_empty() {
            return Ok(None);
        }

        let fix: FixRecord = serde_json::from_str(&content)
            .map_err(|e| PositionError::Unavailable(format!("bad fix record: {}", e)))?;

        // Without an explicit timestamp the file's mtime dates the fix
        let captured_at = match fix.timestamp {
            Some(t) => t,
            None => tokio::fs::metadata(&self.path)
                .await
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64)
                .unwrap_or_else(|| chrono::Utc::now().timestamp_millis()),
        };

        Ok(Some(PositionSample::new(fix.lat, fix.lng, fix.accuracy, captured_at)))
    }
}

fn command_for(argv: &[String]) -> Option<Command> {
    let (program, args) = argv.split_first()?;
    let mut command = Command::new(program);
    command.args(args);
    Some(command)
}

/// Locks the screen by running the configured command
pub struct CommandLockActuator {
    argv: Vec<String>,
}

impl CommandLockActuator {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

#[async_trait]
impl LockActuator for CommandLockActuator {
    async fn lock_now(&self) -> Result<(), ActuatorError> {
        let mut command = command_for(&self.argv)
            .ok_or_else(|| ActuatorError::Unavailable("no lock command configured".to_string()))?;

        let status = command
            .stdin(Stdio::null())
            .status()
            .await
            .map_err(|e| ActuatorError::Failed(e.to_string()))?;

        if status.success() {
            Ok(())
        } else {
            Err(ActuatorError::Failed(format!("lock command exited with {}", status)))
        }
    }
}

/// Plays the alert by running the configured command; stop kills it
pub struct CommandAlertActuator {
    argv: Vec<String>,
    child: Mutex<Option<Child>>,
}

impl CommandAlertActuator {
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            child: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AlertActuator for CommandAlertActuator {
    async fn start(&self) -> Result<(), ActuatorError> {
        let mut command = command_for(&self.argv)
            .ok_or_else(|| ActuatorError::Unavailable("no alert command configured".to_string()))?;

        let spawned = command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ActuatorError::Failed(e.to_string()))?;

        let mut slot = self.child.lock().await;
        if let Some(mut previous) = slot.replace(spawned) {
            let _ = previous.kill().await;
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), ActuatorError> {
        let Some(mut child) = self.child.lock().await.take() else {
            return Ok(());
        };

        if let Ok(Some(status)) = child.try_wait() {
            debug!("◆ ALERT COMMAND ALREADY EXITED ({})", status);
            return Ok(());
        }
        child
            .kill()
            .await
            .map_err(|e| ActuatorError::Failed(e.to_string()))
    }
}

/// Capability view of the host install
pub struct HostCapabilityProbe {
    location_file: Option<PathBuf>,
    lock_configured: bool,
    admin_marker: PathBuf,
}

impl HostCapabilityProbe {
    pub fn new(location_file: Option<PathBuf>, lock_configured: bool, admin_marker: PathBuf) -> Self {
        Self {
            location_file,
            lock_configured,
            admin_marker,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.location_file().map(PathBuf::from),
            !config.host.lock_command.is_empty(),
            lostmode_config::admin_marker_path(),
        )
    }
}

impl CapabilityProbe for HostCapabilityProbe {
    fn current_capabilities(&self) -> CapabilitySet {
        let location = self
            .location_file
            .as_ref()
            .map_or(false, |p| std::fs::File::open(p).is_ok());

        CapabilitySet {
            has_fine_location: location,
            has_coarse_location: location,
            // A detached host process is always "in the background"
            has_background_location: location,
            has_admin_authority: self.lock_configured && self.admin_marker.is_file(),
        }
    }
}

/// Flip the administrative authority marker
pub async fn set_admin_active(config: &Config, active: bool) -> anyhow::Result<()> {
    let marker = lostmode_config::admin_marker_path();

    if active {
        if config.host.lock_command.is_empty() {
            warn!("◆ NO LOCK COMMAND CONFIGURED; AUTHORITY WILL STAY INACTIVE");
        }
        lostmode_config::paths::ensure_dir(&lostmode_config::data_dir()).await?;
        tokio::fs::write(&marker, b"active\n").await?;
        info!("◆ ADMINISTRATIVE AUTHORITY ENABLED");
    } else if marker.exists() {
        tokio::fs::remove_file(&marker).await?;
        info!("◆ ADMINISTRATIVE AUTHORITY DISABLED");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_file_provider_reads_fix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fix.json");
        std::fs::write(&path, r#"{"lat": 37.1, "lng": -122.1, "accuracy": 5.0, "timestamp": 1000}"#)
            .unwrap();

        let provider = FileLocationProvider::new(&path);
        let sample = provider.current_position().await.unwrap().unwrap();

        assert_eq!(sample, PositionSample::new(37.1, -122.1, 5.0, 1000));
    }

    #[tokio::test]
    async fn test_file_provider_missing_file_has_no_fix() {
        let dir = tempdir().unwrap();
        let provider = FileLocationProvider::new(dir.path().join("absent.json"));

        assert_eq!(provider.current_position().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_provider_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fix.json");
        std::fs::write(&path, "not json").unwrap();

        let result = FileLocationProvider::new(&path).current_position().await;
        assert!(matches!(result, Err(PositionError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_file_provider_dates_fix_by_mtime() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fix.json");
        std::fs::write(&path, r#"{"lat": 1.0, "lng": 2.0}"#).unwrap();

        let sample = FileLocationProvider::new(&path)
            .current_position()
            .await
            .unwrap()
            .unwrap();

        assert!(sample.captured_at_unix_millis > 0);
        assert_eq!(sample.accuracy_meters, 0.0);
    }

    #[test]
    fn test_probe_reflects_files() {
        let dir = tempdir().unwrap();
        let fix = dir.path().join("fix.json");
        let marker = dir.path().join("admin.active");

        let probe = HostCapabilityProbe::new(Some(fix.clone()), true, marker.clone());
        assert_eq!(probe.current_capabilities(), CapabilitySet::none());

        std::fs::write(&fix, "{}").unwrap();
        let caps = probe.current_capabilities();
        assert!(caps.has_location());
        assert!(!caps.has_admin_authority);

        std::fs::write(&marker, "active").unwrap();
        assert_eq!(probe.current_capabilities(), CapabilitySet::all());
    }

    #[test]
    fn test_probe_needs_lock_command_for_authority() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("admin.active");
        std::fs::write(&marker, "active").unwrap();

        let probe = HostCapabilityProbe::new(None, false, marker);
        assert!(!probe.current_capabilities().has_admin_authority);
    }

    #[tokio::test]
    async fn test_empty_commands_are_unavailable() {
        let lock = CommandLockActuator::new(Vec::new());
        assert!(matches!(lock.lock_now().await, Err(ActuatorError::Unavailable(_))));

        let alert = CommandAlertActuator::new(Vec::new());
        assert!(matches!(alert.start().await, Err(ActuatorError::Unavailable(_))));
        assert_eq!(alert.stop().await, Ok(()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_lock_command_exit_status() {
        let ok = CommandLockActuator::new(vec!["true".to_string()]);
        assert_eq!(ok.lock_now().await, Ok(()));

        let failing = CommandLockActuator::new(vec!["false".to_string()]);
        assert!(matches!(failing.lock_now().await, Err(ActuatorError::Failed(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_alert_stop_kills_child() {
        let alert = CommandAlertActuator::new(vec!["sleep".to_string(), "30".to_string()]);
        alert.start().await.unwrap();
        assert_eq!(alert.stop().await, Ok(()));
        assert!(alert.child.lock().await.is_none());
    }
}
