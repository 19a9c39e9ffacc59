//! Lostmode command implementations

use anyhow::{bail, Context, Result};
use serde_json::json;
use std::io::{IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lostmode_agent::{AgentContext, AgentSettings, AgentStatus, AgentSupervisor};
use lostmode_config::{self, Config, FilePreferences, Preferences, UserMode};
use lostmode_transport::{BackendClient, Endpoints, HttpTransport};

use crate::host::{
    set_admin_active, CommandAlertActuator, CommandLockActuator, FileLocationProvider,
    HostCapabilityProbe,
};

fn backend(config: &Config) -> BackendClient {
    let server = &config.server;
    let endpoints = Endpoints {
        devices: server.devices_url(),
        command: server.command_url(),
        login: server.login_url(),
        signup: server.signup_url(),
        add_device: server.add_device_url(),
    };
    BackendClient::new(
        Arc::new(HttpTransport::new()),
        endpoints,
        config.network.timeout(),
    )
}

async fn load_preferences() -> Result<Preferences> {
    Ok(Preferences::load_from(&lostmode_config::preferences_path()).await?)
}

async fn save_preferences(prefs: &Preferences) -> Result<()> {
    prefs.save_to(&lostmode_config::preferences_path()).await?;
    Ok(())
}

/// Read line from stdin
fn read_line() -> Result<String> {
    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Read password from stdin (masked input)
fn read_password() -> Result<String> {
    print!("Password: ");
    std::io::stdout().flush()?;
    if !std::io::stdin().is_terminal() {
        return read_line();
    }
    match rpassword::read_password() {
        Ok(password) => Ok(password),
        Err(_) => read_line(),
    }
}

/// Initialize config and preferences
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing Lostmode...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = lostmode_config::init().await?;

    println!("\n◆ Lostmode initialized");
    println!("  Backend: {}", config.server.base_url);
    println!("\nNext steps:");
    println!("  1. Point host.location_file and host.lock_command in ~/.lostmode/config.json");
    println!("  2. Sign in:           lostmode login --email you@example.com");
    println!("  3. Register device:   lostmode register --name laptop");
    println!("  4. Enable reporting:  lostmode mode secure");
    println!("  5. Start the agent:   lostmode run");

    Ok(())
}

/// Run the agent until interrupted
pub async fn run_command() -> Result<()> {
    let config = Config::load().await?;
    let settings = AgentSettings::from_config(&config);

    println!("◆ Lostmode agent starting");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("◆ REPORTING TO {}", settings.update_url);
    debug!("◆ SETTINGS: {:?}", settings);

    if config.location_file().is_none() {
        warn!("◆ NO LOCATION FILE CONFIGURED; AGENT WILL STAY DEGRADED");
    }

    let locations = FileLocationProvider::new(config.location_file().unwrap_or_default());
    let ctx = AgentContext {
        preferences: Arc::new(FilePreferences::new(lostmode_config::preferences_path())),
        probe: Arc::new(HostCapabilityProbe::from_config(&config)),
        locations: Arc::new(locations),
        transport: Arc::new(HttpTransport::new()),
        lock: Arc::new(CommandLockActuator::new(config.host.lock_command.clone())),
        alert: Arc::new(CommandAlertActuator::new(config.host.alert_command.clone())),
        settings,
    };

    let supervisor = Arc::new(AgentSupervisor::new(ctx));
    let cancel = CancellationToken::new();

    let status_task = tokio::spawn(write_status_snapshots(
        supervisor.subscribe_status(),
        lostmode_config::status_path(),
        cancel.clone(),
    ));
    let unlock_task = tokio::spawn(forward_unlock_events(Arc::clone(&supervisor), cancel.clone()));
    let agent_task = tokio::spawn(Arc::clone(&supervisor).run(cancel.clone()));

    println!("Press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("◆ Shutdown signal received");
    println!("\n◆ Shutting down...");
    cancel.cancel();

    if let Err(e) = agent_task.await {
        warn!("◆ Agent task panicked: {}", e);
    }
    if let Err(e) = unlock_task.await {
        warn!("◆ Unlock listener panicked: {}", e);
    }
    if let Err(e) = status_task.await {
        warn!("◆ Status writer panicked: {}", e);
    }
    write_status(&lostmode_config::status_path(), &supervisor.current_status()).await?;

    println!("◆ Agent stopped");
    Ok(())
}

/// Persist every status change so `lostmode status` can show it
async fn write_status_snapshots(
    mut status: watch::Receiver<AgentStatus>,
    path: std::path::PathBuf,
    cancel: CancellationToken,
) {
    loop {
        let snapshot = status.borrow_and_update().clone();
        if let Err(e) = write_status(&path, &snapshot).await {
            warn!("◆ FAILED TO WRITE STATUS: {}", e);
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_status(path: &Path, status: &AgentStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        lostmode_config::paths::ensure_dir(parent).await?;
    }
    let content = serde_json::to_string_pretty(status)?;
    tokio::fs::write(path, content).await?;
    Ok(())
}

#[cfg(unix)]
async fn forward_unlock_events(supervisor: Arc<AgentSupervisor>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut unlocks = match signal(SignalKind::user_defined1()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("◆ UNLOCK SIGNAL UNAVAILABLE: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = unlocks.recv() => {
                if received.is_none() {
                    break;
                }
                supervisor.notify_unlocked().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn forward_unlock_events(_supervisor: Arc<AgentSupervisor>, cancel: CancellationToken) {
    cancel.cancelled().await;
}

/// Show configuration and the last agent status
pub async fn status_command() -> Result<()> {
    let config_path = lostmode_config::config_path();
    let status_path = lostmode_config::status_path();

    println!("◆ Lostmode Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:    {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await?;
    let prefs = load_preferences().await?;

    println!("Backend:   {}", config.server.base_url);
    println!("Mode:      {}", prefs.mode().as_str());
    println!(
        "Device:    {}",
        prefs
            .device_id()
            .map(|id| id.to_string())
            .unwrap_or_else(|| "[Not registered]".to_string())
    );
    println!(
        "Token:     {}",
        if prefs.token().is_some() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "Location:  {}",
        config.location_file().unwrap_or("[Not configured]")
    );
    println!(
        "Authority: {}",
        if lostmode_config::admin_marker_path().exists() {
            "[Active]"
        } else {
            "[Inactive]"
        }
    );

    if !status_path.exists() {
        println!("Agent:     [Never run]");
        return Ok(());
    }

    let content = tokio::fs::read_to_string(&status_path).await?;
    let status: AgentStatus =
        serde_json::from_str(&content).context("Unreadable status snapshot")?;

    println!("Agent:     {}", status.mode);
    println!("           {}", status.headline());
    if let Some(at) = status.last_sample_at {
        println!("Last fix:  {}", at.to_rfc3339());
    }
    if let Some(at) = status.last_report_at {
        println!("Reported:  {}", at.to_rfc3339());
    }
    if let Some(err) = &status.last_error {
        println!("Error:     {}", err);
    }

    Ok(())
}

/// Select the operating mode
pub async fn mode_command(mode: UserMode) -> Result<()> {
    let mut prefs = load_preferences().await?;
    prefs.set_mode(mode);
    save_preferences(&prefs).await?;

    println!("✓ Mode set to {}", mode.as_str());
    if mode.requires_reporting() {
        println!("  Location reporting is required; a running agent picks this up on its next check");
    }
    Ok(())
}

/// Log in or sign up and store the token
pub async fn login_command(email: String, signup: bool) -> Result<()> {
    let config = Config::load().await?;
    let password = read_password()?;
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let client = backend(&config);
    let token = if signup {
        client.signup(&email, &password).await?
    } else {
        client.login(&email, &password).await?
    };

    let mut prefs = load_preferences().await?;
    prefs.auth_token = Some(token);
    save_preferences(&prefs).await?;

    println!("✓ {} as {}", if signup { "Signed up" } else { "Logged in" }, email);
    Ok(())
}

/// Register this machine as a device and select it
pub async fn register_command(name: String) -> Result<()> {
    let config = Config::load().await?;
    let mut prefs = load_preferences().await?;

    let device = backend(&config)
        .register_device(prefs.token(), &name)
        .await?;

    prefs.selected_device_id = Some(device.id);
    save_preferences(&prefs).await?;

    println!("✓ Registered {} (id {})", device.name, device.id);
    Ok(())
}

/// List the account's devices
pub async fn devices_command() -> Result<()> {
    let config = Config::load().await?;
    let prefs = load_preferences().await?;

    let devices = backend(&config).fetch_devices(prefs.token()).await?;

    if devices.is_empty() {
        println!("No devices registered");
        return Ok(());
    }

    println!("Devices:");
    for device in devices {
        let marker = if prefs.device_id() == Some(device.id) {
            "*"
        } else {
            " "
        };
        let position = match (device.last_lat, device.last_lng) {
            (Some(lat), Some(lng)) => format!("{}, {}", lat, lng),
            _ => "no fix".to_string(),
        };
        println!(
            "{} {} - {} ({}, last update: {})",
            marker,
            device.id,
            device.name,
            position,
            device.last_update.as_deref().unwrap_or("never")
        );
    }
    Ok(())
}

/// Queue a lock and/or alert for another device
pub async fn command_command(device_id: i64, lock: bool, sound: bool) -> Result<()> {
    if !lock && !sound {
        bail!("Nothing to send: pass --lock and/or --sound");
    }

    let config = Config::load().await?;
    let prefs = load_preferences().await?;

    let mut command = json!({});
    if lock {
        command["lock"] = json!(true);
    }
    if sound {
        command["sound"] = json!(true);
    }

    let accepted = backend(&config)
        .send_device_command(prefs.token(), &device_id.to_string(), command)
        .await?;

    if accepted {
        println!("✓ Command queued for device {}", device_id);
        Ok(())
    } else {
        bail!("Backend refused the command for device {}", device_id)
    }
}

/// Grant or withdraw administrative authority
pub async fn admin_command(enable: bool) -> Result<()> {
    let config = Config::load().await?;
    set_admin_active(&config, enable).await?;

    if enable {
        println!("✓ Administrative authority enabled");
        if config.host.lock_command.is_empty() {
            println!("  No host.lock_command configured; locking stays unavailable");
        }
    } else {
        println!("✓ Administrative authority disabled");
    }
    Ok(())
}
