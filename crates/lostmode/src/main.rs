//! Lostmode - lost-device telemetry and command agent

use clap::{Parser, Subcommand, ValueEnum};
use tracing::error;

mod commands;
mod host;

use commands::{
    admin_command, command_command, devices_command, init_command, login_command, mode_command,
    register_command, run_command, status_command,
};
use lostmode_config::UserMode;

/// Lostmode - keep track of a lost device
#[derive(Parser)]
#[command(name = "lostmode")]
#[command(about = "◆ Lost-device telemetry and command agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and preferences
    Init,
    /// Run the reporting agent
    Run {
        /// Verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show configuration and agent status
    Status,
    /// Select the operating mode
    Mode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
    /// Log in to the backend
    Login {
        #[arg(short, long)]
        email: String,
    },
    /// Create a backend account
    Signup {
        #[arg(short, long)]
        email: String,
    },
    /// Register this machine as a device
    Register {
        #[arg(short, long)]
        name: String,
    },
    /// List registered devices
    Devices,
    /// Send a command to a device
    Command {
        /// Target device id
        device_id: i64,
        /// Lock the device
        #[arg(long)]
        lock: bool,
        /// Play the alert sound
        #[arg(long)]
        sound: bool,
    },
    /// Manage administrative authority
    Admin {
        #[arg(value_enum)]
        action: AdminAction,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Ai,
    Secure,
    Both,
}

impl From<ModeArg> for UserMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Ai => UserMode::Ai,
            ModeArg::Secure => UserMode::Secure,
            ModeArg::Both => UserMode::Both,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum AdminAction {
    Enable,
    Disable,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Run { verbose: true }) {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt::init();
    }

    match cli.command {
        Commands::Init => {
            if let Err(e) = init_command().await {
                error!("Init failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run { verbose: _ } => {
            if let Err(e) = run_command().await {
                error!("Agent failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Status => {
            if let Err(e) = status_command().await {
                error!("Status failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Mode { mode } => {
            if let Err(e) = mode_command(mode.into()).await {
                error!("Mode change failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Login { email } => {
            if let Err(e) = login_command(email, false).await {
                error!("Login failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Signup { email } => {
            if let Err(e) = login_command(email, true).await {
                error!("Signup failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Register { name } => {
            if let Err(e) = register_command(name).await {
                error!("Registration failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Devices => {
            if let Err(e) = devices_command().await {
                error!("Device list failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Command {
            device_id,
            lock,
            sound,
        } => {
            if let Err(e) = command_command(device_id, lock, sound).await {
                error!("Command failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Admin { action } => {
            let enable = matches!(action, AdminAction::Enable);
            if let Err(e) = admin_command(enable).await {
                error!("Admin change failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
