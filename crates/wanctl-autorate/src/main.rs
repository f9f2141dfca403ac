//! wanctl autorate daemon entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use wanctl_autorate::config::AutorateConfig;
use wanctl_autorate::daemon::AutorateDaemon;
use wanctl_autorate::health::{self, HealthState};
use wanctl_common::lock::{LockError, LockFile};
use wanctl_common::shutdown::Shutdown;

/// Adaptive shaper ceiling controller for one WAN.
#[derive(Parser, Debug)]
#[command(name = "wanctl-autorate", about = "wanctl autorate daemon")]
struct Cli {
    /// Path to the per-WAN YAML config.
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the control loop (default).
    Daemon,
    /// Run a single cycle and exit.
    Oneshot,
    /// Parse and validate the config, then exit.
    ValidateConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match AutorateConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("config error: {e}");
            return ExitCode::from(1);
        }
    };

    match cli.command.unwrap_or(Command::Daemon) {
        Command::ValidateConfig => {
            println!("config OK: wan={}", config.wan_name);
            ExitCode::SUCCESS
        }
        Command::Oneshot => run_oneshot(config).await,
        Command::Daemon => run_daemon(config).await,
    }
}

async fn run_oneshot(config: AutorateConfig) -> ExitCode {
    let _lock = match acquire_lock(&config) {
        Ok(lock) => lock,
        Err(code) => return code,
    };

    let health = HealthState::new();
    let mut daemon = AutorateDaemon::new(config, health).await;
    let success = daemon.run_cycle().await;
    if success {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(1)
    }
}

async fn run_daemon(config: AutorateConfig) -> ExitCode {
    let _lock = match acquire_lock(&config) {
        Ok(lock) => lock,
        Err(code) => return code,
    };

    let shutdown = Shutdown::install();
    let health = HealthState::new();

    let health_server = health::serve(health.clone(), config.health_addr, shutdown.clone());
    tokio::spawn(async move {
        if let Err(e) = health_server.await {
            tracing::error!(error = %e, "health server failed");
        }
    });

    let daemon = AutorateDaemon::new(config, health).await;
    let interrupted = shutdown.clone();
    daemon.run(shutdown).await;

    if interrupted.is_shutdown() {
        ExitCode::from(130)
    } else {
        ExitCode::SUCCESS
    }
}

fn acquire_lock(config: &AutorateConfig) -> Result<LockFile, ExitCode> {
    match LockFile::acquire(&config.lock_file, config.lock_timeout) {
        Ok(lock) => Ok(lock),
        Err(e @ LockError::Held { .. }) => {
            tracing::error!("{e}");
            Err(ExitCode::from(2))
        }
        Err(e) => {
            tracing::error!("{e}");
            Err(ExitCode::from(1))
        }
    }
}
