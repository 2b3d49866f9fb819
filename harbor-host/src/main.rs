//! harbor host
//!
//! Runs the trusted side of a harbor deployment:
//! 1. Opens the schema-isolated database proxy and its Unix socket
//! 2. Launches the sandbox process and keeps it running
//! 3. Serves the sandbox's lookups from the configured app registry
//!
//! Usage:
//!   harbor-host --config /etc/harbor/host.toml

use anyhow::{Context, Result};
use clap::Parser;
use harbor_db::{DbAccessKeys, DbProxy};
#[cfg(unix)]
use harbor_host::db_server::DbProxyServer;
use harbor_host::{
    HostConfig, ProcessLauncher, StaticHostServices, Supervisor, SupervisorSettings,
    SupervisorState,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "harbor-host")]
#[command(about = "Supervises the harbor sandbox and serves its host requests")]
struct Args {
    /// Path to the host configuration file
    #[arg(short, long, default_value = "harbor.toml")]
    config: PathBuf,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .compact()
        .init();

    info!("harbor host starting...");
    let config = HostConfig::load_from(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let proxy = Arc::new(
        DbProxy::open(&config.database.data_dir).context("opening database proxy")?,
    );
    // fresh every start; tokens only outlive the sandbox they were issued to
    let db_access = Arc::new(DbAccessKeys::new(format!(
        "{}{}",
        Uuid::new_v4().simple(),
        Uuid::new_v4().simple()
    )));
    #[cfg(unix)]
    if let Some(socket) = &config.database.socket_path {
        DbProxyServer::new(Arc::clone(&proxy), Arc::clone(&db_access), socket.clone())
            .listen()
            .context("binding database socket")?;
    }
    #[cfg(not(unix))]
    if config.database.socket_path.is_some() {
        tracing::warn!("database socket is only supported on unix; workers get no database");
    }

    let services = Arc::new(StaticHostServices::from_config(&config));
    let launcher = Arc::new(ProcessLauncher::new(config.sandbox.clone()));
    let settings = SupervisorSettings {
        db_access: Some(db_access),
        ..SupervisorSettings::from_config(&config)
    };
    let supervisor = Supervisor::new(launcher, services, settings);

    if let Err(e) = supervisor.start().await {
        if supervisor.state() == SupervisorState::Exited {
            return Err(e).context("launching sandbox");
        }
        // init failures are retried by the restart policy
        error!(error = %e, "initial sandbox start failed");
    }

    supervisor.shutdown_on_signal().await?;
    info!("harbor host stopped");
    Ok(())
}
