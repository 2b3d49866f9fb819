//! harbor sandbox
//!
//! Runs untrusted application workers on behalf of the host:
//! 1. Serves the host's control channel on stdin/stdout
//! 2. Routes tenant HTTP traffic to workers and UI bundles
//!
//! Logs go to stderr; stdout carries protocol frames only. The process
//! exits when the host closes stdin.
//!
//! Usage:
//!   harbor-sandbox --port 8787 --cache-dir /var/cache/harbor

use anyhow::{Context, Result};
use clap::Parser;
use harbor_ipc::{Connection, SandboxSide};
use harbor_sandbox::{
    BundleCache, ContentAnalyzer, GatewayState, IpcHostClient, ProcessWorkerRunner,
    SandboxHandler, SandboxState, build_router,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "harbor-sandbox")]
#[command(about = "harbor sandbox: worker gateway and control-channel server")]
struct Args {
    /// Address the gateway binds to
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// Gateway HTTP port
    #[arg(short, long, default_value = "8787")]
    port: u16,

    /// Directory for unpacked UI bundles
    #[arg(long, default_value = "harbor-cache")]
    cache_dir: PathBuf,

    /// Identifier reported to the host and on /health
    #[arg(long)]
    worker_id: Option<String>,

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
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .compact()
        .init();

    let worker_id = args
        .worker_id
        .unwrap_or_else(|| format!("sandbox-{}", std::process::id()));
    info!(worker_id = %worker_id, "harbor sandbox starting...");

    let state = Arc::new(SandboxState::new(worker_id));
    let http = reqwest::Client::builder()
        .build()
        .context("building HTTP client")?;

    let conn = Connection::<SandboxSide>::new(tokio::io::stdout());
    let host = Arc::new(IpcHostClient::new(Arc::clone(&conn)));
    let runner = Arc::new(ProcessWorkerRunner::new(Arc::clone(&state)));
    let analyzer = Arc::new(ContentAnalyzer::new(host.clone(), http.clone()));
    let handler = Arc::new(SandboxHandler::new(
        Arc::clone(&state),
        host.clone(),
        runner.clone(),
        analyzer,
    ));
    let control = conn.serve(tokio::io::stdin(), handler, "stdin");

    let gateway = Arc::new(GatewayState {
        sandbox: Arc::clone(&state),
        host,
        runner,
        bundles: BundleCache::new(&args.cache_dir, http),
    });
    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding gateway on {addr}"))?;
    info!("gateway listening on {}", addr);
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, build_router(gateway)).await {
            error!(error = %e, "gateway server failed");
        }
    });

    if let Err(e) = control.await {
        error!(error = %e, "control channel task failed");
    }
    conn.close();
    info!("control channel closed, exiting");
    Ok(())
}
