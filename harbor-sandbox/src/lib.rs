//! Sandbox side of the harbor boundary.
//!
//! The sandbox process talks to the host over its stdin/stdout
//! ([`server`] answers host requests, [`host_api`] makes its own calls
//! back), runs worker executables ([`runner`]), serves tenants over HTTP
//! ([`gateway`], [`bundle_cache`]) and gives workers a database client
//! ([`db_client`]).

pub mod analyzer;
pub mod bundle_cache;
pub mod db_client;
mod error;
pub mod gateway;
pub mod host_api;
pub mod runner;
pub mod server;
pub mod state;

pub use analyzer::ContentAnalyzer;
pub use bundle_cache::{BundleCache, BundleFile, CachedBundle};
pub use db_client::{DbClient, DbTransport, TransactionRecorder};
pub use error::{GatewayError, SandboxError};
pub use gateway::{GatewayState, build_router};
pub use host_api::{HostApi, IpcHostClient};
pub use runner::{ProcessWorkerRunner, WorkerInvocation, WorkerRunner};
pub use server::SandboxHandler;
pub use state::SandboxState;
