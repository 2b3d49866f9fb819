//! Host side of the harbor sandbox boundary.
//!
//! The host owns everything trusted: it launches and supervises the
//! sandbox process ([`supervisor`]), calls into it with typed requests
//! ([`client`]), answers the lookups the sandbox is allowed to make
//! ([`dispatcher`], [`services`]) and runs the database proxy listener
//! ([`db_server`]).

pub mod client;
pub mod config;
#[cfg(unix)]
pub mod db_server;
pub mod dispatcher;
mod error;
pub mod launcher;
pub mod services;
pub mod supervisor;

pub use client::SandboxClient;
pub use config::{AppEntry, HostConfig, StorageConfig, WorkerEntry};
pub use dispatcher::HostDispatcher;
pub use error::HostError;
pub use launcher::{LaunchedSandbox, ProcessLauncher, SandboxExit, SandboxLauncher};
pub use services::{HostServices, ServiceFailure, StaticHostServices};
pub use supervisor::{Supervisor, SupervisorSettings, SupervisorState};
