//! Runtime state pushed by the host.

use harbor_ipc::{ExecutionOptions, InitPayload, InstallMapping};
use harbor_types::{AppId, InstallId};
use std::path::PathBuf;
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use tracing::info;

#[derive(Debug, Clone)]
struct Initialized {
    options: ExecutionOptions,
    base_url: String,
    db_socket: Option<PathBuf>,
    install_mapping: InstallMapping,
}

/// Everything the host has told this sandbox. Empty until `init`.
#[derive(Debug)]
pub struct SandboxState {
    worker_id: String,
    init: RwLock<Option<Initialized>>,
}

impl SandboxState {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            init: RwLock::new(None),
        }
    }

    /// Identifier of this sandbox instance.
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Records the `init` payload. A repeated `init` replaces everything.
    pub fn initialize(&self, payload: InitPayload) {
        info!(
            apps = payload.install_mapping.len(),
            base_url = %payload.base_url,
            "sandbox initialized"
        );
        *self.init.write().unwrap_or_else(PoisonError::into_inner) = Some(Initialized {
            options: payload.options,
            base_url: payload.base_url,
            db_socket: payload.db_socket,
            install_mapping: payload.install_mapping,
        });
    }

    pub fn is_initialized(&self) -> bool {
        self.read().is_some()
    }

    pub fn options(&self) -> Option<ExecutionOptions> {
        self.read().as_ref().map(|init| init.options.clone())
    }

    pub fn base_url(&self) -> Option<String> {
        self.read().as_ref().map(|init| init.base_url.clone())
    }

    pub fn db_socket(&self) -> Option<PathBuf> {
        self.read().as_ref().and_then(|init| init.db_socket.clone())
    }

    /// Active install of `app`, if the app is installed.
    pub fn install_id(&self, app: &AppId) -> Option<InstallId> {
        self.read()
            .as_ref()
            .and_then(|init| init.install_mapping.get(app).cloned())
    }

    /// Replaces the install mapping. Returns `None` before `init`.
    pub fn replace_mapping(&self, mapping: InstallMapping) -> Option<usize> {
        let mut guard = self.init.write().unwrap_or_else(PoisonError::into_inner);
        let init = guard.as_mut()?;
        let apps = mapping.len();
        init.install_mapping = mapping;
        info!(apps, "install mapping replaced");
        Some(apps)
    }

    fn read(&self) -> RwLockReadGuard<'_, Option<Initialized>> {
        self.init.read().unwrap_or_else(PoisonError::into_inner)
    }
}
