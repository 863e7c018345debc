//! Global runtime configuration, environment-variable precedence,
//! entitlement policy and the persisted (key, value) + per-camera config
//! store.
//!
//! The global inference-transport configuration (server URL, shared-memory
//! toggle) is a plain value behind a read-mostly handle, not a process-wide
//! singleton: updates go through [`GlobalConfig::update`], which swaps in a
//! new `Arc` and emits a change notice on a broadcast channel. Components
//! read the current value at construction time; nothing mutates a
//! `GlobalConfig` in place while a component is using it.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub mod entitlement;
pub mod store;

pub use entitlement::{Entitlements, LicenseTier};
pub use store::{ConfigStore, StoreError};

/// Transport preference for the inference client, resolved from environment
/// variables at startup with `AI_SERVER_URL`/`SERVER_URL` taking precedence
/// over any value baked into a camera's attached-component config.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// Base URL of the remote inference server.
    pub inference_server_url: String,
    /// Prefer the shared-memory transport when the model supports it.
    pub use_shared_memory: bool,
    /// Override endpoint for shared-memory region registration (Triton-style).
    pub triton_server_url: Option<String>,
}

impl GlobalConfig {
    /// Build from environment variables, falling back to given defaults.
    ///
    /// Precedence: `AI_SERVER_URL` > `SERVER_URL` > `default_server_url`.
    pub fn from_env(default_server_url: impl Into<String>) -> Self {
        let inference_server_url = std::env::var("AI_SERVER_URL")
            .or_else(|_| std::env::var("SERVER_URL"))
            .unwrap_or_else(|_| default_server_url.into());

        let use_shared_memory = std::env::var("USE_SHARED_MEMORY")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        let triton_server_url = std::env::var("TRITON_SERVER_URL").ok();

        Self {
            inference_server_url,
            use_shared_memory,
            triton_server_url,
        }
    }
}

/// A read-mostly handle to the current [`GlobalConfig`] plus a change
/// notification channel. Cloning a handle is cheap; all clones observe
/// updates made through any of them.
#[derive(Clone)]
pub struct GlobalConfigHandle {
    inner: Arc<RwLock<Arc<GlobalConfig>>>,
    notify_tx: crossbeam_channel::Sender<Arc<GlobalConfig>>,
    notify_rx: crossbeam_channel::Receiver<Arc<GlobalConfig>>,
}

impl GlobalConfigHandle {
    pub fn new(initial: GlobalConfig) -> Self {
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        Self {
            inner: Arc::new(RwLock::new(Arc::new(initial))),
            notify_tx,
            notify_rx,
        }
    }

    /// The current configuration. Cheap: clones an `Arc`.
    pub fn current(&self) -> Arc<GlobalConfig> {
        self.inner.read().clone()
    }

    /// Install a new configuration and notify anyone listening. The
    /// registry consults this on the *next* component construction; a
    /// component already built keeps the config it was built with.
    pub fn update(&self, new_config: GlobalConfig) {
        let new_config = Arc::new(new_config);
        *self.inner.write() = new_config.clone();
        // Best-effort: a full channel (no listeners draining) must never
        // block the writer.
        let _ = self.notify_tx.try_send(new_config);
    }

    /// A receiver that observes every subsequent [`GlobalConfigHandle::update`].
    pub fn subscribe(&self) -> crossbeam_channel::Receiver<Arc<GlobalConfig>> {
        self.notify_rx.clone()
    }
}

/// Crate-wide dependency for reading/writing the `config` and
/// `camera_config` tables described in the schema at `docs`.
pub fn open_store(path: impl AsRef<Path>) -> Result<ConfigStore, StoreError> {
    ConfigStore::open(path)
}
