//! Application state shared across all HTTP handlers
//!
//! Axum requires state to be `Clone + Send + Sync`; everything lives behind
//! one `Arc` so cloning per request is a reference count bump.

use std::sync::Arc;

use featurelens_registry::FeatureRegistry;
use tracing::info;

use crate::config::Config;
use crate::data_store::{ensure_root, LocalDataStore};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    registry: FeatureRegistry,

    /// Backend name for health output
    backend: &'static str,

    /// Server start time (for uptime reporting)
    start_time: std::time::Instant,
}

impl AppState {
    pub fn new(registry: FeatureRegistry, backend: &'static str) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                registry,
                backend,
                start_time: std::time::Instant::now(),
            }),
        }
    }

    /// Opens the configured registry with a local data store under `data.root`
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let registry_config = config.registry.to_registry_config()?;
        let backend = registry_config.backend_name();

        let data_root = std::path::PathBuf::from(&config.data.root);
        ensure_root(&data_root)?;

        let registry = FeatureRegistry::new(registry_config, config.registry_settings())
            .await?
            .with_data_store(Arc::new(LocalDataStore::new(data_root)));

        info!(backend, data_root = %config.data.root, "Registry ready");
        Ok(Self::new(registry, backend))
    }

    /// State over an in-memory SQLite registry (for testing)
    pub async fn in_memory() -> featurelens_core::Result<Self> {
        Ok(Self::new(FeatureRegistry::in_memory().await?, "sqlite"))
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.inner.registry
    }

    pub fn backend(&self) -> &'static str {
        self.inner.backend
    }

    /// Returns the server uptime in seconds
    pub fn uptime(&self) -> u64 {
        self.inner.start_time.elapsed().as_secs()
    }
}
