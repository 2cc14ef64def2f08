//! Local storage for materialized training dataset data
//!
//! HopsFS locations are mapped below a local data root:
//! `hopsfs://namenode:8020/Projects/demo/td/fv_1_1` becomes
//! `<root>/Projects/demo/td/fv_1_1`. Object-storage locations (s3, abfss,
//! gs) are not reachable from here; deletes for them are logged and skipped.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use featurelens_core::training::DataStore;
use featurelens_core::{Error, Result};
use tracing::{info, warn};

use crate::metrics;

const HOPSFS_SCHEME: &str = "hopsfs://";

pub struct LocalDataStore {
    root: PathBuf,
}

impl LocalDataStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local directory of a HopsFS location, `None` for any other scheme
    pub fn local_path(&self, location: &str) -> Result<Option<PathBuf>> {
        let Some(rest) = location.strip_prefix(HOPSFS_SCHEME) else {
            return Ok(None);
        };
        // Drop the namenode authority
        let path = match rest.find('/') {
            Some(idx) => &rest[idx..],
            None => "",
        };

        let relative = Path::new(path.trim_start_matches('/'));
        if relative.as_os_str().is_empty() {
            return Err(Error::invalid_input(format!(
                "refusing to delete the data root for location '{}'",
                location
            )));
        }
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(Error::invalid_input(format!(
                "location '{}' escapes the data root",
                location
            )));
        }
        Ok(Some(self.root.join(relative)))
    }
}

#[async_trait]
impl DataStore for LocalDataStore {
    async fn delete(&self, location: &str) -> Result<()> {
        let Some(path) = self.local_path(location)? else {
            warn!(location, "Not a HopsFS location, skipping data delete");
            metrics::DATA_DELETES_SKIPPED_TOTAL.inc();
            return Ok(());
        };

        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "Deleted training dataset data");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::StorageError(
                anyhow::Error::new(e)
                    .context(format!("Failed to delete '{}'", path.display())),
            )),
        }
    }
}

/// Creates the data root if it does not exist yet
pub fn ensure_root(root: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root)
        .with_context(|| format!("Failed to create data root '{}'", root.display()))
}
