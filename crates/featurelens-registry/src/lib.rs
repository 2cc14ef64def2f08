//! Feature view registry for FeatureLens
//!
//! Persists the catalog (feature stores, feature groups, storage connectors),
//! feature views and training datasets, with two backends:
//! - **SQLite with WAL** - embedded, the default
//! - **PostgreSQL** - connection pooling, behind the `postgres` feature
//!
//! [`FeatureRegistry`] is the entry point. It validates every request with
//! `featurelens-core` before anything is written, and it is itself the
//! [`FeatureCatalog`] queries are resolved against.
//!
//! # Examples
//!
//! ```rust,ignore
//! use featurelens_registry::{FeatureRegistry, FeatureViewRequest, RegistryConfig, RegistrySettings};
//!
//! let registry = FeatureRegistry::new(RegistryConfig::sqlite("./registry.db"), RegistrySettings::default()).await?;
//! let store = registry.create_feature_store("demo_featurestore").await?;
//! let view = registry
//!     .create_feature_view(store.id, FeatureViewRequest::new(query).named("sales_view"))
//!     .await?;
//! let batch = registry
//!     .get_batch_query(store.id, "sales_view", view.version, TimeWindow::new(Some(0), Some(1000))?)
//!     .await?;
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use featurelens_core::planner::{build_batch_query, TimeWindow};
use featurelens_core::retry::{is_retryable, retry_if, RetryPolicy};
use featurelens_core::training::{
    DataStore, HopsfsEndpoint, StatisticsConfig, TrainingDataset, TrainingDatasetPlanner,
    TrainingDatasetRequest, TrainingDatasetType, TrainingDatasetUpdate,
};
use featurelens_core::validation::{validate_feature_group, validate_name, validate_storage_connector};
use featurelens_core::{
    resolve_query, Error, FeatureCatalog, FeatureGroup, FeatureStore, FeatureView,
    FeatureViewDraft, Query, ResolveOptions, Result, StorageConnector,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

pub mod backend;
pub use backend::{RegistryBackend, RegistryConfig};

mod schema;
mod sqlite_backend;

#[cfg(feature = "postgres")]
mod postgres_backend;

pub use sqlite_backend::SqliteBackend;

#[cfg(feature = "postgres")]
pub use postgres_backend::PostgresBackend;

/// Knobs the registry applies on top of its backend
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub resolve: ResolveOptions,
    pub hopsfs: HopsfsEndpoint,
    /// Applied to creates without an explicit version, on version races and
    /// transient storage errors
    pub retry: RetryPolicy,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            resolve: ResolveOptions::default(),
            hopsfs: HopsfsEndpoint::default(),
            retry: RetryPolicy::aggressive(),
        }
    }
}

/// Input of [`FeatureRegistry::create_feature_view`]
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureViewRequest {
    pub name: Option<String>,
    pub version: Option<i32>,
    pub description: Option<String>,
    pub query: Query,
}

impl FeatureViewRequest {
    pub fn new(query: Query) -> Self {
        Self {
            name: None,
            version: None,
            description: None,
            query,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Metadata update for a feature view; only the description is mutable
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureViewUpdate {
    #[serde(default)]
    pub description: Option<String>,
}

/// `feature_view_<8 hex>`
fn generated_view_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("feature_view_{}", &id[..8])
}

/// Feature registry with pluggable backend
pub struct FeatureRegistry {
    backend: Arc<dyn RegistryBackend>,
    settings: RegistrySettings,
    planner: TrainingDatasetPlanner,
    data_store: Option<Arc<dyn DataStore>>,
}

impl FeatureRegistry {
    /// Create new registry with specified backend configuration
    pub async fn new(config: RegistryConfig, settings: RegistrySettings) -> Result<Self> {
        info!(backend = config.backend_name(), "Opening feature registry");
        let backend: Arc<dyn RegistryBackend> = match config {
            RegistryConfig::SQLite { path } => Arc::new(SqliteBackend::new(&path)?),

            #[cfg(feature = "postgres")]
            RegistryConfig::PostgreSQL {
                connection_string,
                pool_size,
                timeout_seconds,
                statement_timeout_seconds,
            } => Arc::new(
                PostgresBackend::new(
                    &connection_string,
                    pool_size,
                    timeout_seconds,
                    statement_timeout_seconds,
                )
                .await?,
            ),
        };

        Self::with_backend(backend, settings).await
    }

    /// Create in-memory registry (for testing)
    pub async fn in_memory() -> Result<Self> {
        Self::with_backend(Arc::new(SqliteBackend::in_memory()?), RegistrySettings::default()).await
    }

    /// Wraps an already opened backend and initializes its schema
    pub async fn with_backend(
        backend: Arc<dyn RegistryBackend>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        backend.init_schema().await?;
        Ok(Self {
            backend,
            planner: TrainingDatasetPlanner::new(settings.hopsfs.clone()),
            settings,
            data_store: None,
        })
    }

    /// Storage used by data deletes; without one they only remove metadata
    pub fn with_data_store(mut self, data_store: Arc<dyn DataStore>) -> Self {
        self.data_store = Some(data_store);
        self
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub async fn health_check(&self) -> Result<()> {
        self.backend.ping().await
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    #[instrument(skip(self))]
    pub async fn create_feature_store(&self, name: &str) -> Result<FeatureStore> {
        validate_name(name)?;
        self.backend.create_feature_store(name).await
    }

    pub async fn get_feature_store(&self, id: i64) -> Result<FeatureStore> {
        self.backend
            .get_feature_store(id)
            .await?
            .ok_or(Error::FeatureStoreNotFound(id))
    }

    pub async fn list_feature_stores(&self) -> Result<Vec<FeatureStore>> {
        self.backend.list_feature_stores().await
    }

    #[instrument(skip(self, group), fields(name = %group.name))]
    pub async fn create_feature_group(
        &self,
        featurestore_id: i64,
        group: FeatureGroup,
    ) -> Result<FeatureGroup> {
        self.get_feature_store(featurestore_id).await?;
        let group = FeatureGroup {
            id: 0,
            featurestore_id,
            ..group
        };
        validate_feature_group(&group)?;
        self.backend.create_feature_group(&group).await
    }

    /// A feature group of this store
    pub async fn get_feature_group(&self, featurestore_id: i64, id: i64) -> Result<FeatureGroup> {
        match self.backend.get_feature_group(id).await? {
            Some(group) if group.featurestore_id == featurestore_id => Ok(group),
            _ => Err(Error::UnknownFeatureGroup(id)),
        }
    }

    pub async fn list_feature_groups(&self, featurestore_id: i64) -> Result<Vec<FeatureGroup>> {
        self.get_feature_store(featurestore_id).await?;
        self.backend.list_feature_groups(featurestore_id).await
    }

    #[instrument(skip(self, connector), fields(name = %connector.name))]
    pub async fn create_storage_connector(
        &self,
        featurestore_id: i64,
        connector: StorageConnector,
    ) -> Result<StorageConnector> {
        self.get_feature_store(featurestore_id).await?;
        let connector = StorageConnector {
            id: 0,
            featurestore_id,
            ..connector
        };
        validate_storage_connector(&connector)?;
        self.backend.create_storage_connector(&connector).await
    }

    pub async fn get_storage_connector(
        &self,
        featurestore_id: i64,
        name: &str,
    ) -> Result<StorageConnector> {
        self.backend
            .get_storage_connector_by_name(featurestore_id, name)
            .await?
            .ok_or_else(|| Error::StorageConnectorNotFound(name.to_string()))
    }

    pub async fn list_storage_connectors(
        &self,
        featurestore_id: i64,
    ) -> Result<Vec<StorageConnector>> {
        self.get_feature_store(featurestore_id).await?;
        self.backend.list_storage_connectors(featurestore_id).await
    }

    // ========================================================================
    // Feature views
    // ========================================================================

    /// Validates, resolves and stores a feature view
    ///
    /// Nothing is written unless the name, the version and the whole query
    /// graph are valid. Without an explicit version the next free one is
    /// taken; losing a race for it is retried.
    #[instrument(skip(self, request), fields(name = ?request.name, version = ?request.version))]
    pub async fn create_feature_view(
        &self,
        featurestore_id: i64,
        request: FeatureViewRequest,
    ) -> Result<FeatureView> {
        let store = self.get_feature_store(featurestore_id).await?;

        let name = match request.name {
            Some(name) => {
                validate_name(&name)?;
                name
            }
            None => generated_view_name(),
        };
        if let Some(version) = request.version {
            if version <= 0 {
                return Err(Error::InvalidVersion(version));
            }
        }

        let query = resolve_query(self, request.query, &self.settings.resolve).await?;
        if query.featurestore_id != Some(store.id) {
            return Err(Error::invalid_input(format!(
                "feature group {} does not belong to feature store '{}'",
                query.left_feature_group.id, store.name
            )));
        }

        let draft = FeatureViewDraft {
            featurestore_id: store.id,
            featurestore_name: store.name.clone(),
            name,
            version: request.version,
            description: request.description,
            query,
        };

        let view = if draft.version.is_some() {
            self.backend.insert_feature_view(&draft).await?
        } else {
            retry_if(&self.settings.retry, is_retryable, || {
                self.backend.insert_feature_view(&draft)
            })
            .await?
        };

        info!(id = view.id, name = %view.name, version = view.version, "Created feature view");
        Ok(view)
    }

    pub async fn get_feature_view(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<FeatureView> {
        self.backend
            .get_feature_view(featurestore_id, name, version)
            .await?
            .ok_or_else(|| Error::FeatureViewNotFound {
                name: name.to_string(),
                version: Some(version),
            })
    }

    /// Every version of one feature view, oldest first
    pub async fn get_feature_views(&self, featurestore_id: i64, name: &str) -> Result<Vec<FeatureView>> {
        let views = self
            .backend
            .list_feature_views(featurestore_id, Some(name))
            .await?;
        if views.is_empty() {
            return Err(Error::FeatureViewNotFound {
                name: name.to_string(),
                version: None,
            });
        }
        Ok(views)
    }

    /// Every feature view of a store, by name then version
    pub async fn list_feature_views(&self, featurestore_id: i64) -> Result<Vec<FeatureView>> {
        self.get_feature_store(featurestore_id).await?;
        self.backend.list_feature_views(featurestore_id, None).await
    }

    /// Changes the description; the query is immutable
    pub async fn update_feature_view(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        update: FeatureViewUpdate,
    ) -> Result<FeatureView> {
        let mut view = self.get_feature_view(featurestore_id, name, version).await?;
        if let Some(description) = update.description {
            self.backend
                .update_feature_view_description(view.id, Some(&description))
                .await?;
            view.description = Some(description);
        }
        Ok(view)
    }

    /// Deletes a feature view with all its training datasets and their data
    #[instrument(skip(self))]
    pub async fn delete_feature_view(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<()> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        let datasets = self.backend.list_training_datasets(view.id).await?;
        self.delete_data(&datasets).await?;
        self.backend.delete_feature_view(view.id).await?;
        info!(name, version, datasets = datasets.len(), "Deleted feature view");
        Ok(())
    }

    /// The stored query, exactly as it was resolved at creation
    pub async fn get_query(&self, featurestore_id: i64, name: &str, version: i32) -> Result<Query> {
        Ok(self.get_feature_view(featurestore_id, name, version).await?.query)
    }

    /// The stored query restricted to `window` on the anchor's event time
    pub async fn get_batch_query(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        window: TimeWindow,
    ) -> Result<Query> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        let anchor_id = view.query.left_feature_group.id;
        let anchor = self
            .backend
            .get_feature_group(anchor_id)
            .await?
            .ok_or(Error::UnknownFeatureGroup(anchor_id))?;
        build_batch_query(&view, &anchor, window)
    }

    // ========================================================================
    // Training datasets
    // ========================================================================

    #[instrument(skip(self, request))]
    pub async fn create_training_dataset(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        request: TrainingDatasetRequest,
    ) -> Result<TrainingDataset> {
        let store = self.get_feature_store(featurestore_id).await?;
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        let connector = self.resolve_connector(&store, &request).await?;

        let draft = self.planner.plan(&view, &connector, request)?;
        let dataset = if draft.version.is_some() {
            self.backend.insert_training_dataset(&draft).await?
        } else {
            retry_if(&self.settings.retry, is_retryable, || {
                self.backend.insert_training_dataset(&draft)
            })
            .await?
        };

        info!(
            id = dataset.id,
            name = %dataset.name,
            version = dataset.version,
            location = %dataset.location,
            "Created training dataset"
        );
        Ok(dataset)
    }

    /// Connector a create request refers to, or the store's default HopsFS one
    async fn resolve_connector(
        &self,
        store: &FeatureStore,
        request: &TrainingDatasetRequest,
    ) -> Result<StorageConnector> {
        if let Some(selector) = &request.storage_connector {
            let found = match (selector.id, selector.name.as_deref()) {
                (Some(id), _) => self.backend.get_storage_connector(store.id, id).await?,
                (None, Some(name)) => {
                    self.backend
                        .get_storage_connector_by_name(store.id, name)
                        .await?
                }
                (None, None) => {
                    return Err(Error::invalid_input(
                        "storageConnector needs an id or a name",
                    ))
                }
            };
            let label = selector
                .name
                .clone()
                .or_else(|| selector.id.map(|id| id.to_string()))
                .unwrap_or_default();
            return found.ok_or(Error::StorageConnectorNotFound(label));
        }

        match request.training_dataset_type {
            Some(TrainingDatasetType::ExternalTrainingDataset) => Err(
                Error::StorageConnectorNotFound("external training datasets need a storage connector".to_string()),
            ),
            _ => {
                let default_name = store.default_training_connector_name();
                self.backend
                    .get_storage_connector_by_name(store.id, &default_name)
                    .await?
                    .ok_or(Error::StorageConnectorNotFound(default_name))
            }
        }
    }

    pub async fn get_training_dataset(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        dataset_version: i32,
    ) -> Result<TrainingDataset> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        self.backend
            .get_training_dataset(view.id, dataset_version)
            .await?
            .ok_or_else(|| Error::TrainingDatasetNotFound {
                feature_view: format!("{}_{}", view.name, view.version),
                version: dataset_version,
            })
    }

    pub async fn list_training_datasets(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<Vec<TrainingDataset>> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        self.backend.list_training_datasets(view.id).await
    }

    /// Updates the description; every other field in the request is ignored
    pub async fn update_training_dataset(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        dataset_version: i32,
        update: TrainingDatasetUpdate,
    ) -> Result<TrainingDataset> {
        let mut dataset = self
            .get_training_dataset(featurestore_id, name, version, dataset_version)
            .await?;
        dataset.apply_update(&update);
        self.backend.update_training_dataset(&dataset).await?;
        Ok(dataset)
    }

    pub async fn update_statistics_config(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        dataset_version: i32,
        config: StatisticsConfig,
    ) -> Result<TrainingDataset> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        config.validate(&view.features)?;
        let mut dataset = self
            .get_training_dataset(featurestore_id, name, version, dataset_version)
            .await?;
        dataset.statistics_config = config;
        self.backend.update_training_dataset(&dataset).await?;
        Ok(dataset)
    }

    /// Deletes one training dataset, data and metadata
    pub async fn delete_training_dataset(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        dataset_version: i32,
    ) -> Result<()> {
        let dataset = self
            .get_training_dataset(featurestore_id, name, version, dataset_version)
            .await?;
        self.delete_data(std::slice::from_ref(&dataset)).await?;
        self.backend.delete_training_dataset(dataset.id).await?;
        Ok(())
    }

    /// Deletes every training dataset of a feature view, data and metadata
    pub async fn delete_training_datasets(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<usize> {
        let view = self.get_feature_view(featurestore_id, name, version).await?;
        let datasets = self.backend.list_training_datasets(view.id).await?;
        self.delete_data(&datasets).await?;
        self.backend.delete_training_datasets(view.id).await
    }

    /// Deletes the materialized data of one training dataset, keeping its metadata
    pub async fn delete_training_dataset_data(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
        dataset_version: i32,
    ) -> Result<()> {
        let dataset = self
            .get_training_dataset(featurestore_id, name, version, dataset_version)
            .await?;
        self.delete_data(std::slice::from_ref(&dataset)).await
    }

    /// Deletes the materialized data of every training dataset of a view
    pub async fn delete_training_datasets_data(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<()> {
        let datasets = self
            .list_training_datasets(featurestore_id, name, version)
            .await?;
        self.delete_data(&datasets).await
    }

    async fn delete_data(&self, datasets: &[TrainingDataset]) -> Result<()> {
        let Some(store) = &self.data_store else {
            if !datasets.is_empty() {
                warn!(datasets = datasets.len(), "No data store configured; skipping data delete");
            }
            return Ok(());
        };
        for dataset in datasets {
            store.delete(&dataset.location).await?;
            debug!(location = %dataset.location, "Deleted training dataset data");
        }
        Ok(())
    }
}

#[async_trait]
impl FeatureCatalog for FeatureRegistry {
    async fn feature_store(&self, id: i64) -> Result<Option<FeatureStore>> {
        self.backend.get_feature_store(id).await
    }

    async fn feature_group(&self, id: i64) -> Result<Option<FeatureGroup>> {
        self.backend.get_feature_group(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use featurelens_core::{FeatureGroupFeature, FeatureGroupRef, FeatureRef};

    #[test]
    fn test_generated_view_name_follows_policy() {
        let name = generated_view_name();
        assert!(name.starts_with("feature_view_"));
        assert_eq!(name.len(), "feature_view_".len() + 8);
        assert!(validate_name(&name).is_ok());
    }

    #[test]
    fn test_request_builder() {
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("a")]);
        let request = FeatureViewRequest::new(query)
            .named("fv")
            .with_version(3)
            .with_description("d");
        assert_eq!(request.name.as_deref(), Some("fv"));
        assert_eq!(request.version, Some(3));
        assert_eq!(request.description.as_deref(), Some("d"));
    }

    #[test]
    fn test_default_settings_retry_version_races() {
        let settings = RegistrySettings::default();
        assert_eq!(settings.retry.max_retries, RetryPolicy::aggressive().max_retries);
        assert!(is_retryable(&Error::DuplicateNameVersion {
            entity: "Feature view",
            name: "fv".to_string(),
            version: 1,
        }));
        assert!(!is_retryable(&Error::InvalidVersion(0)));
    }

    #[tokio::test]
    async fn test_feature_group_must_belong_to_store() {
        let registry = FeatureRegistry::in_memory().await.unwrap();
        let a = registry.create_feature_store("a_featurestore").await.unwrap();
        let b = registry.create_feature_store("b_featurestore").await.unwrap();

        let group = registry
            .create_feature_group(
                a.id,
                FeatureGroup {
                    id: 0,
                    featurestore_id: 0,
                    name: "fg".to_string(),
                    version: 1,
                    event_time: None,
                    features: vec![FeatureGroupFeature::new("id", "int").primary()],
                },
            )
            .await
            .unwrap();

        assert!(registry.get_feature_group(a.id, group.id).await.is_ok());
        assert!(matches!(
            registry.get_feature_group(b.id, group.id).await,
            Err(Error::UnknownFeatureGroup(_))
        ));

        let query = Query::new(FeatureGroupRef::new(group.id), vec![FeatureRef::named("id")]);
        let err = registry
            .create_feature_view(b.id, FeatureViewRequest::new(query).named("fv"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
