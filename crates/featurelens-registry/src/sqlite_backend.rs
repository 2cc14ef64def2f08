//! SQLite backend implementation with WAL mode
//!
//! One connection behind a mutex. Writes that allocate versions run in an
//! IMMEDIATE transaction, so two processes sharing the file serialize on the
//! write lock instead of both reading the same `max(version)`.

use crate::backend::RegistryBackend;
use crate::schema;
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use featurelens_core::query::codec;
use featurelens_core::query::QueryLimits;
use featurelens_core::training::{
    DataFormat, Split, StatisticsConfig, StorageConnectorRef, TrainingDataset,
    TrainingDatasetDraft, TrainingDatasetType,
};
use featurelens_core::{
    Error, FeatureGroup, FeatureGroupFeature, FeatureStore, FeatureView, FeatureViewDraft, Query,
    Result, StorageConnector, StorageConnectorKind,
};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Locks `mutex`, taking the guard back from a panicked holder
fn recover_mutex<'a, T>(mutex: &'a Mutex<T>, owner: &str) -> MutexGuard<'a, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("{} connection mutex was poisoned; recovering", owner);
        poisoned.into_inner()
    })
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn conversion_failure<E>(idx: usize, e: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| conversion_failure(idx, e))
}

fn query_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Query> {
    let text: String = row.get(idx)?;
    codec::from_json(&text, &QueryLimits::unbounded()).map_err(|e| conversion_failure(idx, e))
}

fn timestamp_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    Ok(DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now))
}

const FEATURE_GROUP_COLUMNS: &str =
    "id, featurestore_id, name, version, event_time, features FROM feature_groups";

fn feature_group_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureGroup> {
    let features: Vec<FeatureGroupFeature> = json_column(row, 5)?;
    Ok(FeatureGroup {
        id: row.get(0)?,
        featurestore_id: row.get(1)?,
        name: row.get(2)?,
        version: row.get(3)?,
        event_time: row.get(4)?,
        features,
    })
}

const CONNECTOR_COLUMNS: &str =
    "id, featurestore_id, name, description, config FROM storage_connectors";

fn connector_from_row(row: &Row<'_>) -> rusqlite::Result<StorageConnector> {
    let kind: StorageConnectorKind = json_column(row, 4)?;
    Ok(StorageConnector {
        id: row.get(0)?,
        featurestore_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        kind,
    })
}

const FEATURE_VIEW_SELECT: &str = r#"
    SELECT fv.id, fv.featurestore_id, fs.name, fv.name, fv.version, fv.description,
           fv.query, fv.features, fv.created_at
    FROM feature_views fv
    JOIN featurestores fs ON fs.id = fv.featurestore_id
"#;

fn feature_view_from_row(row: &Row<'_>) -> rusqlite::Result<FeatureView> {
    Ok(FeatureView {
        id: row.get(0)?,
        featurestore_id: row.get(1)?,
        featurestore_name: row.get(2)?,
        name: row.get(3)?,
        version: row.get(4)?,
        description: row.get(5)?,
        query: query_column(row, 6)?,
        features: json_column(row, 7)?,
        created: timestamp_column(row, 8)?,
    })
}

const TRAINING_DATASET_SELECT: &str = r#"
    SELECT td.id, fv.featurestore_id, fs.name, fv.id, fv.name, fv.version, td.version,
           td.description, td.data_format, td.training_dataset_type,
           td.storage_connector_id, td.storage_connector_name, td.storage_connector_type,
           td.location, td.seed, td.splits, td.train_split, td.statistics_config,
           td.coalesce_output, td.event_start_time, td.event_end_time, td.created_at
    FROM training_datasets td
    JOIN feature_views fv ON fv.id = td.feature_view_id
    JOIN featurestores fs ON fs.id = fv.featurestore_id
"#;

fn training_dataset_from_row(row: &Row<'_>) -> rusqlite::Result<TrainingDataset> {
    let data_format: String = row.get(8)?;
    let data_format: DataFormat = data_format.parse().map_err(|e| conversion_failure(8, e))?;
    let dataset_type: String = row.get(9)?;
    let training_dataset_type: TrainingDatasetType =
        dataset_type.parse().map_err(|e| conversion_failure(9, e))?;
    let splits: Vec<Split> = json_column(row, 15)?;
    let statistics_config: StatisticsConfig = json_column(row, 17)?;

    Ok(TrainingDataset {
        id: row.get(0)?,
        featurestore_id: row.get(1)?,
        featurestore_name: row.get(2)?,
        feature_view_id: row.get(3)?,
        feature_view_name: row.get(4)?,
        feature_view_version: row.get(5)?,
        name: format!("{}_{}", row.get::<_, String>(4)?, row.get::<_, i32>(5)?),
        version: row.get(6)?,
        description: row.get(7)?,
        data_format,
        training_dataset_type,
        storage_connector: StorageConnectorRef {
            id: row.get(10)?,
            name: row.get(11)?,
            storage_connector_type: row.get(12)?,
        },
        location: row.get(13)?,
        seed: row.get(14)?,
        splits,
        train_split: row.get(16)?,
        statistics_config,
        coalesce: row.get(18)?,
        event_start_time: row.get(19)?,
        event_end_time: row.get(20)?,
        created: timestamp_column(row, 21)?,
    })
}

/// SQLite backend with WAL mode
pub struct SqliteBackend {
    db: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Create new SQLite backend from file path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        let is_memory = path_str == ":memory:" || path_str.starts_with("file::memory:");

        if !is_memory {
            if let Some(parent) = path.as_ref().parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create registry directory {:?}", parent))?;
                }
            }
        }

        let db = Connection::open_with_flags(
            path.as_ref(),
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .context("Failed to open SQLite connection for registry")?;

        if !is_memory {
            db.pragma_update(None, "journal_mode", "WAL")
                .context("Failed to enable WAL mode")?;

            // wait for locks held by other processes instead of failing
            db.pragma_update(None, "busy_timeout", 5000)
                .context("Failed to set busy timeout")?;

            db.pragma_update(None, "synchronous", "NORMAL")
                .context("Failed to set synchronous mode")?;

            info!("Initialized SQLite registry at {:?} with WAL mode", path.as_ref());
        } else {
            info!("Initialized in-memory SQLite registry");
        }

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// Create in-memory SQLite backend (for testing)
    pub fn in_memory() -> Result<Self> {
        let db =
            Connection::open_in_memory().context("Failed to create in-memory SQLite connection")?;

        info!("Initialized in-memory SQLite registry");

        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        recover_mutex(&self.db, "SqliteBackend")
    }
}

#[async_trait]
impl RegistryBackend for SqliteBackend {
    async fn init_schema(&self) -> Result<()> {
        let db = self.conn();
        schema::create_tables(&db)?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let db = self.conn();
        db.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
            .context("SQLite registry did not answer")?;
        Ok(())
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    async fn create_feature_store(&self, name: &str) -> Result<FeatureStore> {
        let mut db = self.conn();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        match tx.execute(
            "INSERT INTO featurestores (name, created_at) VALUES (?, ?)",
            params![name, Utc::now().timestamp_millis()],
        ) {
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::invalid_input(format!(
                    "feature store '{}' already exists",
                    name
                )))
            }
            other => other.context("Failed to insert feature store")?,
        };
        let store = FeatureStore {
            id: tx.last_insert_rowid(),
            name: name.to_string(),
        };

        let kind = StorageConnectorKind::Hopsfs {
            hopsfs_path: store.default_training_path(),
        };
        tx.execute(
            r#"
            INSERT INTO storage_connectors (featurestore_id, name, description, connector_type, config)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                store.id,
                store.default_training_connector_name(),
                "Default location for training datasets",
                kind.type_name(),
                serde_json::to_string(&kind)?,
            ],
        )
        .context("Failed to insert default training dataset connector")?;

        tx.commit().context("Failed to commit feature store")?;
        debug!(id = store.id, name = %store.name, "Created feature store");
        Ok(store)
    }

    async fn get_feature_store(&self, id: i64) -> Result<Option<FeatureStore>> {
        let db = self.conn();
        let store = db
            .query_row(
                "SELECT id, name FROM featurestores WHERE id = ?",
                params![id],
                |row| {
                    Ok(FeatureStore {
                        id: row.get(0)?,
                        name: row.get(1)?,
                    })
                },
            )
            .optional()
            .context("Failed to read feature store")?;
        Ok(store)
    }

    async fn list_feature_stores(&self) -> Result<Vec<FeatureStore>> {
        let db = self.conn();
        let mut stmt = db
            .prepare("SELECT id, name FROM featurestores ORDER BY id")
            .context("Failed to prepare feature store listing")?;
        let stores = stmt
            .query_map([], |row| {
                Ok(FeatureStore {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            })
            .context("Failed to list feature stores")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read feature store row")?;
        Ok(stores)
    }

    async fn create_feature_group(&self, group: &FeatureGroup) -> Result<FeatureGroup> {
        let db = self.conn();
        let features = serde_json::to_string(&group.features)?;

        match db.execute(
            r#"
            INSERT INTO feature_groups (featurestore_id, name, version, event_time, features, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
            params![
                group.featurestore_id,
                &group.name,
                group.version,
                &group.event_time,
                features,
                Utc::now().timestamp_millis(),
            ],
        ) {
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateNameVersion {
                    entity: "Feature group",
                    name: group.name.clone(),
                    version: group.version,
                })
            }
            other => other.context("Failed to insert feature group")?,
        };

        let created = FeatureGroup {
            id: db.last_insert_rowid(),
            ..group.clone()
        };
        debug!(id = created.id, name = %created.qualified_name(), "Created feature group");
        Ok(created)
    }

    async fn get_feature_group(&self, id: i64) -> Result<Option<FeatureGroup>> {
        let db = self.conn();
        let group = db
            .query_row(
                &format!("SELECT {} WHERE id = ?", FEATURE_GROUP_COLUMNS),
                params![id],
                feature_group_from_row,
            )
            .optional()
            .context("Failed to read feature group")?;
        Ok(group)
    }

    async fn list_feature_groups(&self, featurestore_id: i64) -> Result<Vec<FeatureGroup>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {} WHERE featurestore_id = ? ORDER BY name, version",
                FEATURE_GROUP_COLUMNS
            ))
            .context("Failed to prepare feature group listing")?;
        let groups = stmt
            .query_map(params![featurestore_id], feature_group_from_row)
            .context("Failed to list feature groups")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read feature group row")?;
        Ok(groups)
    }

    async fn create_storage_connector(
        &self,
        connector: &StorageConnector,
    ) -> Result<StorageConnector> {
        let db = self.conn();
        let config = serde_json::to_string(&connector.kind)?;

        match db.execute(
            r#"
            INSERT INTO storage_connectors (featurestore_id, name, description, connector_type, config)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                connector.featurestore_id,
                &connector.name,
                &connector.description,
                connector.kind.type_name(),
                config,
            ],
        ) {
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::invalid_input(format!(
                    "storage connector '{}' already exists",
                    connector.name
                )))
            }
            other => other.context("Failed to insert storage connector")?,
        };

        Ok(StorageConnector {
            id: db.last_insert_rowid(),
            ..connector.clone()
        })
    }

    async fn get_storage_connector(
        &self,
        featurestore_id: i64,
        id: i64,
    ) -> Result<Option<StorageConnector>> {
        let db = self.conn();
        let connector = db
            .query_row(
                &format!("SELECT {} WHERE featurestore_id = ? AND id = ?", CONNECTOR_COLUMNS),
                params![featurestore_id, id],
                connector_from_row,
            )
            .optional()
            .context("Failed to read storage connector")?;
        Ok(connector)
    }

    async fn get_storage_connector_by_name(
        &self,
        featurestore_id: i64,
        name: &str,
    ) -> Result<Option<StorageConnector>> {
        let db = self.conn();
        let connector = db
            .query_row(
                &format!("SELECT {} WHERE featurestore_id = ? AND name = ?", CONNECTOR_COLUMNS),
                params![featurestore_id, name],
                connector_from_row,
            )
            .optional()
            .context("Failed to read storage connector")?;
        Ok(connector)
    }

    async fn list_storage_connectors(&self, featurestore_id: i64) -> Result<Vec<StorageConnector>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "SELECT {} WHERE featurestore_id = ? ORDER BY name",
                CONNECTOR_COLUMNS
            ))
            .context("Failed to prepare storage connector listing")?;
        let connectors = stmt
            .query_map(params![featurestore_id], connector_from_row)
            .context("Failed to list storage connectors")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read storage connector row")?;
        Ok(connectors)
    }

    // ========================================================================
    // Feature views
    // ========================================================================

    async fn insert_feature_view(&self, draft: &FeatureViewDraft) -> Result<FeatureView> {
        let query_json = codec::to_json(&draft.query)?;
        let features = serde_json::to_string(&draft.query.output_feature_names())?;
        let created = Utc::now();

        let mut db = self.conn();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let version = match draft.version {
            Some(v) => v,
            None => {
                let max: Option<i32> = tx
                    .query_row(
                        "SELECT MAX(version) FROM feature_views WHERE featurestore_id = ? AND name = ?",
                        params![draft.featurestore_id, &draft.name],
                        |row| row.get(0),
                    )
                    .context("Failed to compute next feature view version")?;
                max.unwrap_or(0) + 1
            }
        };

        match tx.execute(
            r#"
            INSERT INTO feature_views (featurestore_id, name, version, description, query, features, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                draft.featurestore_id,
                &draft.name,
                version,
                &draft.description,
                query_json,
                features,
                created.timestamp_millis(),
            ],
        ) {
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateNameVersion {
                    entity: "Feature view",
                    name: draft.name.clone(),
                    version,
                })
            }
            other => other.context("Failed to insert feature view")?,
        };
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit feature view")?;

        debug!(id, name = %draft.name, version, "Registered feature view");
        // millisecond precision, as it will read back
        let created = DateTime::from_timestamp_millis(created.timestamp_millis()).unwrap_or(created);
        Ok(draft.clone().finalize(id, version, created))
    }

    async fn get_feature_view(
        &self,
        featurestore_id: i64,
        name: &str,
        version: i32,
    ) -> Result<Option<FeatureView>> {
        let db = self.conn();
        let view = db
            .query_row(
                &format!(
                    "{} WHERE fv.featurestore_id = ? AND fv.name = ? AND fv.version = ?",
                    FEATURE_VIEW_SELECT
                ),
                params![featurestore_id, name, version],
                feature_view_from_row,
            )
            .optional()
            .context("Failed to read feature view")?;
        Ok(view)
    }

    async fn list_feature_views(
        &self,
        featurestore_id: i64,
        name: Option<&str>,
    ) -> Result<Vec<FeatureView>> {
        let db = self.conn();
        let sql = format!(
            "{} WHERE fv.featurestore_id = ?1 AND (?2 IS NULL OR fv.name = ?2) ORDER BY fv.name, fv.version",
            FEATURE_VIEW_SELECT
        );
        let mut stmt = db
            .prepare(&sql)
            .context("Failed to prepare feature view listing")?;
        let views = stmt
            .query_map(params![featurestore_id, name], feature_view_from_row)
            .context("Failed to list feature views")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read feature view row")?;
        Ok(views)
    }

    async fn update_feature_view_description(
        &self,
        id: i64,
        description: Option<&str>,
    ) -> Result<()> {
        let db = self.conn();
        db.execute(
            "UPDATE feature_views SET description = ? WHERE id = ?",
            params![description, id],
        )
        .context("Failed to update feature view")?;
        Ok(())
    }

    async fn delete_feature_view(&self, id: i64) -> Result<bool> {
        let mut db = self.conn();
        let tx = db.transaction().context("Failed to begin transaction")?;
        let datasets = tx
            .execute(
                "DELETE FROM training_datasets WHERE feature_view_id = ?",
                params![id],
            )
            .context("Failed to delete training datasets of feature view")?;
        let deleted = tx
            .execute("DELETE FROM feature_views WHERE id = ?", params![id])
            .context("Failed to delete feature view")?;
        tx.commit().context("Failed to commit feature view delete")?;

        debug!(id, datasets, "Deleted feature view");
        Ok(deleted > 0)
    }

    // ========================================================================
    // Training datasets
    // ========================================================================

    async fn insert_training_dataset(
        &self,
        draft: &TrainingDatasetDraft,
    ) -> Result<TrainingDataset> {
        let splits = serde_json::to_string(&draft.splits)?;
        let statistics_config = serde_json::to_string(&draft.statistics_config)?;
        let created = Utc::now();

        let mut db = self.conn();
        let tx = db
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .context("Failed to begin transaction")?;

        let version = match draft.version {
            Some(v) => v,
            None => {
                let max: Option<i32> = tx
                    .query_row(
                        "SELECT MAX(version) FROM training_datasets WHERE feature_view_id = ?",
                        params![draft.feature_view_id],
                        |row| row.get(0),
                    )
                    .context("Failed to compute next training dataset version")?;
                max.unwrap_or(0) + 1
            }
        };

        match tx.execute(
            r#"
            INSERT INTO training_datasets (
                feature_view_id, version, description, data_format, training_dataset_type,
                storage_connector_id, storage_connector_name, storage_connector_type,
                location, seed, splits, train_split, statistics_config, coalesce_output,
                event_start_time, event_end_time, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                draft.feature_view_id,
                version,
                &draft.description,
                draft.data_format.as_str(),
                draft.training_dataset_type.as_str(),
                draft.storage_connector.id,
                &draft.storage_connector.name,
                &draft.storage_connector.storage_connector_type,
                draft.location_for(version),
                draft.seed,
                splits,
                &draft.train_split,
                statistics_config,
                draft.coalesce,
                draft.event_start_time,
                draft.event_end_time,
                created.timestamp_millis(),
            ],
        ) {
            Err(e) if is_unique_violation(&e) => {
                return Err(Error::DuplicateNameVersion {
                    entity: "Training dataset",
                    name: draft.name(),
                    version,
                })
            }
            other => other.context("Failed to insert training dataset")?,
        };
        let id = tx.last_insert_rowid();
        tx.commit().context("Failed to commit training dataset")?;

        debug!(id, name = %draft.name(), version, "Registered training dataset");
        let created = DateTime::from_timestamp_millis(created.timestamp_millis()).unwrap_or(created);
        Ok(draft.clone().finalize(id, version, created))
    }

    async fn get_training_dataset(
        &self,
        feature_view_id: i64,
        version: i32,
    ) -> Result<Option<TrainingDataset>> {
        let db = self.conn();
        let dataset = db
            .query_row(
                &format!(
                    "{} WHERE td.feature_view_id = ? AND td.version = ?",
                    TRAINING_DATASET_SELECT
                ),
                params![feature_view_id, version],
                training_dataset_from_row,
            )
            .optional()
            .context("Failed to read training dataset")?;
        Ok(dataset)
    }

    async fn list_training_datasets(&self, feature_view_id: i64) -> Result<Vec<TrainingDataset>> {
        let db = self.conn();
        let mut stmt = db
            .prepare(&format!(
                "{} WHERE td.feature_view_id = ? ORDER BY td.version",
                TRAINING_DATASET_SELECT
            ))
            .context("Failed to prepare training dataset listing")?;
        let datasets = stmt
            .query_map(params![feature_view_id], training_dataset_from_row)
            .context("Failed to list training datasets")?
            .collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read training dataset row")?;
        Ok(datasets)
    }

    async fn update_training_dataset(&self, dataset: &TrainingDataset) -> Result<()> {
        let db = self.conn();
        let statistics_config = serde_json::to_string(&dataset.statistics_config)?;
        db.execute(
            "UPDATE training_datasets SET description = ?, statistics_config = ? WHERE id = ?",
            params![&dataset.description, statistics_config, dataset.id],
        )
        .context("Failed to update training dataset")?;
        Ok(())
    }

    async fn delete_training_dataset(&self, id: i64) -> Result<bool> {
        let db = self.conn();
        let deleted = db
            .execute("DELETE FROM training_datasets WHERE id = ?", params![id])
            .context("Failed to delete training dataset")?;
        Ok(deleted > 0)
    }

    async fn delete_training_datasets(&self, feature_view_id: i64) -> Result<usize> {
        let db = self.conn();
        let deleted = db
            .execute(
                "DELETE FROM training_datasets WHERE feature_view_id = ?",
                params![feature_view_id],
            )
            .context("Failed to delete training datasets")?;
        Ok(deleted)
    }
}
