//! Training dataset planning
//!
//! Turns a create request for a feature view into a validated
//! [`TrainingDatasetDraft`]. The draft knows everything except its id and
//! version; the registry assigns those and calls
//! [`TrainingDatasetDraft::finalize`], which also appends the
//! `<view>_<viewVersion>_<datasetVersion>` segment to the location.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{FeatureView, StorageConnector, StorageConnectorKind};
use crate::validation::{name_violation, validate_location_path};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Tsv,
    Parquet,
    Avro,
    Orc,
    Json,
    Tfrecords,
    Tfrecord,
    Petastorm,
    Hdf5,
    Npy,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::Csv => "csv",
            DataFormat::Tsv => "tsv",
            DataFormat::Parquet => "parquet",
            DataFormat::Avro => "avro",
            DataFormat::Orc => "orc",
            DataFormat::Json => "json",
            DataFormat::Tfrecords => "tfrecords",
            DataFormat::Tfrecord => "tfrecord",
            DataFormat::Petastorm => "petastorm",
            DataFormat::Hdf5 => "hdf5",
            DataFormat::Npy => "npy",
        }
    }
}

impl fmt::Display for DataFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(DataFormat::Csv),
            "tsv" => Ok(DataFormat::Tsv),
            "parquet" => Ok(DataFormat::Parquet),
            "avro" => Ok(DataFormat::Avro),
            "orc" => Ok(DataFormat::Orc),
            "json" => Ok(DataFormat::Json),
            "tfrecords" => Ok(DataFormat::Tfrecords),
            "tfrecord" => Ok(DataFormat::Tfrecord),
            "petastorm" => Ok(DataFormat::Petastorm),
            "hdf5" => Ok(DataFormat::Hdf5),
            "npy" => Ok(DataFormat::Npy),
            _ => Err(Error::InvalidDataFormat(format!(
                "'{}' is not a supported data format",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrainingDatasetType {
    HopsfsTrainingDataset,
    ExternalTrainingDataset,
}

impl TrainingDatasetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingDatasetType::HopsfsTrainingDataset => "HOPSFS_TRAINING_DATASET",
            TrainingDatasetType::ExternalTrainingDataset => "EXTERNAL_TRAINING_DATASET",
        }
    }
}

impl FromStr for TrainingDatasetType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "HOPSFS_TRAINING_DATASET" => Ok(TrainingDatasetType::HopsfsTrainingDataset),
            "EXTERNAL_TRAINING_DATASET" => Ok(TrainingDatasetType::ExternalTrainingDataset),
            other => Err(Error::invalid_input(format!(
                "unknown training dataset type '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Split {
    pub name: String,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StatisticsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub histograms: bool,
    #[serde(default)]
    pub correlations: bool,
    #[serde(default)]
    pub exact_uniqueness: bool,
    #[serde(default)]
    pub columns: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            histograms: false,
            correlations: false,
            exact_uniqueness: false,
            columns: Vec::new(),
        }
    }
}

impl StatisticsConfig {
    /// Every column must be one of `features`
    pub fn validate(&self, features: &[String]) -> Result<()> {
        for column in &self.columns {
            if !features.iter().any(|f| f == column) {
                return Err(Error::UnknownStatisticsColumn(column.clone()));
            }
        }
        Ok(())
    }
}

/// The connector a training dataset is stored through, as embedded in responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConnectorRef {
    pub id: i64,
    pub name: String,
    pub storage_connector_type: String,
}

impl From<&StorageConnector> for StorageConnectorRef {
    fn from(c: &StorageConnector) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            storage_connector_type: c.kind.type_name().to_string(),
        }
    }
}

/// Connector selector in a create request: by id or by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorSelector {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// A split as sent by clients; the percentage may be a number or a numeric string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitRequest {
    pub name: String,
    pub percentage: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDatasetRequest {
    #[serde(default)]
    pub version: Option<i32>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data_format: Option<String>,
    #[serde(default)]
    pub training_dataset_type: Option<TrainingDatasetType>,
    #[serde(default)]
    pub storage_connector: Option<ConnectorSelector>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub seed: Option<i64>,
    #[serde(default)]
    pub splits: Vec<SplitRequest>,
    #[serde(default)]
    pub train_split: Option<String>,
    #[serde(default)]
    pub statistics_config: Option<StatisticsConfig>,
    #[serde(default)]
    pub coalesce: bool,
    #[serde(default)]
    pub event_start_time: Option<i64>,
    #[serde(default)]
    pub event_end_time: Option<i64>,
}

/// Body of a statistics configuration update
///
/// Clients send the training dataset shape; only `statisticsConfig` is read
/// and it must be present.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticsConfigUpdate {
    pub statistics_config: StatisticsConfig,
}

/// Only the description of a training dataset can be changed after creation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDatasetUpdate {
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDataset {
    pub id: i64,
    pub featurestore_id: i64,
    pub featurestore_name: String,
    pub feature_view_id: i64,
    pub feature_view_name: String,
    pub feature_view_version: i32,
    pub name: String,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub data_format: DataFormat,
    pub training_dataset_type: TrainingDatasetType,
    pub storage_connector: StorageConnectorRef,
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    pub splits: Vec<Split>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub train_split: Option<String>,
    pub statistics_config: StatisticsConfig,
    pub coalesce: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_start_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_end_time: Option<i64>,
    pub created: DateTime<Utc>,
}

impl TrainingDataset {
    /// Applies a metadata update; only the description is mutable
    pub fn apply_update(&mut self, update: &TrainingDatasetUpdate) {
        if let Some(description) = &update.description {
            self.description = Some(description.clone());
        }
    }
}

/// A validated training dataset waiting for an id and version
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingDatasetDraft {
    pub featurestore_id: i64,
    pub featurestore_name: String,
    pub feature_view_id: i64,
    pub feature_view_name: String,
    pub feature_view_version: i32,
    /// `None` means "next free version"
    pub version: Option<i32>,
    pub description: Option<String>,
    pub data_format: DataFormat,
    pub training_dataset_type: TrainingDatasetType,
    pub storage_connector: StorageConnectorRef,
    /// Location without the terminal `<view>_<viewVersion>_<version>` segment
    pub location_base: String,
    pub seed: Option<i64>,
    pub splits: Vec<Split>,
    pub train_split: Option<String>,
    pub statistics_config: StatisticsConfig,
    pub coalesce: bool,
    pub event_start_time: Option<i64>,
    pub event_end_time: Option<i64>,
}

impl TrainingDatasetDraft {
    pub fn name(&self) -> String {
        format!("{}_{}", self.feature_view_name, self.feature_view_version)
    }

    pub fn location_for(&self, version: i32) -> String {
        join_location(
            &self.location_base,
            &[&format!(
                "{}_{}_{}",
                self.feature_view_name, self.feature_view_version, version
            )],
        )
    }

    pub fn finalize(self, id: i64, version: i32, created: DateTime<Utc>) -> TrainingDataset {
        let name = self.name();
        let location = self.location_for(version);
        TrainingDataset {
            id,
            featurestore_id: self.featurestore_id,
            featurestore_name: self.featurestore_name,
            feature_view_id: self.feature_view_id,
            feature_view_name: self.feature_view_name,
            feature_view_version: self.feature_view_version,
            name,
            version,
            description: self.description,
            data_format: self.data_format,
            training_dataset_type: self.training_dataset_type,
            storage_connector: self.storage_connector,
            location,
            seed: self.seed,
            splits: self.splits,
            train_split: self.train_split,
            statistics_config: self.statistics_config,
            coalesce: self.coalesce,
            event_start_time: self.event_start_time,
            event_end_time: self.event_end_time,
            created,
        }
    }
}

/// HopsFS namenode used to build `hopsfs://` locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopsfsEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for HopsfsEndpoint {
    fn default() -> Self {
        Self {
            host: "namenode.service.consul".to_string(),
            port: 8020,
        }
    }
}

/// Storage holding materialized training dataset files
///
/// Deleting a dataset's data leaves its metadata in the registry.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Removes everything stored under `location`; a missing location is not an error
    async fn delete(&self, location: &str) -> Result<()>;
}

/// Dataset type a connector produces, or `UnsupportedConnectorType`
pub fn training_dataset_type_for(connector: &StorageConnector) -> Result<TrainingDatasetType> {
    match connector.kind {
        StorageConnectorKind::Hopsfs { .. } => Ok(TrainingDatasetType::HopsfsTrainingDataset),
        StorageConnectorKind::S3 { .. }
        | StorageConnectorKind::Adls { .. }
        | StorageConnectorKind::Gcs { .. } => Ok(TrainingDatasetType::ExternalTrainingDataset),
        _ => Err(Error::UnsupportedConnectorType(
            connector.kind.type_name().to_string(),
        )),
    }
}

/// Scheme, authority and base path of a connector
pub fn connector_root(connector: &StorageConnector, hopsfs: &HopsfsEndpoint) -> Result<String> {
    let with_path = |root: String, path: &Option<String>| match path {
        Some(p) => join_location(&root, &[p]),
        None => root,
    };
    match &connector.kind {
        StorageConnectorKind::Hopsfs { hopsfs_path } => Ok(join_location(
            &format!("hopsfs://{}:{}", hopsfs.host, hopsfs.port),
            &[hopsfs_path],
        )),
        StorageConnectorKind::S3 { bucket, path } => {
            Ok(with_path(format!("s3://{}", bucket), path))
        }
        StorageConnectorKind::Adls {
            container_name,
            account_name,
            path,
        } => Ok(with_path(
            format!(
                "abfss://{}@{}.dfs.core.windows.net",
                container_name, account_name
            ),
            path,
        )),
        StorageConnectorKind::Gcs { bucket, path } => {
            Ok(with_path(format!("gs://{}", bucket), path))
        }
        _ => Err(Error::UnsupportedConnectorType(
            connector.kind.type_name().to_string(),
        )),
    }
}

/// Appends path segments to `root`, collapsing repeated slashes between them
pub fn join_location(root: &str, segments: &[&str]) -> String {
    let mut out = root.trim_end_matches('/').to_string();
    for segment in segments {
        for part in segment.split('/').filter(|p| !p.is_empty()) {
            out.push('/');
            out.push_str(part);
        }
    }
    out
}

fn parse_percentage(split: &SplitRequest) -> Result<f64> {
    let invalid = || Error::InvalidSplitPercentage {
        name: split.name.clone(),
        value: split.percentage.to_string(),
    };
    let value = match &split.percentage {
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(invalid)?,
        serde_json::Value::String(s) => s.trim().parse::<f64>().map_err(|_| invalid())?,
        _ => return Err(invalid()),
    };
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }
    Ok(value)
}

/// Validates split names, uniqueness and percentages, keeping order
pub fn validate_splits(splits: &[SplitRequest]) -> Result<Vec<Split>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(splits.len());
    for split in splits {
        if name_violation(&split.name).is_some() {
            return Err(Error::InvalidSplitName(split.name.clone()));
        }
        if !seen.insert(split.name.as_str()) {
            return Err(Error::DuplicateSplitName(split.name.clone()));
        }
        out.push(Split {
            name: split.name.clone(),
            percentage: parse_percentage(split)?,
        });
    }
    Ok(out)
}

/// Builds training dataset drafts for feature views
#[derive(Debug, Clone)]
pub struct TrainingDatasetPlanner {
    hopsfs: HopsfsEndpoint,
}

impl TrainingDatasetPlanner {
    pub fn new(hopsfs: HopsfsEndpoint) -> Self {
        Self { hopsfs }
    }

    pub fn hopsfs(&self) -> &HopsfsEndpoint {
        &self.hopsfs
    }

    /// Validates `request` against `view` and the already resolved `connector`
    ///
    /// The connector is checked before anything else, so an unsupported
    /// connector type is reported whatever else is wrong with the request.
    pub fn plan(
        &self,
        view: &FeatureView,
        connector: &StorageConnector,
        request: TrainingDatasetRequest,
    ) -> Result<TrainingDatasetDraft> {
        // 1. connector
        let training_dataset_type = training_dataset_type_for(connector)?;
        let root = connector_root(connector, &self.hopsfs)?;

        // 2. version
        if let Some(version) = request.version {
            if version <= 0 {
                return Err(Error::InvalidVersion(version));
            }
        }

        // 3. data format
        let data_format: DataFormat = request
            .data_format
            .as_deref()
            .ok_or_else(|| Error::InvalidDataFormat("dataFormat is required".to_string()))?
            .parse()?;

        // 4. splits
        let splits = validate_splits(&request.splits)?;
        if let Some(train_split) = &request.train_split {
            if !splits.iter().any(|s| &s.name == train_split) {
                return Err(Error::UnknownTrainSplit(train_split.clone()));
            }
        }

        // 5. statistics
        let statistics_config = request.statistics_config.unwrap_or_default();
        statistics_config.validate(&view.features)?;

        // 6. event time window
        if let (Some(start), Some(end)) = (request.event_start_time, request.event_end_time) {
            if start > end {
                return Err(Error::InvalidTimeWindow { start, end });
            }
        }

        // 7. location below the connector root
        let location_base = match request.location.as_deref() {
            Some(location) => {
                validate_location_path("location", location)?;
                join_location(&root, &[location])
            }
            None => root,
        };

        debug!(
            feature_view = %view.name,
            version = view.version,
            connector = %connector.name,
            location = %location_base,
            "Planned training dataset"
        );

        Ok(TrainingDatasetDraft {
            featurestore_id: view.featurestore_id,
            featurestore_name: view.featurestore_name.clone(),
            feature_view_id: view.id,
            feature_view_name: view.name.clone(),
            feature_view_version: view.version,
            version: request.version,
            description: request.description,
            data_format,
            training_dataset_type,
            storage_connector: StorageConnectorRef::from(connector),
            location_base,
            seed: request.seed,
            splits,
            train_split: request.train_split,
            statistics_config,
            coalesce: request.coalesce,
            event_start_time: request.event_start_time,
            event_end_time: request.event_end_time,
        })
    }
}
