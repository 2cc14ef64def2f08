//! Catalog and registry entities
//!
//! These are the records the query engine reads from the catalog (feature
//! stores, feature groups, storage connectors) and the feature view it
//! produces. All of them serialize to the camelCase JSON used on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::query::Query;

/// A feature store: the namespace feature views and training datasets live in
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureStore {
    pub id: i64,
    pub name: String,
}

impl FeatureStore {
    /// Project name a feature store belongs to (`demo_featurestore` -> `demo`)
    pub fn project_name(&self) -> &str {
        self.name
            .strip_suffix("_featurestore")
            .unwrap_or(self.name.as_str())
    }

    /// Name of the HopsFS connector that backs training datasets by default
    pub fn default_training_connector_name(&self) -> String {
        format!("{}_Training_Datasets", self.project_name())
    }

    /// HopsFS directory of the default training dataset connector
    pub fn default_training_path(&self) -> String {
        let project = self.project_name();
        format!("/Projects/{}/{}_Training_Datasets", project, project)
    }
}

/// One column of a feature group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGroupFeature {
    pub name: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub partition: bool,
}

impl FeatureGroupFeature {
    pub fn new(name: impl Into<String>, feature_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feature_type: feature_type.into(),
            primary: false,
            partition: false,
        }
    }

    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }
}

/// A named, versioned collection of features with a row key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGroup {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub featurestore_id: i64,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    pub features: Vec<FeatureGroupFeature>,
}

fn default_version() -> i32 {
    1
}

impl FeatureGroup {
    pub fn feature(&self, name: &str) -> Option<&FeatureGroupFeature> {
        self.features.iter().find(|f| f.name == name)
    }

    pub fn has_feature(&self, name: &str) -> bool {
        self.feature(name).is_some()
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &FeatureGroupFeature> {
        self.features.iter().filter(|f| f.primary)
    }

    /// `name_version`, used in log lines and error messages
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.name, self.version)
    }
}

/// Connector-specific settings, tagged by `storageConnectorType`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "storageConnectorType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StorageConnectorKind {
    Hopsfs {
        #[serde(rename = "hopsfsPath")]
        hopsfs_path: String,
    },
    S3 {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Adls {
        #[serde(rename = "containerName")]
        container_name: String,
        #[serde(rename = "accountName")]
        account_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Gcs {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        path: Option<String>,
    },
    Jdbc {
        #[serde(rename = "connectionString")]
        connection_string: String,
    },
    Snowflake {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
    },
    Redshift {
        #[serde(rename = "clusterIdentifier")]
        cluster_identifier: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        database: Option<String>,
    },
    Kafka {
        #[serde(rename = "bootstrapServers")]
        bootstrap_servers: String,
    },
    Bigquery {
        #[serde(rename = "queryProject")]
        query_project: String,
    },
}

impl StorageConnectorKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StorageConnectorKind::Hopsfs { .. } => "HOPSFS",
            StorageConnectorKind::S3 { .. } => "S3",
            StorageConnectorKind::Adls { .. } => "ADLS",
            StorageConnectorKind::Gcs { .. } => "GCS",
            StorageConnectorKind::Jdbc { .. } => "JDBC",
            StorageConnectorKind::Snowflake { .. } => "SNOWFLAKE",
            StorageConnectorKind::Redshift { .. } => "REDSHIFT",
            StorageConnectorKind::Kafka { .. } => "KAFKA",
            StorageConnectorKind::Bigquery { .. } => "BIGQUERY",
        }
    }
}

/// A storage connector registered in a feature store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConnector {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub featurestore_id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(flatten)]
    pub kind: StorageConnectorKind,
}

/// A named, versioned query bound to a feature store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureView {
    pub id: i64,
    pub featurestore_id: i64,
    pub featurestore_name: String,
    pub name: String,
    pub version: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created: DateTime<Utc>,
    pub query: Query,
    /// Output feature names in select order
    pub features: Vec<String>,
}

/// A validated feature view waiting for an id and (maybe) a version
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureViewDraft {
    pub featurestore_id: i64,
    pub featurestore_name: String,
    pub name: String,
    /// `None` means "next free version"
    pub version: Option<i32>,
    pub description: Option<String>,
    pub query: Query,
}

impl FeatureViewDraft {
    pub fn finalize(self, id: i64, version: i32, created: DateTime<Utc>) -> FeatureView {
        let features = self.query.output_feature_names();
        FeatureView {
            id,
            featurestore_id: self.featurestore_id,
            featurestore_name: self.featurestore_name,
            name: self.name,
            version,
            description: self.description,
            created,
            query: self.query,
            features,
        }
    }
}
