//! Error types for FeatureLens
//!
//! Every failure the query engine can raise is a variant of [`Error`].
//! The HTTP boundary maps each variant to a stable numeric code, so variants
//! are only ever added, never renumbered or merged.
//!
//! Errors fall into the five classes returned by [`Error::kind`]:
//! validation, not-found, conflict, unsupported and internal.

use thiserror::Error;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, Error>;

/// Broad classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request shape (predicate tree, join structure, names, splits)
    Validation,
    /// A referenced entity does not exist
    NotFound,
    /// A uniqueness rule was violated
    Conflict,
    /// The operation is understood but not allowed for this input
    Unsupported,
    /// Storage, serialization or programming errors
    Internal,
}

/// All possible errors that can occur in FeatureLens
#[derive(Error, Debug)]
pub enum Error {
    /// Feature store id is not known to the catalog
    #[error("Feature store '{0}' not found")]
    FeatureStoreNotFound(i64),

    /// The anchor feature group of a query does not exist
    #[error("Feature group with id '{0}' not found")]
    UnknownFeatureGroup(i64),

    /// A feature reference names a column that its feature group does not have
    #[error("Feature '{feature}' not found in feature group '{feature_group}'")]
    UnknownFeature {
        feature: String,
        feature_group: String,
    },

    /// A feature name matches more than one candidate and cannot be disambiguated
    #[error("Feature '{0}' is ambiguous: {1}")]
    AmbiguousFeatureReference(String, String),

    /// A logic node does not have exactly one of filter/logic on each side
    #[error("Malformed predicate tree: {0}")]
    MalformedPredicateTree(String),

    /// Filter condition is not one of the recognized comparison operators
    #[error("Unsupported filter condition '{0}'")]
    UnsupportedCondition(String),

    /// Filter value was not provided as a string
    #[error("Invalid value for filter on feature '{feature}': {reason}")]
    InvalidPredicateValue { feature: String, reason: String },

    /// A join is structurally invalid or references an unknown feature group
    #[error("Invalid join: {0}")]
    InvalidJoin(String),

    /// The same feature group was joined twice with the same condition
    #[error("Duplicate join on feature group '{0}' with identical condition")]
    DuplicateJoin(i64),

    /// Joins or predicates are nested deeper than the configured limit
    #[error("{what} nesting depth exceeds the maximum of {limit}")]
    QueryTooDeep { what: &'static str, limit: usize },

    /// An entity with this name and version already exists
    #[error("{entity} '{name}' with version {version} already exists")]
    DuplicateNameVersion {
        entity: &'static str,
        name: String,
        version: i32,
    },

    /// Explicit versions must be positive
    #[error("Illegal version {0}: versions must be greater than zero")]
    InvalidVersion(i32),

    /// Feature view (name, optional version) not found
    #[error("Feature view '{name}'{} not found", version_suffix(.version))]
    FeatureViewNotFound { name: String, version: Option<i32> },

    /// Training dataset version not found for a feature view
    #[error("Training dataset version {version} of feature view '{feature_view}' not found")]
    TrainingDatasetNotFound { feature_view: String, version: i32 },

    /// Storage connector could not be resolved
    #[error("Storage connector not found: {0}")]
    StorageConnectorNotFound(String),

    /// Storage connector type cannot back a training dataset
    #[error("Storage connector type '{0}' is not supported for training datasets")]
    UnsupportedConnectorType(String),

    /// Missing or unrecognized data format
    #[error("Invalid data format: {0}")]
    InvalidDataFormat(String),

    /// Split percentage is not a number
    #[error("Split '{name}' has an invalid percentage: {value}")]
    InvalidSplitPercentage { name: String, value: String },

    /// Split name violates the naming policy
    #[error("Illegal split name '{0}'")]
    InvalidSplitName(String),

    /// Two splits share a name
    #[error("Duplicate split name '{0}'")]
    DuplicateSplitName(String),

    /// `trainSplit` does not name one of the splits
    #[error("Train split '{0}' is not one of the dataset splits")]
    UnknownTrainSplit(String),

    /// Statistics configuration names a column the feature view does not produce
    #[error("Statistics column '{0}' is not a feature of the feature view")]
    UnknownStatisticsColumn(String),

    /// Entity name violates the naming policy
    #[error("Illegal name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// Batch queries need an event-time feature on the anchor feature group
    #[error("Feature group '{0}' has no event time feature, cannot apply a time window")]
    MissingEventTime(String),

    /// Start of a time window lies after its end
    #[error("Invalid time window: start {start} is after end {end}")]
    InvalidTimeWindow { start: i64, end: i64 },

    /// Storage backend error (SQLite, PostgreSQL, filesystem)
    #[error("Storage error: {0}")]
    StorageError(#[from] anyhow::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Invalid input from user that has no dedicated variant
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error - this should rarely happen
    #[error("Internal error: {0}")]
    InternalError(String),
}

fn version_suffix(version: &Option<i32>) -> String {
    match version {
        Some(v) => format!(" version {}", v),
        None => String::new(),
    }
}

impl Error {
    /// Classifies the error for the boundary layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::MalformedPredicateTree(_)
            | Error::UnsupportedCondition(_)
            | Error::InvalidPredicateValue { .. }
            | Error::InvalidJoin(_)
            | Error::QueryTooDeep { .. }
            | Error::AmbiguousFeatureReference(..)
            | Error::InvalidVersion(_)
            | Error::InvalidDataFormat(_)
            | Error::InvalidSplitPercentage { .. }
            | Error::InvalidSplitName(_)
            | Error::UnknownTrainSplit(_)
            | Error::UnknownStatisticsColumn(_)
            | Error::InvalidName { .. }
            | Error::MissingEventTime(_)
            | Error::InvalidTimeWindow { .. }
            | Error::ConfigError(_)
            | Error::InvalidInput(_) => ErrorKind::Validation,

            Error::FeatureStoreNotFound(_)
            | Error::UnknownFeatureGroup(_)
            | Error::UnknownFeature { .. }
            | Error::FeatureViewNotFound { .. }
            | Error::TrainingDatasetNotFound { .. }
            | Error::StorageConnectorNotFound(_) => ErrorKind::NotFound,

            Error::DuplicateNameVersion { .. }
            | Error::DuplicateSplitName(_)
            | Error::DuplicateJoin(_) => ErrorKind::Conflict,

            Error::UnsupportedConnectorType(_) => ErrorKind::Unsupported,

            Error::StorageError(_) | Error::SerializationError(_) | Error::InternalError(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Creates a ConfigError from a string
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Creates an InvalidInput error from a string
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Creates an InternalError from a string
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::InternalError(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedPredicateTree(msg.into())
    }

    pub fn invalid_join(msg: impl Into<String>) -> Self {
        Self::InvalidJoin(msg.into())
    }

    pub fn unknown_feature(feature: impl Into<String>, feature_group: impl Into<String>) -> Self {
        Self::UnknownFeature {
            feature: feature.into(),
            feature_group: feature_group.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::FeatureViewNotFound {
            name: "user_features".to_string(),
            version: Some(2),
        };
        assert_eq!(
            err.to_string(),
            "Feature view 'user_features' version 2 not found"
        );

        let err = Error::FeatureViewNotFound {
            name: "user_features".to_string(),
            version: None,
        };
        assert_eq!(err.to_string(), "Feature view 'user_features' not found");
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::malformed("x").kind(), ErrorKind::Validation);
        assert_eq!(Error::UnknownFeatureGroup(3).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::DuplicateSplitName("test_split".into()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            Error::UnsupportedConnectorType("JDBC".into()).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(
            Error::from(anyhow::anyhow!("disk full")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_error_helpers() {
        let err = Error::config("Missing required field");
        assert!(matches!(err, Error::ConfigError(_)));

        let err = Error::unknown_feature("age", "users");
        assert_eq!(
            err.to_string(),
            "Feature 'age' not found in feature group 'users'"
        );
    }
}
