//! Naming policy and catalog entity validation
//!
//! Feature views, feature groups and training dataset splits share one
//! identifier policy: lowercase letters, digits and underscores, at most
//! [`MAX_NAME_LENGTH`] characters.

use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::{FeatureGroup, StorageConnector, StorageConnectorKind};
use crate::{Error, Result};

pub const MAX_NAME_LENGTH: usize = 63;

lazy_static! {
    static ref NAME_PATTERN: Regex = Regex::new(r"^[a-z0-9_]+$").expect("valid name regex");
}

/// Why `name` breaks the identifier policy, if it does
pub fn name_violation(name: &str) -> Option<String> {
    if name.is_empty() {
        return Some("name cannot be empty".to_string());
    }
    if name.len() > MAX_NAME_LENGTH {
        return Some(format!(
            "name is longer than {} characters",
            MAX_NAME_LENGTH
        ));
    }
    if !NAME_PATTERN.is_match(name) {
        return Some("only lowercase letters, digits and '_' are allowed".to_string());
    }
    None
}

pub fn validate_name(name: &str) -> Result<()> {
    match name_violation(name) {
        Some(reason) => Err(Error::InvalidName {
            name: name.to_string(),
            reason,
        }),
        None => Ok(()),
    }
}

/// Validates a feature group before it is added to the catalog
///
/// Checks, in order:
/// 1. the name follows the identifier policy
/// 2. the version is positive
/// 3. there is at least one feature
/// 4. feature names are unique
/// 5. the event time, when set, names one of the features
pub fn validate_feature_group(group: &FeatureGroup) -> Result<()> {
    validate_name(&group.name)?;

    if group.version <= 0 {
        return Err(Error::InvalidVersion(group.version));
    }

    if group.features.is_empty() {
        return Err(Error::invalid_input(format!(
            "feature group '{}' has no features",
            group.name
        )));
    }

    let mut seen = HashSet::new();
    for feature in &group.features {
        if feature.name.is_empty() {
            return Err(Error::invalid_input("feature names cannot be empty"));
        }
        if !seen.insert(feature.name.as_str()) {
            return Err(Error::invalid_input(format!(
                "duplicate feature '{}' in feature group '{}'",
                feature.name, group.name
            )));
        }
    }

    if let Some(event_time) = &group.event_time {
        if !group.has_feature(event_time) {
            return Err(Error::invalid_input(format!(
                "event time feature '{}' not found in feature group '{}'",
                event_time, group.name
            )));
        }
    }

    Ok(())
}

/// Validates a storage connector before it is added to the catalog
/// A storage path must not step out of its base with `.` or `..` segments
pub fn validate_location_path(field: &str, path: &str) -> Result<()> {
    if path
        .split(['/', '\\'])
        .any(|segment| segment == "." || segment == "..")
    {
        return Err(Error::invalid_input(format!(
            "{} '{}' must not contain '.' or '..' segments",
            field, path
        )));
    }
    Ok(())
}

pub fn validate_storage_connector(connector: &StorageConnector) -> Result<()> {
    if connector.name.trim().is_empty() {
        return Err(Error::invalid_input("storage connector name cannot be empty"));
    }
    let blank = |field: &str, value: &str| -> Result<()> {
        if value.trim().is_empty() {
            Err(Error::invalid_input(format!(
                "{} connector '{}' requires {}",
                connector.kind.type_name(),
                connector.name,
                field
            )))
        } else {
            Ok(())
        }
    };
    let base_path = |path: &Option<String>| match path {
        Some(p) => validate_location_path("path", p),
        None => Ok(()),
    };
    match &connector.kind {
        StorageConnectorKind::Hopsfs { hopsfs_path } => {
            blank("hopsfsPath", hopsfs_path)?;
            validate_location_path("hopsfsPath", hopsfs_path)
        }
        StorageConnectorKind::S3 { bucket, path } | StorageConnectorKind::Gcs { bucket, path } => {
            blank("bucket", bucket)?;
            base_path(path)
        }
        StorageConnectorKind::Adls {
            container_name,
            account_name,
            path,
        } => {
            blank("containerName", container_name)?;
            blank("accountName", account_name)?;
            base_path(path)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeatureGroupFeature;

    #[test]
    fn test_name_policy() {
        assert!(validate_name("test_split").is_ok());
        assert!(validate_name("fv_2024").is_ok());
        assert!(matches!(
            validate_name("ILLEGALNAME!!!"),
            Err(Error::InvalidName { .. })
        ));
        assert!(name_violation("").is_some());
        assert!(name_violation(&"a".repeat(MAX_NAME_LENGTH + 1)).is_some());
        assert!(name_violation(&"a".repeat(MAX_NAME_LENGTH)).is_none());
    }

    fn group() -> FeatureGroup {
        FeatureGroup {
            id: 0,
            featurestore_id: 1,
            name: "transactions".to_string(),
            version: 1,
            event_time: Some("ts".to_string()),
            features: vec![
                FeatureGroupFeature::new("id", "bigint").primary(),
                FeatureGroupFeature::new("ts", "timestamp"),
            ],
        }
    }

    #[test]
    fn test_feature_group_checks() {
        assert!(validate_feature_group(&group()).is_ok());

        let mut g = group();
        g.event_time = Some("missing".to_string());
        assert!(matches!(validate_feature_group(&g), Err(Error::InvalidInput(_))));

        let mut g = group();
        g.features.push(FeatureGroupFeature::new("id", "int"));
        assert!(matches!(validate_feature_group(&g), Err(Error::InvalidInput(_))));

        let mut g = group();
        g.version = 0;
        assert!(matches!(validate_feature_group(&g), Err(Error::InvalidVersion(0))));
    }

    #[test]
    fn test_connector_checks() {
        let connector = StorageConnector {
            id: 0,
            featurestore_id: 1,
            name: "s3".to_string(),
            description: None,
            kind: StorageConnectorKind::S3 {
                bucket: " ".to_string(),
                path: None,
            },
        };
        assert!(validate_storage_connector(&connector).is_err());

        let hopsfs = StorageConnector {
            kind: StorageConnectorKind::Hopsfs {
                hopsfs_path: "/Projects/demo/../other".to_string(),
            },
            ..connector.clone()
        };
        assert!(matches!(
            validate_storage_connector(&hopsfs),
            Err(Error::InvalidInput(_))
        ));

        let s3 = StorageConnector {
            kind: StorageConnectorKind::S3 {
                bucket: "bucket".to_string(),
                path: Some("data/./x".to_string()),
            },
            ..connector
        };
        assert!(validate_storage_connector(&s3).is_err());
    }

    #[test]
    fn test_location_path_segments() {
        assert!(validate_location_path("location", "inner/location/").is_ok());
        assert!(validate_location_path("location", "/a..b/c.d").is_ok());
        assert!(validate_location_path("location", "").is_ok());

        for bad in ["..", "../../outside", "a/./b", "a/..", "a\\..\\b"] {
            assert!(
                matches!(validate_location_path("location", bad), Err(Error::InvalidInput(_))),
                "location: {}",
                bad
            );
        }
    }
}
