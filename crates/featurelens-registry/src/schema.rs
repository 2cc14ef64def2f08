//! SQLite schema for the registry
//!
//! # Tables
//!
//! - **featurestores**: feature store namespaces
//! - **feature_groups**: catalog feature groups, columns as a JSON array
//! - **storage_connectors**: connector settings as a JSON object
//! - **feature_views**: one row per (store, name, version), query graph as JSON
//! - **training_datasets**: one row per (feature view, version)
//!
//! Query graphs are written as a single JSON document in the same statement
//! as their row, so a reader never sees part of a graph. Timestamps are
//! epoch milliseconds.

use anyhow::{Context, Result};
use rusqlite::Connection;

pub fn create_tables(db: &Connection) -> Result<()> {
    db.execute_batch(
        r#"
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS featurestores (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            created_at BIGINT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS feature_groups (
            id INTEGER PRIMARY KEY,
            featurestore_id INTEGER NOT NULL REFERENCES featurestores(id),
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            event_time TEXT,
            features TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE (featurestore_id, name, version)
        );

        CREATE TABLE IF NOT EXISTS storage_connectors (
            id INTEGER PRIMARY KEY,
            featurestore_id INTEGER NOT NULL REFERENCES featurestores(id),
            name TEXT NOT NULL,
            description TEXT,
            connector_type TEXT NOT NULL,
            config TEXT NOT NULL,
            UNIQUE (featurestore_id, name)
        );

        CREATE TABLE IF NOT EXISTS feature_views (
            id INTEGER PRIMARY KEY,
            featurestore_id INTEGER NOT NULL REFERENCES featurestores(id),
            name TEXT NOT NULL,
            version INTEGER NOT NULL,
            description TEXT,
            query TEXT NOT NULL,
            features TEXT NOT NULL,
            created_at BIGINT NOT NULL,
            UNIQUE (featurestore_id, name, version)
        );

        CREATE INDEX IF NOT EXISTS idx_feature_views_name ON feature_views(featurestore_id, name);

        CREATE TABLE IF NOT EXISTS training_datasets (
            id INTEGER PRIMARY KEY,
            feature_view_id INTEGER NOT NULL REFERENCES feature_views(id),
            version INTEGER NOT NULL,
            description TEXT,
            data_format TEXT NOT NULL,
            training_dataset_type TEXT NOT NULL,
            storage_connector_id INTEGER NOT NULL,
            storage_connector_name TEXT NOT NULL,
            storage_connector_type TEXT NOT NULL,
            location TEXT NOT NULL,
            seed BIGINT,
            splits TEXT NOT NULL,
            train_split TEXT,
            statistics_config TEXT NOT NULL,
            coalesce_output INTEGER NOT NULL,
            event_start_time BIGINT,
            event_end_time BIGINT,
            created_at BIGINT NOT NULL,
            UNIQUE (feature_view_id, version)
        );
        "#,
    )
    .context("Failed to create registry schema")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_tables_is_idempotent() {
        let db = Connection::open_in_memory().unwrap();
        create_tables(&db).unwrap();
        create_tables(&db).unwrap();

        let mut stmt = db
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(
            tables,
            vec![
                "feature_groups",
                "feature_views",
                "featurestores",
                "storage_connectors",
                "training_datasets"
            ]
        );
    }

    #[test]
    fn test_feature_view_uniqueness() {
        let db = Connection::open_in_memory().unwrap();
        create_tables(&db).unwrap();
        db.execute("INSERT INTO featurestores (id, name, created_at) VALUES (1, 'fs', 0)", [])
            .unwrap();

        let insert = "INSERT INTO feature_views \
            (featurestore_id, name, version, query, features, created_at) \
            VALUES (1, 'fv', 1, '{}', '[]', 0)";
        db.execute(insert, []).unwrap();
        assert!(db.execute(insert, []).is_err());
    }
}
