//! CLI command implementations for FeatureLens
//!
//! These open a SQLite registry directly; no server needs to be running.

use anyhow::{anyhow, Context};
use featurelens_core::planner::TimeWindow;
use featurelens_core::query::codec;
use featurelens_core::{FeatureStore, Query, QueryLimits};
use featurelens_registry::{FeatureRegistry, RegistryConfig, RegistrySettings};
use std::fs;

async fn open_registry(registry_path: &str) -> anyhow::Result<FeatureRegistry> {
    FeatureRegistry::new(
        RegistryConfig::sqlite(registry_path),
        RegistrySettings::default(),
    )
    .await
    .with_context(|| format!("Failed to open registry '{}'", registry_path))
}

async fn find_feature_store(
    registry: &FeatureRegistry,
    name: &str,
) -> anyhow::Result<FeatureStore> {
    registry
        .list_feature_stores()
        .await?
        .into_iter()
        .find(|store| store.name == name)
        .ok_or_else(|| anyhow!("Feature store '{}' not found", name))
}

/// List feature views, optionally narrowed to one store and one name
pub async fn list(
    registry_path: &str,
    featurestore: Option<&str>,
    name: Option<&str>,
) -> anyhow::Result<()> {
    let registry = open_registry(registry_path).await?;

    let stores = match featurestore {
        Some(fs_name) => vec![find_feature_store(&registry, fs_name).await?],
        None => registry.list_feature_stores().await?,
    };

    let mut views = Vec::new();
    for store in &stores {
        let found = match name {
            Some(name) => match registry.get_feature_views(store.id, name).await {
                Ok(found) => found,
                Err(featurelens_core::Error::FeatureViewNotFound { .. }) => Vec::new(),
                Err(e) => return Err(e.into()),
            },
            None => registry.list_feature_views(store.id).await?,
        };
        views.extend(found);
    }

    if views.is_empty() {
        println!("No feature views found");
        return Ok(());
    }

    println!("📋 Feature Views ({} total):\n", views.len());
    println!(
        "{:<25} {:<30} {:<8} {:<8} {:<20}",
        "Feature store", "Name", "Version", "Joins", "Created"
    );
    println!("{}", "-".repeat(95));

    for view in views {
        println!(
            "{:<25} {:<30} {:<8} {:<8} {:<20}",
            view.featurestore_name,
            view.name,
            view.version,
            view.query.joins.len(),
            view.created.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}

/// Print the stored query of a feature view, or its batch query when a
/// bound is given
pub async fn query(
    registry_path: &str,
    featurestore: &str,
    name: &str,
    version: i32,
    start_time: Option<i64>,
    end_time: Option<i64>,
) -> anyhow::Result<()> {
    let registry = open_registry(registry_path).await?;
    let store = find_feature_store(&registry, featurestore).await?;

    let window = TimeWindow::new(start_time, end_time)?;
    let query = if window.is_unbounded() {
        registry.get_query(store.id, name, version).await?
    } else {
        registry
            .get_batch_query(store.id, name, version, window)
            .await?
    };

    println!("{}", codec::to_json(&query)?);
    Ok(())
}

/// Check that a query file is well formed
///
/// Only structure is checked: feature groups and features are resolved
/// when a feature view is created against a registry.
pub fn validate(file_path: &str) -> anyhow::Result<()> {
    println!("🔍 Validating query: {}", file_path);

    let json = fs::read_to_string(file_path)
        .with_context(|| format!("Failed to read file '{}'", file_path))?;

    match codec::from_json(&json, &QueryLimits::default()) {
        Ok(query) => {
            print_summary(&query);
            println!("\n✅ Query is well formed");
            Ok(())
        }
        Err(e) => {
            println!("❌ Invalid query: {}", e);
            Err(e.into())
        }
    }
}

fn print_summary(query: &Query) {
    println!("   Feature group: {}", query.left_feature_group.id);
    println!("   Features: {}", query.output_feature_names().join(", "));
    println!("   Joins: {} (depth {})", query.joins.len(), query.join_depth());
    match &query.filter {
        Some(filter) => println!(
            "   Filter: {} conditions (depth {})",
            filter.filters().len(),
            filter.depth()
        ),
        None => println!("   Filter: none"),
    }
}
