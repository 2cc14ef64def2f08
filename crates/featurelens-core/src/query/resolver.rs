//! Feature reference resolution
//!
//! Resolution never writes anything: it reads feature groups from a
//! [`FeatureCatalog`] once, up front, into a [`CatalogSnapshot`] and then
//! answers every lookup from memory.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use super::{FeatureRef, Query};
use crate::types::{FeatureGroup, FeatureStore};
use crate::{Error, Result};

/// Read access to feature stores and feature groups
#[async_trait]
pub trait FeatureCatalog: Send + Sync {
    async fn feature_store(&self, id: i64) -> Result<Option<FeatureStore>>;

    async fn feature_group(&self, id: i64) -> Result<Option<FeatureGroup>>;
}

/// Feature groups (and their stores) referenced by one query graph
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    groups: HashMap<i64, FeatureGroup>,
    stores: HashMap<i64, FeatureStore>,
}

impl CatalogSnapshot {
    /// Fetches every feature group the query mentions; unknown ids are simply absent
    pub async fn load(catalog: &dyn FeatureCatalog, query: &Query) -> Result<Self> {
        let mut snapshot = Self::default();
        for id in query.feature_group_ids() {
            if let Some(group) = catalog.feature_group(id).await? {
                if !snapshot.stores.contains_key(&group.featurestore_id) {
                    if let Some(store) = catalog.feature_store(group.featurestore_id).await? {
                        snapshot.stores.insert(store.id, store);
                    }
                }
                snapshot.groups.insert(id, group);
            }
        }
        debug!(
            groups = snapshot.groups.len(),
            stores = snapshot.stores.len(),
            "Loaded catalog snapshot"
        );
        Ok(snapshot)
    }

    pub fn from_parts(groups: Vec<FeatureGroup>, stores: Vec<FeatureStore>) -> Self {
        Self {
            groups: groups.into_iter().map(|g| (g.id, g)).collect(),
            stores: stores.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn group(&self, id: i64) -> Option<&FeatureGroup> {
        self.groups.get(&id)
    }

    pub fn store(&self, id: i64) -> Option<&FeatureStore> {
        self.stores.get(&id)
    }
}

/// A feature group visible to a filter, with the prefix its features carry
#[derive(Debug, Clone)]
pub struct ScopeEntry<'a> {
    pub group: &'a FeatureGroup,
    pub prefix: Option<String>,
}

/// Feature groups a filter may reference: the anchor first, then every joined group
#[derive(Debug, Clone)]
pub struct Scope<'a> {
    entries: Vec<ScopeEntry<'a>>,
}

impl<'a> Scope<'a> {
    pub fn new(anchor: &'a FeatureGroup) -> Self {
        Self {
            entries: vec![ScopeEntry {
                group: anchor,
                prefix: None,
            }],
        }
    }

    pub fn push(&mut self, group: &'a FeatureGroup, prefix: Option<String>) {
        self.entries.push(ScopeEntry { group, prefix });
    }

    pub fn anchor(&self) -> &'a FeatureGroup {
        self.entries[0].group
    }

    pub fn contains_group(&self, id: i64) -> bool {
        self.entries.iter().any(|e| e.group.id == id)
    }

    fn joined(&self) -> &[ScopeEntry<'a>] {
        &self.entries[1..]
    }
}

/// Resolves feature references against a snapshot
#[derive(Debug, Clone, Copy)]
pub struct FeatureResolver<'a> {
    snapshot: &'a CatalogSnapshot,
}

impl<'a> FeatureResolver<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot) -> Self {
        Self { snapshot }
    }

    pub fn snapshot(&self) -> &'a CatalogSnapshot {
        self.snapshot
    }

    /// Looks up a feature group that must exist
    pub fn group(&self, id: i64) -> Result<&'a FeatureGroup> {
        self.snapshot
            .group(id)
            .ok_or(Error::UnknownFeatureGroup(id))
    }

    /// Resolves `feature` inside one specific group, filling type and group id
    pub fn resolve_in_group(&self, group: &FeatureGroup, feature: &FeatureRef) -> Result<FeatureRef> {
        if let Some(id) = feature.feature_group_id {
            if id != group.id {
                return Err(Error::invalid_input(format!(
                    "feature '{}' references feature group {} but is selected from feature group {}",
                    feature.name, id, group.id
                )));
            }
        }
        let column = group
            .feature(&feature.name)
            .ok_or_else(|| Error::unknown_feature(&feature.name, group.qualified_name()))?;
        Ok(FeatureRef::resolved(&column.name, &column.feature_type, group.id))
    }

    /// Resolves a filter's feature against every group in `scope`
    ///
    /// An explicit group id wins. Otherwise the anchor is tried first, then
    /// unprefixed joined groups, then prefixed joined groups by `prefix + name`.
    pub fn resolve_in_scope(&self, scope: &Scope<'_>, feature: &FeatureRef) -> Result<FeatureRef> {
        if let Some(id) = feature.feature_group_id {
            if !scope.contains_group(id) {
                return Err(Error::invalid_input(format!(
                    "feature group {} referenced by filter on '{}' is not part of the query",
                    id, feature.name
                )));
            }
            let group = self.group(id)?;
            return self.resolve_in_group(group, feature);
        }

        let anchor = scope.anchor();
        if anchor.has_feature(&feature.name) {
            return self.resolve_in_group(anchor, feature);
        }

        let unprefixed: Vec<&FeatureGroup> = scope
            .joined()
            .iter()
            .filter(|e| e.prefix.is_none() && e.group.has_feature(&feature.name))
            .map(|e| e.group)
            .collect();
        match unprefixed.as_slice() {
            [group] => return self.resolve_in_group(group, feature),
            [] => {}
            many => return Err(ambiguous(&feature.name, many)),
        }

        let prefixed: Vec<(&FeatureGroup, String)> = scope
            .joined()
            .iter()
            .filter_map(|e| {
                let prefix = e.prefix.as_deref()?;
                let stripped = feature.name.strip_prefix(prefix)?;
                e.group
                    .has_feature(stripped)
                    .then(|| (e.group, stripped.to_string()))
            })
            .collect();
        match prefixed.as_slice() {
            [(group, name)] => self.resolve_in_group(group, &FeatureRef::named(name.as_str())),
            [] => Err(Error::unknown_feature(&feature.name, anchor.qualified_name())),
            many => {
                let groups: Vec<&FeatureGroup> = many.iter().map(|(g, _)| *g).collect();
                Err(ambiguous(&feature.name, &groups))
            }
        }
    }
}

fn ambiguous(name: &str, groups: &[&FeatureGroup]) -> Error {
    let names: Vec<String> = groups.iter().map(|g| g.qualified_name()).collect();
    Error::AmbiguousFeatureReference(
        name.to_string(),
        format!(
            "present in feature groups {}; add a featureGroupId or a join prefix",
            names.join(", ")
        ),
    )
}
