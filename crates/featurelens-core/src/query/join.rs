//! Join graph validation and normalization
//!
//! [`JoinGraphBuilder::build`] walks a query graph depth first, in array
//! order, and returns the normalized graph:
//!
//! 1. every feature group exists (anchor: `UnknownFeatureGroup`, joined: `InvalidJoin`)
//! 2. selected features exist in their group and get their type filled in
//! 3. join conditions are checked; an implicit condition becomes the shared primary keys
//! 4. an unprefixed join drops selected features that repeat a same-named join key
//! 5. repeated joins are rejected unless [`JoinPolicy`] allows them
//! 6. filter features are resolved against the query's scope
//! 7. output names at the root are unique
//!
//! Normalizing an already normalized graph returns it unchanged.

use std::collections::HashSet;

use tracing::debug;

use super::resolver::{CatalogSnapshot, FeatureCatalog, FeatureResolver, Scope};
use super::{FeatureGroupRef, FeatureRef, Join, JoinCondition, JoinType, Query};
use crate::types::FeatureGroup;
use crate::{Error, Result};

/// Bounds on untrusted query graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub max_join_depth: usize,
    pub max_predicate_depth: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_join_depth: 8,
            max_predicate_depth: 64,
        }
    }
}

impl QueryLimits {
    /// No limits, for graphs that were validated before they were stored
    pub fn unbounded() -> Self {
        Self {
            max_join_depth: usize::MAX,
            max_predicate_depth: usize::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinPolicy {
    /// Allow the same feature group to be joined twice with the same condition
    pub allow_duplicate_joins: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub limits: QueryLimits,
    pub join_policy: JoinPolicy,
}

/// Loads the catalog entries a query needs and normalizes the query
pub async fn resolve_query(
    catalog: &dyn FeatureCatalog,
    query: Query,
    options: &ResolveOptions,
) -> Result<Query> {
    let snapshot = CatalogSnapshot::load(catalog, &query).await?;
    JoinGraphBuilder::new(&snapshot, *options).build(query)
}

pub struct JoinGraphBuilder<'a> {
    resolver: FeatureResolver<'a>,
    options: ResolveOptions,
}

impl<'a> JoinGraphBuilder<'a> {
    pub fn new(snapshot: &'a CatalogSnapshot, options: ResolveOptions) -> Self {
        Self {
            resolver: FeatureResolver::new(snapshot),
            options,
        }
    }

    pub fn build(&self, query: Query) -> Result<Query> {
        let limit = self.options.limits.max_join_depth;
        if query.join_depth() > limit {
            return Err(Error::QueryTooDeep { what: "join", limit });
        }
        if let Some(filter) = &query.filter {
            let limit = self.options.limits.max_predicate_depth;
            if filter.depth() > limit {
                return Err(Error::QueryTooDeep {
                    what: "predicate",
                    limit,
                });
            }
        }

        let resolved = self.resolve_query(query)?;

        let names = resolved.output_feature_names();
        if names.is_empty() {
            return Err(Error::invalid_input("query selects no features"));
        }
        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(Error::AmbiguousFeatureReference(
                    name.clone(),
                    "selected more than once; add a join prefix".to_string(),
                ));
            }
        }

        debug!(
            feature_group = resolved.left_feature_group.id,
            joins = resolved.joins.len(),
            features = names.len(),
            "Resolved query graph"
        );
        Ok(resolved)
    }

    fn resolve_query(&self, query: Query) -> Result<Query> {
        let anchor = self.resolver.group(query.left_feature_group.id)?;
        let store = self
            .resolver
            .snapshot()
            .store(anchor.featurestore_id)
            .ok_or(Error::FeatureStoreNotFound(anchor.featurestore_id))?;

        let left_features = query
            .left_features
            .iter()
            .map(|f| self.resolver.resolve_in_group(anchor, f))
            .collect::<Result<Vec<_>>>()?;

        let mut joins = Vec::with_capacity(query.joins.len());
        let mut signatures = HashSet::new();
        for join in query.joins {
            let join = self.resolve_join(anchor, &left_features, join)?;
            if !self.options.join_policy.allow_duplicate_joins
                && !signatures.insert(join_signature(&join))
            {
                return Err(Error::DuplicateJoin(join.query.left_feature_group.id));
            }
            joins.push(join);
        }

        let mut filter = query.filter;
        if let Some(predicate) = filter.as_mut() {
            let mut scope = Scope::new(anchor);
            self.extend_scope(&mut scope, &joins, None)?;
            predicate.try_for_each_filter_mut(&mut |f| {
                f.feature = self.resolver.resolve_in_scope(&scope, &f.feature)?;
                Ok(())
            })?;
        }

        Ok(Query {
            featurestore_id: Some(store.id),
            featurestore_name: Some(store.name.clone()),
            left_feature_group: FeatureGroupRef {
                id: anchor.id,
                name: Some(anchor.name.clone()),
                version: Some(anchor.version),
            },
            left_features,
            joins,
            filter,
        })
    }

    fn resolve_join(
        &self,
        parent: &FeatureGroup,
        parent_features: &[FeatureRef],
        join: Join,
    ) -> Result<Join> {
        let joined_id = join.query.left_feature_group.id;
        let joined = self.resolver.snapshot().group(joined_id).ok_or_else(|| {
            Error::invalid_join(format!("joined feature group {} does not exist", joined_id))
        })?;

        let condition = self.resolve_condition(parent, joined, join.join_type, join.condition)?;
        let mut nested = self.resolve_query(join.query)?;

        if join.prefix.is_none() {
            let (left, right) = condition.key_names();
            let shared: Vec<&str> = left
                .iter()
                .zip(right.iter())
                .filter(|(l, r)| l == r)
                .map(|(l, _)| *l)
                .collect();
            nested.left_features.retain(|f| {
                !(shared.contains(&f.name.as_str())
                    && parent_features.iter().any(|p| p.name == f.name))
            });
        }

        Ok(Join {
            query: nested,
            join_type: join.join_type,
            condition,
            prefix: join.prefix,
        })
    }

    fn resolve_condition(
        &self,
        parent: &FeatureGroup,
        joined: &FeatureGroup,
        join_type: JoinType,
        condition: JoinCondition,
    ) -> Result<JoinCondition> {
        match condition {
            JoinCondition::Implicit if join_type == JoinType::Cross => Ok(JoinCondition::Implicit),
            JoinCondition::Implicit => {
                let keys: Vec<FeatureRef> = joined
                    .primary_keys()
                    .filter(|k| parent.has_feature(&k.name))
                    .map(|k| FeatureRef {
                        name: k.name.clone(),
                        feature_type: Some(k.feature_type.clone()),
                        feature_group_id: None,
                    })
                    .collect();
                if keys.is_empty() {
                    return Err(Error::invalid_join(format!(
                        "no join condition given and '{}' shares no primary key with '{}'",
                        joined.qualified_name(),
                        parent.qualified_name()
                    )));
                }
                Ok(JoinCondition::On(keys))
            }
            JoinCondition::On(on) => {
                let mut keys = Vec::with_capacity(on.len());
                for f in on {
                    let column = joined.feature(&f.name).ok_or_else(|| {
                        missing_key(&f.name, joined)
                    })?;
                    if !parent.has_feature(&f.name) {
                        return Err(missing_key(&f.name, parent));
                    }
                    keys.push(FeatureRef {
                        name: column.name.clone(),
                        feature_type: Some(column.feature_type.clone()),
                        feature_group_id: None,
                    });
                }
                Ok(JoinCondition::On(keys))
            }
            JoinCondition::Keys { left, right } => {
                let left = left
                    .iter()
                    .map(|f| {
                        self.resolver
                            .resolve_in_group(parent, f)
                            .map_err(|_| missing_key(&f.name, parent))
                    })
                    .collect::<Result<Vec<_>>>()?;
                let right = right
                    .iter()
                    .map(|f| {
                        self.resolver
                            .resolve_in_group(joined, f)
                            .map_err(|_| missing_key(&f.name, joined))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(JoinCondition::Keys { left, right })
            }
        }
    }

    /// Adds joined groups (recursively) to `scope`, composing prefixes
    fn extend_scope(
        &self,
        scope: &mut Scope<'a>,
        joins: &[Join],
        outer_prefix: Option<&str>,
    ) -> Result<()> {
        for join in joins {
            let group = self.resolver.group(join.query.left_feature_group.id)?;
            let prefix = match (outer_prefix, join.prefix.as_deref()) {
                (None, None) => None,
                (Some(o), None) => Some(o.to_string()),
                (None, Some(p)) => Some(p.to_string()),
                (Some(o), Some(p)) => Some(format!("{}{}", o, p)),
            };
            scope.push(group, prefix.clone());
            self.extend_scope(scope, &join.query.joins, prefix.as_deref())?;
        }
        Ok(())
    }
}

type JoinSignature = (i64, JoinType, Vec<String>, Vec<String>, Option<String>);

fn join_signature(join: &Join) -> JoinSignature {
    let (left, right) = join.condition.key_names();
    (
        join.query.left_feature_group.id,
        join.join_type,
        left.into_iter().map(str::to_string).collect(),
        right.into_iter().map(str::to_string).collect(),
        join.prefix.clone(),
    )
}

fn missing_key(name: &str, group: &FeatureGroup) -> Error {
    Error::invalid_join(format!(
        "join feature '{}' not found in feature group '{}'",
        name,
        group.qualified_name()
    ))
}
