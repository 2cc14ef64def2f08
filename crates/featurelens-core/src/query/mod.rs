//! Query graphs over feature groups
//!
//! A [`Query`] selects features from an anchor ("left") feature group, joins
//! zero or more nested queries, and optionally constrains the result with a
//! predicate tree. Joins hold full queries, so the structure is recursive.
//!
//! - [`predicate`]: comparison filters and the AND/OR tree over them
//! - [`codec`]: the camelCase JSON wire format
//! - [`resolver`]: feature reference lookups against the catalog
//! - [`join`]: recursive validation and normalization of the whole graph
//!
//! ```rust,ignore
//! let query = Query::new(FeatureGroupRef::new(13), vec![FeatureRef::named("a_testfeature")])
//!     .with_filter(Predicate::single(Filter::new(
//!         FeatureRef::named("a_testfeature1"),
//!         Condition::GreaterThan,
//!         "0",
//!     )));
//! let resolved = resolve_query(&catalog, query, &ResolveOptions::default()).await?;
//! ```

pub mod codec;
pub mod join;
pub mod predicate;
pub mod resolver;

pub use codec::{FeatureDto, FeatureGroupRefDto, JoinDto, QueryDto};
pub use join::{resolve_query, JoinGraphBuilder, JoinPolicy, QueryLimits, ResolveOptions};
pub use predicate::{Condition, Filter, FilterDto, FilterLogicDto, LogicOp, Operand, Predicate};
pub use resolver::{CatalogSnapshot, FeatureCatalog, FeatureResolver};

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Reference to a feature, possibly not yet resolved against the catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureRef {
    pub name: String,
    pub feature_type: Option<String>,
    pub feature_group_id: Option<i64>,
}

impl FeatureRef {
    /// An unresolved reference by name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            feature_type: None,
            feature_group_id: None,
        }
    }

    pub fn resolved(name: impl Into<String>, feature_type: impl Into<String>, group: i64) -> Self {
        Self {
            name: name.into(),
            feature_type: Some(feature_type.into()),
            feature_group_id: Some(group),
        }
    }

    pub fn in_group(mut self, group: i64) -> Self {
        self.feature_group_id = Some(group);
        self
    }
}

/// Reference to a feature group by id; name/version are filled on resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGroupRef {
    pub id: i64,
    pub name: Option<String>,
    pub version: Option<i32>,
}

impl FeatureGroupRef {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            name: None,
            version: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinType {
    #[default]
    Inner,
    Left,
    Right,
    Full,
    Cross,
    LeftSemiJoin,
    Comma,
}

impl JoinType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JoinType::Inner => "INNER",
            JoinType::Left => "LEFT",
            JoinType::Right => "RIGHT",
            JoinType::Full => "FULL",
            JoinType::Cross => "CROSS",
            JoinType::LeftSemiJoin => "LEFT_SEMI_JOIN",
            JoinType::Comma => "COMMA",
        }
    }
}

impl fmt::Display for JoinType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JoinType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "INNER" => Ok(JoinType::Inner),
            "LEFT" => Ok(JoinType::Left),
            "RIGHT" => Ok(JoinType::Right),
            "FULL" => Ok(JoinType::Full),
            "CROSS" => Ok(JoinType::Cross),
            "LEFT_SEMI_JOIN" => Ok(JoinType::LeftSemiJoin),
            "COMMA" => Ok(JoinType::Comma),
            other => Err(Error::invalid_join(format!("unknown join type '{}'", other))),
        }
    }
}

/// How the rows of a joined query line up with its parent
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JoinCondition {
    /// Primary keys of the joined group that the parent group also has
    #[default]
    Implicit,
    /// Same-named features on both sides
    On(Vec<FeatureRef>),
    /// Pairwise `left[i] == right[i]`
    Keys {
        left: Vec<FeatureRef>,
        right: Vec<FeatureRef>,
    },
}

impl JoinCondition {
    /// (left names, right names) of the condition
    pub fn key_names(&self) -> (Vec<&str>, Vec<&str>) {
        match self {
            JoinCondition::Implicit => (Vec::new(), Vec::new()),
            JoinCondition::On(on) => {
                let names: Vec<&str> = on.iter().map(|f| f.name.as_str()).collect();
                (names.clone(), names)
            }
            JoinCondition::Keys { left, right } => (
                left.iter().map(|f| f.name.as_str()).collect(),
                right.iter().map(|f| f.name.as_str()).collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub query: Query,
    pub join_type: JoinType,
    pub condition: JoinCondition,
    /// Prepended to the joined query's output feature names
    pub prefix: Option<String>,
}

impl Join {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            join_type: JoinType::default(),
            condition: JoinCondition::default(),
            prefix: None,
        }
    }

    pub fn with_type(mut self, join_type: JoinType) -> Self {
        self.join_type = join_type;
        self
    }

    pub fn on(mut self, features: Vec<FeatureRef>) -> Self {
        self.condition = JoinCondition::On(features);
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }
}

/// A declarative query over feature groups
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub featurestore_id: Option<i64>,
    pub featurestore_name: Option<String>,
    pub left_feature_group: FeatureGroupRef,
    pub left_features: Vec<FeatureRef>,
    pub joins: Vec<Join>,
    pub filter: Option<Predicate>,
}

impl Query {
    pub fn new(left_feature_group: FeatureGroupRef, left_features: Vec<FeatureRef>) -> Self {
        Self {
            featurestore_id: None,
            featurestore_name: None,
            left_feature_group,
            left_features,
            joins: Vec::new(),
            filter: None,
        }
    }

    pub fn with_join(mut self, join: Join) -> Self {
        self.joins.push(join);
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Number of join levels below this query (0 without joins)
    pub fn join_depth(&self) -> usize {
        self.joins
            .iter()
            .map(|j| 1 + j.query.join_depth())
            .max()
            .unwrap_or(0)
    }

    /// Every feature group id in the graph, anchor first, without duplicates
    pub fn feature_group_ids(&self) -> Vec<i64> {
        let mut ids = Vec::new();
        self.collect_group_ids(&mut ids);
        ids
    }

    fn collect_group_ids(&self, ids: &mut Vec<i64>) {
        if !ids.contains(&self.left_feature_group.id) {
            ids.push(self.left_feature_group.id);
        }
        for join in &self.joins {
            join.query.collect_group_ids(ids);
        }
        if let Some(filter) = &self.filter {
            for f in filter.filters() {
                if let Some(id) = f.feature.feature_group_id {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
            }
        }
    }

    /// Output column names: left features, then each join's outputs with its prefix
    pub fn output_feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.left_features.iter().map(|f| f.name.clone()).collect();
        for join in &self.joins {
            let prefix = join.prefix.as_deref().unwrap_or("");
            names.extend(
                join.query
                    .output_feature_names()
                    .into_iter()
                    .map(|n| format!("{}{}", prefix, n)),
            );
        }
        names
    }
}
