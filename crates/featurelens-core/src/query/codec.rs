//! JSON wire format for query graphs
//!
//! The DTOs mirror the camelCase payloads clients send. Turning a DTO into a
//! [`Query`] checks structure only (predicate shape, join shape, nesting
//! depth); catalog lookups happen later in [`super::join::JoinGraphBuilder`].
//! Arrays keep their order in both directions.

use serde::{Deserialize, Serialize};

use super::join::QueryLimits;
use super::predicate::{build_predicate, FilterLogicDto};
use super::{FeatureGroupRef, FeatureRef, Join, JoinCondition, JoinType, Query};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureDto {
    pub name: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub feature_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_group_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureGroupRefDto {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinDto {
    pub query: Box<QueryDto>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub join_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub on: Vec<FeatureDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub left_on: Vec<FeatureDto>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub right_on: Vec<FeatureDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_store_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature_store_name: Option<String>,
    #[serde(default)]
    pub left_feature_group: Option<FeatureGroupRefDto>,
    #[serde(default)]
    pub left_features: Vec<FeatureDto>,
    #[serde(default)]
    pub joins: Vec<JoinDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterLogicDto>,
}

// ============================================================================
// DTO -> domain
// ============================================================================

impl From<FeatureDto> for FeatureRef {
    fn from(dto: FeatureDto) -> Self {
        FeatureRef {
            name: dto.name,
            feature_type: dto.feature_type,
            feature_group_id: dto.feature_group_id,
        }
    }
}

impl QueryDto {
    /// Structural validation into a [`Query`], bounded by `limits`
    pub fn into_query(self, limits: &QueryLimits) -> Result<Query> {
        self.into_query_at(0, limits)
    }

    fn into_query_at(self, join_depth: usize, limits: &QueryLimits) -> Result<Query> {
        if join_depth > limits.max_join_depth {
            return Err(Error::QueryTooDeep {
                what: "join",
                limit: limits.max_join_depth,
            });
        }

        let left = self.left_feature_group.ok_or_else(|| {
            if join_depth == 0 {
                Error::invalid_input("query is missing leftFeatureGroup")
            } else {
                Error::invalid_join("joined query is missing leftFeatureGroup")
            }
        })?;

        let joins = self
            .joins
            .into_iter()
            .map(|j| j.into_join(join_depth + 1, limits))
            .collect::<Result<Vec<_>>>()?;

        let filter = self
            .filter
            .map(|f| build_predicate(f, limits.max_predicate_depth))
            .transpose()?;

        Ok(Query {
            featurestore_id: self.feature_store_id,
            featurestore_name: self.feature_store_name,
            left_feature_group: FeatureGroupRef {
                id: left.id,
                name: left.name,
                version: left.version,
            },
            left_features: self.left_features.into_iter().map(Into::into).collect(),
            joins,
            filter,
        })
    }
}

impl JoinDto {
    fn into_join(self, join_depth: usize, limits: &QueryLimits) -> Result<Join> {
        let join_type = match self.join_type.as_deref() {
            Some(t) => t.parse::<JoinType>()?,
            None => JoinType::default(),
        };

        let condition = match (
            self.on.is_empty(),
            self.left_on.is_empty(),
            self.right_on.is_empty(),
        ) {
            (true, true, true) => JoinCondition::Implicit,
            (false, true, true) => JoinCondition::On(self.on.into_iter().map(Into::into).collect()),
            (true, false, false) => {
                if self.left_on.len() != self.right_on.len() {
                    return Err(Error::invalid_join(format!(
                        "leftOn has {} features but rightOn has {}",
                        self.left_on.len(),
                        self.right_on.len()
                    )));
                }
                JoinCondition::Keys {
                    left: self.left_on.into_iter().map(Into::into).collect(),
                    right: self.right_on.into_iter().map(Into::into).collect(),
                }
            }
            (false, _, _) => {
                return Err(Error::invalid_join(
                    "'on' cannot be combined with leftOn/rightOn",
                ))
            }
            _ => {
                return Err(Error::invalid_join(
                    "leftOn and rightOn must be given together",
                ))
            }
        };

        Ok(Join {
            query: self.query.into_query_at(join_depth, limits)?,
            join_type,
            condition,
            prefix: self.prefix.filter(|p| !p.is_empty()),
        })
    }
}

impl TryFrom<QueryDto> for Query {
    type Error = Error;

    fn try_from(dto: QueryDto) -> Result<Self> {
        dto.into_query(&QueryLimits::default())
    }
}

// ============================================================================
// domain -> DTO
// ============================================================================

impl From<&FeatureRef> for FeatureDto {
    fn from(f: &FeatureRef) -> Self {
        FeatureDto {
            name: f.name.clone(),
            feature_type: f.feature_type.clone(),
            feature_group_id: f.feature_group_id,
        }
    }
}

impl From<&Join> for JoinDto {
    fn from(join: &Join) -> Self {
        let features = |v: &[FeatureRef]| v.iter().map(FeatureDto::from).collect::<Vec<_>>();
        let (on, left_on, right_on) = match &join.condition {
            JoinCondition::Implicit => (Vec::new(), Vec::new(), Vec::new()),
            JoinCondition::On(on) => (features(on), Vec::new(), Vec::new()),
            JoinCondition::Keys { left, right } => (Vec::new(), features(left), features(right)),
        };
        JoinDto {
            query: Box::new(QueryDto::from(&join.query)),
            join_type: Some(join.join_type.as_str().to_string()),
            on,
            left_on,
            right_on,
            prefix: join.prefix.clone(),
        }
    }
}

impl From<&Query> for QueryDto {
    fn from(query: &Query) -> Self {
        QueryDto {
            feature_store_id: query.featurestore_id,
            feature_store_name: query.featurestore_name.clone(),
            left_feature_group: Some(FeatureGroupRefDto {
                id: query.left_feature_group.id,
                name: query.left_feature_group.name.clone(),
                version: query.left_feature_group.version,
            }),
            left_features: query.left_features.iter().map(FeatureDto::from).collect(),
            joins: query.joins.iter().map(JoinDto::from).collect(),
            filter: query.filter.as_ref().map(FilterLogicDto::from),
        }
    }
}

impl Serialize for Query {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        QueryDto::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Query {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let dto = QueryDto::deserialize(deserializer)?;
        Query::try_from(dto).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// JSON helpers
// ============================================================================

pub fn to_json(query: &Query) -> Result<String> {
    Ok(serde_json::to_string(&QueryDto::from(query))?)
}

pub fn to_value(query: &Query) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(QueryDto::from(query))?)
}

/// Parses untrusted JSON, reporting structural problems as typed errors
pub fn from_json(json: &str, limits: &QueryLimits) -> Result<Query> {
    let dto: QueryDto = serde_json::from_str(json)?;
    dto.into_query(limits)
}

pub fn from_value(value: serde_json::Value, limits: &QueryLimits) -> Result<Query> {
    let dto: QueryDto = serde_json::from_value(value)?;
    dto.into_query(limits)
}
