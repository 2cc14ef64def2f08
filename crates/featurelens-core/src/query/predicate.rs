//! Predicate trees
//!
//! A predicate is either a single comparison (`SINGLE` on the wire) or a
//! binary AND/OR node. Each side of a binary node holds exactly one of a
//! filter or a nested node; [`Operand`] makes "both" and "neither"
//! unrepresentable. Which side was a filter and which was a nested node is
//! kept as-is so the tree serializes back to the same
//! `leftFilter`/`leftLogic`/`rightFilter`/`rightLogic` fields it came from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::codec::FeatureDto;
use super::FeatureRef;
use crate::{Error, Result};

/// Comparison operator of a filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Condition {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    In,
    Like,
}

impl Condition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::Equals => "EQUALS",
            Condition::NotEquals => "NOT_EQUALS",
            Condition::GreaterThan => "GREATER_THAN",
            Condition::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            Condition::LessThan => "LESS_THAN",
            Condition::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            Condition::In => "IN",
            Condition::Like => "LIKE",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Condition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "EQUALS" => Ok(Condition::Equals),
            "NOT_EQUALS" => Ok(Condition::NotEquals),
            "GREATER_THAN" => Ok(Condition::GreaterThan),
            "GREATER_THAN_OR_EQUAL" => Ok(Condition::GreaterThanOrEqual),
            "LESS_THAN" => Ok(Condition::LessThan),
            "LESS_THAN_OR_EQUAL" => Ok(Condition::LessThanOrEqual),
            "IN" => Ok(Condition::In),
            "LIKE" => Ok(Condition::Like),
            other => Err(Error::UnsupportedCondition(other.to_string())),
        }
    }
}

/// Leaf comparison; the value stays textual whatever the feature type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    pub feature: FeatureRef,
    pub condition: Condition,
    pub value: String,
}

impl Filter {
    pub fn new(feature: FeatureRef, condition: Condition, value: impl Into<String>) -> Self {
        Self {
            feature,
            condition,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

impl LogicOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicOp::And => "AND",
            LogicOp::Or => "OR",
        }
    }
}

/// One side of a binary node
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Filter(Filter),
    Logic(Box<Predicate>),
}

impl Operand {
    fn depth(&self) -> usize {
        match self {
            Operand::Filter(_) => 0,
            Operand::Logic(p) => p.depth(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Single(Filter),
    Compound {
        op: LogicOp,
        left: Operand,
        right: Operand,
    },
}

impl Predicate {
    pub fn single(filter: Filter) -> Self {
        Predicate::Single(filter)
    }

    /// `AND(self, other)` with both sides as nested nodes
    pub fn and(self, other: Predicate) -> Self {
        Predicate::Compound {
            op: LogicOp::And,
            left: Operand::Logic(Box::new(self)),
            right: Operand::Logic(Box::new(other)),
        }
    }

    /// `OR(self, other)` with both sides as nested nodes
    pub fn or(self, other: Predicate) -> Self {
        Predicate::Compound {
            op: LogicOp::Or,
            left: Operand::Logic(Box::new(self)),
            right: Operand::Logic(Box::new(other)),
        }
    }

    /// Number of logic nodes on the longest root-to-leaf path
    pub fn depth(&self) -> usize {
        match self {
            Predicate::Single(_) => 1,
            Predicate::Compound { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    /// Leaf filters, left to right
    pub fn filters(&self) -> Vec<&Filter> {
        let mut out = Vec::new();
        self.collect_filters(&mut out);
        out
    }

    fn collect_filters<'a>(&'a self, out: &mut Vec<&'a Filter>) {
        match self {
            Predicate::Single(f) => out.push(f),
            Predicate::Compound { left, right, .. } => {
                for side in [left, right] {
                    match side {
                        Operand::Filter(f) => out.push(f),
                        Operand::Logic(p) => p.collect_filters(out),
                    }
                }
            }
        }
    }

    /// Applies `visit` to every leaf filter, left to right, stopping at the first error
    pub fn try_for_each_filter_mut<F>(&mut self, visit: &mut F) -> Result<()>
    where
        F: FnMut(&mut Filter) -> Result<()>,
    {
        match self {
            Predicate::Single(f) => visit(f),
            Predicate::Compound { left, right, .. } => {
                for side in [left, right] {
                    match side {
                        Operand::Filter(f) => visit(f)?,
                        Operand::Logic(p) => p.try_for_each_filter_mut(visit)?,
                    }
                }
                Ok(())
            }
        }
    }
}

// ============================================================================
// Wire format
// ============================================================================

/// A filter as it appears in JSON
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterDto {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// A logic node as it appears in JSON
///
/// The dual-optional layout is what clients send. A bare filter object is
/// also accepted at the root; its fields land in `feature`/`condition`/`value`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterLogicDto {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub logic_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_filter: Option<FilterDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_filter: Option<FilterDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_logic: Option<Box<FilterLogicDto>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_logic: Option<Box<FilterLogicDto>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<FeatureDto>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl FilterLogicDto {
    fn has_logic_fields(&self) -> bool {
        self.logic_type.is_some()
            || self.left_filter.is_some()
            || self.right_filter.is_some()
            || self.left_logic.is_some()
            || self.right_logic.is_some()
    }

    fn has_bare_filter_fields(&self) -> bool {
        self.feature.is_some() || self.condition.is_some() || self.value.is_some()
    }
}

impl FilterDto {
    fn into_filter(self) -> Result<Filter> {
        let feature = self
            .feature
            .ok_or_else(|| Error::malformed("filter is missing its feature"))?;
        let feature_name = feature.name.clone();
        let condition: Condition = self
            .condition
            .ok_or_else(|| Error::malformed(format!("filter on '{}' has no condition", feature_name)))?
            .parse()?;

        let value = match self.value {
            Some(serde_json::Value::String(s)) => s,
            Some(other) => {
                return Err(Error::InvalidPredicateValue {
                    feature: feature_name,
                    reason: format!("expected a string, got {}", json_type_name(&other)),
                })
            }
            None => {
                return Err(Error::InvalidPredicateValue {
                    feature: feature_name,
                    reason: "value is missing".to_string(),
                })
            }
        };

        Ok(Filter {
            feature: feature.into(),
            condition,
            value,
        })
    }
}

impl From<&Filter> for FilterDto {
    fn from(filter: &Filter) -> Self {
        FilterDto {
            feature: Some(FeatureDto::from(&filter.feature)),
            condition: Some(filter.condition.as_str().to_string()),
            value: Some(serde_json::Value::String(filter.value.clone())),
        }
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

/// Validates a wire predicate and builds the tree, keeping its shape
///
/// `max_depth` bounds the number of nested logic nodes.
pub fn build_predicate(dto: FilterLogicDto, max_depth: usize) -> Result<Predicate> {
    if dto.has_bare_filter_fields() && !dto.has_logic_fields() {
        let filter = FilterDto {
            feature: dto.feature,
            condition: dto.condition,
            value: dto.value,
        };
        return Ok(Predicate::Single(filter.into_filter()?));
    }
    build_node(dto, 1, max_depth)
}

fn build_node(dto: FilterLogicDto, depth: usize, max_depth: usize) -> Result<Predicate> {
    if depth > max_depth {
        return Err(Error::QueryTooDeep {
            what: "predicate",
            limit: max_depth,
        });
    }
    if dto.has_bare_filter_fields() {
        return Err(Error::malformed(
            "nested logic node mixes filter fields with logic fields",
        ));
    }

    let logic_type = dto
        .logic_type
        .ok_or_else(|| Error::malformed("logic node is missing its type"))?;

    match logic_type.as_str() {
        "SINGLE" => {
            if dto.right_filter.is_some() || dto.right_logic.is_some() {
                return Err(Error::malformed("SINGLE node must not have a right side"));
            }
            if dto.left_logic.is_some() {
                return Err(Error::malformed("SINGLE node must carry a filter, not a logic node"));
            }
            let filter = dto
                .left_filter
                .ok_or_else(|| Error::malformed("SINGLE node is missing leftFilter"))?;
            Ok(Predicate::Single(filter.into_filter()?))
        }
        "AND" | "OR" => {
            let op = if logic_type == "AND" {
                LogicOp::And
            } else {
                LogicOp::Or
            };
            let left = build_operand(dto.left_filter, dto.left_logic, "left", depth, max_depth)?;
            let right =
                build_operand(dto.right_filter, dto.right_logic, "right", depth, max_depth)?;
            Ok(Predicate::Compound { op, left, right })
        }
        other => Err(Error::malformed(format!("unknown logic type '{}'", other))),
    }
}

fn build_operand(
    filter: Option<FilterDto>,
    logic: Option<Box<FilterLogicDto>>,
    side: &str,
    depth: usize,
    max_depth: usize,
) -> Result<Operand> {
    match (filter, logic) {
        (Some(f), None) => Ok(Operand::Filter(f.into_filter()?)),
        (None, Some(l)) => Ok(Operand::Logic(Box::new(build_node(
            *l,
            depth + 1,
            max_depth,
        )?))),
        (Some(_), Some(_)) => Err(Error::malformed(format!(
            "{} side has both a filter and a logic node",
            side
        ))),
        (None, None) => Err(Error::malformed(format!(
            "{} side has neither a filter nor a logic node",
            side
        ))),
    }
}

impl From<&Predicate> for FilterLogicDto {
    fn from(predicate: &Predicate) -> Self {
        match predicate {
            Predicate::Single(f) => FilterLogicDto {
                logic_type: Some("SINGLE".to_string()),
                left_filter: Some(FilterDto::from(f)),
                ..Default::default()
            },
            Predicate::Compound { op, left, right } => {
                let mut dto = FilterLogicDto {
                    logic_type: Some(op.as_str().to_string()),
                    ..Default::default()
                };
                match left {
                    Operand::Filter(f) => dto.left_filter = Some(FilterDto::from(f)),
                    Operand::Logic(p) => dto.left_logic = Some(Box::new(FilterLogicDto::from(&**p))),
                }
                match right {
                    Operand::Filter(f) => dto.right_filter = Some(FilterDto::from(f)),
                    Operand::Logic(p) => {
                        dto.right_logic = Some(Box::new(FilterLogicDto::from(&**p)))
                    }
                }
                dto
            }
        }
    }
}
