//! Batch query planning
//!
//! A batch query is a feature view's stored query restricted to a window on
//! the anchor feature group's event time. Each bound is appended as its own
//! conjunct, lower bound first:
//!
//! ```text
//! stored filter F, bounds [s, e]  ->  AND(AND(F, ts >= s), ts <= e)
//! no stored filter, bounds [s, e] ->  AND(ts >= s, ts <= e)
//! ```
//!
//! Applying a window to a query that already carries one nests the new
//! bounds on top in exactly the same way.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::query::{Condition, FeatureRef, Filter, Predicate, Query};
use crate::types::{FeatureGroup, FeatureView};
use crate::{Error, Result};

/// Optional event-time bounds, epoch milliseconds, both inclusive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: Option<i64>,
    pub end: Option<i64>,
}

impl TimeWindow {
    pub fn new(start: Option<i64>, end: Option<i64>) -> Result<Self> {
        if let (Some(start), Some(end)) = (start, end) {
            if start > end {
                return Err(Error::InvalidTimeWindow { start, end });
            }
        }
        Ok(Self { start, end })
    }

    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_unbounded(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// The event-time feature of `group` as a resolved reference
pub fn event_time_feature(group: &FeatureGroup) -> Result<FeatureRef> {
    let name = group
        .event_time
        .as_deref()
        .ok_or_else(|| Error::MissingEventTime(group.qualified_name()))?;
    let column = group.feature(name).ok_or_else(|| {
        Error::internal(format!(
            "event time '{}' is not a feature of '{}'",
            name,
            group.qualified_name()
        ))
    })?;
    Ok(FeatureRef::resolved(&column.name, &column.feature_type, group.id))
}

/// Appends `next` to an optional filter as `AND(existing, next)`
fn conjoin(existing: Option<Predicate>, next: Predicate) -> Predicate {
    match existing {
        Some(p) => p.and(next),
        None => next,
    }
}

/// Restricts `query` to `window` on the event time of `anchor`
///
/// `anchor` must be the query's left feature group.
pub fn apply_time_window(query: &Query, anchor: &FeatureGroup, window: TimeWindow) -> Result<Query> {
    if anchor.id != query.left_feature_group.id {
        return Err(Error::internal(format!(
            "anchor feature group {} does not match query's left feature group {}",
            anchor.id, query.left_feature_group.id
        )));
    }
    if window.is_unbounded() {
        return Ok(query.clone());
    }

    let ts = event_time_feature(anchor)?;
    let mut filter = query.filter.clone();

    if let Some(start) = window.start {
        let lower = Filter::new(ts.clone(), Condition::GreaterThanOrEqual, start.to_string());
        filter = Some(conjoin(filter, Predicate::single(lower)));
    }
    if let Some(end) = window.end {
        let upper = Filter::new(ts.clone(), Condition::LessThanOrEqual, end.to_string());
        filter = Some(conjoin(filter, Predicate::single(upper)));
    }

    debug!(
        feature_group = anchor.id,
        event_time = %ts.name,
        start = ?window.start,
        end = ?window.end,
        "Applied time window to query"
    );

    Ok(Query {
        filter,
        ..query.clone()
    })
}

/// Batch query of a feature view over `window`
pub fn build_batch_query(view: &FeatureView, anchor: &FeatureGroup, window: TimeWindow) -> Result<Query> {
    apply_time_window(&view.query, anchor, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{FeatureGroupRef, LogicOp, Operand};
    use crate::types::FeatureGroupFeature;

    fn anchor() -> FeatureGroup {
        FeatureGroup {
            id: 1,
            featurestore_id: 1,
            name: "fg".to_string(),
            version: 1,
            event_time: Some("ts".to_string()),
            features: vec![
                FeatureGroupFeature::new("f1", "int"),
                FeatureGroupFeature::new("ts", "timestamp"),
            ],
        }
    }

    fn f1_positive() -> Predicate {
        Predicate::single(Filter::new(
            FeatureRef::resolved("f1", "int", 1),
            Condition::GreaterThan,
            "0",
        ))
    }

    fn single(p: &Operand) -> &Filter {
        match p {
            Operand::Logic(inner) => match inner.as_ref() {
                Predicate::Single(f) => f,
                other => panic!("expected SINGLE, got {:?}", other),
            },
            other => panic!("expected logic operand, got {:?}", other),
        }
    }

    #[test]
    fn test_window_with_existing_filter() {
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("f1")])
            .with_filter(f1_positive());
        let out = apply_time_window(&query, &anchor(), TimeWindow::new(Some(1234), Some(4321)).unwrap())
            .unwrap();

        let Some(Predicate::Compound { op, left, right }) = out.filter else {
            panic!("expected compound root");
        };
        assert_eq!(op, LogicOp::And);

        let upper = single(&right);
        assert_eq!(upper.condition, Condition::LessThanOrEqual);
        assert_eq!(upper.value, "4321");
        assert_eq!(upper.feature.name, "ts");

        let Operand::Logic(inner) = left else {
            panic!("expected nested AND on the left");
        };
        let Predicate::Compound { left: original, right: lower, .. } = *inner else {
            panic!("expected compound");
        };
        assert_eq!(single(&original).feature.name, "f1");
        let lower = single(&lower);
        assert_eq!(lower.condition, Condition::GreaterThanOrEqual);
        assert_eq!(lower.value, "1234");
    }

    #[test]
    fn test_window_without_filter() {
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("f1")]);
        let out = apply_time_window(&query, &anchor(), TimeWindow::new(Some(1), Some(2)).unwrap())
            .unwrap();
        let filter = out.filter.unwrap();
        assert_eq!(filter.depth(), 2);
        let values: Vec<&str> = filter.filters().iter().map(|f| f.value.as_str()).collect();
        assert_eq!(values, vec!["1", "2"]);
    }

    #[test]
    fn test_reapplying_window_nests_once_more() {
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("f1")])
            .with_filter(f1_positive());
        let window = TimeWindow::new(Some(1234), Some(4321)).unwrap();
        let once = apply_time_window(&query, &anchor(), window).unwrap();
        let twice = apply_time_window(&once, &anchor(), window).unwrap();

        let d0 = query.filter.as_ref().unwrap().depth();
        let d1 = once.filter.as_ref().unwrap().depth();
        let d2 = twice.filter.as_ref().unwrap().depth();
        assert_eq!(d1 - d0, d2 - d1);
        assert_eq!(twice.filter.unwrap().filters().len(), 5);
    }

    #[test]
    fn test_unbounded_and_half_open_windows() {
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("f1")]);
        let same = apply_time_window(&query, &anchor(), TimeWindow::unbounded()).unwrap();
        assert_eq!(same, query);

        let only_end = apply_time_window(&query, &anchor(), TimeWindow::new(None, Some(9)).unwrap())
            .unwrap();
        assert!(matches!(only_end.filter, Some(Predicate::Single(ref f)) if f.value == "9"));
    }

    #[test]
    fn test_window_errors() {
        assert!(matches!(
            TimeWindow::new(Some(5), Some(1)),
            Err(Error::InvalidTimeWindow { start: 5, end: 1 })
        ));

        let mut no_ts = anchor();
        no_ts.event_time = None;
        let query = Query::new(FeatureGroupRef::new(1), vec![FeatureRef::named("f1")]);
        let err = apply_time_window(&query, &no_ts, TimeWindow::new(Some(1), None).unwrap())
            .unwrap_err();
        assert!(matches!(err, Error::MissingEventTime(_)));
    }
}
