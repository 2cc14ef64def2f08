//! # FeatureLens Core Library
//!
//! Query construction and resolution for feature views: the domain types,
//! the predicate and join model, catalog-backed resolution, batch query
//! planning and training dataset planning. Nothing in this crate talks to a
//! database; persistence sits behind [`FeatureCatalog`] and lives in
//! `featurelens-registry`.
//!
//! ## Key Components
//!
//! - **query**: `Query`, `Join`, `Predicate` and the JSON codec
//! - **FeatureCatalog**: read access to feature stores and feature groups
//! - **planner**: event-time windows for batch queries
//! - **training**: training dataset validation and location planning
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use featurelens_core::prelude::*;
//!
//! let query = Query::new(FeatureGroupRef::new(13), vec![FeatureRef::named("a_testfeature")]);
//! let resolved = resolve_query(&catalog, query, &ResolveOptions::default()).await?;
//! println!("{}", featurelens_core::query::codec::to_json(&resolved)?);
//! ```

pub use error::{Error, ErrorKind, Result};
pub use query::{
    resolve_query, Condition, FeatureCatalog, FeatureGroupRef, FeatureRef, Filter, Join,
    JoinCondition, JoinType, LogicOp, Predicate, Query, QueryLimits, ResolveOptions,
};
pub use types::{
    FeatureGroup, FeatureGroupFeature, FeatureStore, FeatureView, FeatureViewDraft,
    StorageConnector, StorageConnectorKind,
};

mod error;
pub mod planner;
pub mod query;
pub mod retry;
pub mod training;
pub mod types;
pub mod validation;

pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::planner::{build_batch_query, TimeWindow};
    pub use crate::query::{
        resolve_query, Condition, FeatureCatalog, FeatureGroupRef, FeatureRef, Filter, Join,
        JoinCondition, JoinType, LogicOp, Predicate, Query, ResolveOptions,
    };
    pub use crate::training::{TrainingDataset, TrainingDatasetPlanner, TrainingDatasetRequest};
    pub use crate::types::{FeatureGroup, FeatureStore, FeatureView, StorageConnector};
}
