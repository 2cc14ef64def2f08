//! FeatureLens Server Library
//!
//! This exposes the server modules for integration testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use featurelens_server::{api, state::AppState};
//!
//! let state = AppState::in_memory().await?;
//! let app = api::router(state);
//! ```

pub mod api;
pub mod config;
pub mod data_store;
pub mod error;
pub mod health;
pub mod metrics;
pub mod request_id;
pub mod shutdown;
pub mod state;
