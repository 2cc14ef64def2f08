//! Error handling for the HTTP server
//!
//! Every error leaves the server as
//!
//! ```json
//! {
//!   "errorCode": 270181,
//!   "errorMsg": "Feature view not found",
//!   "usrMsg": "Feature view 'sales' version 3 not found"
//! }
//! ```
//!
//! `errorCode` and `errorMsg` are fixed per error and clients match on them;
//! `usrMsg` carries the details. Codes are never reused or renumbered.

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use featurelens_core::Error as CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metrics;

/// Result type alias for operations that can fail
pub type Result<T> = std::result::Result<T, AppError>;

/// Generic internal failure
pub const INTERNAL_ERROR_CODE: u32 = 270000;
/// Request body or query string could not be read
pub const INVALID_INPUT_CODE: u32 = 270002;

/// Application errors that can occur in HTTP handlers
#[derive(Debug)]
pub enum AppError {
    /// Invalid request that never reached the core (400)
    BadRequest(String),

    /// Request body above the configured limit (413)
    PayloadTooLarge(String),

    /// Internal server error (500)
    Internal(String),

    /// Error from the core library or the registry
    Core(CoreError),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::Core(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for AppError {}

/// Status, code and machine message of a core error
pub fn describe(err: &CoreError) -> (StatusCode, u32, &'static str) {
    use StatusCode as S;
    match err {
        CoreError::FeatureStoreNotFound(_) => (S::NOT_FOUND, 270001, "Feature store not found"),
        CoreError::UnknownFeatureGroup(_) => (S::NOT_FOUND, 270009, "Feature group not found"),
        CoreError::UnknownFeature { .. } => (S::NOT_FOUND, 270010, "Feature not found"),
        CoreError::AmbiguousFeatureReference(..) => {
            (S::BAD_REQUEST, 270011, "Ambiguous feature reference")
        }
        CoreError::TrainingDatasetNotFound { .. } => {
            (S::NOT_FOUND, 270012, "Training dataset not found")
        }
        CoreError::InvalidName { .. } => (S::BAD_REQUEST, 270038, "Illegal name"),
        CoreError::StorageConnectorNotFound(_) => {
            (S::NOT_FOUND, 270042, "Storage connector not found")
        }
        CoreError::UnsupportedConnectorType(_) => (
            S::NOT_FOUND,
            270043,
            "Storage connector type not supported for training datasets",
        ),
        CoreError::InvalidDataFormat(_) => (S::BAD_REQUEST, 270057, "Illegal data format"),
        CoreError::InvalidVersion(_) => (S::BAD_REQUEST, 270058, "Illegal version"),
        CoreError::DuplicateNameVersion { .. } => {
            (S::BAD_REQUEST, 270089, "Name and version already exist")
        }
        CoreError::MalformedPredicateTree(_) => {
            (S::BAD_REQUEST, 270090, "Malformed filter logic")
        }
        CoreError::UnsupportedCondition(_) => {
            (S::BAD_REQUEST, 270091, "Unsupported filter condition")
        }
        CoreError::InvalidPredicateValue { .. } => {
            (S::BAD_REQUEST, 270092, "Illegal filter value")
        }
        CoreError::InvalidJoin(_) => (S::BAD_REQUEST, 270093, "Illegal join"),
        CoreError::DuplicateJoin(_) => (S::BAD_REQUEST, 270094, "Duplicate join"),
        CoreError::QueryTooDeep { .. } => (S::BAD_REQUEST, 270095, "Query nested too deep"),
        CoreError::MissingEventTime(_) => {
            (S::BAD_REQUEST, 270096, "Feature group has no event time")
        }
        CoreError::InvalidTimeWindow { .. } => (S::BAD_REQUEST, 270097, "Illegal time window"),
        CoreError::InvalidSplitName(_) => (S::BAD_REQUEST, 270098, "Illegal split name"),
        CoreError::InvalidSplitPercentage { .. } => {
            (S::BAD_REQUEST, 270099, "Illegal split percentage")
        }
        CoreError::DuplicateSplitName(_) => (S::BAD_REQUEST, 270106, "Duplicate split name"),
        CoreError::UnknownTrainSplit(_) => (S::BAD_REQUEST, 270107, "Illegal train split"),
        CoreError::UnknownStatisticsColumn(_) => {
            (S::BAD_REQUEST, 270108, "Illegal statistics column")
        }
        CoreError::FeatureViewNotFound { .. } => {
            (S::NOT_FOUND, 270181, "Feature view not found")
        }
        CoreError::InvalidInput(_) => (S::BAD_REQUEST, INVALID_INPUT_CODE, "Illegal input"),
        _ => (
            S::INTERNAL_SERVER_ERROR,
            INTERNAL_ERROR_CODE,
            "Internal server error",
        ),
    }
}

impl AppError {
    fn parts(&self) -> (StatusCode, u32, &'static str) {
        match self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, INVALID_INPUT_CODE, "Illegal input"),
            AppError::PayloadTooLarge(_) => (
                StatusCode::PAYLOAD_TOO_LARGE,
                INVALID_INPUT_CODE,
                "Request body too large",
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                INTERNAL_ERROR_CODE,
                "Internal server error",
            ),
            AppError::Core(err) => describe(err),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_msg) = self.parts();
        metrics::record_error_code(code);

        // Details of 5xx stay in the log
        let usr_msg = if status.is_server_error() {
            tracing::error!(error_code = code, "Request error: {}", self);
            "An internal error occurred, see the server log for details".to_string()
        } else {
            tracing::warn!(error_code = code, "Request rejected: {}", self);
            match &self {
                AppError::Core(err) => err.to_string(),
                other => other.to_string(),
            }
        };

        let body = ErrorResponse {
            error_code: code,
            error_msg: error_msg.to_string(),
            usr_msg,
        };

        (status, Json(body)).into_response()
    }
}

/// Error response sent to clients
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error_code: u32,
    pub error_msg: String,
    pub usr_msg: String,
}

impl From<CoreError> for AppError {
    fn from(err: CoreError) -> Self {
        AppError::Core(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            AppError::PayloadTooLarge(rejection.body_text())
        } else {
            AppError::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        AppError::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::BadRequest("test".to_string());
        assert_eq!(err.to_string(), "Bad request: test");
    }

    #[test]
    fn test_error_conversion_from_core() {
        let app_err: AppError = CoreError::InvalidVersion(0).into();
        assert!(matches!(app_err, AppError::Core(_)));
    }

    #[test]
    fn test_codes_are_stable() {
        let cases = [
            (CoreError::FeatureStoreNotFound(1), 270001, 404),
            (CoreError::UnknownFeatureGroup(1), 270009, 404),
            (CoreError::InvalidDataFormat("x".into()), 270057, 400),
            (CoreError::InvalidVersion(-1), 270058, 400),
            (CoreError::InvalidSplitName("A".into()), 270098, 400),
            (
                CoreError::InvalidSplitPercentage {
                    name: "a".into(),
                    value: "x".into(),
                },
                270099,
                400,
            ),
            (CoreError::DuplicateSplitName("a".into()), 270106, 400),
            (CoreError::UnknownStatisticsColumn("c".into()), 270108, 400),
            (CoreError::UnsupportedConnectorType("JDBC".into()), 270043, 404),
            (
                CoreError::FeatureViewNotFound {
                    name: "fv".into(),
                    version: Some(1),
                },
                270181,
                404,
            ),
            (
                CoreError::DuplicateNameVersion {
                    entity: "Feature view",
                    name: "fv".into(),
                    version: 1,
                },
                270089,
                400,
            ),
            (CoreError::InternalError("boom".into()), 270000, 500),
        ];

        for (err, code, status) in cases {
            let (s, c, _) = describe(&err);
            assert_eq!(c, code, "{}", err);
            assert_eq!(s.as_u16(), status, "{}", err);
        }
    }

    #[tokio::test]
    async fn test_response_body_shape() {
        let response = AppError::Core(CoreError::InvalidVersion(0)).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error_code, 270058);
        assert_eq!(parsed.error_msg, "Illegal version");
        assert!(parsed.usr_msg.contains('0'));
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let response = AppError::Internal("db password wrong".to_string()).into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let parsed: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.error_code, 270000);
        assert!(!parsed.usr_msg.contains("password"));
    }
}
