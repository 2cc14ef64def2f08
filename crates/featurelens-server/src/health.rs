//! Health Check Module
//!
//! ## Endpoints
//!
//! - `/health` - Basic liveness (fast, always succeeds if server is up)
//! - `/health/ready` - Readiness check (probes the registry backend)

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::time::Instant;

use crate::shutdown;
use crate::state::AppState;

// ============================================================================
// Health Response Types
// ============================================================================

/// Basic health response (liveness)
#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
}

/// Detailed health response (readiness)
#[derive(Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub checks: HealthChecks,
}

/// Individual health checks
#[derive(Serialize)]
pub struct HealthChecks {
    pub registry: ComponentHealth,
}

/// Health status for a single component
#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Component health status
#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Latency above which a healthy probe is reported as degraded
const DEGRADED_LATENCY_MS: u64 = 1000;

impl ComponentHealth {
    pub fn healthy_with_details(latency_ms: u64, details: serde_json::Value) -> Self {
        Self {
            status: ComponentStatus::Healthy,
            latency_ms: Some(latency_ms),
            message: None,
            details: Some(details),
        }
    }

    pub fn degraded(message: &str, latency_ms: u64) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            latency_ms: Some(latency_ms),
            message: Some(message.to_string()),
            details: None,
        }
    }

    pub fn unhealthy(message: &str) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            latency_ms: None,
            message: Some(message.to_string()),
            details: None,
        }
    }
}

// ============================================================================
// Health Check Handlers
// ============================================================================

/// Liveness check
///
/// `GET /health`
pub async fn liveness(State(state): State<AppState>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok".to_string(),
        uptime_seconds: state.uptime(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness check
///
/// `GET /health/ready`; 503 when the registry cannot be reached or the
/// server is shutting down. A slow registry is degraded but still ready.
pub async fn readiness(State(state): State<AppState>) -> Response {
    let registry = check_registry_health(&state).await;
    let ready = registry.status != ComponentStatus::Unhealthy && !shutdown::is_shutting_down();

    let response = ReadinessResponse {
        status: if ready { "ready" } else { "not_ready" }.to_string(),
        uptime_seconds: state.uptime(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks { registry },
    };

    if ready {
        (StatusCode::OK, Json(response)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(response)).into_response()
    }
}

async fn check_registry_health(state: &AppState) -> ComponentHealth {
    let start = Instant::now();
    match state.registry().health_check().await {
        Ok(()) => {
            let latency = start.elapsed().as_millis() as u64;
            if latency > DEGRADED_LATENCY_MS {
                ComponentHealth::degraded("High latency", latency)
            } else {
                ComponentHealth::healthy_with_details(
                    latency,
                    serde_json::json!({ "backend": state.backend() }),
                )
            }
        }
        Err(e) => ComponentHealth::unhealthy(&format!("Registry error: {}", e)),
    }
}
