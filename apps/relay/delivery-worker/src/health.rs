//! Liveness, readiness and Prometheus endpoints for the orchestrator.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection, Statement};
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct HealthState {
    pub db: DatabaseConnection,
    pub name: String,
    pub version: String,
}

impl HealthState {
    pub fn new(db: DatabaseConnection, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            db,
            name: name.into(),
            version: version.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub name: String,
    pub version: String,
}

/// Liveness check. Always 200 while the process is serving.
pub async fn health_handler(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        name: state.name,
        version: state.version,
    })
}

/// Readiness check. 503 when PostgreSQL does not answer `SELECT 1`.
pub async fn ready_handler(
    State(state): State<HealthState>,
) -> Result<(StatusCode, Json<Value>), (StatusCode, Json<Value>)> {
    let stmt = Statement::from_string(DatabaseBackend::Postgres, "SELECT 1".to_owned());
    match state.db.query_one_raw(stmt).await {
        Ok(_) => Ok((
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "checks": { "postgres": "ok" }
            })),
        )),
        Err(e) => Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not_ready",
                "checks": { "postgres": format!("error: {}", e) }
            })),
        )),
    }
}

pub async fn metrics_handler() -> impl IntoResponse {
    match job_worker::metrics::prometheus_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            "Metrics not initialized".to_string(),
        ),
    }
}

pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/healthz", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
