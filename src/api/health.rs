//! Health check endpoints
//!
//! Liveness only says the process answers. Readiness also needs a reachable
//! task store, and reports how many tasks the reconciler still works on.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;

use crate::{
    db::{self, TaskRepository},
    AppState,
};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    /// Tasks not yet in a final phase
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_tasks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Liveness probe (for Kubernetes)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe (for Kubernetes)
///
/// 503 while the task store cannot be queried.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let probe = async {
        db::migrations::check_connection(&state.db).await?;
        TaskRepository::new(state.db.clone()).list().await
    };
    match probe.await {
        Ok(tasks) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready".to_string(),
                active_tasks: Some(tasks.iter().filter(|t| t.is_active()).count()),
                message: None,
            }),
        ),
        Err(e) => {
            warn!("readiness check failed: {:#}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    status: "unavailable".to_string(),
                    active_tasks: None,
                    message: Some(format!("{:#}", e)),
                }),
            )
        }
    }
}
