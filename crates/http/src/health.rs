//! Health check endpoint
//!
//! Reports the migration runner's state. The service only counts as healthy
//! once every migration has been applied.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use ordinal_db::{ConnectionManager, DatabasePoolStats, RunnerState, SqlDialect};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Clone)]
pub struct HealthState {
    runner_state: watch::Receiver<RunnerState>,
    manager: Option<Arc<ConnectionManager>>,
}

impl HealthState {
    pub fn new(runner_state: watch::Receiver<RunnerState>) -> Self {
        Self {
            runner_state,
            manager: None,
        }
    }

    /// Include pool statistics in responses
    pub fn with_manager(mut self, manager: Arc<ConnectionManager>) -> Self {
        self.manager = Some(manager);
        self
    }
}

/// Health check response body
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub state: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub version: &'static str,
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<DatabaseStatus>,
}

#[derive(Debug, Serialize)]
pub struct DatabaseStatus {
    pub dialect: SqlDialect,
    pub max_connections: u32,
    pub pool: DatabasePoolStats,
}

impl HealthStatus {
    pub fn from_state(state: &RunnerState) -> (StatusCode, Self) {
        let (code, status) = match state {
            RunnerState::Done => (StatusCode::OK, "healthy"),
            RunnerState::Failed { .. } => (StatusCode::SERVICE_UNAVAILABLE, "unhealthy"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "initializing"),
        };

        let body = Self {
            status,
            state: state.name(),
            pass: match state {
                RunnerState::Applying { pass } => Some(*pass),
                _ => None,
            },
            error: match state {
                RunnerState::Failed { error } => Some(error.clone()),
                _ => None,
            },
            version: env!("CARGO_PKG_VERSION"),
            timestamp: chrono::Utc::now().timestamp(),
            database: None,
        };
        (code, body)
    }
}

/// `GET /health`
pub async fn health_check_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthStatus>) {
    let current = state.runner_state.borrow().clone();
    let (code, mut body) = HealthStatus::from_state(&current);

    // Pool counters only; a probe must not wait on the embedded connection.
    if let Some(manager) = &state.manager {
        body.database = Some(DatabaseStatus {
            dialect: manager.dialect(),
            max_connections: manager.max_connections(),
            pool: manager.stats(),
        });
    }

    (code, Json(body))
}
