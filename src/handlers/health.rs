//! # Health Handler
//!
//! Liveness endpoint reporting database reachability, queue depth, and the
//! state of the remote call gate.

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::error::ApiError;
use crate::repositories::SyncJobRepository;
use crate::server::AppState;

/// Health report for the sync service
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub sync_enabled: bool,
    /// Jobs waiting to be claimed
    pub queue_depth: u64,
    /// Source records currently being synced in this process
    pub inflight_records: usize,
    pub throttle: ThrottleHealth,
}

/// Remote call gate diagnostics
#[derive(Debug, Serialize, Deserialize)]
pub struct ThrottleHealth {
    pub min_call_interval_ms: u64,
    /// Remaining delay before the next call slot
    pub current_delay_ms: u64,
}

pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let database = match crate::db::health_check(&state.db).await {
        Ok(()) => "up",
        Err(err) => {
            error!("database health check failed: {:?}", err);
            "down"
        }
    };

    let queue_depth = if database == "up" {
        SyncJobRepository::new(state.db.clone())
            .queue_depth()
            .await
            .unwrap_or(0)
    } else {
        0
    };

    Ok(Json(HealthResponse {
        status: if database == "up" { "ok" } else { "degraded" }.to_string(),
        database: database.to_string(),
        sync_enabled: state.config.sync_enabled,
        queue_depth,
        inflight_records: state.singleflight.held_count(),
        throttle: ThrottleHealth {
            min_call_interval_ms: state.throttle.min_interval().as_millis() as u64,
            current_delay_ms: state.throttle.current_delay().await.as_millis() as u64,
        },
    }))
}
