//! # Jobs API Handlers
//!
//! Submission, inspection, and cancellation of sync jobs. Submission is
//! accepted, not executed: the response carries the queued job and the
//! orchestrator picks it up on its next claim.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::models::sync_item_attempt;
use crate::models::sync_job::{self, IterationStrategy, JobScope, JobType};
use crate::repositories::{SyncItemAttemptRepository, SyncJobRepository};
use crate::server::AppState;

/// Request payload for submitting a sync job
#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    /// One of: initial, manual, batch
    pub job_type: String,
    /// Scope descriptor (record for manual, batch range for initial/batch)
    pub scope: JobScope,
}

/// Job information response
#[derive(Debug, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: String,
    pub job_type: String,
    pub status: String,
    pub scope: JsonValue,
    pub total_items: i64,
    pub items_processed: i64,
    pub items_succeeded: i64,
    pub items_failed_retryable: i64,
    pub items_failed_permanent: i64,
    pub error: Option<JsonValue>,
    pub cancel_requested: bool,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    /// Seconds from start to completion, or to now while still running
    pub duration_seconds: Option<f64>,
}

impl From<sync_job::Model> for JobInfo {
    fn from(model: sync_job::Model) -> Self {
        let duration_seconds = model.started_at.map(|started| {
            let end = model
                .completed_at
                .unwrap_or_else(|| Utc::now().fixed_offset());
            (end - started).num_milliseconds() as f64 / 1000.0
        });

        Self {
            id: model.id.to_string(),
            job_type: model.job_type,
            status: model.status,
            scope: model.scope,
            total_items: model.total_items,
            items_processed: model.items_processed,
            items_succeeded: model.items_succeeded,
            items_failed_retryable: model.items_failed_retryable,
            items_failed_permanent: model.items_failed_permanent,
            error: model.error,
            cancel_requested: model.cancel_requested,
            created_at: model.created_at.to_rfc3339(),
            started_at: model.started_at.map(|dt| dt.to_rfc3339()),
            completed_at: model.completed_at.map(|dt| dt.to_rfc3339()),
            duration_seconds,
        }
    }
}

/// Per-item attempt information response
#[derive(Debug, Serialize, Deserialize)]
pub struct JobItemInfo {
    pub source_record_id: i64,
    pub external_record_id: Option<String>,
    pub status: String,
    pub attempt_count: i32,
    pub last_error_kind: Option<String>,
    pub last_error_message: Option<String>,
    pub next_eligible_at: Option<String>,
    pub updated_at: String,
}

impl From<sync_item_attempt::Model> for JobItemInfo {
    fn from(model: sync_item_attempt::Model) -> Self {
        Self {
            source_record_id: model.source_record_id,
            external_record_id: model.external_record_id,
            status: model.status,
            attempt_count: model.attempt_count,
            last_error_kind: model.last_error_kind,
            last_error_message: model.last_error_message,
            next_eligible_at: model.next_eligible_at.map(|dt| dt.to_rfc3339()),
            updated_at: model.updated_at.to_rfc3339(),
        }
    }
}

/// Response payload for the items listing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct JobItemsResponse {
    pub job_id: String,
    pub items: Vec<JobItemInfo>,
}

/// Submit a sync job. Returns 202 with the queued job.
pub async fn create_job(
    State(state): State<AppState>,
    Json(request): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    if !state.config.sync_enabled {
        return Err(ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SYNC_DISABLED",
            "Synchronization is disabled by configuration",
        ));
    }

    let job_type = match JobType::parse(&request.job_type) {
        Some(JobType::RealTime) | Some(JobType::Scheduled) => {
            return Err(validation_error(
                "Invalid job_type",
                serde_json::json!({
                    "job_type": "real_time and scheduled jobs are enqueued internally"
                }),
            ));
        }
        Some(job_type) => job_type,
        None => {
            return Err(validation_error(
                "Invalid job_type",
                serde_json::json!({
                    "job_type": "Must be one of: initial, manual, batch"
                }),
            ));
        }
    };

    validate_scope(job_type, &request.scope)?;

    let repo = SyncJobRepository::new(state.db.clone());
    let job = repo.enqueue(job_type, &request.scope).await?;

    Ok((StatusCode::ACCEPTED, Json(JobInfo::from(job))))
}

fn validate_scope(job_type: JobType, scope: &JobScope) -> Result<(), ApiError> {
    match (job_type, scope) {
        (JobType::Manual, JobScope::Record { .. }) => Ok(()),
        (JobType::Manual, _) => Err(validation_error(
            "Invalid scope",
            serde_json::json!({ "scope": "manual jobs take a record scope" }),
        )),
        (
            JobType::Initial | JobType::Batch,
            JobScope::Batch {
                strategy,
                start_id,
                end_id,
                start_name,
                end_name,
                max_items,
            },
        ) => {
            if *max_items == 0 {
                return Err(validation_error(
                    "Invalid scope",
                    serde_json::json!({ "max_items": "must be greater than zero" }),
                ));
            }
            let bounds_match = match strategy {
                IterationStrategy::RecordId | IterationStrategy::ParentId => {
                    start_name.is_none() && end_name.is_none()
                }
                IterationStrategy::Name => start_id.is_none() && end_id.is_none(),
            };
            if !bounds_match {
                return Err(validation_error(
                    "Invalid scope",
                    serde_json::json!({
                        "scope": "bounds must match the iteration strategy (id bounds for record_id/parent_id, name bounds for name)"
                    }),
                ));
            }
            Ok(())
        }
        (JobType::Initial | JobType::Batch, _) => Err(validation_error(
            "Invalid scope",
            serde_json::json!({ "scope": "initial and batch jobs take a batch scope" }),
        )),
        // RealTime and Scheduled are rejected before scope validation
        _ => Err(validation_error(
            "Invalid scope",
            serde_json::json!({ "scope": "unsupported job_type/scope combination" }),
        )),
    }
}

/// Fetch one job with its counters.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobInfo>, ApiError> {
    let repo = SyncJobRepository::new(state.db.clone());
    let job = repo
        .find_by_id(job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found"))?;

    Ok(Json(JobInfo::from(job)))
}

/// List per-item attempt state for a job, ordered by source record id.
pub async fn list_job_items(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<Json<JobItemsResponse>, ApiError> {
    let jobs = SyncJobRepository::new(state.db.clone());
    if jobs.find_by_id(job_id).await?.is_none() {
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Job not found",
        ));
    }

    let attempts = SyncItemAttemptRepository::new(state.db.clone());
    let items = attempts.list_by_job(job_id).await?;

    Ok(Json(JobItemsResponse {
        job_id: job_id.to_string(),
        items: items.into_iter().map(JobItemInfo::from).collect(),
    }))
}

/// Request cancellation of a job. Idempotent: cancelling a terminal job
/// returns its current state unchanged.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
) -> Result<(StatusCode, Json<JobInfo>), ApiError> {
    let repo = SyncJobRepository::new(state.db.clone());
    let job = repo
        .request_cancel(job_id)
        .await?
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", "Job not found"))?;

    // Cut any in-process backoff or throttle wait short
    state.cancels.cancel(job_id);

    Ok((StatusCode::ACCEPTED, Json(JobInfo::from(job))))
}
