//! # NetSuite Webhook Handler
//!
//! Ingress for change notifications from the external system. The
//! endpoint always acknowledges with 202 once the secret checks out; lost or
//! unknown notifications are covered by the scheduled delta sweep, so there
//! is nothing for the caller to retry.

use axum::{extract::State, http::StatusCode, response::Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use crate::error::{ApiError, unauthorized};
use crate::models::sync_job::{JobScope, JobType};
use crate::repositories::{SourceItemRepository, SyncJobRepository};
use crate::server::AppState;

/// Change notification sent by NetSuite.
#[derive(Debug, Deserialize)]
pub struct NetSuiteWebhookPayload {
    /// NetSuite identity of the changed record
    pub external_record_id: String,
    /// Shared secret configured on both sides
    pub secret: String,
    /// When the change happened remotely, if the caller knows
    #[serde(default)]
    pub change_timestamp: Option<DateTime<Utc>>,
}

/// Acknowledgement returned for every authenticated notification.
#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub accepted: bool,
    /// Job covering this record, when one was enqueued or already active
    pub job_id: Option<String>,
}

/// Accept a NetSuite change notification and enqueue a real_time job for the
/// mapped source record, coalescing onto an already-active job for the same
/// record.
pub async fn netsuite_webhook(
    State(state): State<AppState>,
    Json(payload): Json<NetSuiteWebhookPayload>,
) -> Result<(StatusCode, Json<WebhookAck>), ApiError> {
    let Some(configured) = state.config.webhook_secret.as_deref() else {
        return Err(unauthorized(Some("Webhook secret not configured")));
    };
    let secret_ok: bool =
        ConstantTimeEq::ct_eq(payload.secret.as_bytes(), configured.as_bytes()).into();
    if !secret_ok {
        return Err(unauthorized(Some("Invalid webhook secret")));
    }

    let items = SourceItemRepository::new(state.db.clone());
    let Some(item) = items.find_by_external_id(&payload.external_record_id).await? else {
        warn!(
            external_record_id = %payload.external_record_id,
            "webhook notification for unknown external record"
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(WebhookAck {
                accepted: true,
                job_id: None,
            }),
        ));
    };

    let jobs = SyncJobRepository::new(state.db.clone());
    if let Some(active) = jobs.active_real_time_for_record(item.id).await? {
        debug!(
            record_id = item.id,
            job_id = %active.id,
            "coalesced webhook notification onto active job"
        );
        return Ok((
            StatusCode::ACCEPTED,
            Json(WebhookAck {
                accepted: true,
                job_id: Some(active.id.to_string()),
            }),
        ));
    }

    let job = jobs
        .enqueue(JobType::RealTime, &JobScope::Record { record_id: item.id })
        .await?;
    debug!(
        record_id = item.id,
        job_id = %job.id,
        changed_at = ?payload.change_timestamp,
        "enqueued real_time job from webhook"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAck {
            accepted: true,
            job_id: Some(job.id.to_string()),
        }),
    ))
}
