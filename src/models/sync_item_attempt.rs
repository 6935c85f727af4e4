//! SyncItemAttempt entity model
//!
//! One row per (job, source record). The row carries the item's retry state
//! explicitly (`attempt_count`, `next_eligible_at`) so a crash never loses the
//! backoff position, and it is retained after job completion for triage.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-item sync attempt state within one job
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_item_attempts")]
pub struct Model {
    /// Unique identifier (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning sync job
    pub job_id: Uuid,

    /// Source record this attempt tracks
    pub source_record_id: i64,

    /// Resolved external identity once the upsert succeeds
    pub external_record_id: Option<String>,

    /// Number of remote call attempts made so far, including the final one
    pub attempt_count: i32,

    /// Item disposition (pending, succeeded, failed_retryable, failed_permanent)
    pub status: String,

    /// Classification of the most recent failure
    pub last_error_kind: Option<String>,

    /// Message of the most recent failure, preserved verbatim
    pub last_error_message: Option<String>,

    /// Earliest wall-clock time the next attempt may run
    pub next_eligible_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the row was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sync_job::Entity",
        from = "Column::JobId",
        to = "super::sync_job::Column::Id"
    )]
    SyncJob,
}

impl Related<super::sync_job::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncJob.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Item-level dispositions. `failed_retryable` is only final when retries were
/// cut off by cancellation or a job-fatal abort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Pending,
    #[serde(rename = "success")]
    Succeeded,
    FailedRetryable,
    FailedPermanent,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Succeeded => "success",
            ItemStatus::FailedRetryable => "failed_retryable",
            ItemStatus::FailedPermanent => "failed_permanent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(ItemStatus::Pending),
            "success" => Some(ItemStatus::Succeeded),
            "failed_retryable" => Some(ItemStatus::FailedRetryable),
            "failed_permanent" => Some(ItemStatus::FailedPermanent),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ItemStatus::Succeeded | ItemStatus::FailedPermanent
        )
    }
}
