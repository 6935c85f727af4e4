//! SyncJob entity model
//!
//! This module contains the SeaORM entity model for the sync_jobs table, which
//! represents one unit of synchronization work (a single record, a batch range,
//! or a modified-since delta) with its lifecycle and aggregate counters.

use chrono::{DateTime, Utc};
use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// SyncJob entity representing one unit of synchronization work
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_jobs")]
pub struct Model {
    /// Unique identifier for the sync job (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Type of job (initial, real_time, scheduled, manual, batch)
    pub job_type: String,

    /// Current status of the job (pending, running, completed, failed, cancelled)
    pub status: String,

    /// Scope descriptor: single record, batch range, or delta interval
    #[sea_orm(column_type = "JsonBinary")]
    pub scope: JsonValue,

    /// Number of source records covered by this job's scope
    pub total_items: i64,

    /// Number of items that reached a final disposition
    pub items_processed: i64,

    /// Number of items upserted successfully
    pub items_succeeded: i64,

    /// Number of items whose retries were cut off while still retryable
    pub items_failed_retryable: i64,

    /// Number of items that failed permanently
    pub items_failed_permanent: i64,

    /// Resume point for batch jobs: last fully-drained window boundary
    #[sea_orm(column_type = "JsonBinary")]
    pub cursor: Option<JsonValue>,

    /// Job-fatal error details, message preserved verbatim
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    /// Operator cancellation flag, consulted before every item dequeue
    pub cancel_requested: bool,

    /// Timestamp when the job was created
    pub created_at: DateTimeWithTimeZone,

    /// Timestamp when the job started execution
    pub started_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job reached a terminal state
    pub completed_at: Option<DateTimeWithTimeZone>,

    /// Timestamp when the job row was last updated
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::sync_item_attempt::Entity")]
    SyncItemAttempt,
}

impl Related<super::sync_item_attempt::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SyncItemAttempt.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Job type discriminator stored in the `job_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Initial,
    RealTime,
    Scheduled,
    Manual,
    Batch,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Initial => "initial",
            JobType::RealTime => "real_time",
            JobType::Scheduled => "scheduled",
            JobType::Manual => "manual",
            JobType::Batch => "batch",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "initial" => Some(JobType::Initial),
            "real_time" => Some(JobType::RealTime),
            "scheduled" => Some(JobType::Scheduled),
            "manual" => Some(JobType::Manual),
            "batch" => Some(JobType::Batch),
            _ => None,
        }
    }
}

/// Job lifecycle states. Terminal states are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Iteration strategy for batch scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IterationStrategy {
    RecordId,
    ParentId,
    Name,
}

/// Scope descriptor persisted in the `scope` column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobScope {
    /// Exactly one source record (real_time, manual)
    Record { record_id: i64 },
    /// A bounded range walked under an iteration strategy, capped at max_items
    Batch {
        strategy: IterationStrategy,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_id: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        end_name: Option<String>,
        max_items: u64,
    },
    /// Records modified within the half-open interval (since, until]
    Delta {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_scope_round_trips_through_json() {
        let scope = JobScope::Batch {
            strategy: IterationStrategy::RecordId,
            start_id: Some(100),
            end_id: None,
            start_name: None,
            end_name: None,
            max_items: 2500,
        };
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["kind"], "batch");
        assert_eq!(json["strategy"], "record_id");
        let back: JobScope = serde_json::from_value(json).unwrap();
        assert_eq!(back, scope);
    }

    #[test]
    fn status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn job_type_parse_rejects_unknown() {
        assert_eq!(JobType::parse("real_time"), Some(JobType::RealTime));
        assert_eq!(JobType::parse("webhook"), None);
    }
}
