//! # SyncItemAttempt Repository
//!
//! Per-item attempt state within a job. Finalization methods combine the
//! attempt write with the owning job's counter increments in one transaction
//! so the counters invariant holds at every observable point.

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;

use crate::models::sync_item_attempt::{ActiveModel, Column, Entity, ItemStatus, Model};
use crate::remote::SyncErrorKind;
use crate::repositories::sync_job::{CounterDelta, apply_counter_delta};

/// Repository for sync item attempt database operations
pub struct SyncItemAttemptRepository {
    db: DatabaseConnection,
}

impl SyncItemAttemptRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Fetch the attempt row for (job, record), creating a pending one if
    /// this is the first time the record is dequeued in this job.
    pub async fn get_or_create(&self, job_id: Uuid, record_id: i64) -> Result<Model, DbErr> {
        if let Some(existing) = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::SourceRecordId.eq(record_id))
            .one(&self.db)
            .await?
        {
            return Ok(existing);
        }

        let now = Utc::now().fixed_offset();
        let attempt = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_id: Set(job_id),
            source_record_id: Set(record_id),
            external_record_id: Set(None),
            attempt_count: Set(0),
            status: Set(ItemStatus::Pending.as_str().to_string()),
            last_error_kind: Set(None),
            last_error_message: Set(None),
            next_eligible_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        attempt.insert(&self.db).await
    }

    /// Record a retryable failure and the explicit next-eligible time. The
    /// row stays non-terminal; job counters are untouched until the item
    /// reaches a final disposition.
    pub async fn record_retryable_failure(
        &self,
        attempt: Model,
        kind: SyncErrorKind,
        message: &str,
        attempt_count: i32,
        next_eligible_at: DateTimeWithTimeZone,
    ) -> Result<Model, DbErr> {
        let mut active: ActiveModel = attempt.into();
        active.attempt_count = Set(attempt_count);
        active.status = Set(ItemStatus::FailedRetryable.as_str().to_string());
        active.last_error_kind = Set(Some(kind.as_str().to_string()));
        active.last_error_message = Set(Some(message.to_string()));
        active.next_eligible_at = Set(Some(next_eligible_at));
        active.updated_at = Set(Utc::now().fixed_offset());
        active.update(&self.db).await
    }

    /// Finalize an item as succeeded: attempt row and job counters move in
    /// one transaction.
    pub async fn finalize_success(
        &self,
        attempt: Model,
        external_id: &str,
        attempt_count: i32,
    ) -> Result<Model, DbErr> {
        let job_id = attempt.job_id;
        let txn = self.db.begin().await?;

        let mut active: ActiveModel = attempt.into();
        active.attempt_count = Set(attempt_count);
        active.status = Set(ItemStatus::Succeeded.as_str().to_string());
        active.external_record_id = Set(Some(external_id.to_string()));
        active.last_error_kind = Set(None);
        active.last_error_message = Set(None);
        active.next_eligible_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(&txn).await?;

        apply_counter_delta(&txn, job_id, CounterDelta::succeeded()).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Finalize an item as permanently failed, preserving the error message
    /// verbatim.
    pub async fn finalize_permanent(
        &self,
        attempt: Model,
        kind: SyncErrorKind,
        message: &str,
        attempt_count: i32,
    ) -> Result<Model, DbErr> {
        let job_id = attempt.job_id;
        let txn = self.db.begin().await?;

        let mut active: ActiveModel = attempt.into();
        active.attempt_count = Set(attempt_count);
        active.status = Set(ItemStatus::FailedPermanent.as_str().to_string());
        active.last_error_kind = Set(Some(kind.as_str().to_string()));
        active.last_error_message = Set(Some(message.to_string()));
        active.next_eligible_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(&txn).await?;

        apply_counter_delta(&txn, job_id, CounterDelta::failed_permanent()).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// Finalize an item whose retries were cut off while still retryable
    /// (cancellation or a job-fatal abort). Counts toward failed_retryable.
    pub async fn finalize_retryable_cutoff(
        &self,
        attempt: Model,
        kind: SyncErrorKind,
        message: &str,
        attempt_count: i32,
    ) -> Result<Model, DbErr> {
        let job_id = attempt.job_id;
        let txn = self.db.begin().await?;

        let mut active: ActiveModel = attempt.into();
        active.attempt_count = Set(attempt_count);
        active.status = Set(ItemStatus::FailedRetryable.as_str().to_string());
        active.last_error_kind = Set(Some(kind.as_str().to_string()));
        active.last_error_message = Set(Some(message.to_string()));
        active.next_eligible_at = Set(None);
        active.updated_at = Set(Utc::now().fixed_offset());
        let updated = active.update(&txn).await?;

        apply_counter_delta(&txn, job_id, CounterDelta::failed_retryable()).await?;
        txn.commit().await?;
        Ok(updated)
    }

    /// All attempts for a job, ordered by source record id.
    pub async fn list_by_job(&self, job_id: Uuid) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::SourceRecordId)
            .all(&self.db)
            .await
    }

    /// Record ids already finalized for this job, skipped on crash-resume.
    pub async fn terminal_record_ids(&self, job_id: Uuid) -> Result<Vec<i64>, DbErr> {
        let rows = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::Status.is_in([
                ItemStatus::Succeeded.as_str(),
                ItemStatus::FailedPermanent.as_str(),
            ]))
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(|row| row.source_record_id).collect())
    }
}
