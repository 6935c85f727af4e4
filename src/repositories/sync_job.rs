//! # SyncJob Repository
//!
//! Repository operations for the sync_jobs table: enqueueing, transactional
//! claiming, counter updates, and lifecycle transitions. Terminal states are
//! never overwritten here; callers observe the row they got back.

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::sync_job::{
    ActiveModel, Column, Entity, JobScope, JobStatus, JobType, Model,
};

/// Counter increments applied atomically to one job row.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterDelta {
    pub processed: i64,
    pub succeeded: i64,
    pub failed_retryable: i64,
    pub failed_permanent: i64,
}

impl CounterDelta {
    pub fn succeeded() -> Self {
        Self {
            processed: 1,
            succeeded: 1,
            ..Self::default()
        }
    }

    pub fn failed_permanent() -> Self {
        Self {
            processed: 1,
            failed_permanent: 1,
            ..Self::default()
        }
    }

    pub fn failed_retryable() -> Self {
        Self {
            processed: 1,
            failed_retryable: 1,
            ..Self::default()
        }
    }
}

/// Apply a counter delta to one job row as a single atomic update.
pub(crate) async fn apply_counter_delta<C: ConnectionTrait>(
    conn: &C,
    job_id: Uuid,
    delta: CounterDelta,
) -> Result<(), DbErr> {
    Entity::update_many()
        .col_expr(
            Column::ItemsProcessed,
            Expr::col(Column::ItemsProcessed).add(delta.processed),
        )
        .col_expr(
            Column::ItemsSucceeded,
            Expr::col(Column::ItemsSucceeded).add(delta.succeeded),
        )
        .col_expr(
            Column::ItemsFailedRetryable,
            Expr::col(Column::ItemsFailedRetryable).add(delta.failed_retryable),
        )
        .col_expr(
            Column::ItemsFailedPermanent,
            Expr::col(Column::ItemsFailedPermanent).add(delta.failed_permanent),
        )
        .col_expr(
            Column::UpdatedAt,
            Expr::value(Utc::now().fixed_offset()),
        )
        .filter(Column::Id.eq(job_id))
        .exec(conn)
        .await?;
    Ok(())
}

/// Repository for sync job database operations
pub struct SyncJobRepository {
    db: DatabaseConnection,
}

impl SyncJobRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Enqueue a new job in `pending`. Total item count is resolved when the
    /// orchestrator starts the job.
    pub async fn enqueue(&self, job_type: JobType, scope: &JobScope) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        let scope_json = serde_json::to_value(scope)
            .map_err(|e| DbErr::Custom(format!("failed to serialize job scope: {}", e)))?;

        let job = ActiveModel {
            id: Set(Uuid::new_v4()),
            job_type: Set(job_type.as_str().to_string()),
            status: Set(JobStatus::Pending.as_str().to_string()),
            scope: Set(scope_json),
            total_items: Set(0),
            items_processed: Set(0),
            items_succeeded: Set(0),
            items_failed_retryable: Set(0),
            items_failed_permanent: Set(0),
            cursor: Set(None),
            error: Set(None),
            cancel_requested: Set(false),
            created_at: Set(now),
            started_at: Set(None),
            completed_at: Set(None),
            updated_at: Set(now),
        };

        let result = job.insert(&self.db).await?;

        tracing::info!(
            job_id = %result.id,
            job_type = %result.job_type,
            "sync job enqueued"
        );

        Ok(result)
    }

    pub async fn find_by_id(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(job_id).one(&self.db).await
    }

    /// Claim up to `limit` pending jobs, oldest first. The select and the
    /// conditional update run in one transaction so two orchestrator loops
    /// never claim the same job.
    pub async fn claim_pending(&self, limit: u64) -> Result<Vec<Model>, DbErr> {
        let txn = self.db.begin().await?;

        let candidates = Entity::find()
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .order_by_asc(Column::CreatedAt)
            .limit(limit)
            .all(&txn)
            .await?;

        if candidates.is_empty() {
            txn.commit().await?;
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = candidates.iter().map(|job| job.id).collect();
        let now = Utc::now().fixed_offset();

        Entity::update_many()
            .col_expr(
                Column::Status,
                Expr::value(JobStatus::Running.as_str()),
            )
            .col_expr(Column::StartedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.is_in(ids.clone()))
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .exec(&txn)
            .await?;

        let claimed = Entity::find()
            .filter(Column::Id.is_in(ids))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&txn)
            .await?;

        txn.commit().await?;
        Ok(claimed)
    }

    /// Resolve the job's total item count once the scope has been measured.
    pub async fn set_total_items(&self, job_id: Uuid, total: i64) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::TotalItems, Expr::value(total))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Persist the batch resume cursor after a window fully drains.
    pub async fn set_cursor(&self, job_id: Uuid, cursor: JsonValue) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::Cursor, Expr::value(Some(cursor)))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Move a running job to a terminal state. No-op if the job is already
    /// terminal.
    pub async fn finish(
        &self,
        job_id: Uuid,
        status: JobStatus,
        error: Option<JsonValue>,
    ) -> Result<(), DbErr> {
        debug_assert!(status.is_terminal());
        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(status.as_str()))
            .col_expr(Column::Error, Expr::value(error))
            .col_expr(Column::CompletedAt, Expr::value(Some(now)))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.is_in([
                JobStatus::Pending.as_str(),
                JobStatus::Running.as_str(),
            ]))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Apply counter increments atomically.
    pub async fn increment_counters(&self, job_id: Uuid, delta: CounterDelta) -> Result<(), DbErr> {
        apply_counter_delta(&self.db, job_id, delta).await
    }

    /// Request cancellation. Pending jobs transition to `cancelled`
    /// immediately; running jobs get the flag and drain on the next dequeue.
    /// Idempotent for jobs already terminal.
    pub async fn request_cancel(&self, job_id: Uuid) -> Result<Option<Model>, DbErr> {
        let Some(job) = Entity::find_by_id(job_id).one(&self.db).await? else {
            return Ok(None);
        };

        let status = JobStatus::parse(&job.status);
        match status {
            Some(s) if s.is_terminal() => Ok(Some(job)),
            Some(JobStatus::Pending) => {
                let now = Utc::now().fixed_offset();
                let mut active: ActiveModel = job.into();
                active.status = Set(JobStatus::Cancelled.as_str().to_string());
                active.cancel_requested = Set(true);
                active.completed_at = Set(Some(now));
                active.updated_at = Set(now);
                Ok(Some(active.update(&self.db).await?))
            }
            _ => {
                let mut active: ActiveModel = job.into();
                active.cancel_requested = Set(true);
                active.updated_at = Set(Utc::now().fixed_offset());
                Ok(Some(active.update(&self.db).await?))
            }
        }
    }

    /// Whether cancellation has been requested for the job.
    pub async fn cancel_requested(&self, job_id: Uuid) -> Result<bool, DbErr> {
        Ok(Entity::find_by_id(job_id)
            .one(&self.db)
            .await?
            .map(|job| job.cancel_requested)
            .unwrap_or(false))
    }

    /// Jobs left `running` by a previous process, for crash recovery.
    pub async fn list_running(&self) -> Result<Vec<Model>, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .order_by_asc(Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Return an interrupted job to the queue for re-execution.
    pub async fn requeue(&self, job_id: Uuid) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Pending.as_str()))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(job_id))
            .filter(Column::Status.eq(JobStatus::Running.as_str()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Most recently created job of the given type, if any.
    pub async fn find_latest_by_type(&self, job_type: JobType) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::JobType.eq(job_type.as_str()))
            .order_by_desc(Column::CreatedAt)
            .one(&self.db)
            .await
    }

    /// Whether any job of this type is pending or running.
    pub async fn active_exists(&self, job_type: JobType) -> Result<bool, DbErr> {
        let count = Entity::find()
            .filter(Column::JobType.eq(job_type.as_str()))
            .filter(Column::Status.is_in([
                JobStatus::Pending.as_str(),
                JobStatus::Running.as_str(),
            ]))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    /// Active real_time job scoped to the given record, used to coalesce
    /// duplicate webhook notifications.
    pub async fn active_real_time_for_record(
        &self,
        record_id: i64,
    ) -> Result<Option<Model>, DbErr> {
        let candidates = Entity::find()
            .filter(Column::JobType.eq(JobType::RealTime.as_str()))
            .filter(Column::Status.is_in([
                JobStatus::Pending.as_str(),
                JobStatus::Running.as_str(),
            ]))
            .all(&self.db)
            .await?;

        Ok(candidates.into_iter().find(|job| {
            matches!(
                serde_json::from_value::<JobScope>(job.scope.clone()),
                Ok(JobScope::Record { record_id: id }) if id == record_id
            )
        }))
    }

    /// Number of jobs waiting to be claimed, for diagnostics.
    pub async fn queue_depth(&self) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::Status.eq(JobStatus::Pending.as_str()))
            .count(&self.db)
            .await
    }
}
