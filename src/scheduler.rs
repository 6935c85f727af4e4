//! Delta Scheduler
//!
//! Fallback sweep that catches changes whose webhook notifications were lost.
//! Each tick compares the source store's modification times against a durable
//! checkpoint and enqueues one scheduled delta job covering the gap. The
//! checkpoint only advances once a scheduled job completes, so a failed sweep
//! is retried over the same interval on the next tick.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::config::SchedulerConfig;
use crate::control::SyncControl;
use crate::models::sync_job::{JobScope, JobStatus, JobType, Model as JobModel};
use crate::repositories::checkpoint::SCHEDULED_STREAM;
use crate::repositories::{CheckpointRepository, SourceItemRepository, SyncJobRepository};

/// Periodic scheduler for delta sync jobs.
#[derive(Clone)]
pub struct DeltaScheduler {
    db: DatabaseConnection,
    control: Arc<dyn SyncControl>,
    config: SchedulerConfig,
}

impl DeltaScheduler {
    pub fn new(db: DatabaseConnection, control: Arc<dyn SyncControl>, config: SchedulerConfig) -> Self {
        Self {
            db,
            control,
            config,
        }
    }

    fn jobs(&self) -> SyncJobRepository {
        SyncJobRepository::new(self.db.clone())
    }

    fn checkpoints(&self) -> CheckpointRepository {
        CheckpointRepository::new(self.db.clone())
    }

    fn items(&self) -> SourceItemRepository {
        SourceItemRepository::new(self.db.clone())
    }

    /// Run the sweep loop until shutdown is signalled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(config = ?self.config, "starting delta scheduler");

        loop {
            if shutdown.is_cancelled() {
                info!("delta scheduler shutting down");
                break;
            }

            match self.tick().await {
                Ok(Some(job)) => info!(job_id = %job.id, "scheduled delta job enqueued"),
                Ok(None) => {}
                Err(err) => error!("scheduler tick failed: {:?}", err),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(std::time::Duration::from_secs(self.config.tick_interval_seconds)) => {}
            }
        }
    }

    /// One sweep: advance the checkpoint past completed jobs, then enqueue a
    /// delta job if anything changed since the watermark. Returns the job when
    /// one was enqueued.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> anyhow::Result<Option<JobModel>> {
        if !self.control.sync_enabled() {
            debug!("sync disabled; skipping sweep");
            return Ok(None);
        }

        self.advance_from_completed().await?;

        let jobs_repo = self.jobs();
        if jobs_repo.active_exists(JobType::Scheduled).await? {
            debug!("scheduled job already active; skipping sweep");
            return Ok(None);
        }

        let now = Utc::now();
        let checkpoints = self.checkpoints();
        let since = match checkpoints.get(SCHEDULED_STREAM).await? {
            Some(checkpoint) => checkpoint.last_synced_at.with_timezone(&Utc),
            None => {
                // First run: establish the watermark without a backfill sweep.
                // Historical data is synced through an explicit batch job.
                checkpoints.advance(SCHEDULED_STREAM, now).await?;
                info!(watermark = %now, "initialized scheduled sync checkpoint");
                return Ok(None);
            }
        };

        let items_repo = self.items();
        let modified = items_repo.count_modified_between(since, now).await?;
        if modified == 0 {
            debug!(since = %since, "no source changes since checkpoint");
            return Ok(None);
        }

        // Oversized gaps are chopped at the timestamp of the last record that
        // fits; the remainder is swept once this job completes.
        let until = if modified > self.config.max_delta_items {
            let boundary = items_repo
                .fetch_modified_between(since, now, self.config.max_delta_items - 1, 1)
                .await?;
            match boundary.first() {
                Some(row) => row.updated_at.with_timezone(&Utc),
                None => now,
            }
        } else {
            now
        };

        let job = jobs_repo
            .enqueue(JobType::Scheduled, &JobScope::Delta { since, until })
            .await?;
        counter!("scheduled_delta_jobs_total").increment(1);
        Ok(Some(job))
    }

    /// Advance the checkpoint to the covered interval of the most recent
    /// scheduled job, but only if that job completed.
    async fn advance_from_completed(&self) -> anyhow::Result<()> {
        let Some(latest) = self.jobs().find_latest_by_type(JobType::Scheduled).await? else {
            return Ok(());
        };
        if JobStatus::parse(&latest.status) != Some(JobStatus::Completed) {
            return Ok(());
        }
        let Ok(JobScope::Delta { until, .. }) =
            serde_json::from_value::<JobScope>(latest.scope.clone())
        else {
            return Ok(());
        };

        let checkpoints = self.checkpoints();
        let stale = match checkpoints.get(SCHEDULED_STREAM).await? {
            Some(checkpoint) => checkpoint.last_synced_at.with_timezone(&Utc) < until,
            None => true,
        };
        if stale {
            checkpoints.advance(SCHEDULED_STREAM, until).await?;
            info!(watermark = %until, "advanced scheduled sync checkpoint");
        }
        Ok(())
    }
}

/// Convenience for tests and handlers that need the covered interval of a
/// delta job.
pub fn delta_interval(scope: &JobScope) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
    match scope {
        JobScope::Delta { since, until } => Some((*since, *until)),
        _ => None,
    }
}
