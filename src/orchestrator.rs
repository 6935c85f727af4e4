//! Sync Orchestrator
//!
//! Background engine that claims pending sync jobs and drives each one to a
//! terminal state: resolving the job's scope into windows, pulling source
//! snapshots, mapping them, gating remote calls through the throttle, and
//! persisting every item outcome together with the job counters.
//!
//! Item-scoped failures never fail the job; they accumulate in the counters
//! while the job proceeds to `completed`. Only job-scoped conditions (auth
//! rejection, source store unavailability, job store write failure) move a
//! job to `failed`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use rand::{Rng, thread_rng};
use sea_orm::DatabaseConnection;
use serde_json::json;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{OrchestratorConfig, RetryPolicyConfig};
use crate::control::{CancelRegistry, SyncControl};
use crate::mapper;
use crate::models::item;
use crate::models::sync_item_attempt::{ItemStatus, Model as AttemptModel};
use crate::models::sync_job::{
    IterationStrategy, JobScope, JobStatus, Model as JobModel,
};
use crate::planner::BatchPlanner;
use crate::remote::throttle::Throttle;
use crate::remote::{RecordClient, RemoteError, SyncErrorKind};
use crate::repositories::source_item::BatchBounds;
use crate::repositories::{
    SourceItemRepository, SyncItemAttemptRepository, SyncJobRepository, VendorMappingRepository,
};
use crate::singleflight::SingleFlight;

/// Internal failures (unexpected infrastructure errors around an item) are
/// retried once, then converted to permanent.
const INTERNAL_MAX_FAILURES: u32 = 2;

/// Poll interval while waiting for a single-flight permit held elsewhere.
const SINGLE_FLIGHT_POLL: Duration = Duration::from_millis(100);

/// How one item's processing ended, as seen by the job loop.
enum ItemOutcome {
    /// Final disposition recorded (success or permanent failure)
    Done,
    /// Cancellation observed; stop dequeuing
    Cancelled,
    /// Job-fatal failure; no subsequent call can succeed
    JobFatal { kind: SyncErrorKind, message: String },
}

/// How a whole job ended.
enum JobEnd {
    Completed,
    Cancelled,
    Fatal { kind: SyncErrorKind, message: String },
}

/// A job's scope resolved against the source store.
enum ScopePlan {
    Single {
        record_id: i64,
    },
    Batch {
        strategy: IterationStrategy,
        bounds: BatchBounds,
    },
    Delta {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
}

/// Classified failure of one processing phase for one item.
struct ItemFailure {
    kind: SyncErrorKind,
    message: String,
    retry_after: Option<u64>,
}

impl ItemFailure {
    fn from_remote(err: &RemoteError) -> Self {
        Self {
            kind: err.kind(),
            message: err.message().to_string(),
            retry_after: match err {
                RemoteError::RateLimited { retry_after, .. } => *retry_after,
                _ => None,
            },
        }
    }

    fn internal(message: String) -> Self {
        Self {
            kind: SyncErrorKind::Internal,
            message,
            retry_after: None,
        }
    }
}

/// Background orchestrator. Cheap to clone; all fields are shared handles.
#[derive(Clone)]
pub struct SyncOrchestrator {
    db: DatabaseConnection,
    client: Arc<dyn RecordClient>,
    throttle: Arc<Throttle>,
    singleflight: Arc<SingleFlight>,
    control: Arc<dyn SyncControl>,
    cancels: Arc<CancelRegistry>,
    config: OrchestratorConfig,
    retry: RetryPolicyConfig,
}

impl SyncOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabaseConnection,
        client: Arc<dyn RecordClient>,
        throttle: Arc<Throttle>,
        singleflight: Arc<SingleFlight>,
        control: Arc<dyn SyncControl>,
        cancels: Arc<CancelRegistry>,
        config: OrchestratorConfig,
        retry: RetryPolicyConfig,
    ) -> Self {
        Self {
            db,
            client,
            throttle,
            singleflight,
            control,
            cancels,
            config,
            retry,
        }
    }

    fn jobs(&self) -> SyncJobRepository {
        SyncJobRepository::new(self.db.clone())
    }

    fn attempts(&self) -> SyncItemAttemptRepository {
        SyncItemAttemptRepository::new(self.db.clone())
    }

    fn items(&self) -> SourceItemRepository {
        SourceItemRepository::new(self.db.clone())
    }

    fn vendors(&self) -> VendorMappingRepository {
        VendorMappingRepository::new(self.db.clone())
    }

    /// Run the claim loop until shutdown is signalled.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(config = ?self.config, "starting sync orchestrator");

        if let Err(err) = self.recover_interrupted().await {
            error!("failed to recover interrupted jobs: {:?}", err);
        }

        loop {
            if shutdown.is_cancelled() {
                info!("sync orchestrator shutting down");
                break;
            }

            match self.tick().await {
                Ok(count) if count > 0 => debug!("executed {} sync jobs", count),
                Ok(_) => {}
                Err(err) => error!("orchestrator tick failed: {:?}", err),
            }

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = sleep(Duration::from_millis(self.config.tick_ms)) => {}
            }
        }
    }

    /// Claim pending jobs and run them with bounded concurrency. Returns the
    /// number of jobs executed.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> anyhow::Result<usize> {
        if !self.control.sync_enabled() {
            debug!("sync disabled; skipping claim");
            return Ok(0);
        }

        let jobs = self
            .jobs()
            .claim_pending(self.config.claim_batch)
            .await
            .context("failed to claim pending jobs")?;
        if jobs.is_empty() {
            return Ok(0);
        }

        let count = jobs.len();
        counter!("sync_jobs_claimed_total").increment(count as u64);
        info!("claimed {} jobs for execution", count);

        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.config.job_concurrency));
        let mut handles = Vec::with_capacity(count);
        for job in jobs {
            let orchestrator = self.clone();
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .context("failed to acquire job permit")?;
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                orchestrator.run_job(job).await;
            }));
        }

        for handle in handles {
            let _ = handle.await;
        }

        Ok(count)
    }

    /// Re-dispatch jobs left `running` by a previous process. A batch job
    /// interrupted mid-window (progress recorded but no drained-window
    /// cursor) has an ambiguous boundary and is failed rather than resumed.
    pub async fn recover_interrupted(&self) -> anyhow::Result<()> {
        let jobs_repo = self.jobs();
        let interrupted = jobs_repo.list_running().await?;

        for job in interrupted {
            let resumable = match serde_json::from_value::<JobScope>(job.scope.clone()) {
                Ok(JobScope::Record { .. }) | Ok(JobScope::Delta { .. }) => true,
                Ok(JobScope::Batch { .. }) => job.cursor.is_some() || job.items_processed == 0,
                Err(_) => false,
            };

            if resumable {
                warn!(job_id = %job.id, "re-queueing job interrupted by restart");
                jobs_repo.requeue(job.id).await?;
            } else {
                warn!(job_id = %job.id, "failing job with ambiguous resume point");
                jobs_repo
                    .finish(
                        job.id,
                        JobStatus::Failed,
                        Some(json!({
                            "kind": "internal",
                            "message": "interrupted mid-window with no resume cursor",
                        })),
                    )
                    .await?;
            }
        }

        Ok(())
    }

    /// Execute one claimed job to a terminal state.
    #[instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    async fn run_job(&self, job: JobModel) {
        let job_id = job.id;
        let started = std::time::Instant::now();
        let token = self.cancels.register(job_id);

        let end = self.execute_job(&job, &token).await;
        self.cancels.deregister(job_id);

        let jobs_repo = self.jobs();
        let result = match end {
            Ok(JobEnd::Completed) => {
                info!(job_id = %job_id, "sync job completed");
                jobs_repo.finish(job_id, JobStatus::Completed, None).await
            }
            Ok(JobEnd::Cancelled) => {
                info!(job_id = %job_id, "sync job cancelled");
                jobs_repo.finish(job_id, JobStatus::Cancelled, None).await
            }
            Ok(JobEnd::Fatal { kind, message }) => {
                error!(job_id = %job_id, kind = kind.as_str(), "sync job failed: {}", message);
                jobs_repo
                    .finish(
                        job_id,
                        JobStatus::Failed,
                        Some(json!({ "kind": kind.as_str(), "message": message })),
                    )
                    .await
            }
            Err(err) => {
                error!(job_id = %job_id, "sync job aborted: {:?}", err);
                jobs_repo
                    .finish(
                        job_id,
                        JobStatus::Failed,
                        Some(json!({ "kind": "internal", "message": err.to_string() })),
                    )
                    .await
            }
        };

        if let Err(err) = result {
            error!(job_id = %job_id, "failed to persist terminal job state: {}", err);
        }

        histogram!("sync_job_duration_seconds").record(started.elapsed().as_secs_f64());
    }

    async fn execute_job(
        &self,
        job: &JobModel,
        token: &CancellationToken,
    ) -> anyhow::Result<JobEnd> {
        let scope: JobScope = serde_json::from_value(job.scope.clone())
            .context("job carries an unreadable scope descriptor")?;

        let (plan, total) = self.resolve_plan(&scope).await?;
        let jobs_repo = self.jobs();
        jobs_repo.set_total_items(job.id, total as i64).await?;

        // Records already finalized by an interrupted run are skipped, their
        // counters were committed with their outcomes.
        let already_done: HashSet<i64> = self
            .attempts()
            .terminal_record_ids(job.id)
            .await?
            .into_iter()
            .collect();

        let resume_offset = job
            .cursor
            .as_ref()
            .and_then(|c| c.get("next_offset"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let planner = BatchPlanner::resume(total, self.config.max_window_size, resume_offset)
            .context("invalid window ceiling")?;

        // Tracks how far the scope has actually been drained; if records
        // vanished between counting and fetching, total is reconciled down.
        let mut drained = resume_offset;

        for window in planner {
            let rows = self.fetch_window(&plan, window.offset, window.size).await?;
            let fetched = rows.len() as u64;

            for row in rows {
                if token.is_cancelled() || jobs_repo.cancel_requested(job.id).await? {
                    return Ok(JobEnd::Cancelled);
                }
                if already_done.contains(&row.id) {
                    continue;
                }

                match self.process_item(job.id, row, token).await? {
                    ItemOutcome::Done => {}
                    ItemOutcome::Cancelled => return Ok(JobEnd::Cancelled),
                    ItemOutcome::JobFatal { kind, message } => {
                        return Ok(JobEnd::Fatal { kind, message });
                    }
                }
            }

            drained = window.offset + fetched;
            jobs_repo
                .set_cursor(job.id, json!({ "next_offset": drained }))
                .await?;

            if fetched < window.size {
                // Scope shrank underneath us; nothing further to fetch
                break;
            }
        }

        if drained != total {
            jobs_repo.set_total_items(job.id, drained as i64).await?;
        }

        Ok(JobEnd::Completed)
    }

    /// Resolve a scope into a fetch plan plus the total item count, capped
    /// for batch scopes by the requested max_items.
    async fn resolve_plan(&self, scope: &JobScope) -> anyhow::Result<(ScopePlan, u64)> {
        let items_repo = self.items();
        match scope {
            JobScope::Record { record_id } => {
                let total = match items_repo.find_by_id(*record_id).await? {
                    Some(_) => 1,
                    None => {
                        warn!(record_id, "scoped record no longer exists");
                        0
                    }
                };
                Ok((
                    ScopePlan::Single {
                        record_id: *record_id,
                    },
                    total,
                ))
            }
            JobScope::Batch {
                strategy,
                start_id,
                end_id,
                start_name,
                end_name,
                max_items,
            } => {
                let bounds = BatchBounds {
                    start_id: *start_id,
                    end_id: *end_id,
                    start_name: start_name.clone(),
                    end_name: end_name.clone(),
                };
                let count = items_repo
                    .count_in_batch(*strategy, &bounds)
                    .await
                    .context("source store unavailable at job start")?;
                Ok((
                    ScopePlan::Batch {
                        strategy: *strategy,
                        bounds,
                    },
                    count.min(*max_items),
                ))
            }
            JobScope::Delta { since, until } => {
                let count = items_repo
                    .count_modified_between(*since, *until)
                    .await
                    .context("source store unavailable at job start")?;
                Ok((
                    ScopePlan::Delta {
                        since: *since,
                        until: *until,
                    },
                    count,
                ))
            }
        }
    }

    async fn fetch_window(
        &self,
        plan: &ScopePlan,
        offset: u64,
        limit: u64,
    ) -> anyhow::Result<Vec<item::Model>> {
        let items_repo = self.items();
        let rows = match plan {
            ScopePlan::Single { record_id } => items_repo
                .find_by_id(*record_id)
                .await?
                .into_iter()
                .collect(),
            ScopePlan::Batch { strategy, bounds } => items_repo
                .fetch_batch_window(*strategy, bounds, offset, limit)
                .await
                .context("source store unavailable while fetching window")?,
            ScopePlan::Delta { since, until } => items_repo
                .fetch_modified_between(*since, *until, offset, limit)
                .await
                .context("source store unavailable while fetching window")?,
        };
        Ok(rows)
    }

    /// Drive one source record to a final disposition.
    async fn process_item(
        &self,
        job_id: uuid::Uuid,
        item: item::Model,
        token: &CancellationToken,
    ) -> anyhow::Result<ItemOutcome> {
        let record_id = item.id;

        // Single-flight: wait (never race, never drop) while another attempt
        // holds this record.
        let _permit = loop {
            if let Some(permit) = self.singleflight.try_acquire(record_id) {
                break permit;
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(ItemOutcome::Cancelled),
                _ = sleep(SINGLE_FLIGHT_POLL) => {}
            }
        };

        let attempts_repo = self.attempts();
        let mut attempt = attempts_repo.get_or_create(job_id, record_id).await?;
        if matches!(ItemStatus::parse(&attempt.status), Some(s) if s.is_terminal()) {
            return Ok(ItemOutcome::Done);
        }

        // Crash-resume: honor a persisted backoff deadline before retrying.
        if let Some(eligible) = attempt.next_eligible_at {
            let now = Utc::now().fixed_offset();
            if eligible > now {
                let wait = (eligible - now)
                    .to_std()
                    .unwrap_or(Duration::from_secs(0));
                tokio::select! {
                    _ = token.cancelled() => {
                        return self.cutoff_or_skip(attempt).await;
                    }
                    _ = sleep(wait) => {}
                }
            }
        }

        let known_external = item.external_id.clone();
        let mut attempt_count = attempt.attempt_count;
        let mut internal_failures = 0u32;

        loop {
            let failure = match self.attempt_once(&item, known_external.as_deref(), &mut attempt_count, token).await? {
                Ok(outcome) => {
                    attempt = attempts_repo
                        .finalize_success(attempt, &outcome.external_id, attempt_count)
                        .await?;
                    if outcome.created {
                        self.items()
                            .set_external_id(record_id, &outcome.external_id)
                            .await?;
                    }
                    counter!("sync_items_succeeded_total").increment(1);
                    debug!(record_id, external_id = %attempt.external_record_id.as_deref().unwrap_or(""), "item synced");
                    return Ok(ItemOutcome::Done);
                }
                Err(ItemPhase::Cancelled) => {
                    return self.cutoff_or_skip(attempt).await;
                }
                Err(ItemPhase::Failed(failure)) => failure,
            };

            if let Some(cooldown) = failure.retry_after {
                self.throttle.penalize(Duration::from_secs(cooldown)).await;
            } else if failure.kind == SyncErrorKind::RateLimited {
                self.throttle
                    .penalize(Duration::from_secs(self.retry.base_seconds))
                    .await;
            }

            if failure.kind == SyncErrorKind::Auth {
                // Job-fatal: record this item as cut off, abort the job
                attempts_repo
                    .finalize_retryable_cutoff(
                        attempt,
                        failure.kind,
                        &failure.message,
                        attempt_count,
                    )
                    .await?;
                return Ok(ItemOutcome::JobFatal {
                    kind: failure.kind,
                    message: failure.message,
                });
            }

            if failure.kind == SyncErrorKind::Internal {
                internal_failures += 1;
            }

            let retryable = match failure.kind {
                SyncErrorKind::Transient | SyncErrorKind::RateLimited => {
                    attempt_count < self.retry.max_attempts as i32
                }
                SyncErrorKind::Internal => internal_failures < INTERNAL_MAX_FAILURES,
                _ => false,
            };

            if !retryable {
                attempts_repo
                    .finalize_permanent(attempt, failure.kind, &failure.message, attempt_count)
                    .await?;
                counter!("sync_items_failed_permanent_total").increment(1);
                warn!(
                    record_id,
                    kind = failure.kind.as_str(),
                    "item failed permanently: {}",
                    failure.message
                );
                return Ok(ItemOutcome::Done);
            }

            // Explicit retry state: the next-eligible time survives a crash.
            let backoff = self.calculate_backoff(attempt_count.max(1), failure.retry_after);
            let eligible = Utc::now().fixed_offset()
                + chrono::Duration::milliseconds(backoff.as_millis() as i64);
            attempt = attempts_repo
                .record_retryable_failure(
                    attempt,
                    failure.kind,
                    &failure.message,
                    attempt_count,
                    eligible,
                )
                .await?;
            counter!("sync_items_retried_total").increment(1);

            tokio::select! {
                _ = token.cancelled() => {
                    return self.cutoff_or_skip(attempt).await;
                }
                _ = sleep(backoff) => {}
            }
        }
    }

    /// One pass through the pre-call and call phases for an item.
    async fn attempt_once(
        &self,
        item: &item::Model,
        known_external: Option<&str>,
        attempt_count: &mut i32,
        token: &CancellationToken,
    ) -> anyhow::Result<Result<crate::remote::UpsertOutcome, ItemPhase>> {
        // Vendor lookup failures are infrastructure, not data: internal kind
        let vendor = match self.vendors().find_by_source_id(item.vendor_id).await {
            Ok(vendor) => vendor,
            Err(err) => {
                return Ok(Err(ItemPhase::Failed(ItemFailure::internal(format!(
                    "vendor mapping lookup failed: {}",
                    err
                )))));
            }
        };

        let mapped = match mapper::map_item(item, vendor.as_ref()) {
            Ok(mapped) => mapped,
            Err(err) => {
                let kind = if err.is_unmapped_reference() {
                    SyncErrorKind::UnmappedReference
                } else {
                    SyncErrorKind::Validation
                };
                // No remote call is made for unmappable records
                return Ok(Err(ItemPhase::Failed(ItemFailure {
                    kind,
                    message: err.to_string(),
                    retry_after: None,
                })));
            }
        };

        tokio::select! {
            _ = token.cancelled() => return Ok(Err(ItemPhase::Cancelled)),
            _ = self.throttle.acquire() => {}
        }

        *attempt_count += 1;
        match self.client.upsert_record(&mapped, known_external).await {
            Ok(outcome) => Ok(Ok(outcome)),
            Err(err) => Ok(Err(ItemPhase::Failed(ItemFailure::from_remote(&err)))),
        }
    }

    /// Cancellation observed mid-item: an item that already consumed remote
    /// attempts is finalized as cut off (counts toward failed_retryable); one
    /// that never reached the remote endpoint stays unprocessed.
    async fn cutoff_or_skip(&self, attempt: AttemptModel) -> anyhow::Result<ItemOutcome> {
        if attempt.attempt_count > 0 {
            let kind = attempt
                .last_error_kind
                .as_deref()
                .and_then(|k| serde_json::from_value(json!(k)).ok())
                .unwrap_or(SyncErrorKind::Transient);
            let message = attempt
                .last_error_message
                .clone()
                .unwrap_or_else(|| "retries cut off by cancellation".to_string());
            let count = attempt.attempt_count;
            self.attempts()
                .finalize_retryable_cutoff(attempt, kind, &message, count)
                .await?;
        }
        Ok(ItemOutcome::Cancelled)
    }

    /// Exponential backoff with jitter, bounded by the configured cap and
    /// stretched to honor an explicit Retry-After.
    fn calculate_backoff(&self, attempts_completed: i32, retry_after: Option<u64>) -> Duration {
        let base = self.retry.base_seconds as f64;
        let max = self.retry.max_seconds as f64;

        let mut backoff = (base * 2_f64.powi(attempts_completed - 1)).min(max);
        if let Some(retry_after) = retry_after {
            backoff = backoff.max(retry_after as f64);
        }

        let jitter_span = self.retry.jitter_factor * backoff;
        let jitter = if jitter_span > 0.0 {
            thread_rng().gen_range(0.0..jitter_span)
        } else {
            0.0
        };

        Duration::from_secs_f64(backoff + jitter)
    }
}

/// Outcome of one attempt phase that did not succeed.
enum ItemPhase {
    Failed(ItemFailure),
    Cancelled,
}
