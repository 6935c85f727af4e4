//! End-to-end tests for the sync engine: jobs are enqueued through the
//! repository, claimed and driven by the orchestrator against a scripted
//! remote client, and the terminal job state plus per-item dispositions are
//! asserted against the database.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};

use opms_sync::config::{AppConfig, OrchestratorConfig, RetryPolicyConfig};
use opms_sync::control::{CancelRegistry, ConfigSyncControl, SyncControl};
use opms_sync::mapper::MappedRecord;
use opms_sync::migration::{Migrator, MigratorTrait};
use opms_sync::models::sync_job::{IterationStrategy, JobScope, JobStatus, JobType};
use opms_sync::models::{item, vendor_mapping};
use opms_sync::orchestrator::SyncOrchestrator;
use opms_sync::remote::throttle::Throttle;
use opms_sync::remote::{RecordClient, RemoteError, UpsertOutcome};
use opms_sync::repositories::{
    SyncItemAttemptRepository, SyncJobRepository,
};
use opms_sync::singleflight::SingleFlight;

/// Remote client driven by a per-record script of failures; once the script
/// for a record is exhausted, calls succeed.
#[derive(Default)]
struct ScriptedClient {
    failures: Mutex<HashMap<String, Vec<RemoteError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedClient {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn fail_next(&self, item_handle: &str, errors: Vec<RemoteError>) {
        self.failures
            .lock()
            .unwrap()
            .insert(item_handle.to_string(), errors);
    }

    fn calls_for(&self, item_handle: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.as_str() == item_handle)
            .count()
    }

    fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl RecordClient for ScriptedClient {
    async fn upsert_record(
        &self,
        record: &MappedRecord,
        external_id: Option<&str>,
    ) -> Result<UpsertOutcome, RemoteError> {
        self.calls.lock().unwrap().push(record.item_id.clone());

        let scripted = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(&record.item_id) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };
        if let Some(err) = scripted {
            return Err(err);
        }

        Ok(UpsertOutcome {
            external_id: external_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("NS-{}", record.item_id)),
            created: external_id.is_none(),
        })
    }
}

/// Remote client that requests cancellation of a job from inside one of its
/// own upserts, the way an operator hitting the cancel endpoint mid-drain
/// would. Calls themselves always succeed.
struct CancelAfterClient {
    db: DatabaseConnection,
    job_id: uuid::Uuid,
    cancel_on_call: usize,
    calls: Mutex<usize>,
}

#[async_trait]
impl RecordClient for CancelAfterClient {
    async fn upsert_record(
        &self,
        record: &MappedRecord,
        external_id: Option<&str>,
    ) -> Result<UpsertOutcome, RemoteError> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if call == self.cancel_on_call {
            SyncJobRepository::new(self.db.clone())
                .request_cancel(self.job_id)
                .await
                .expect("request cancel");
        }

        Ok(UpsertOutcome {
            external_id: external_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("NS-{}", record.item_id)),
            created: external_id.is_none(),
        })
    }
}

struct Harness {
    db: DatabaseConnection,
    client: Arc<ScriptedClient>,
    orchestrator: SyncOrchestrator,
}

async fn setup() -> Harness {
    setup_with(
        OrchestratorConfig {
            tick_ms: 10,
            claim_batch: 5,
            job_concurrency: 2,
            max_window_size: 10,
        },
        RetryPolicyConfig {
            max_attempts: 3,
            base_seconds: 0,
            max_seconds: 0,
            jitter_factor: 0.0,
        },
    )
    .await
}

async fn setup_with(orchestrator: OrchestratorConfig, retry: RetryPolicyConfig) -> Harness {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");

    let client = ScriptedClient::new();
    let control: Arc<dyn SyncControl> = Arc::new(ConfigSyncControl::new(&AppConfig::default()));
    let engine = SyncOrchestrator::new(
        db.clone(),
        client.clone(),
        Arc::new(Throttle::new(Duration::from_millis(0))),
        SingleFlight::new(),
        control,
        Arc::new(CancelRegistry::new()),
        orchestrator,
        retry,
    );

    Harness {
        db,
        client,
        orchestrator: engine,
    }
}

async fn seed_vendor(db: &DatabaseConnection, vendor_id: i64) {
    vendor_mapping::ActiveModel {
        source_vendor_id: Set(vendor_id),
        external_vendor_id: Set(format!("{}", 9000 + vendor_id)),
        external_vendor_name: Set(format!("Vendor {}", vendor_id)),
        created_at: Set(Utc::now().fixed_offset()),
    }
    .insert(db)
    .await
    .expect("insert vendor mapping");
}

async fn seed_item(db: &DatabaseConnection, id: i64, vendor_id: i64) {
    let now = Utc::now().fixed_offset();
    item::ActiveModel {
        id: Set(id),
        name: Set(format!("Item {}", id)),
        vendor_id: Set(vendor_id),
        categories: Set(serde_json::json!(["Hardware", "Fasteners"])),
        is_active: Set(true),
        is_taxable: Set(false),
        base_price: Set(Some(4.5)),
        parent_id: Set(None),
        external_id: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("insert item");
}

/// processed must equal the sum of the three outcome counters and never
/// exceed total.
fn assert_counters_consistent(job: &opms_sync::models::sync_job::Model) {
    assert_eq!(
        job.items_processed,
        job.items_succeeded + job.items_failed_retryable + job.items_failed_permanent,
        "counter invariant violated for job {}",
        job.id
    );
    assert!(job.items_processed <= job.total_items);
}

async fn run_to_terminal(harness: &Harness, job_id: uuid::Uuid) -> opms_sync::models::sync_job::Model {
    harness.orchestrator.tick().await.expect("tick");
    let job = SyncJobRepository::new(harness.db.clone())
        .find_by_id(job_id)
        .await
        .expect("find job")
        .expect("job row");
    assert!(
        JobStatus::parse(&job.status).map(|s| s.is_terminal()).unwrap_or(false),
        "job did not reach a terminal state: {}",
        job.status
    );
    job
}

#[tokio::test]
async fn single_record_job_completes_and_stores_external_id() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 42, 1).await;

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 42 })
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 1);
    assert_eq!(job.items_succeeded, 1);
    assert_counters_consistent(&job);

    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].status, "success");
    assert_eq!(attempts[0].attempt_count, 1);
    assert_eq!(attempts[0].external_record_id.as_deref(), Some("NS-OPMS-42"));

    // The created identity is written back to the source record
    let item = opms_sync::repositories::SourceItemRepository::new(harness.db.clone())
        .find_by_id(42)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(item.external_id.as_deref(), Some("NS-OPMS-42"));
}

#[tokio::test]
async fn transient_failures_are_retried_until_success() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 7, 1).await;
    harness.client.fail_next(
        "OPMS-7",
        vec![
            RemoteError::Transient {
                message: "timeout".into(),
            },
            RemoteError::Transient {
                message: "connection reset".into(),
            },
        ],
    );

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 7 })
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.items_succeeded, 1);

    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    // Two failures plus the final successful call
    assert_eq!(attempts[0].attempt_count, 3);
    assert_eq!(attempts[0].status, "success");
    assert_eq!(harness.client.calls_for("OPMS-7"), 3);
}

#[tokio::test]
async fn exhausted_retries_become_permanent_failure() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 7, 1).await;
    harness.client.fail_next(
        "OPMS-7",
        vec![
            RemoteError::Transient {
                message: "timeout".into(),
            };
            5
        ],
    );

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 7 })
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    // Item failures never fail the job
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.items_failed_permanent, 1);
    assert_counters_consistent(&job);

    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    assert_eq!(attempts[0].status, "failed_permanent");
    assert_eq!(attempts[0].attempt_count, 3);
    assert_eq!(attempts[0].last_error_kind.as_deref(), Some("transient"));
    assert_eq!(harness.client.calls_for("OPMS-7"), 3);
}

#[tokio::test]
async fn validation_rejection_preserves_message_and_spares_the_job() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 1, 1).await;
    seed_item(&harness.db, 2, 1).await;
    harness.client.fail_next(
        "OPMS-1",
        vec![RemoteError::Validation {
            message: "displayname exceeds maximum length".into(),
        }],
    );

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Batch,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: Some(1),
                end_id: Some(2),
                start_name: None,
                end_name: None,
                max_items: 100,
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 2);
    assert_eq!(job.items_succeeded, 1);
    assert_eq!(job.items_failed_permanent, 1);
    assert_counters_consistent(&job);

    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    let failed = attempts
        .iter()
        .find(|a| a.source_record_id == 1)
        .unwrap();
    assert_eq!(failed.status, "failed_permanent");
    assert_eq!(failed.last_error_kind.as_deref(), Some("validation"));
    assert_eq!(
        failed.last_error_message.as_deref(),
        Some("displayname exceeds maximum length")
    );
    // No retry for validation failures
    assert_eq!(harness.client.calls_for("OPMS-1"), 1);
}

#[tokio::test]
async fn unmapped_vendor_fails_without_a_remote_call() {
    let harness = setup().await;
    // No vendor mapping seeded for vendor 99
    seed_item(&harness.db, 5, 99).await;

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 5 })
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.items_failed_permanent, 1);

    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    assert_eq!(attempts[0].status, "failed_permanent");
    assert_eq!(
        attempts[0].last_error_kind.as_deref(),
        Some("unmapped_reference")
    );
    assert_eq!(attempts[0].attempt_count, 0);
    assert_eq!(harness.client.total_calls(), 0);
}

#[tokio::test]
async fn auth_failure_aborts_the_job_and_skips_remaining_items() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    for id in 1..=5 {
        seed_item(&harness.db, id, 1).await;
    }
    harness.client.fail_next(
        "OPMS-3",
        vec![RemoteError::Auth {
            message: "token expired".into(),
        }],
    );

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Batch,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: Some(1),
                end_id: Some(5),
                start_name: None,
                end_name: None,
                max_items: 100,
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Failed.as_str());
    let error = job.error.clone().expect("job error recorded");
    assert_eq!(error["kind"], "auth");
    assert_eq!(error["message"], "token expired");
    assert_counters_consistent(&job);

    // Items 1-2 succeeded, item 3 was cut off, items 4-5 were never dequeued
    assert_eq!(job.items_succeeded, 2);
    assert_eq!(job.items_failed_retryable, 1);
    let attempts = SyncItemAttemptRepository::new(harness.db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert_eq!(harness.client.calls_for("OPMS-4"), 0);
    assert_eq!(harness.client.calls_for("OPMS-5"), 0);
}

#[tokio::test]
async fn batch_job_drains_across_multiple_windows() {
    let harness = setup().await; // window ceiling of 10
    seed_vendor(&harness.db, 1).await;
    for id in 1..=25 {
        seed_item(&harness.db, id, 1).await;
    }

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Initial,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: None,
                end_id: None,
                start_name: None,
                end_name: None,
                max_items: 1000,
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 25);
    assert_eq!(job.items_succeeded, 25);
    assert_counters_consistent(&job);
    assert_eq!(harness.client.total_calls(), 25);

    // Cursor records the final drained window boundary
    let cursor = job.cursor.expect("cursor persisted");
    assert_eq!(cursor["next_offset"], 25);
}

#[tokio::test]
async fn batch_scope_respects_max_items_cap() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    for id in 1..=25 {
        seed_item(&harness.db, id, 1).await;
    }

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Batch,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: None,
                end_id: None,
                start_name: None,
                end_name: None,
                max_items: 12,
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 12);
    assert_eq!(job.items_succeeded, 12);
    assert_eq!(harness.client.total_calls(), 12);
}

#[tokio::test]
async fn delta_job_covers_only_the_modified_interval() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;

    let now = Utc::now();
    let old = now - ChronoDuration::hours(3);
    let recent = now - ChronoDuration::minutes(10);

    for (id, ts) in [(1, old), (2, recent), (3, recent)] {
        item::ActiveModel {
            id: Set(id),
            name: Set(format!("Item {}", id)),
            vendor_id: Set(1),
            categories: Set(serde_json::json!(["Hardware"])),
            is_active: Set(true),
            is_taxable: Set(false),
            base_price: Set(Some(1.0)),
            parent_id: Set(None),
            external_id: Set(None),
            created_at: Set(ts.fixed_offset()),
            updated_at: Set(ts.fixed_offset()),
        }
        .insert(&harness.db)
        .await
        .unwrap();
    }

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Scheduled,
            &JobScope::Delta {
                since: now - ChronoDuration::hours(1),
                until: now,
            },
        )
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 2);
    assert_eq!(job.items_succeeded, 2);
    assert_eq!(harness.client.calls_for("OPMS-1"), 0);
}

#[tokio::test]
async fn resume_skips_items_already_finalized() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    for id in 1..=3 {
        seed_item(&harness.db, id, 1).await;
    }

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(
            JobType::Batch,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: Some(1),
                end_id: Some(3),
                start_name: None,
                end_name: None,
                max_items: 100,
            },
        )
        .await
        .unwrap();

    // Record 1 was finalized by a previous run before the crash
    let attempts = SyncItemAttemptRepository::new(harness.db.clone());
    let attempt = attempts.get_or_create(job.id, 1).await.unwrap();
    attempts
        .finalize_success(attempt, "NS-OPMS-1", 1)
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.items_processed, 3);
    assert_eq!(job.items_succeeded, 3);
    assert_counters_consistent(&job);
    // No second call for the already-finalized record
    assert_eq!(harness.client.calls_for("OPMS-1"), 0);
}

#[tokio::test]
async fn two_jobs_for_the_same_record_both_complete() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 11, 1).await;

    let jobs = SyncJobRepository::new(harness.db.clone());
    let first = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 11 })
        .await
        .unwrap();
    let second = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 11 })
        .await
        .unwrap();

    harness.orchestrator.tick().await.expect("tick");

    for job_id in [first.id, second.id] {
        let job = jobs.find_by_id(job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed.as_str());
        assert_eq!(job.items_succeeded, 1);
    }
    // Single-flight serialized the two upserts; both still happened
    assert_eq!(harness.client.calls_for("OPMS-11"), 2);
}

#[tokio::test]
async fn cancelling_a_running_job_freezes_counters() {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");
    seed_vendor(&db, 1).await;
    for id in 1..=10 {
        seed_item(&db, id, 1).await;
    }

    let jobs = SyncJobRepository::new(db.clone());
    let job = jobs
        .enqueue(
            JobType::Batch,
            &JobScope::Batch {
                strategy: IterationStrategy::RecordId,
                start_id: None,
                end_id: None,
                start_name: None,
                end_name: None,
                max_items: 100,
            },
        )
        .await
        .unwrap();

    // Cancellation lands during the third upsert
    let client = Arc::new(CancelAfterClient {
        db: db.clone(),
        job_id: job.id,
        cancel_on_call: 3,
        calls: Mutex::new(0),
    });
    let control: Arc<dyn SyncControl> = Arc::new(ConfigSyncControl::new(&AppConfig::default()));
    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        client.clone(),
        Arc::new(Throttle::new(Duration::from_millis(0))),
        SingleFlight::new(),
        control,
        Arc::new(CancelRegistry::new()),
        OrchestratorConfig {
            tick_ms: 10,
            claim_batch: 5,
            job_concurrency: 2,
            max_window_size: 10,
        },
        RetryPolicyConfig {
            max_attempts: 3,
            base_seconds: 0,
            max_seconds: 0,
            jitter_factor: 0.0,
        },
    );

    orchestrator.tick().await.expect("tick");

    let job = jobs.find_by_id(job.id).await.unwrap().unwrap();
    // Cancellation, not failure: the in-flight attempt finished, nothing
    // after it was dequeued, and the counters stay frozen below total.
    assert_eq!(job.status, JobStatus::Cancelled.as_str());
    assert!(job.cancel_requested);
    assert_eq!(job.total_items, 10);
    assert_eq!(job.items_processed, 3);
    assert_eq!(job.items_succeeded, 3);
    assert_eq!(job.items_failed_retryable, 0);
    assert_counters_consistent(&job);
    assert_eq!(*client.calls.lock().unwrap(), 3);

    let attempts = SyncItemAttemptRepository::new(db.clone())
        .list_by_job(job.id)
        .await
        .unwrap();
    assert_eq!(attempts.len(), 3);
    assert!(attempts.iter().all(|a| a.status == "success"));
}

#[tokio::test]
async fn empty_scope_completes_with_zero_items() {
    let harness = setup().await;

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::Manual, &JobScope::Record { record_id: 404 })
        .await
        .unwrap();

    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.total_items, 0);
    assert_eq!(job.items_processed, 0);
}

#[tokio::test]
async fn recovery_requeues_interrupted_record_jobs() {
    let harness = setup().await;
    seed_vendor(&harness.db, 1).await;
    seed_item(&harness.db, 8, 1).await;

    let jobs = SyncJobRepository::new(harness.db.clone());
    let job = jobs
        .enqueue(JobType::RealTime, &JobScope::Record { record_id: 8 })
        .await
        .unwrap();
    // Simulate a crash: the job was claimed but never finished
    let claimed = jobs.claim_pending(5).await.unwrap();
    assert_eq!(claimed.len(), 1);

    harness
        .orchestrator
        .recover_interrupted()
        .await
        .expect("recovery");
    let job = run_to_terminal(&harness, job.id).await;
    assert_eq!(job.status, JobStatus::Completed.as_str());
    assert_eq!(job.items_succeeded, 1);
}
