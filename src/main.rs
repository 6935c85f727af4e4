//! # OPMS Sync Main Entry Point
//!
//! Boots the sync service: configuration, tracing, database, the background
//! orchestrator and delta scheduler, and the HTTP API.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use migration::{Migrator, MigratorTrait};
use tokio_util::sync::CancellationToken;

use opms_sync::config::ConfigLoader;
use opms_sync::control::{CancelRegistry, ConfigSyncControl, SyncControl};
use opms_sync::db::init_pool;
use opms_sync::orchestrator::SyncOrchestrator;
use opms_sync::remote::RecordClient;
use opms_sync::remote::netsuite::NetSuiteClient;
use opms_sync::remote::throttle::Throttle;
use opms_sync::scheduler::DeltaScheduler;
use opms_sync::server::{AppState, run_server};
use opms_sync::singleflight::SingleFlight;
use opms_sync::telemetry::init_tracing;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new().load()?;
    init_tracing(&config)?;

    tracing::info!(profile = %config.profile, "loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!("configuration: {}", redacted);
    }

    let db = init_pool(&config).await?;
    Migrator::up(&db, None)
        .await
        .context("failed to apply database migrations")?;

    let throttle = Arc::new(Throttle::new(Duration::from_millis(
        config.netsuite.min_call_interval_ms,
    )));
    let singleflight = SingleFlight::new();
    let cancels = Arc::new(CancelRegistry::new());
    let control: Arc<dyn SyncControl> = Arc::new(ConfigSyncControl::new(&config));
    let client: Arc<dyn RecordClient> = Arc::new(
        NetSuiteClient::new(&config.netsuite)
            .context("failed to build NetSuite client; is OPMS_NETSUITE_TOKEN set?")?,
    );

    let shutdown = CancellationToken::new();

    let orchestrator = SyncOrchestrator::new(
        db.clone(),
        client,
        throttle.clone(),
        singleflight.clone(),
        control.clone(),
        cancels.clone(),
        config.orchestrator.clone(),
        config.retry_policy.clone(),
    );
    let orchestrator_shutdown = shutdown.clone();
    let orchestrator_task = tokio::spawn(async move {
        orchestrator.run(orchestrator_shutdown).await;
    });

    let scheduler = DeltaScheduler::new(db.clone(), control, config.scheduler.clone());
    let scheduler_shutdown = shutdown.clone();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(scheduler_shutdown).await;
    });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_shutdown.cancel();
        }
    });

    let state = AppState {
        db,
        config: Arc::new(config),
        cancels,
        throttle,
        singleflight,
    };
    let result = run_server(state, shutdown.clone()).await;

    // Server is down; stop the background loops before exiting
    shutdown.cancel();
    let _ = orchestrator_task.await;
    let _ = scheduler_task.await;

    result
}
