//! # Server Configuration
//!
//! Router setup and HTTP serving for the sync service API.

use std::sync::Arc;

use axum::{
    Router,
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::control::CancelRegistry;
use crate::handlers;
use crate::remote::throttle::Throttle;
use crate::singleflight::SingleFlight;
use crate::telemetry::{self, RequestContext};

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Arc<AppConfig>,
    pub cancels: Arc<CancelRegistry>,
    pub throttle: Arc<Throttle>,
    pub singleflight: Arc<SingleFlight>,
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health::health))
        .route("/jobs", post(handlers::jobs::create_job))
        .route("/jobs/{id}", get(handlers::jobs::get_job))
        .route("/jobs/{id}/items", get(handlers::jobs::list_job_items))
        .route("/jobs/{id}/cancel", post(handlers::jobs::cancel_job))
        .route(
            "/webhooks/netsuite",
            post(handlers::webhooks::netsuite_webhook),
        )
        .layer(middleware::from_fn(attach_request_context))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Make a per-request correlation id available to error responses and log
/// lines.
async fn attach_request_context(request: Request, next: Next) -> Response {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    telemetry::with_request_context(RequestContext { request_id }, next.run(request)).await
}

/// Serve the API until the shutdown token fires.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = state.config.bind_addr()?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;

    Ok(())
}

/// Builds an AppState backed by an in-memory database with the schema
/// applied, for handler tests.
#[cfg(test)]
pub async fn create_test_app_state() -> AppState {
    use migration::{Migrator, MigratorTrait};

    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("connect in-memory sqlite");
    Migrator::up(&db, None).await.expect("run migrations");

    let config = AppConfig {
        profile: "test".to_string(),
        webhook_secret: Some("test-secret".to_string()),
        ..AppConfig::default()
    };

    AppState {
        db,
        config: Arc::new(config),
        cancels: Arc::new(CancelRegistry::new()),
        throttle: Arc::new(Throttle::new(std::time::Duration::from_millis(0))),
        singleflight: SingleFlight::new(),
    }
}
