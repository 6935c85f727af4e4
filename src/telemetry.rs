//! Logging setup and request correlation for the sync service.
//!
//! `init_tracing` assembles the tracing pipeline from `AppConfig`: an
//! env-filter seeded from `OPMS_LOG_LEVEL`, a json or pretty formatter, and
//! the `log` bridge so sea-orm's sqlx query logging lands in the same stream
//! as the orchestrator's structured events. HTTP handlers run inside a
//! task-local [`RequestContext`] carrying the `x-request-id` value, which
//! error responses echo back as their correlation id.

use std::any::type_name_of_val;
use std::sync::atomic::{AtomicBool, Ordering};

use log::LevelFilter;
use thiserror::Error;
use tokio::task_local;
use tracing_log::LogTracer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::Layer,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

use crate::config::AppConfig;

/// Correlation metadata for one HTTP request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
}

task_local! {
    static CURRENT_REQUEST: RequestContext;
}

#[derive(Debug, Error)]
pub enum TelemetryInitError {
    #[error("failed to install log bridge: {0}")]
    LogBridge(#[from] log::SetLoggerError),
    #[error("failed to install tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),
}

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Wire up the global tracing pipeline. Safe to call more than once; only
/// the first call does anything.
pub fn init_tracing(config: &AppConfig) -> Result<(), TelemetryInitError> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    install_log_bridge()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let format = if config.log_format == "pretty" {
        fmt::layer().pretty().boxed()
    } else {
        fmt::layer().json().boxed()
    };

    if let Err(err) = tracing_subscriber::registry()
        .with(filter)
        .with(format)
        .try_init()
    {
        INITIALIZED.store(false, Ordering::SeqCst);
        return Err(err.into());
    }

    Ok(())
}

/// Route `log::` records into tracing before the subscriber goes up, so the
/// pool's early connection-retry logging is not lost. A bridge left behind
/// by a previous initialization in the same process is reused.
fn install_log_bridge() -> Result<(), TelemetryInitError> {
    match LogTracer::builder()
        .with_max_level(LevelFilter::Trace)
        .init()
    {
        Ok(()) => Ok(()),
        Err(_) if type_name_of_val(log::logger()).contains("LogTracer") => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Run `future` with `context` visible to everything it awaits, via
/// [`current_request_id`].
pub async fn with_request_context<Fut, R>(context: RequestContext, future: Fut) -> R
where
    Fut: std::future::Future<Output = R>,
{
    CURRENT_REQUEST.scope(context, future).await
}

/// The request id of the task's enclosing request scope, if any.
pub fn current_request_id() -> Option<String> {
    CURRENT_REQUEST
        .try_with(|ctx| ctx.request_id.clone())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn request_id_is_scoped_to_the_task() {
        assert!(current_request_id().is_none());

        let seen = with_request_context(
            RequestContext {
                request_id: "req-7".to_string(),
            },
            async { current_request_id() },
        )
        .await;

        assert_eq!(seen.as_deref(), Some("req-7"));
        assert!(current_request_id().is_none());
    }
}
