//! # API Handlers
//!
//! HTTP endpoint handlers for the sync service API.

use crate::models::ServiceInfo;
use axum::response::Json;

pub mod health;
pub mod jobs;
pub mod webhooks;

/// Root handler that returns basic service information
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}
