//! Database entity models
//!
//! SeaORM entities for the sync engine's persistent state: source inventory
//! records, vendor identity mappings, sync jobs and their per-item attempts,
//! and scheduler checkpoints.

pub mod item;
pub mod sync_checkpoint;
pub mod sync_item_attempt;
pub mod sync_job;
pub mod vendor_mapping;

use serde::{Deserialize, Serialize};

/// Service metadata returned by the root endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub status: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            status: "ok".to_string(),
        }
    }
}
