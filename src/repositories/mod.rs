//! Repository layer
//!
//! Thin wrappers around SeaORM queries. Counter updates are single-row
//! atomic increments and every item finalization couples the attempt write
//! with the owning job's counters in one transaction.

pub mod checkpoint;
pub mod source_item;
pub mod sync_item_attempt;
pub mod sync_job;
pub mod vendor_mapping;

pub use checkpoint::CheckpointRepository;
pub use source_item::SourceItemRepository;
pub use sync_item_attempt::SyncItemAttemptRepository;
pub use sync_job::SyncJobRepository;
pub use vendor_mapping::VendorMappingRepository;
