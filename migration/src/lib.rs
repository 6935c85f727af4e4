//! Database migrations for the OPMS sync service.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_06_10_000100_create_items;
mod m2025_06_10_000200_create_vendor_mappings;
mod m2025_06_10_000300_create_sync_jobs;
mod m2025_06_10_000400_create_sync_item_attempts;
mod m2025_06_10_000500_create_sync_checkpoints;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_06_10_000100_create_items::Migration),
            Box::new(m2025_06_10_000200_create_vendor_mappings::Migration),
            Box::new(m2025_06_10_000300_create_sync_jobs::Migration),
            Box::new(m2025_06_10_000400_create_sync_item_attempts::Migration),
            Box::new(m2025_06_10_000500_create_sync_checkpoints::Migration),
        ]
    }
}
