//! Migration to create the sync_jobs table.
//!
//! A sync job is one unit of synchronization work (single record, batch range,
//! or modified-since delta) with its own lifecycle and aggregate counters.

use sea_orm_migration::prelude::*;
use sea_orm_migration::sea_orm::Statement;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncJobs::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(SyncJobs::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(SyncJobs::JobType).text().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(ColumnDef::new(SyncJobs::Scope).json_binary().not_null())
                    .col(
                        ColumnDef::new(SyncJobs::TotalItems)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ItemsProcessed)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ItemsSucceeded)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ItemsFailedRetryable)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::ItemsFailedPermanent)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(SyncJobs::Cursor).json_binary().null())
                    .col(ColumnDef::new(SyncJobs::Error).json_binary().null())
                    .col(
                        ColumnDef::new(SyncJobs::CancelRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::StartedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Claim query: oldest pending jobs first
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_sync_jobs_status_created ON sync_jobs (status, created_at)"
                    .to_string(),
            ))
            .await?;

        // Scheduler looks up the latest job per type
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_jobs_type_created")
                    .table(SyncJobs::Table)
                    .col(SyncJobs::JobType)
                    .col(SyncJobs::CreatedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_status_created").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_sync_jobs_type_created").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(SyncJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
    JobType,
    Status,
    Scope,
    TotalItems,
    ItemsProcessed,
    ItemsSucceeded,
    ItemsFailedRetryable,
    ItemsFailedPermanent,
    Cursor,
    Error,
    CancelRequested,
    CreatedAt,
    StartedAt,
    CompletedAt,
    UpdatedAt,
}
