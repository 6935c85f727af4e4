//! Migration to create the sync_item_attempts table.
//!
//! One row per (job, source record). Rows are retained after job completion for
//! audit and operator triage; `next_eligible_at` carries explicit retry state so
//! crash-resume never loses backoff position.

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
                    .table(SyncItemAttempts::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncItemAttempts::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(SyncItemAttempts::JobId).uuid().not_null())
                    .col(
                        ColumnDef::new(SyncItemAttempts::SourceRecordId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::ExternalRecordId)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::Status)
                            .text()
                            .not_null()
                            .default("pending"),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::LastErrorKind)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::LastErrorMessage)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::NextEligibleAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(SyncItemAttempts::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sync_item_attempts_job_id")
                            .from(SyncItemAttempts::Table, SyncItemAttempts::JobId)
                            .to(SyncJobs::Table, SyncJobs::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_sync_item_attempts_job_record ON sync_item_attempts (job_id, source_record_id)"
                    .to_string(),
            ))
            .await?;

        // Operator triage by record across jobs
        manager
            .create_index(
                Index::create()
                    .name("idx_sync_item_attempts_record")
                    .table(SyncItemAttempts::Table)
                    .col(SyncItemAttempts::SourceRecordId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_item_attempts_job_record")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_index(
                Index::drop()
                    .name("idx_sync_item_attempts_record")
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(SyncItemAttempts::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncItemAttempts {
    Table,
    Id,
    JobId,
    SourceRecordId,
    ExternalRecordId,
    AttemptCount,
    Status,
    LastErrorKind,
    LastErrorMessage,
    NextEligibleAt,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum SyncJobs {
    Table,
    Id,
}
