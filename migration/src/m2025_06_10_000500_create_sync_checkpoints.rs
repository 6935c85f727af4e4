//! Migration to create the sync_checkpoints table.
//!
//! Stores the last-modified watermark per scheduler stream. The delta scheduler
//! advances the `scheduled` checkpoint only after the job it enqueued reaches a
//! terminal state.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(SyncCheckpoints::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SyncCheckpoints::Key)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SyncCheckpoints::LastSyncedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SyncCheckpoints::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SyncCheckpoints::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum SyncCheckpoints {
    Table,
    Key,
    LastSyncedAt,
    UpdatedAt,
}
