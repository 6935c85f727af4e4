//! Migration to create the items table.
//!
//! This is the source-of-truth inventory table the sync engine reads from. The
//! `updated_at` column is the last-modified marker used by the delta scheduler,
//! and `external_id` stores the resolved NetSuite identity once known.

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
                    .table(Items::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Items::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Items::Name).text().not_null())
                    .col(ColumnDef::new(Items::VendorId).big_integer().not_null())
                    .col(ColumnDef::new(Items::Categories).json_binary().not_null())
                    .col(
                        ColumnDef::new(Items::IsActive)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(Items::IsTaxable)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Items::BasePrice).double().null())
                    .col(ColumnDef::new(Items::ParentId).big_integer().null())
                    .col(ColumnDef::new(Items::ExternalId).text().null())
                    .col(
                        ColumnDef::new(Items::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Items::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // Keyset iteration for delta windows: (updated_at, id)
        manager
            .get_connection()
            .execute(Statement::from_string(
                manager.get_database_backend(),
                "CREATE INDEX IF NOT EXISTS idx_items_updated_at_id ON items (updated_at, id)"
                    .to_string(),
            ))
            .await?;

        // Webhook ingress resolves source records by external identity
        manager
            .create_index(
                Index::create()
                    .name("idx_items_external_id")
                    .table(Items::Table)
                    .col(Items::ExternalId)
                    .to_owned(),
            )
            .await?;

        // Parent-range batch strategy
        manager
            .create_index(
                Index::create()
                    .name("idx_items_parent_id")
                    .table(Items::Table)
                    .col(Items::ParentId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_index(Index::drop().name("idx_items_updated_at_id").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_items_external_id").to_owned())
            .await?;
        manager
            .drop_index(Index::drop().name("idx_items_parent_id").to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Items::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Items {
    Table,
    Id,
    Name,
    VendorId,
    Categories,
    IsActive,
    IsTaxable,
    BasePrice,
    ParentId,
    ExternalId,
    CreatedAt,
    UpdatedAt,
}
