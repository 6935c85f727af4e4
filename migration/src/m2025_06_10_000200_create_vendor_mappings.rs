//! Migration to create the vendor_mappings table.
//!
//! Pre-computed OPMS vendor id to NetSuite vendor identity mapping. The sync
//! engine only reads from this table; rows are produced by an offline
//! vendor-matching process.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(VendorMappings::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(VendorMappings::SourceVendorId)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(VendorMappings::ExternalVendorId)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VendorMappings::ExternalVendorName)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(VendorMappings::CreatedAt)
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
            .drop_table(Table::drop().table(VendorMappings::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum VendorMappings {
    Table,
    SourceVendorId,
    ExternalVendorId,
    ExternalVendorName,
    CreatedAt,
}
