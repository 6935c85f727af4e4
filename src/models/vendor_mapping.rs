//! VendorMapping entity model
//!
//! Read-only lookup from OPMS vendor id to NetSuite vendor identity. Rows are
//! produced by an offline vendor-matching process; the sync engine never
//! writes here.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "vendor_mappings")]
pub struct Model {
    /// OPMS vendor id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub source_vendor_id: i64,

    /// NetSuite vendor internal id
    pub external_vendor_id: String,

    /// NetSuite vendor display name
    pub external_vendor_name: String,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
