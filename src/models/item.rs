//! Item entity model
//!
//! Source-of-truth inventory record in the OPMS database. `updated_at` is the
//! last-modified marker consumed by the delta scheduler; `external_id` holds
//! the NetSuite identity once the record has been upserted at least once.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "items")]
pub struct Model {
    /// OPMS record id (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: i64,

    /// Item display name
    pub name: String,

    /// OPMS vendor id, resolved through vendor_mappings during mapping
    pub vendor_id: i64,

    /// Category names as a JSON array of strings
    #[sea_orm(column_type = "JsonBinary")]
    pub categories: JsonValue,

    /// Whether the item is active in OPMS
    pub is_active: bool,

    /// Whether the item is taxable
    pub is_taxable: bool,

    /// Base price, absent for items without pricing
    pub base_price: Option<f64>,

    /// Parent item for matrix/child relationships
    pub parent_id: Option<i64>,

    /// NetSuite internal id once known
    pub external_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
