//! # VendorMapping Repository
//!
//! Read-only lookup from OPMS vendor id to NetSuite vendor identity.

use sea_orm::{DatabaseConnection, DbErr, EntityTrait};

use crate::models::vendor_mapping::{Entity, Model};

pub struct VendorMappingRepository {
    db: DatabaseConnection,
}

impl VendorMappingRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_source_id(&self, vendor_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(vendor_id).one(&self.db).await
    }
}
