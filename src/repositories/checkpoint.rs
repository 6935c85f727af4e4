//! # Checkpoint Repository
//!
//! Last-modified watermarks keyed by scheduler stream. The scheduled stream
//! uses the key "scheduled".

use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, DatabaseConnection, DbErr, EntityTrait, Set};

use crate::models::sync_checkpoint::{ActiveModel, Entity, Model};

pub const SCHEDULED_STREAM: &str = "scheduled";

pub struct CheckpointRepository {
    db: DatabaseConnection,
}

impl CheckpointRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(key).one(&self.db).await
    }

    /// Advance the watermark for a stream, creating the row on first use.
    pub async fn advance(&self, key: &str, last_synced_at: DateTime<Utc>) -> Result<Model, DbErr> {
        let now = Utc::now().fixed_offset();
        match Entity::find_by_id(key).one(&self.db).await? {
            Some(existing) => {
                let mut active: ActiveModel = existing.into();
                active.last_synced_at = Set(last_synced_at.fixed_offset());
                active.updated_at = Set(now);
                active.update(&self.db).await
            }
            None => {
                let row = ActiveModel {
                    key: Set(key.to_string()),
                    last_synced_at: Set(last_synced_at.fixed_offset()),
                    updated_at: Set(now),
                };
                row.insert(&self.db).await
            }
        }
    }
}
