//! SyncCheckpoint entity model
//!
//! Last-modified watermark per scheduler stream. The delta scheduler advances
//! the `scheduled` checkpoint only after the job it enqueued reaches a
//! terminal state, so an incomplete run is re-covered by the next interval.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "sync_checkpoints")]
pub struct Model {
    /// Checkpoint stream name (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub key: String,

    /// Upper bound of the last delta interval whose job completed
    pub last_synced_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
