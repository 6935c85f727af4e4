//! # Source Item Repository
//!
//! Read access to the OPMS items table: point lookups, modified-since deltas
//! for the scheduler, and ordered range windows for batch jobs. Every listing
//! query carries a total order so window offsets are stable across calls.

use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, DbErr, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder,
    QuerySelect, Select,
};
use sea_orm::sea_query::Expr;

use crate::models::item::{Column, Entity, Model};
use crate::models::sync_job::IterationStrategy;

/// Range bounds for a batch scope, one pair per strategy.
#[derive(Debug, Clone, Default)]
pub struct BatchBounds {
    pub start_id: Option<i64>,
    pub end_id: Option<i64>,
    pub start_name: Option<String>,
    pub end_name: Option<String>,
}

/// Repository for source inventory reads
pub struct SourceItemRepository {
    db: DatabaseConnection,
}

impl SourceItemRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn find_by_id(&self, record_id: i64) -> Result<Option<Model>, DbErr> {
        Entity::find_by_id(record_id).one(&self.db).await
    }

    /// Resolve a source record from its external identity, used by webhook
    /// ingress.
    pub async fn find_by_external_id(&self, external_id: &str) -> Result<Option<Model>, DbErr> {
        Entity::find()
            .filter(Column::ExternalId.eq(external_id))
            .one(&self.db)
            .await
    }

    /// Store the external identity resolved by a successful create call.
    pub async fn set_external_id(&self, record_id: i64, external_id: &str) -> Result<(), DbErr> {
        Entity::update_many()
            .col_expr(Column::ExternalId, Expr::value(Some(external_id)))
            .filter(Column::Id.eq(record_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    fn batch_query(strategy: IterationStrategy, bounds: &BatchBounds) -> Select<Entity> {
        let mut query = Entity::find();
        match strategy {
            IterationStrategy::RecordId => {
                if let Some(start) = bounds.start_id {
                    query = query.filter(Column::Id.gte(start));
                }
                if let Some(end) = bounds.end_id {
                    query = query.filter(Column::Id.lte(end));
                }
                query.order_by_asc(Column::Id)
            }
            IterationStrategy::ParentId => {
                query = query.filter(Column::ParentId.is_not_null());
                if let Some(start) = bounds.start_id {
                    query = query.filter(Column::ParentId.gte(start));
                }
                if let Some(end) = bounds.end_id {
                    query = query.filter(Column::ParentId.lte(end));
                }
                query
                    .order_by_asc(Column::ParentId)
                    .order_by_asc(Column::Id)
            }
            IterationStrategy::Name => {
                if let Some(ref start) = bounds.start_name {
                    query = query.filter(Column::Name.gte(start.clone()));
                }
                if let Some(ref end) = bounds.end_name {
                    query = query.filter(Column::Name.lte(end.clone()));
                }
                query.order_by_asc(Column::Name).order_by_asc(Column::Id)
            }
        }
    }

    /// Number of records covered by a batch scope before the max_items cap.
    pub async fn count_in_batch(
        &self,
        strategy: IterationStrategy,
        bounds: &BatchBounds,
    ) -> Result<u64, DbErr> {
        Self::batch_query(strategy, bounds).count(&self.db).await
    }

    /// One window of a batch scope, in strategy order.
    pub async fn fetch_batch_window(
        &self,
        strategy: IterationStrategy,
        bounds: &BatchBounds,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        Self::batch_query(strategy, bounds)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
    }

    fn delta_query(since: DateTime<Utc>, until: DateTime<Utc>) -> Select<Entity> {
        Entity::find()
            .filter(Column::UpdatedAt.gt(since))
            .filter(Column::UpdatedAt.lte(until))
            .order_by_asc(Column::UpdatedAt)
            .order_by_asc(Column::Id)
    }

    /// Number of records modified within the half-open interval (since, until].
    pub async fn count_modified_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        Self::delta_query(since, until).count(&self.db).await
    }

    /// One window of a delta scope, ordered by (updated_at, id).
    pub async fn fetch_modified_between(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<Model>, DbErr> {
        Self::delta_query(since, until)
            .offset(offset)
            .limit(limit)
            .all(&self.db)
            .await
    }
}
