use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
};
use uuid::Uuid;

use crate::entities::product;

/// Authoritative per-product stock. All mutations are single conditional
/// UPDATE statements; callers learn the outcome from the affected-row count.
pub struct StockLedger<'c, C> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> StockLedger<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// `stock = stock - quantity` only when `stock >= quantity`.
    /// Returns false when the product is missing or short.
    pub async fn reserve(&self, product_id: Uuid, quantity: i32) -> Result<bool, DbErr> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).sub(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .filter(product::Column::Stock.gte(quantity))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    /// Unconditional `stock = stock + quantity`. Returns false when the
    /// product no longer exists.
    pub async fn release(&self, product_id: Uuid, quantity: i32) -> Result<bool, DbErr> {
        let result = product::Entity::update_many()
            .col_expr(
                product::Column::Stock,
                Expr::col(product::Column::Stock).add(quantity),
            )
            .col_expr(product::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(product::Column::Id.eq(product_id))
            .exec(self.conn)
            .await?;

        Ok(result.rows_affected == 1)
    }

    pub async fn find(&self, product_id: Uuid) -> Result<Option<product::Model>, DbErr> {
        product::Entity::find_by_id(product_id).one(self.conn).await
    }

    pub async fn find_many(&self, ids: Vec<Uuid>) -> Result<Vec<product::Model>, DbErr> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        product::Entity::find()
            .filter(product::Column::Id.is_in(ids))
            .all(self.conn)
            .await
    }
}
