use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};
use uuid::Uuid;

use crate::entities::{cart_item, product};

pub struct CartRepository<'c, C> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> CartRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    /// Cart lines joined with their product, newest line first. The product
    /// side is `None` only if the row vanished underneath the cart.
    pub async fn lines_with_products(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<(cart_item::Model, Option<product::Model>)>, DbErr> {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .order_by_desc(cart_item::Column::CreatedAt)
            .find_also_related(product::Entity)
            .all(self.conn)
            .await
    }

    pub async fn find(&self, item_id: Uuid) -> Result<Option<cart_item::Model>, DbErr> {
        cart_item::Entity::find_by_id(item_id).one(self.conn).await
    }

    pub async fn find_line(
        &self,
        user_id: Uuid,
        product_id: Uuid,
    ) -> Result<Option<cart_item::Model>, DbErr> {
        cart_item::Entity::find()
            .filter(cart_item::Column::UserId.eq(user_id))
            .filter(cart_item::Column::ProductId.eq(product_id))
            .one(self.conn)
            .await
    }

    pub async fn insert(
        &self,
        user_id: Uuid,
        product_id: Uuid,
        quantity: i32,
    ) -> Result<cart_item::Model, DbErr> {
        let now = Utc::now();
        cart_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.conn)
        .await
    }

    pub async fn set_quantity(
        &self,
        item: cart_item::Model,
        quantity: i32,
    ) -> Result<cart_item::Model, DbErr> {
        let mut active: cart_item::ActiveModel = item.into();
        active.quantity = Set(quantity);
        active.update(self.conn).await
    }

    pub async fn delete(&self, item_id: Uuid) -> Result<u64, DbErr> {
        let result = cart_item::Entity::delete_by_id(item_id)
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn clear(&self, user_id: Uuid) -> Result<u64, DbErr> {
        let result = cart_item::Entity::delete_many()
            .filter(cart_item::Column::UserId.eq(user_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected)
    }
}
