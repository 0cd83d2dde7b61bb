use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, Condition, ConnectionTrait, DbErr,
    EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::entities::{
    address, order,
    order::OrderStatus,
    order_address, order_item, order_update,
};

/// Header fields of a freshly placed order.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub order_address_id: Uuid,
}

pub struct OrderRepository<'c, C> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> OrderRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    pub async fn insert_address_snapshot(
        &self,
        address: &address::Model,
    ) -> Result<order_address::Model, DbErr> {
        order_address::ActiveModel::snapshot_of(address)
            .insert(self.conn)
            .await
    }

    /// Inserts the order header in PENDING.
    pub async fn insert(&self, new: NewOrder) -> Result<order::Model, DbErr> {
        let now = Utc::now();
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(new.user_id),
            amount_cents: Set(new.amount_cents),
            currency: Set(new.currency),
            status: Set(OrderStatus::Pending),
            order_address_id: Set(new.order_address_id),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.conn)
        .await
    }

    pub async fn insert_item(
        &self,
        order_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        amount_cents: i64,
    ) -> Result<order_item::Model, DbErr> {
        order_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            amount_cents: Set(amount_cents),
            created_at: Set(Utc::now()),
        }
        .insert(self.conn)
        .await
    }

    pub async fn append_update(
        &self,
        order_id: Uuid,
        status: OrderStatus,
    ) -> Result<order_update::Model, DbErr> {
        order_update::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            status: Set(status),
            created_at: Set(Utc::now()),
        }
        .insert(self.conn)
        .await
    }

    /// Compare-and-swap on the order status. Only the caller that sees
    /// `true` owns the transition.
    pub async fn transition(
        &self,
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool, DbErr> {
        let result = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(to))
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(from))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    pub async fn find(&self, order_id: Uuid) -> Result<Option<order::Model>, DbErr> {
        order::Entity::find_by_id(order_id).one(self.conn).await
    }

    pub async fn items(&self, order_id: Uuid) -> Result<Vec<order_item::Model>, DbErr> {
        order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .order_by_asc(order_item::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    pub async fn updates(&self, order_id: Uuid) -> Result<Vec<order_update::Model>, DbErr> {
        order_update::Entity::find()
            .filter(order_update::Column::OrderId.eq(order_id))
            .order_by_asc(order_update::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    pub async fn address_snapshot(
        &self,
        order_address_id: Uuid,
    ) -> Result<Option<order_address::Model>, DbErr> {
        order_address::Entity::find_by_id(order_address_id)
            .one(self.conn)
            .await
    }

    /// One page of `(id, created_at)` for orders in `status` created strictly
    /// before `cutoff`, ordered by `(created_at, id)` and starting after the
    /// `after` key when given.
    pub async fn created_before_page(
        &self,
        status: OrderStatus,
        cutoff: DateTime<Utc>,
        after: Option<(DateTime<Utc>, Uuid)>,
        limit: u64,
    ) -> Result<Vec<(Uuid, DateTime<Utc>)>, DbErr> {
        let mut query = order::Entity::find()
            .select_only()
            .column(order::Column::Id)
            .column(order::Column::CreatedAt)
            .filter(order::Column::Status.eq(status))
            .filter(order::Column::CreatedAt.lt(cutoff));
        if let Some((created_at, id)) = after {
            query = query.filter(
                Condition::any()
                    .add(order::Column::CreatedAt.gt(created_at))
                    .add(
                        Condition::all()
                            .add(order::Column::CreatedAt.eq(created_at))
                            .add(order::Column::Id.gt(id)),
                    ),
            );
        }
        query
            .order_by_asc(order::Column::CreatedAt)
            .order_by_asc(order::Column::Id)
            .limit(limit)
            .into_tuple::<(Uuid, DateTime<Utc>)>()
            .all(self.conn)
            .await
    }

    pub async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<order::Model>, DbErr> {
        order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(self.conn)
            .await
    }

    /// Number of item rows per order.
    pub async fn item_counts(&self, order_ids: Vec<Uuid>) -> Result<HashMap<Uuid, u64>, DbErr> {
        if order_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let owners: Vec<Uuid> = order_item::Entity::find()
            .select_only()
            .column(order_item::Column::OrderId)
            .filter(order_item::Column::OrderId.is_in(order_ids))
            .into_tuple::<Uuid>()
            .all(self.conn)
            .await?;

        Ok(owners.into_iter().fold(HashMap::new(), |mut acc, id| {
            *acc.entry(id).or_insert(0) += 1;
            acc
        }))
    }
}
