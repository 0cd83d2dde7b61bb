use chrono::Utc;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait,
    QueryFilter, Set,
};
use uuid::Uuid;

use crate::entities::payment::{self, PaymentProvider, PaymentStatus};

/// Fields needed to open the single PENDING payment of a new order.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
}

pub struct PaymentRepository<'c, C> {
    conn: &'c C,
}

impl<'c, C: ConnectionTrait> PaymentRepository<'c, C> {
    pub fn new(conn: &'c C) -> Self {
        Self { conn }
    }

    pub async fn insert(&self, new: NewPayment) -> Result<payment::Model, DbErr> {
        let now = Utc::now();
        payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(new.order_id),
            amount_cents: Set(new.amount_cents),
            currency: Set(new.currency),
            provider: Set(new.provider),
            provider_payment_id: Set(new.provider_payment_id),
            provider_refund_id: Set(None),
            status: Set(PaymentStatus::Pending),
            error_message: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.conn)
        .await
    }

    pub async fn find_for_order(&self, order_id: Uuid) -> Result<Option<payment::Model>, DbErr> {
        payment::Entity::find()
            .filter(payment::Column::OrderId.eq(order_id))
            .one(self.conn)
            .await
    }

    pub async fn find_by_provider_id(
        &self,
        provider_payment_id: &str,
    ) -> Result<Option<payment::Model>, DbErr> {
        payment::Entity::find()
            .filter(payment::Column::ProviderPaymentId.eq(provider_payment_id))
            .one(self.conn)
            .await
    }

    pub async fn mark_succeeded(&self, payment_id: Uuid) -> Result<bool, DbErr> {
        self.set_status(payment_id, PaymentStatus::Succeeded, None)
            .await
    }

    /// `reason` must already be sanitized.
    pub async fn mark_failed(&self, payment_id: Uuid, reason: Option<String>) -> Result<bool, DbErr> {
        self.set_status(payment_id, PaymentStatus::Failed, reason)
            .await
    }

    /// Records a refund unless the payment is already REFUNDED. Returns false
    /// when another delivery got there first.
    pub async fn mark_refunded(
        &self,
        payment_id: Uuid,
        refund_id: String,
        note: &str,
    ) -> Result<bool, DbErr> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(PaymentStatus::Refunded))
            .col_expr(payment::Column::ProviderRefundId, Expr::value(Some(refund_id)))
            .col_expr(payment::Column::ErrorMessage, Expr::value(Some(note.to_string())))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_id))
            .filter(payment::Column::Status.ne(PaymentStatus::Refunded))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }

    async fn set_status(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        error_message: Option<String>,
    ) -> Result<bool, DbErr> {
        let result = payment::Entity::update_many()
            .col_expr(payment::Column::Status, Expr::value(status))
            .col_expr(payment::Column::ErrorMessage, Expr::value(error_message))
            .col_expr(payment::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(payment::Column::Id.eq(payment_id))
            .exec(self.conn)
            .await?;
        Ok(result.rows_affected == 1)
    }
}
