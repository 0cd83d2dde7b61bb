use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use metrics::counter;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::db::UnitOfWork;
use crate::entities::{order_address, OrderStatus, PaymentProvider, PaymentStatus};
use crate::errors::ServiceError;
use crate::repositories::{
    order_repository::NewOrder, payment_repository::NewPayment, OrderRepository,
    PaymentRepository, StockLedger,
};
use crate::services::cart::{cart_total, join_products};

/// Failure reason recorded when the sweeper releases a stale order.
pub const SESSION_TIMEOUT: &str = "Session Timeout";

const DEFAULT_SWEEP_CONCURRENCY: usize = 8;
const DEFAULT_SWEEP_PAGE_SIZE: u64 = 500;

/// `now - ttl_minutes`, rejecting non-positive or out-of-range TTLs.
pub fn expiry_cutoff(
    now: DateTime<Utc>,
    ttl_minutes: i64,
) -> Result<DateTime<Utc>, ServiceError> {
    if ttl_minutes < 1 {
        return Err(ServiceError::ValidationError(format!(
            "order ttl must be at least 1 minute, got {}",
            ttl_minutes
        )));
    }
    Duration::try_minutes(ttl_minutes)
        .and_then(|ttl| now.checked_sub_signed(ttl))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "order ttl of {} minutes is out of range",
                ttl_minutes
            ))
        })
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub provider: PaymentProvider,
    pub provider_payment_id: String,
    /// Total the payment intent was created for
    pub expected_amount_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreatedOrder {
    pub order_id: Uuid,
    pub amount_cents: i64,
}

/// Which branch `confirm_order` took. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    AlreadySucceeded,
    /// The order left PENDING before this call could claim it.
    NotPending,
}

/// Which branch `fail_order` took. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    Canceled,
    /// The payment cleared; this path never cancels a paid order.
    AlreadySucceeded,
    AlreadyCanceled,
    NotPending,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderItemView {
    pub id: Uuid,
    pub product_id: Uuid,
    /// `None` once the product has been deleted
    pub name: Option<String>,
    pub slug: Option<String>,
    pub quantity: i32,
    pub amount_cents: i64,
    pub line_total_cents: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentView {
    pub id: Uuid,
    pub provider: PaymentProvider,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderUpdateView {
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub id: Uuid,
    pub user_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub address: order_address::Model,
    pub items: Vec<OrderItemView>,
    pub payment: PaymentView,
    pub updates: Vec<OrderUpdateView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderSummary {
    pub id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub item_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Order lifecycle: placement with stock reservation, payment confirmation,
/// failure with stock release, and expiry of abandoned orders.
///
/// `confirm_order` and `fail_order` are idempotent and safe to race against
/// each other; the conditional `PENDING -> *` status update decides which
/// caller wins.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    currency: String,
    sweep_concurrency: usize,
    sweep_page_size: u64,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, currency: impl Into<String>) -> Self {
        Self {
            db,
            currency: currency.into(),
            sweep_concurrency: DEFAULT_SWEEP_CONCURRENCY,
            sweep_page_size: DEFAULT_SWEEP_PAGE_SIZE,
        }
    }

    /// Max number of orders released in parallel by one sweep.
    pub fn with_sweep_concurrency(mut self, concurrency: usize) -> Self {
        self.sweep_concurrency = concurrency.max(1);
        self
    }

    /// Max number of candidate ids read per query during a sweep.
    pub fn with_sweep_page_size(mut self, page_size: u64) -> Self {
        self.sweep_page_size = page_size.max(1);
        self
    }

    /// Places an order for the user's current cart and reserves its stock.
    ///
    /// The cart is re-read and re-priced here; if its total no longer equals
    /// `expected_amount_cents` the cart changed after the payment intent was
    /// created and the call fails with `AmountMismatch`. The cart itself is
    /// left untouched until the payment is confirmed.
    #[instrument(skip(self, request), fields(user_id = %request.user_id))]
    pub async fn create_order(&self, request: CreateOrder) -> Result<CreatedOrder, ServiceError> {
        let uow = UnitOfWork::begin(&self.db).await?;
        let result = self.create_order_in(&uow, request).await;
        match &result {
            Ok(created) => {
                counter!("storefront_orders.created", 1);
                info!(order_id = %created.order_id, amount = created.amount_cents, "order created");
            }
            Err(err) => {
                counter!("storefront_orders.create_failed", 1);
                warn!(error = %err, "order creation failed");
            }
        }
        uow.finish(result).await
    }

    async fn create_order_in(
        &self,
        uow: &UnitOfWork,
        request: CreateOrder,
    ) -> Result<CreatedOrder, ServiceError> {
        let lines = join_products(uow.carts().lines_with_products(request.user_id).await?)?;
        if lines.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let computed_total = cart_total(&lines);

        let address = uow
            .addresses()
            .find(request.address_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Address not found".to_string()))?;
        if address.user_id != request.user_id {
            return Err(ServiceError::Forbidden(
                "Address belongs to another user".to_string(),
            ));
        }

        if computed_total != request.expected_amount_cents {
            return Err(ServiceError::AmountMismatch {
                expected: request.expected_amount_cents,
                actual: computed_total,
            });
        }

        let orders = uow.orders();
        let snapshot = orders.insert_address_snapshot(&address).await?;
        let order = orders
            .insert(NewOrder {
                user_id: request.user_id,
                amount_cents: computed_total,
                currency: self.currency.clone(),
                order_address_id: snapshot.id,
            })
            .await?;
        orders.append_update(order.id, OrderStatus::Pending).await?;

        let stock = uow.products();
        for (item, product) in &lines {
            orders
                .insert_item(order.id, product.id, item.quantity, product.amount_cents)
                .await?;

            if !stock.reserve(product.id, item.quantity).await? {
                counter!("storefront_orders.stock_conflict", 1);
                return Err(ServiceError::InsufficientStock(format!(
                    "Insufficient stock for {}",
                    product.name
                )));
            }
        }

        uow.payments()
            .insert(NewPayment {
                order_id: order.id,
                amount_cents: computed_total,
                currency: self.currency.clone(),
                provider: request.provider,
                provider_payment_id: request.provider_payment_id,
            })
            .await?;

        Ok(CreatedOrder {
            order_id: order.id,
            amount_cents: computed_total,
        })
    }

    /// Moves a PENDING order to PROCESSING, marks its payment SUCCEEDED and
    /// empties the buyer's cart.
    #[instrument(skip(self))]
    pub async fn confirm_order(&self, order_id: Uuid) -> Result<ConfirmOutcome, ServiceError> {
        let uow = UnitOfWork::begin(&self.db).await?;
        let result = Self::confirm_order_in(&uow, order_id).await;
        let outcome = uow.finish(result).await?;

        match outcome {
            ConfirmOutcome::Confirmed => {
                counter!("storefront_orders.confirmed", 1);
                info!(order_id = %order_id, "order confirmed");
            }
            other => info!(order_id = %order_id, outcome = ?other, "confirm skipped"),
        }
        Ok(outcome)
    }

    async fn confirm_order_in(
        uow: &UnitOfWork,
        order_id: Uuid,
    ) -> Result<ConfirmOutcome, ServiceError> {
        let orders = uow.orders();
        let order = orders
            .find(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        let payment = uow
            .payments()
            .find_for_order(order_id)
            .await?
            .ok_or(ServiceError::PaymentRecordMissing(order_id))?;

        if payment.status == PaymentStatus::Succeeded {
            return Ok(ConfirmOutcome::AlreadySucceeded);
        }
        if order.status != OrderStatus::Pending {
            return Ok(ConfirmOutcome::NotPending);
        }
        if !orders
            .transition(order_id, OrderStatus::Pending, OrderStatus::Processing)
            .await?
        {
            return Ok(ConfirmOutcome::NotPending);
        }

        orders
            .append_update(order_id, OrderStatus::Processing)
            .await?;
        uow.payments().mark_succeeded(payment.id).await?;
        uow.carts().clear(order.user_id).await?;

        Ok(ConfirmOutcome::Confirmed)
    }

    /// Cancels a PENDING order, returns its stock and marks the payment
    /// FAILED with `reason`, which must already be sanitized.
    #[instrument(skip(self))]
    pub async fn fail_order(
        &self,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<FailOutcome, ServiceError> {
        let uow = UnitOfWork::begin(&self.db).await?;
        let result = Self::fail_order_in(&uow, order_id, reason).await;
        let outcome = uow.finish(result).await?;

        match outcome {
            FailOutcome::Canceled => {
                counter!("storefront_orders.canceled", 1);
                info!(order_id = %order_id, "order canceled");
            }
            other => info!(order_id = %order_id, outcome = ?other, "fail skipped"),
        }
        Ok(outcome)
    }

    async fn fail_order_in(
        uow: &UnitOfWork,
        order_id: Uuid,
        reason: Option<String>,
    ) -> Result<FailOutcome, ServiceError> {
        let orders = uow.orders();
        let order = orders
            .find(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        let payment = uow
            .payments()
            .find_for_order(order_id)
            .await?
            .ok_or(ServiceError::PaymentRecordMissing(order_id))?;

        if payment.status == PaymentStatus::Succeeded {
            return Ok(FailOutcome::AlreadySucceeded);
        }
        if order.status == OrderStatus::Canceled && payment.status == PaymentStatus::Failed {
            return Ok(FailOutcome::AlreadyCanceled);
        }
        if !orders
            .transition(order_id, OrderStatus::Pending, OrderStatus::Canceled)
            .await?
        {
            return Ok(FailOutcome::NotPending);
        }

        orders.append_update(order_id, OrderStatus::Canceled).await?;

        // Unguarded increment: only the winner of the transition above gets here.
        let stock = uow.products();
        for item in orders.items(order_id).await? {
            if !stock.release(item.product_id, item.quantity).await? {
                warn!(
                    order_id = %order_id,
                    product_id = %item.product_id,
                    quantity = item.quantity,
                    "product no longer exists; stock not returned"
                );
            }
        }

        uow.payments().mark_failed(payment.id, reason).await?;

        Ok(FailOutcome::Canceled)
    }

    /// Fails every PENDING order older than `ttl_minutes` with
    /// [`SESSION_TIMEOUT`]. Candidates are read in pages of
    /// `sweep_page_size`; each page is processed in parallel, one transaction
    /// per order, and one failing order does not stop the rest. Returns how
    /// many orders were actually canceled.
    #[instrument(skip(self))]
    pub async fn release_expired_orders(&self, ttl_minutes: i64) -> Result<usize, ServiceError> {
        let cutoff = expiry_cutoff(Utc::now(), ttl_minutes)?;
        let repo = OrderRepository::new(self.db.as_ref());

        let mut released = 0;
        let mut after = None;
        loop {
            let page = repo
                .created_before_page(OrderStatus::Pending, cutoff, after, self.sweep_page_size)
                .await?;
            let Some(&(last_id, last_created_at)) = page.last() else {
                break;
            };
            after = Some((last_created_at, last_id));
            let full_page = page.len() as u64 == self.sweep_page_size;
            info!(candidates = page.len(), "releasing expired orders");

            released += self
                .release_page(page.into_iter().map(|(id, _)| id).collect())
                .await;
            if !full_page {
                break;
            }
        }

        counter!("storefront_orders.expired", released as u64);
        Ok(released)
    }

    async fn release_page(&self, order_ids: Vec<Uuid>) -> usize {
        let results: Vec<(Uuid, Result<FailOutcome, ServiceError>)> = stream::iter(order_ids)
            .map(|order_id| async move {
                let outcome = self
                    .fail_order(order_id, Some(SESSION_TIMEOUT.to_string()))
                    .await;
                (order_id, outcome)
            })
            .buffer_unordered(self.sweep_concurrency)
            .collect()
            .await;

        let mut released = 0;
        for (order_id, result) in results {
            match result {
                Ok(FailOutcome::Canceled) => released += 1,
                Ok(_) => {}
                Err(err) => {
                    counter!("storefront_orders.expiry_failed", 1);
                    error!(order_id = %order_id, error = %err, "failed to release expired order");
                }
            }
        }
        released
    }

    /// Full order view for its owner.
    #[instrument(skip(self))]
    pub async fn get_order(
        &self,
        order_id: Uuid,
        user_id: Uuid,
    ) -> Result<OrderDetails, ServiceError> {
        let conn = self.db.as_ref();
        let orders = OrderRepository::new(conn);

        let order = orders
            .find(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;
        if order.user_id != user_id {
            return Err(ServiceError::Forbidden(
                "Order belongs to another user".to_string(),
            ));
        }

        let payment = PaymentRepository::new(conn)
            .find_for_order(order_id)
            .await?
            .ok_or(ServiceError::PaymentRecordMissing(order_id))?;
        let address = orders
            .address_snapshot(order.order_address_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order address not found".to_string()))?;

        let items = orders.items(order_id).await?;
        let products: HashMap<Uuid, _> = StockLedger::new(conn)
            .find_many(items.iter().map(|i| i.product_id).collect())
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect();

        let items = items
            .into_iter()
            .map(|item| {
                let product = products.get(&item.product_id);
                OrderItemView {
                    id: item.id,
                    product_id: item.product_id,
                    name: product.map(|p| p.name.clone()),
                    slug: product.map(|p| p.slug.clone()),
                    quantity: item.quantity,
                    amount_cents: item.amount_cents,
                    line_total_cents: item
                        .amount_cents
                        .saturating_mul(i64::from(item.quantity)),
                }
            })
            .collect();

        let updates = orders
            .updates(order_id)
            .await?
            .into_iter()
            .map(|u| OrderUpdateView {
                status: u.status,
                created_at: u.created_at,
            })
            .collect();

        Ok(OrderDetails {
            id: order.id,
            user_id: order.user_id,
            amount_cents: order.amount_cents,
            currency: order.currency,
            status: order.status,
            created_at: order.created_at,
            address,
            items,
            payment: PaymentView {
                id: payment.id,
                provider: payment.provider,
                status: payment.status,
                amount_cents: payment.amount_cents,
                currency: payment.currency,
                error_message: payment.error_message,
            },
            updates,
        })
    }

    /// The user's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_user_orders(&self, user_id: Uuid) -> Result<Vec<OrderSummary>, ServiceError> {
        let orders = OrderRepository::new(self.db.as_ref());
        let list = orders.list_for_user(user_id).await?;
        let counts = orders
            .item_counts(list.iter().map(|o| o.id).collect())
            .await?;

        Ok(list
            .into_iter()
            .map(|o| OrderSummary {
                item_count: counts.get(&o.id).copied().unwrap_or(0),
                id: o.id,
                amount_cents: o.amount_cents,
                currency: o.currency,
                status: o.status,
                created_at: o.created_at,
            })
            .collect())
    }
}
