mod common;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use common::*;
use sea_orm::EntityTrait;
use storefront_api::entities::{product, OrderStatus, PaymentProvider, PaymentStatus};
use storefront_api::errors::ServiceError;
use storefront_api::services::orders::{
    ConfirmOutcome, CreateOrder, FailOutcome, OrderService, SESSION_TIMEOUT,
};
use uuid::Uuid;

struct Placed {
    orders: OrderService,
    db: std::sync::Arc<sea_orm::DatabaseConnection>,
    user: Uuid,
    product_id: Uuid,
    order_id: Uuid,
}

/// One PENDING order for 2 units of a product that started with 5 in stock.
async fn place_order() -> Placed {
    let db = setup_db().await;
    let orders = OrderService::new(db.clone(), "usd").with_sweep_concurrency(4);
    let user = Uuid::new_v4();
    let product = seed_product(&db, 1000, 5).await;
    let address = seed_address(&db, user).await;
    seed_cart_line(&db, user, product.id, 2).await;

    let created = orders
        .create_order(CreateOrder {
            user_id: user,
            address_id: address.id,
            provider: PaymentProvider::Stripe,
            provider_payment_id: format!("pi_{}", Uuid::new_v4().simple()),
            expected_amount_cents: 2000,
        })
        .await
        .expect("order created");

    Placed {
        orders,
        db,
        user,
        product_id: product.id,
        order_id: created.order_id,
    }
}

#[tokio::test]
async fn confirm_moves_to_processing_and_clears_cart() {
    let p = place_order().await;

    let outcome = p.orders.confirm_order(p.order_id).await.unwrap();
    assert_eq!(outcome, ConfirmOutcome::Confirmed);

    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Processing);
    assert_eq!(payment_for(&p.db, p.order_id).await.status, PaymentStatus::Succeeded);
    assert_eq!(cart_len(&p.db, p.user).await, 0);
    assert_eq!(stock_of(&p.db, p.product_id).await, 3);

    let statuses: Vec<_> = audit_trail(&p.db, p.order_id)
        .await
        .into_iter()
        .map(|u| u.status)
        .collect();
    assert_eq!(statuses, vec![OrderStatus::Pending, OrderStatus::Processing]);
}

#[tokio::test]
async fn confirm_is_idempotent() {
    let p = place_order().await;

    assert_eq!(p.orders.confirm_order(p.order_id).await.unwrap(), ConfirmOutcome::Confirmed);
    assert_eq!(
        p.orders.confirm_order(p.order_id).await.unwrap(),
        ConfirmOutcome::AlreadySucceeded
    );
    assert_eq!(audit_trail(&p.db, p.order_id).await.len(), 2);
}

#[tokio::test]
async fn concurrent_confirms_apply_once() {
    let p = place_order().await;

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let orders = p.orders.clone();
            let order_id = p.order_id;
            tokio::spawn(async move { orders.confirm_order(order_id).await })
        })
        .collect();

    let mut confirmed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() == ConfirmOutcome::Confirmed {
            confirmed += 1;
        }
    }
    assert_eq!(confirmed, 1);
    assert_eq!(audit_trail(&p.db, p.order_id).await.len(), 2);
}

#[tokio::test]
async fn confirm_unknown_order_is_not_found() {
    let p = place_order().await;
    let err = p.orders.confirm_order(Uuid::new_v4()).await.unwrap_err();
    assert_matches!(err, ServiceError::NotFound(_));
}

#[tokio::test]
async fn fail_cancels_and_returns_stock() {
    let p = place_order().await;

    let outcome = p
        .orders
        .fail_order(p.order_id, Some("Card was declined".into()))
        .await
        .unwrap();
    assert_eq!(outcome, FailOutcome::Canceled);

    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Canceled);
    let payment = payment_for(&p.db, p.order_id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_message.as_deref(), Some("Card was declined"));
    assert_eq!(stock_of(&p.db, p.product_id).await, 5);
    // the shopper keeps the cart to retry
    assert_eq!(cart_len(&p.db, p.user).await, 1);
}

#[tokio::test]
async fn fail_twice_releases_stock_once() {
    let p = place_order().await;

    assert_eq!(p.orders.fail_order(p.order_id, None).await.unwrap(), FailOutcome::Canceled);
    assert_eq!(
        p.orders.fail_order(p.order_id, None).await.unwrap(),
        FailOutcome::AlreadyCanceled
    );
    assert_eq!(stock_of(&p.db, p.product_id).await, 5);
    assert_eq!(audit_trail(&p.db, p.order_id).await.len(), 2);
}

#[tokio::test]
async fn fail_never_cancels_a_paid_order() {
    let p = place_order().await;
    p.orders.confirm_order(p.order_id).await.unwrap();

    let outcome = p.orders.fail_order(p.order_id, None).await.unwrap();
    assert_eq!(outcome, FailOutcome::AlreadySucceeded);
    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Processing);
    assert_eq!(stock_of(&p.db, p.product_id).await, 3);
}

#[tokio::test]
async fn confirm_after_fail_is_not_pending() {
    let p = place_order().await;
    p.orders.fail_order(p.order_id, None).await.unwrap();

    let outcome = p.orders.confirm_order(p.order_id).await.unwrap();
    assert_eq!(outcome, ConfirmOutcome::NotPending);
    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Canceled);
}

#[tokio::test]
async fn racing_confirm_and_fail_have_one_winner() {
    let p = place_order().await;

    let confirm = {
        let orders = p.orders.clone();
        let id = p.order_id;
        tokio::spawn(async move { orders.confirm_order(id).await })
    };
    let fail = {
        let orders = p.orders.clone();
        let id = p.order_id;
        tokio::spawn(async move { orders.fail_order(id, None).await })
    };

    let confirmed = confirm.await.unwrap().unwrap() == ConfirmOutcome::Confirmed;
    let canceled = fail.await.unwrap().unwrap() == FailOutcome::Canceled;
    assert!(confirmed ^ canceled, "exactly one transition must win");

    let expected_stock = if confirmed { 3 } else { 5 };
    assert_eq!(stock_of(&p.db, p.product_id).await, expected_stock);
    assert_eq!(audit_trail(&p.db, p.order_id).await.len(), 2);
}

#[tokio::test]
async fn fail_tolerates_deleted_product() {
    let p = place_order().await;
    product::Entity::delete_by_id(p.product_id)
        .exec(p.db.as_ref())
        .await
        .unwrap();

    let outcome = p.orders.fail_order(p.order_id, None).await.unwrap();
    assert_eq!(outcome, FailOutcome::Canceled);
    assert_eq!(payment_for(&p.db, p.order_id).await.status, PaymentStatus::Failed);
}

#[tokio::test]
async fn sweeper_releases_only_stale_orders() {
    let p = place_order().await;
    backdate_order(&p.db, p.order_id, 40).await;

    // a fresh order from someone else stays untouched
    let other_user = Uuid::new_v4();
    let other_address = seed_address(&p.db, other_user).await;
    seed_cart_line(&p.db, other_user, p.product_id, 1).await;
    let fresh = p
        .orders
        .create_order(CreateOrder {
            user_id: other_user,
            address_id: other_address.id,
            provider: PaymentProvider::Stripe,
            provider_payment_id: "pi_fresh".into(),
            expected_amount_cents: 1000,
        })
        .await
        .unwrap();
    assert_eq!(stock_of(&p.db, p.product_id).await, 2);

    let released = p.orders.release_expired_orders(30).await.unwrap();
    assert_eq!(released, 1);

    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Canceled);
    let payment = payment_for(&p.db, p.order_id).await;
    assert_eq!(payment.status, PaymentStatus::Failed);
    assert_eq!(payment.error_message.as_deref(), Some(SESSION_TIMEOUT));
    assert_eq!(stock_of(&p.db, p.product_id).await, 4);

    assert_eq!(order_by_id(&p.db, fresh.order_id).await.status, OrderStatus::Pending);

    // nothing left to release
    assert_eq!(p.orders.release_expired_orders(30).await.unwrap(), 0);
}

#[tokio::test]
async fn sweeper_skips_confirmed_orders() {
    let p = place_order().await;
    p.orders.confirm_order(p.order_id).await.unwrap();
    backdate_order(&p.db, p.order_id, 120).await;

    assert_eq!(p.orders.release_expired_orders(30).await.unwrap(), 0);
    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Processing);
}

#[tokio::test]
async fn sweeper_rejects_non_positive_ttl() {
    let p = place_order().await;

    for ttl in [0, -5] {
        let err = p.orders.release_expired_orders(ttl).await.unwrap_err();
        assert_matches!(err, ServiceError::ValidationError(_));
    }
    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Pending);
    assert_eq!(stock_of(&p.db, p.product_id).await, 3);
}

#[tokio::test]
async fn sweeper_rejects_out_of_range_ttl() {
    let p = place_order().await;

    let err = p.orders.release_expired_orders(i64::MAX).await.unwrap_err();
    assert_matches!(err, ServiceError::ValidationError(_));
    assert_eq!(order_by_id(&p.db, p.order_id).await.status, OrderStatus::Pending);
}

#[tokio::test]
async fn sweeper_walks_every_page() {
    let db = setup_db().await;
    let orders = OrderService::new(db.clone(), "usd")
        .with_sweep_concurrency(2)
        .with_sweep_page_size(2);
    let product = seed_product(&db, 500, 10).await;

    let mut stale = Vec::new();
    for i in 0..5 {
        let user = Uuid::new_v4();
        let address = seed_address(&db, user).await;
        seed_cart_line(&db, user, product.id, 1).await;
        let created = orders
            .create_order(CreateOrder {
                user_id: user,
                address_id: address.id,
                provider: PaymentProvider::Stripe,
                provider_payment_id: format!("pi_page_{}", i),
                expected_amount_cents: 500,
            })
            .await
            .unwrap();
        stale.push(created.order_id);
    }
    // identical timestamps force the pages to split on id
    set_created_at(&db, &stale, Utc::now() - Duration::minutes(60)).await;
    assert_eq!(stock_of(&db, product.id).await, 5);

    assert_eq!(orders.release_expired_orders(30).await.unwrap(), 5);
    for order_id in stale {
        assert_eq!(order_by_id(&db, order_id).await.status, OrderStatus::Canceled);
    }
    assert_eq!(stock_of(&db, product.id).await, 10);
}
