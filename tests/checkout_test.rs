mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use common::*;
use mockall::mock;
use sea_orm::DatabaseConnection;
use storefront_api::entities::{OrderStatus, PaymentProvider, PaymentStatus};
use storefront_api::errors::ServiceError;
use storefront_api::services::payment_gateway::{
    CreateIntent, GatewayError, PaymentGateway, PaymentIntent, Refund,
};
use storefront_api::services::{CartService, CheckoutService, OrderService};
use uuid::Uuid;

mock! {
    pub Gateway {}

    #[async_trait]
    impl PaymentGateway for Gateway {
        fn provider(&self) -> PaymentProvider;
        async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError>;
        async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError>;
        async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError>;
    }
}

fn checkout_service(db: &Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>) -> CheckoutService {
    CheckoutService::new(
        CartService::new(db.clone()),
        OrderService::new(db.clone(), "usd"),
        gateway,
        "usd",
    )
}

fn mock_with_intent(intent_id: &'static str) -> MockGateway {
    let mut gateway = MockGateway::new();
    gateway.expect_provider().return_const(PaymentProvider::Stripe);
    gateway.expect_create_intent().times(1).returning(move |_| {
        Ok(PaymentIntent {
            id: intent_id.to_string(),
            client_secret: format!("{}_secret", intent_id),
        })
    });
    gateway
}

#[tokio::test]
async fn checkout_creates_intent_then_order() {
    let db = setup_db().await;
    let gateway = RecordingGateway::new();
    let checkout = checkout_service(&db, gateway.clone());
    let user = Uuid::new_v4();
    let product = seed_product(&db, 1000, 5).await;
    let address = seed_address(&db, user).await;
    seed_cart_line(&db, user, product.id, 2).await;

    let result = checkout.checkout(user, address.id).await.unwrap();
    assert_eq!(result.client_secret, "pi_test_1_secret");

    let intent = gateway.created.lock().unwrap()[0].clone();
    assert_eq!(intent.amount_cents, 2000);
    assert_eq!(intent.currency, "usd");
    assert_eq!(intent.metadata.user_id, user);
    assert_eq!(intent.metadata.address_id, address.id);
    assert_eq!(intent.metadata.expected_amount_cents, 2000);

    let order = order_by_id(&db, result.order_id).await;
    assert_eq!(order.status, OrderStatus::Pending);
    let payment = payment_for(&db, result.order_id).await;
    assert_eq!(payment.provider_payment_id, "pi_test_1");
    assert_eq!(payment.status, PaymentStatus::Pending);
    assert!(gateway.canceled().is_empty());
}

#[tokio::test]
async fn empty_cart_never_reaches_the_gateway() {
    let db = setup_db().await;
    let mut gateway = MockGateway::new();
    gateway.expect_create_intent().times(0);
    gateway.expect_cancel_intent().times(0);
    let checkout = checkout_service(&db, Arc::new(gateway));
    let user = Uuid::new_v4();
    let address = seed_address(&db, user).await;

    let err = checkout.checkout(user, address.id).await.unwrap_err();
    assert_matches!(err, ServiceError::EmptyCart);
}

#[tokio::test]
async fn failed_order_cancels_the_intent_exactly_once() {
    let db = setup_db().await;
    let mut gateway = mock_with_intent("pi_short");
    gateway
        .expect_cancel_intent()
        .withf(|intent_id| intent_id == "pi_short")
        .times(1)
        .returning(|_| Ok(()));
    let checkout = checkout_service(&db, Arc::new(gateway));

    let user = Uuid::new_v4();
    let product = seed_product(&db, 1000, 1).await;
    let address = seed_address(&db, user).await;
    seed_cart_line(&db, user, product.id, 2).await;

    let err = checkout.checkout(user, address.id).await.unwrap_err();
    assert_matches!(err, ServiceError::InsufficientStock(_));
    assert_eq!(count_orders(&db).await, 0);
    assert_eq!(stock_of(&db, product.id).await, 1);
}

#[tokio::test]
async fn cancel_failure_does_not_mask_the_original_error() {
    let db = setup_db().await;
    let mut gateway = mock_with_intent("pi_foreign");
    gateway.expect_cancel_intent().times(1).returning(|_| {
        Err(GatewayError::Api {
            status: 500,
            code: None,
            message: "upstream unavailable".into(),
        })
    });
    let checkout = checkout_service(&db, Arc::new(gateway));

    let user = Uuid::new_v4();
    let product = seed_product(&db, 1000, 5).await;
    let foreign_address = seed_address(&db, Uuid::new_v4()).await;
    seed_cart_line(&db, user, product.id, 1).await;

    let err = checkout.checkout(user, foreign_address.id).await.unwrap_err();
    assert_matches!(err, ServiceError::Forbidden(_));
}

#[tokio::test]
async fn gateway_outage_creates_nothing() {
    let db = setup_db().await;
    let mut gateway = MockGateway::new();
    gateway.expect_create_intent().times(1).returning(|_| {
        Err(GatewayError::Api {
            status: 503,
            code: Some("api_error".into()),
            message: "try later".into(),
        })
    });
    gateway.expect_cancel_intent().times(0);
    let checkout = checkout_service(&db, Arc::new(gateway));

    let user = Uuid::new_v4();
    let product = seed_product(&db, 1000, 5).await;
    let address = seed_address(&db, user).await;
    seed_cart_line(&db, user, product.id, 1).await;

    let err = checkout.checkout(user, address.id).await.unwrap_err();
    assert_matches!(err, ServiceError::ExternalServiceError(_));
    assert_eq!(count_orders(&db).await, 0);
    assert_eq!(stock_of(&db, product.id).await, 5);
}
