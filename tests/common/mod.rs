#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set,
};
use serde_json::Value;
use storefront_api::{
    auth::JwtKeys,
    config::AppConfig,
    db,
    entities::{address, cart_item, order, order_update, payment, product, PaymentProvider},
    services::payment_gateway::{CreateIntent, GatewayError, PaymentGateway, PaymentIntent, Refund},
    AppState,
};
use tempfile::TempDir;
use tower::ServiceExt;
use uuid::Uuid;

pub const TEST_JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_32chars";
pub const WEBHOOK_SECRET: &str = "whsec_test_signing_secret";

/// Minimal configuration suitable for tests: one in-memory SQLite connection.
pub fn test_config() -> AppConfig {
    let mut cfg = AppConfig::new(
        "sqlite::memory:".to_string(),
        TEST_JWT_SECRET.to_string(),
        "127.0.0.1".to_string(),
        18_080,
        "test".to_string(),
    );
    cfg.db_max_connections = 1;
    cfg.db_min_connections = 1;
    cfg.payment_webhook_secret = Some(WEBHOOK_SECRET.to_string());
    cfg
}

/// Fresh migrated database. The pool holds a single connection, so a test
/// must never query the pool while it holds a `UnitOfWork`.
pub async fn setup_db() -> Arc<DatabaseConnection> {
    let cfg = test_config();
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create test database");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

/// Migrated SQLite database in a file under `dir`, served by a pool of
/// `connections` so statements from different tasks really interleave.
/// sqlx waits up to its default busy timeout for the write lock.
pub async fn setup_file_db(dir: &TempDir, connections: u32) -> Arc<DatabaseConnection> {
    let mut cfg = test_config();
    cfg.database_url = format!("sqlite://{}?mode=rwc", dir.path().join("store.db").display());
    cfg.db_max_connections = connections;
    let pool = db::establish_connection_from_app_config(&cfg)
        .await
        .expect("failed to create file database");
    db::run_migrations(&pool).await.expect("migrations");
    Arc::new(pool)
}

pub async fn seed_product(db: &DatabaseConnection, amount_cents: i64, stock: i32) -> product::Model {
    let now = Utc::now();
    let id = Uuid::new_v4();
    product::ActiveModel {
        id: Set(id),
        name: Set(format!("Product {}", &id.to_string()[..8])),
        slug: Set(format!("product-{}", id)),
        amount_cents: Set(amount_cents),
        stock: Set(stock),
        main_image_key: Set(Some(format!("products/{}.webp", id))),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed product")
}

pub async fn seed_address(db: &DatabaseConnection, user_id: Uuid) -> address::Model {
    let now = Utc::now();
    address::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        name: Set("Ada Lovelace".into()),
        address_line_1: Set("12 Analytical Row".into()),
        address_line_2: Set(None),
        postal_code: Set("10115".into()),
        city: Set("Berlin".into()),
        country: Set("DE".into()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed address")
}

pub async fn seed_cart_line(
    db: &DatabaseConnection,
    user_id: Uuid,
    product_id: Uuid,
    quantity: i32,
) -> cart_item::Model {
    let now = Utc::now();
    cart_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        product_id: Set(product_id),
        quantity: Set(quantity),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed cart line")
}

pub async fn stock_of(db: &DatabaseConnection, product_id: Uuid) -> i32 {
    product::Entity::find_by_id(product_id)
        .one(db)
        .await
        .expect("query product")
        .expect("product exists")
        .stock
}

pub async fn cart_len(db: &DatabaseConnection, user_id: Uuid) -> usize {
    cart_item::Entity::find()
        .filter(cart_item::Column::UserId.eq(user_id))
        .all(db)
        .await
        .expect("query cart")
        .len()
}

pub async fn order_by_id(db: &DatabaseConnection, order_id: Uuid) -> order::Model {
    order::Entity::find_by_id(order_id)
        .one(db)
        .await
        .expect("query order")
        .expect("order exists")
}

pub async fn payment_for(db: &DatabaseConnection, order_id: Uuid) -> payment::Model {
    payment::Entity::find()
        .filter(payment::Column::OrderId.eq(order_id))
        .one(db)
        .await
        .expect("query payment")
        .expect("payment exists")
}

pub async fn audit_trail(db: &DatabaseConnection, order_id: Uuid) -> Vec<order_update::Model> {
    use sea_orm::QueryOrder;
    order_update::Entity::find()
        .filter(order_update::Column::OrderId.eq(order_id))
        .order_by_asc(order_update::Column::CreatedAt)
        .all(db)
        .await
        .expect("query updates")
}

pub async fn count_orders(db: &DatabaseConnection) -> usize {
    order::Entity::find().all(db).await.expect("orders").len()
}

pub async fn count_payments(db: &DatabaseConnection) -> usize {
    payment::Entity::find().all(db).await.expect("payments").len()
}

/// Moves an order's creation time into the past.
pub async fn backdate_order(db: &DatabaseConnection, order_id: Uuid, minutes: i64) {
    order::Entity::update_many()
        .col_expr(
            order::Column::CreatedAt,
            Expr::value(Utc::now() - Duration::minutes(minutes)),
        )
        .filter(order::Column::Id.eq(order_id))
        .exec(db)
        .await
        .expect("backdate order");
}

pub async fn set_created_at(db: &DatabaseConnection, order_ids: &[Uuid], at: DateTime<Utc>) {
    order::Entity::update_many()
        .col_expr(order::Column::CreatedAt, Expr::value(at))
        .filter(order::Column::Id.is_in(order_ids.to_vec()))
        .exec(db)
        .await
        .expect("set created_at");
}

/// Gateway fake that records every call and hands out sequential intents.
#[derive(Default)]
pub struct RecordingGateway {
    pub created: Mutex<Vec<CreateIntent>>,
    pub canceled: Mutex<Vec<String>>,
    pub refunded: Mutex<Vec<String>>,
    pub fail_refunds: bool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing_refunds() -> Arc<Self> {
        Arc::new(Self {
            fail_refunds: true,
            ..Self::default()
        })
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn canceled(&self) -> Vec<String> {
        self.canceled.lock().unwrap().clone()
    }

    pub fn refunded(&self) -> Vec<String> {
        self.refunded.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for RecordingGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let mut created = self.created.lock().unwrap();
        created.push(request);
        let n = created.len();
        Ok(PaymentIntent {
            id: format!("pi_test_{}", n),
            client_secret: format!("pi_test_{}_secret", n),
        })
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        self.canceled.lock().unwrap().push(intent_id.to_string());
        Ok(())
    }

    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError> {
        if self.fail_refunds {
            return Err(GatewayError::Api {
                status: 500,
                code: Some("api_error".into()),
                message: "upstream unavailable".into(),
            });
        }
        self.refunded.lock().unwrap().push(intent_id.to_string());
        Ok(Refund {
            id: format!("re_{}", intent_id),
        })
    }
}

/// Router plus state over a fresh database.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<RecordingGateway>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(RecordingGateway::new()).await
    }

    pub async fn with_gateway(gateway: Arc<RecordingGateway>) -> Self {
        let db = setup_db().await;
        let state = AppState::new(db, test_config(), gateway.clone());
        let router = storefront_api::api_router(state.clone());
        Self {
            router,
            state,
            gateway,
        }
    }

    pub fn db(&self) -> &DatabaseConnection {
        self.state.db.as_ref()
    }

    pub fn token_for(&self, user_id: Uuid) -> String {
        JwtKeys::from_secret(TEST_JWT_SECRET)
            .issue(user_id, Duration::minutes(10))
            .expect("issue token")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, json)
    }
}
