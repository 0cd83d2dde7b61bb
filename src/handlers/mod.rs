pub mod cart;
pub mod checkout;
pub mod common;
pub mod health;
pub mod orders;
pub mod payment_webhooks;

use sea_orm::DatabaseConnection;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::services::{
    CartService, CheckoutService, OrderService, PaymentGateway, PaymentReconciler,
};

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub cart: CartService,
    pub orders: OrderService,
    pub checkout: CheckoutService,
    pub reconciler: PaymentReconciler,
}

impl AppServices {
    /// Wires every service over one pool and one payment gateway.
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let currency = config.default_currency.clone();
        let cart = CartService::new(db.clone());
        let orders = OrderService::new(db.clone(), currency.clone())
            .with_sweep_concurrency(config.order_expiry_concurrency);
        let checkout = CheckoutService::new(cart.clone(), orders.clone(), gateway.clone(), currency);
        let reconciler = PaymentReconciler::new(db, orders.clone(), gateway);

        Self {
            cart,
            orders,
            checkout,
            reconciler,
        }
    }
}
