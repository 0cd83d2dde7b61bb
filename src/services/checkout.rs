use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::ServiceError;
use crate::services::cart::CartService;
use crate::services::orders::{CreateOrder, OrderService};
use crate::services::payment_gateway::{CreateIntent, IntentMetadata, PaymentGateway};

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub address_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutResult {
    /// Token the client uses to complete the payment with the provider
    pub client_secret: String,
    pub order_id: Uuid,
}

/// Turns a cart into a PENDING order backed by a provider payment intent.
///
/// The intent is created first. If the order cannot be placed afterwards the
/// intent is canceled before the error is returned, so no chargeable intent
/// is left without an order.
#[derive(Clone)]
pub struct CheckoutService {
    carts: CartService,
    orders: OrderService,
    gateway: Arc<dyn PaymentGateway>,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        carts: CartService,
        orders: OrderService,
        gateway: Arc<dyn PaymentGateway>,
        currency: impl Into<String>,
    ) -> Self {
        Self {
            carts,
            orders,
            gateway,
            currency: currency.into(),
        }
    }

    #[instrument(skip(self))]
    pub async fn checkout(
        &self,
        user_id: Uuid,
        address_id: Uuid,
    ) -> Result<CheckoutResult, ServiceError> {
        let snapshot = self.carts.snapshot(user_id).await?;
        if snapshot.is_empty() {
            return Err(ServiceError::EmptyCart);
        }
        let expected_amount_cents = snapshot.total_amount_cents;

        let intent = self
            .gateway
            .create_intent(CreateIntent {
                amount_cents: expected_amount_cents,
                currency: self.currency.clone(),
                metadata: IntentMetadata {
                    user_id,
                    address_id,
                    expected_amount_cents,
                },
            })
            .await?;

        let placed = self
            .orders
            .create_order(CreateOrder {
                user_id,
                address_id,
                provider: self.gateway.provider(),
                provider_payment_id: intent.id.clone(),
                expected_amount_cents,
            })
            .await;

        match placed {
            Ok(created) => {
                counter!("storefront_checkout.completed", 1);
                info!(order_id = %created.order_id, intent_id = %intent.id, "checkout completed");
                Ok(CheckoutResult {
                    client_secret: intent.client_secret,
                    order_id: created.order_id,
                })
            }
            Err(err) => {
                counter!("storefront_checkout.compensated", 1);
                warn!(intent_id = %intent.id, error = %err, "order creation failed, canceling intent");
                if let Err(cancel_err) = self.gateway.cancel_intent(&intent.id).await {
                    error!(intent_id = %intent.id, error = %cancel_err, "failed to cancel payment intent");
                }
                Err(err)
            }
        }
    }
}
