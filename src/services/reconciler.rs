use metrics::counter;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use crate::entities::{payment, OrderStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::repositories::{OrderRepository, PaymentRepository};
use crate::services::orders::{ConfirmOutcome, FailOutcome, OrderService};
use crate::services::payment_errors::sanitize_payment_error;
use crate::services::payment_gateway::PaymentGateway;
use crate::webhooks::payment_events::{PaymentEvent, PaymentEventKind};

/// Note stored on a payment that was refunded because its order was already
/// gone when the provider reported success.
pub const LATE_SUCCESS_REFUND_NOTE: &str =
    "Auto-refund: payment succeeded after order was canceled/expired";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Confirmed,
    /// Redelivered success for a payment that is already SUCCEEDED.
    AlreadySucceeded,
    /// Success arrived for an order that was no longer PENDING.
    Refunded,
    AlreadyRefunded,
    Failed(FailOutcome),
    /// No payment row carries the event's intent id.
    UnknownIntent,
    /// Event type this service does not act on.
    Ignored,
}

/// Applies payment provider events to orders.
///
/// Redelivery and out-of-order delivery are expected: every branch is a
/// no-op when the state it would produce is already in place.
#[derive(Clone)]
pub struct PaymentReconciler {
    db: Arc<DatabaseConnection>,
    orders: OrderService,
    gateway: Arc<dyn PaymentGateway>,
}

impl PaymentReconciler {
    pub fn new(
        db: Arc<DatabaseConnection>,
        orders: OrderService,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            db,
            orders,
            gateway,
        }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, event_type = %event.event_type))]
    pub async fn handle(&self, event: &PaymentEvent) -> Result<ReconcileOutcome, ServiceError> {
        let kind = event.kind();
        if kind == PaymentEventKind::Other {
            info!("ignoring payment event");
            return Ok(ReconcileOutcome::Ignored);
        }

        let payment = PaymentRepository::new(self.db.as_ref())
            .find_by_provider_id(event.intent_id())
            .await?;
        let Some(payment) = payment else {
            warn!(intent_id = %event.intent_id(), "payment event for unknown intent");
            return Ok(ReconcileOutcome::UnknownIntent);
        };

        let outcome = match kind {
            PaymentEventKind::Succeeded => self.on_succeeded(payment).await?,
            PaymentEventKind::Failed => {
                let failure = event.failure();
                let reason = sanitize_payment_error(
                    failure.and_then(|f| f.message.as_deref()),
                    failure.and_then(|f| f.code.as_deref()),
                );
                ReconcileOutcome::Failed(
                    self.orders
                        .fail_order(payment.order_id, Some(reason.to_string()))
                        .await?,
                )
            }
            PaymentEventKind::Other => ReconcileOutcome::Ignored,
        };

        counter!("storefront_webhooks.reconciled", 1);
        info!(outcome = ?outcome, "payment event reconciled");
        Ok(outcome)
    }

    async fn on_succeeded(&self, payment: payment::Model) -> Result<ReconcileOutcome, ServiceError> {
        match payment.status {
            PaymentStatus::Succeeded => return Ok(ReconcileOutcome::AlreadySucceeded),
            PaymentStatus::Refunded => return Ok(ReconcileOutcome::AlreadyRefunded),
            PaymentStatus::Pending | PaymentStatus::Failed => {}
        }

        let order = OrderRepository::new(self.db.as_ref())
            .find(payment.order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound("Order not found".to_string()))?;

        if order.status == OrderStatus::Pending {
            match self.orders.confirm_order(order.id).await? {
                ConfirmOutcome::Confirmed => return Ok(ReconcileOutcome::Confirmed),
                ConfirmOutcome::AlreadySucceeded => return Ok(ReconcileOutcome::AlreadySucceeded),
                // the sweeper canceled it between our read and the confirm
                ConfirmOutcome::NotPending => {}
            }
        }

        self.refund_late_success(payment).await
    }

    async fn refund_late_success(
        &self,
        payment: payment::Model,
    ) -> Result<ReconcileOutcome, ServiceError> {
        warn!(
            order_id = %payment.order_id,
            intent_id = %payment.provider_payment_id,
            "payment succeeded for an order that is no longer pending, refunding"
        );

        let refund = self.gateway.refund(&payment.provider_payment_id).await?;
        let recorded = PaymentRepository::new(self.db.as_ref())
            .mark_refunded(payment.id, refund.id, LATE_SUCCESS_REFUND_NOTE)
            .await?;

        if recorded {
            counter!("storefront_payments.refunded", 1);
            Ok(ReconcileOutcome::Refunded)
        } else {
            Ok(ReconcileOutcome::AlreadyRefunded)
        }
    }
}
