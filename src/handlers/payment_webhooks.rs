use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use metrics::counter;
use tracing::{info, warn};

use crate::webhooks::payment_events::{verify_signature, PaymentEvent, SIGNATURE_HEADER};
use crate::{errors::ServiceError, AppState};

// POST /api/v1/payments/webhook
//
// 400 only on a bad signature. A signed body that does not parse as an event
// and anything the reconciler finishes, including no-ops and business-rule
// errors, is acknowledged with 200 so the provider stops retrying;
// infrastructure failures return 5xx so it tries again later.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let secret = state
        .config
        .payment_webhook_secret
        .as_deref()
        .unwrap_or_default();
    let signature = headers.get(SIGNATURE_HEADER).and_then(|h| h.to_str().ok());

    if let Err(e) = verify_signature(
        signature,
        &body,
        secret,
        state.config.payment_webhook_tolerance_secs,
        chrono::Utc::now().timestamp(),
    ) {
        counter!("storefront_webhooks.signature_rejected", 1);
        warn!(error = %e, "Payment webhook signature verification failed");
        return Err(ServiceError::SignatureInvalid(e.to_string()));
    }

    let event = match PaymentEvent::parse(&body) {
        Ok(event) => event,
        Err(e) => {
            counter!("storefront_webhooks.unparseable", 1);
            warn!(error = %e, "Signed payment webhook payload is not an event; acknowledging");
            return Ok((StatusCode::OK, "ok").into_response());
        }
    };

    match state.services.reconciler.handle(&event).await {
        Ok(outcome) => {
            info!(event_id = %event.id, outcome = ?outcome, "payment webhook handled");
        }
        Err(err) if err.is_business() => {
            warn!(event_id = %event.id, error = %err, "payment webhook acknowledged with business error");
        }
        Err(err) => return Err(err),
    }

    Ok((StatusCode::OK, "ok").into_response())
}
