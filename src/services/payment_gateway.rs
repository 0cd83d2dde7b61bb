use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::PaymentProvider;

/// Failures talking to the payment provider. The `Display` text may contain
/// provider diagnostics and is only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment provider request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("payment provider rejected the request with status {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    #[error("payment provider is not configured")]
    NotConfigured,
}

/// Opaque tags stored on the intent so a webhook can be traced back to the
/// checkout that created it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentMetadata {
    pub user_id: Uuid,
    pub address_id: Uuid,
    pub expected_amount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateIntent {
    pub amount_cents: i64,
    pub currency: String,
    pub metadata: IntentMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Refund {
    pub id: String,
}

/// External payment provider. Implementations must be cheap to share across
/// tasks.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> PaymentProvider;

    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError>;

    /// Refunds the full captured amount of an intent.
    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError>;
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    error: StripeErrorDetail,
}

#[derive(Debug, Deserialize)]
struct StripeErrorDetail {
    code: Option<String>,
    message: Option<String>,
}

/// Stripe REST client (form-encoded requests, bearer secret key).
#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
}

impl StripeGateway {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
        })
    }

    pub fn from_config(cfg: &AppConfig) -> Result<Self, GatewayError> {
        Self::new(
            cfg.stripe_api_base.clone(),
            cfg.stripe_secret_key.clone(),
            cfg.gateway_timeout(),
        )
    }

    async fn post_form<T>(
        &self,
        path: &str,
        form: &[(&str, String)],
        idempotency_key: Option<String>,
    ) -> Result<T, GatewayError>
    where
        T: serde::de::DeserializeOwned,
    {
        if self.secret_key.is_empty() {
            return Err(GatewayError::NotConfigured);
        }

        let url = format!("{}{}", self.api_base, path);
        debug!(%url, "calling payment provider");

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form);
        if let Some(key) = idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = match serde_json::from_str::<StripeErrorBody>(&body) {
            Ok(parsed) => (
                parsed.error.code,
                parsed.error.message.unwrap_or_else(|| status.to_string()),
            ),
            Err(_) => (None, status.to_string()),
        };
        warn!(status = status.as_u16(), code = ?code, "payment provider returned an error");

        Err(GatewayError::Api {
            status: status.as_u16(),
            code,
            message,
        })
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    fn provider(&self) -> PaymentProvider {
        PaymentProvider::Stripe
    }

    #[instrument(skip(self, request), fields(amount = request.amount_cents))]
    async fn create_intent(&self, request: CreateIntent) -> Result<PaymentIntent, GatewayError> {
        let form = [
            ("amount", request.amount_cents.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("automatic_payment_methods[enabled]", "true".to_string()),
            ("metadata[userId]", request.metadata.user_id.to_string()),
            ("metadata[addressId]", request.metadata.address_id.to_string()),
            (
                "metadata[expectedAmountCents]",
                request.metadata.expected_amount_cents.to_string(),
            ),
        ];
        self.post_form("/v1/payment_intents", &form, None).await
    }

    #[instrument(skip(self))]
    async fn cancel_intent(&self, intent_id: &str) -> Result<(), GatewayError> {
        let path = format!("/v1/payment_intents/{}/cancel", intent_id);
        let _: serde_json::Value = self.post_form(&path, &[], None).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn refund(&self, intent_id: &str) -> Result<Refund, GatewayError> {
        let form = [("payment_intent", intent_id.to_string())];
        // one refund per intent even if the webhook is delivered twice
        let key = format!("refund-{}", intent_id);
        self.post_form("/v1/refunds", &form, Some(key)).await
    }
}
