use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::error::DbErr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::payment_gateway::GatewayError;

fn current_request_id() -> Option<String> {
    crate::tracing::current_request_id().map(|rid| rid.as_str().to_string())
}

/// Body returned for every failed request.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g. "Not Found", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    /// RFC 3339 timestamp of the failure
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The resource exists but belongs to someone else.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cart is empty")]
    EmptyCart,

    #[error("Cart was modified during checkout. Please try again.")]
    AmountMismatch { expected: i64, actual: i64 },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    /// An order without its payment row. Always a data-integrity failure.
    #[error("Payment record missing for order {0}")]
    PaymentRecordMissing(Uuid),

    #[error("Invalid signature: {0}")]
    SignatureInvalid(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::ExternalServiceError(err.to_string())
    }
}

impl<E> From<sea_orm::TransactionError<E>> for ServiceError
where
    E: Into<ServiceError> + std::error::Error,
{
    fn from(err: sea_orm::TransactionError<E>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(db) => ServiceError::DatabaseError(db),
            sea_orm::TransactionError::Transaction(inner) => inner.into(),
        }
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::ValidationError(_)
            | Self::BadRequest(_)
            | Self::EmptyCart
            | Self::SignatureInvalid(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::AmountMismatch { .. } => StatusCode::CONFLICT,
            Self::InsufficientStock(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::ExternalServiceError(_) => StatusCode::BAD_GATEWAY,
            Self::DatabaseError(_)
            | Self::PaymentRecordMissing(_)
            | Self::InternalError(_)
            | Self::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to API callers. Internal failures collapse to
    /// generic text; the detail only goes to the log.
    pub fn response_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::PaymentRecordMissing(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Payment service unavailable".to_string(),
            Self::SignatureInvalid(_) => "Invalid signature".to_string(),
            _ => self.to_string(),
        }
    }

    /// Errors the caller can fix by retrying or changing input, as opposed to
    /// infrastructure failures.
    pub fn is_business(&self) -> bool {
        self.status_code().is_client_error()
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }

        let body = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            request_id: current_request_id(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
