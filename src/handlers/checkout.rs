use axum::{
    extract::{Json, State},
    response::IntoResponse,
    routing::post,
    Router,
};

use crate::handlers::common::{created_response, validate_input};
use crate::services::checkout::CheckoutRequest;
use crate::{auth::AuthUser, errors::ServiceError, AppState};

pub fn checkout_routes() -> Router<AppState> {
    Router::new().route("/", post(checkout))
}

/// Place an order for the caller's cart. The returned client secret is used
/// to complete payment with the provider; the order stays PENDING until the
/// provider reports the outcome.
async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let result = state
        .services
        .checkout
        .checkout(user.user_id, payload.address_id)
        .await?;
    Ok(created_response(result))
}
