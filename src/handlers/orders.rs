use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use uuid::Uuid;

use crate::handlers::common::success_response;
use crate::{auth::AuthUser, errors::ServiceError, AppState};

/// Creates the router for order endpoints
pub fn order_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:id", get(get_order))
}

/// List the caller's orders, newest first
async fn list_orders(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let orders = state.services.orders.list_user_orders(user.user_id).await?;
    Ok(success_response(orders))
}

/// Get one order with items, address, payment and status history
async fn get_order(
    State(state): State<AppState>,
    user: AuthUser,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(order_id, user.user_id)
        .await?;
    Ok(success_response(order))
}
