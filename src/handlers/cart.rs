use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, put},
    Router,
};
use serde::Serialize;
use uuid::Uuid;

use crate::handlers::common::{
    created_response, no_content_response, success_response, validate_input,
};
use crate::services::cart::{AddCartItem, UpdateCartItem};
use crate::{auth::AuthUser, errors::ServiceError, AppState};

/// Creates the router for cart endpoints
pub fn cart_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(get_cart).delete(clear_cart))
        .route("/items", axum::routing::post(add_item))
        .route("/items/:id", put(update_item).delete(remove_item))
}

#[derive(Debug, Serialize)]
struct ClearedCart {
    removed: u64,
}

/// Get the caller's cart priced against current products
async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let snapshot = state.services.cart.snapshot(user.user_id).await?;
    Ok(success_response(snapshot))
}

async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Json(payload): Json<AddCartItem>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let line = state.services.cart.add_item(user.user_id, payload).await?;
    Ok(created_response(line))
}

async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
    Json(payload): Json<UpdateCartItem>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;
    let line = state
        .services
        .cart
        .update_item(user.user_id, item_id, payload)
        .await?;
    Ok(success_response(line))
}

async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(item_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.cart.remove_item(user.user_id, item_id).await?;
    Ok(no_content_response())
}

async fn clear_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ServiceError> {
    let removed = state.services.cart.clear(user.user_id).await?;
    Ok(success_response(ClearedCart { removed }))
}
