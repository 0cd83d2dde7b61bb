//! Storefront API library
//!
//! Order, payment and stock reconciliation for the storefront: checkout with
//! stock reservation, payment webhook reconciliation and expiry of abandoned
//! orders.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod handlers;
pub mod migrator;
pub mod repositories;
pub mod services;
pub mod tracing;
pub mod webhooks;
pub mod workers;

use axum::{extract::FromRef, routing::get, Router};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use std::sync::Arc;

use crate::auth::JwtKeys;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub jwt: JwtKeys,
    pub services: handlers::AppServices,
}

impl AppState {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: config::AppConfig,
        gateway: Arc<dyn services::PaymentGateway>,
    ) -> Self {
        let services = handlers::AppServices::new(db.clone(), &config, gateway);
        Self {
            jwt: JwtKeys::from_secret(&config.jwt_secret),
            db,
            config,
            services,
        }
    }
}

impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

/// Envelope for successful JSON responses.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Routes mounted under `/api/v1`.
pub fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Status and health endpoints
        .route("/status", get(handlers::health::api_status))
        .route("/health", get(handlers::health::health_check))
        .nest("/cart", handlers::cart::cart_routes())
        .nest("/checkout", handlers::checkout::checkout_routes())
        .nest("/orders", handlers::orders::order_routes())
        // Payment webhook (does not require auth, but signature-verified)
        .route(
            "/payments/webhook",
            axum::routing::post(handlers::payment_webhooks::payment_webhook),
        )
}

/// Full application router with request ids and HTTP tracing.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_v1_routes())
        .layer(crate::tracing::configure_http_tracing())
        .layer(axum::middleware::from_fn(crate::tracing::request_id_middleware))
        .with_state(state)
}
