//! Device rental server
//!
//! Inventory, rental and repair engine for assistive devices lent out by
//! welfare facilities, exposed as a REST JSON API.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod repository;
pub mod services;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub services: Arc<services::Services>,
}

/// Create the application router with all routes
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // API v1 routes
    let api_v1 = Router::new()
        // Health check
        .route("/health", get(api::health::health_check))
        .route("/ready", get(api::health::readiness_check))
        // Device items
        .route("/devices", get(api::devices::list_devices).post(api::devices::create_device))
        .route(
            "/devices/:id",
            get(api::devices::get_device)
                .put(api::devices::update_device)
                .delete(api::devices::delete_device),
        )
        // Aggregate counters
        .route("/aggregates", get(api::devices::list_aggregates))
        .route("/aggregates/reconcile", post(api::devices::reconcile_aggregates))
        .route("/aggregates/:device_type", get(api::devices::get_aggregate))
        // Rentals
        .route("/rentals", get(api::rentals::list_rentals).post(api::rentals::create_rental))
        .route("/rentals/overdue", get(api::rentals::list_overdue))
        .route("/rentals/overdue/mark", post(api::rentals::mark_overdue))
        .route("/rentals/:id", get(api::rentals::get_rental))
        .route("/rentals/:id/return", post(api::rentals::return_rental))
        // Repairs
        .route("/repairs", get(api::repairs::list_repairs).post(api::repairs::create_repair))
        .route(
            "/repairs/:id",
            get(api::repairs::get_repair)
                .put(api::repairs::update_repair)
                .delete(api::repairs::delete_repair),
        )
        .with_state(state);

    // OpenAPI documentation
    let openapi = api::openapi::create_openapi_router();

    Router::new()
        .nest("/api/v1", api_v1)
        .merge(openapi)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(cors),
        )
}
