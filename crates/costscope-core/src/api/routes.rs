//! API routes

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{self, AppState};

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))

        // Billing analytics
        .route("/api/v1/billing/timeseries", post(handlers::time_series))
        .route("/api/v1/billing/entities", post(handlers::entities))
        .route("/api/v1/billing/sunburst", post(handlers::sunburst))
        .route("/api/v1/billing/trend", post(handlers::trend))
        .route("/api/v1/billing/filter-values", post(handlers::filter_values))
        .route("/api/v1/billing/explain", post(handlers::explain))

        .with_state(state)
}
