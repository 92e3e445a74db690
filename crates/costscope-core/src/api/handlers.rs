//! API handlers for the HTTP REST API

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::analytics::BillingAnalytics;
use crate::error::Error;
use crate::models::{
    BillingQuery, EntityTable, FilterValues, StackedTimeSeries, SunburstChart, TrendStats,
};
use crate::query::CompiledQuery;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Request pipeline
    pub analytics: Arc<BillingAnalytics>,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

/// Map a pipeline error onto a status code
fn error_response(e: Error) -> (StatusCode, String) {
    let status = match &e {
        Error::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        e if e.is_client_error() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status != StatusCode::BAD_REQUEST {
        warn!(%status, error = %e, "Billing request failed");
    }
    (status, e.to_string())
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always `ok` when the process answers
    pub status: String,
    /// Crate version
    pub version: String,
    /// Whether the billing store is reachable
    pub database: bool,
}

/// Health check endpoint
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: state.analytics.is_available().await,
    })
}

/// Stacked time series
pub async fn time_series(
    State(state): State<AppState>,
    Json(query): Json<BillingQuery>,
) -> ApiResult<StackedTimeSeries> {
    state
        .analytics
        .time_series(&query)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Flat entity table
pub async fn entities(
    State(state): State<AppState>,
    Json(query): Json<BillingQuery>,
) -> ApiResult<EntityTable> {
    state
        .analytics
        .entities(&query)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Sunburst request: a billing query plus chart options
#[derive(Debug, Deserialize)]
pub struct SunburstRequest {
    /// Query
    #[serde(flatten)]
    pub query: BillingQuery,
    /// Emit the root node
    #[serde(default)]
    pub add_root: bool,
}

/// Sunburst chart
pub async fn sunburst(
    State(state): State<AppState>,
    Json(req): Json<SunburstRequest>,
) -> ApiResult<SunburstChart> {
    state
        .analytics
        .sunburst(&req.query, req.add_root)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Trend and forecast statistics
pub async fn trend(
    State(state): State<AppState>,
    Json(query): Json<BillingQuery>,
) -> ApiResult<TrendStats> {
    state
        .analytics
        .trend(&query)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Distinct dimension values
pub async fn filter_values(
    State(state): State<AppState>,
    Json(query): Json<BillingQuery>,
) -> ApiResult<FilterValues> {
    state
        .analytics
        .filter_values(&query)
        .await
        .map(Json)
        .map_err(error_response)
}

/// Compiled SQL and field metadata, without executing
pub async fn explain(
    State(state): State<AppState>,
    Json(query): Json<BillingQuery>,
) -> ApiResult<CompiledQuery> {
    state
        .analytics
        .explain(&query)
        .await
        .map(Json)
        .map_err(error_response)
}
