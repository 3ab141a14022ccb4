use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;
use utoipa::ToSchema;

use crate::realtime::registry::SubscriptionRegistry;
use crate::tracking::store::BusStateStore;

#[derive(Clone)]
pub struct HealthState {
    pub store: Arc<BusStateStore>,
    pub registry: Arc<SubscriptionRegistry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Whether the service is running
    pub healthy: bool,
    /// Number of buses currently tracked in memory
    pub active_buses: usize,
    /// Number of routes with at least one live passenger subscriber
    pub subscribed_routes: usize,
}

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Service health status", body = HealthResponse)
    ),
    tag = "health"
)]
pub async fn health_check(State(state): State<HealthState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        healthy: true,
        active_buses: state.store.active_count(),
        subscribed_routes: state.registry.subscribed_route_count(),
    })
}

pub fn router(store: Arc<BusStateStore>, registry: Arc<SubscriptionRegistry>) -> Router {
    let state = HealthState { store, registry };
    Router::new().route("/", get(health_check)).with_state(state)
}
