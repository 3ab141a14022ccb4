use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};

use crate::api::{internal_error, ErrorResponse};
use crate::catalog::CatalogReader;
use crate::tracking::departures::{departures_for_station, DepartureHint};
use crate::tracking::store::BusStateStore;

#[derive(Clone)]
pub struct StationsState {
    pub catalog: Arc<CatalogReader>,
    pub store: Arc<BusStateStore>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct DeparturesQuery {
    /// Maximum number of hints to return. Defaults to 10.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StationDeparturesResponse {
    pub station_id: i64,
    pub departures: Vec<DepartureHint>,
    pub timestamp: String,
}

/// Buses currently approaching a station, soonest first
#[utoipa::path(
    get,
    path = "/api/stations/{station_id}/departures",
    params(
        ("station_id" = i64, Path, description = "Stop id the hints are computed for"),
        DeparturesQuery
    ),
    responses(
        (status = 200, description = "Approaching buses, soonest first", body = StationDeparturesResponse),
        (status = 500, description = "Catalog unavailable", body = ErrorResponse)
    ),
    tag = "stations"
)]
pub async fn get_station_departures(
    State(state): State<StationsState>,
    Path(station_id): Path<i64>,
    Query(query): Query<DeparturesQuery>,
) -> Result<Json<StationDeparturesResponse>, (StatusCode, Json<ErrorResponse>)> {
    let limit = query.limit.unwrap_or(10);
    let departures = departures_for_station(&state.catalog, &state.store, station_id, limit)
        .await
        .map_err(internal_error)?;

    Ok(Json(StationDeparturesResponse {
        station_id,
        departures,
        timestamp: Utc::now().to_rfc3339(),
    }))
}

pub fn router(catalog: Arc<CatalogReader>, store: Arc<BusStateStore>) -> Router {
    let state = StationsState { catalog, store };
    Router::new()
        .route("/{station_id}/departures", get(get_station_departures))
        .with_state(state)
}
