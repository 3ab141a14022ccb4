//! Station-directed read path: which buses are approaching a station, and
//! roughly when. Serves the REST front-door, not the realtime feed.

use crate::catalog::{CatalogError, CatalogReader, Stop};
use crate::geo;
use crate::tracking::store::BusStateStore;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use utoipa::ToSchema;

/// Buses slower than this have no meaningful ETA; their hints sort last.
const MIN_ESTIMATION_VELOCITY_MS: f64 = 0.5;

/// One approaching bus.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DepartureHint {
    pub subline_id: i64,
    pub bus_id: String,
    pub lat: f64,
    pub lng: f64,
    /// Current velocity, m/s.
    pub velocity: f64,
    /// Straight-line distance from the bus to the station, meters.
    pub distance_meters: f64,
    /// Estimated seconds until arrival; absent while the bus is (nearly)
    /// standing still.
    pub estimated_seconds: Option<f64>,
}

/// Buses currently tracked on a subline serving `station_id` that have not
/// yet passed the station, ordered soonest-first and truncated to `limit`.
pub async fn departures_for_station(
    catalog: &CatalogReader,
    store: &BusStateStore,
    station_id: i64,
    limit: usize,
) -> Result<Vec<DepartureHint>, CatalogError> {
    let serving = catalog.sublines_serving_stop(station_id).await?;
    if serving.is_empty() {
        return Ok(Vec::new());
    }

    let mut stops_by_subline: HashMap<i64, Vec<Stop>> = HashMap::new();
    for subline_id in serving {
        if let Some(stops) = catalog.stops_of_subline(subline_id).await? {
            stops_by_subline.insert(subline_id, stops);
        }
    }

    let mut hints = Vec::new();
    for state in store.snapshot().await {
        let Some(subline_id) = state.current_subline_id else {
            continue;
        };
        let Some(stops) = stops_by_subline.get(&subline_id) else {
            continue;
        };
        let Some(position) = state.current_position() else {
            continue;
        };

        let Some(closest_idx) = closest_stop_index(stops, position) else {
            continue;
        };
        let Some(station_idx) = stops.iter().position(|s| s.id == station_id) else {
            continue;
        };
        // Already at or past the station.
        if station_idx <= closest_idx {
            continue;
        }

        let Ok(distance_meters) = geo::distance(position, stops[station_idx].position()) else {
            continue;
        };
        let estimated_seconds = if state.last_velocity > MIN_ESTIMATION_VELOCITY_MS {
            Some(distance_meters / state.last_velocity)
        } else {
            None
        };

        hints.push(DepartureHint {
            subline_id,
            bus_id: state.bus_id,
            lat: position.lat,
            lng: position.lng,
            velocity: state.last_velocity,
            distance_meters,
            estimated_seconds,
        });
    }

    hints.sort_by(|a, b| match (a.estimated_seconds, b.estimated_seconds) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    hints.truncate(limit);
    Ok(hints)
}

fn closest_stop_index(stops: &[Stop], position: crate::geo::Coordinate) -> Option<usize> {
    let mut closest: Option<(usize, f64)> = None;
    for (idx, stop) in stops.iter().enumerate() {
        let Ok(d) = geo::distance(position, stop.position()) else {
            continue;
        };
        if closest.is_none_or(|(_, best)| d < best) {
            closest = Some((idx, d));
        }
    }
    closest.map(|(idx, _)| idx)
}
