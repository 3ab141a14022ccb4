//! Per-frame telemetry processing: history update, route-change reset,
//! direction inference, arrival estimation and broadcast.
//!
//! One inbound driver frame triggers one pass through `process_frame`,
//! which may emit zero or more feed messages. The pass holds the bus's
//! state lock from load to commit, so frames for one bus are strictly
//! serialized and their output order is the broadcast order.

use crate::catalog::{CatalogReader, Stop};
use crate::config::TrackingConfig;
use crate::geo::{self, Coordinate};
use crate::realtime::broadcaster::Broadcaster;
use crate::realtime::messages::{
    compact_time, compact_timestamp, FeedMessage, StopEstimate, UNKNOWN_MARKER,
};
use crate::tracking::matcher;
use crate::tracking::store::{BusStateStore, CachedStops, TrackSample};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::warn;

/// Rejections visible to the driver client as `{"type":"error",...}`.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(String),
    #[error("missing busId")]
    MissingBusId,
    #[error("lat/lng must be finite numbers")]
    NonFiniteCoordinate,
    #[error("unparsable timestamp: {0}")]
    BadTimestamp(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFrame {
    route_id: i64,
    bus_id: Option<String>,
    lat: f64,
    lng: f64,
    timestamp: String,
    /// m/s.
    velocity: f64,
}

/// A validated driver telemetry frame.
#[derive(Debug, Clone)]
pub struct TelemetryFrame {
    pub route_id: i64,
    pub bus_id: String,
    pub position: Coordinate,
    pub timestamp: DateTime<Utc>,
    /// m/s.
    pub velocity: f64,
}

impl TelemetryFrame {
    /// Parse and validate one inbound text frame.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame =
            serde_json::from_str(text).map_err(|e| FrameError::Malformed(e.to_string()))?;

        let bus_id = match raw.bus_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => return Err(FrameError::MissingBusId),
        };

        let position = Coordinate::new(raw.lat, raw.lng);
        if !position.is_finite() {
            return Err(FrameError::NonFiniteCoordinate);
        }

        let timestamp = DateTime::parse_from_rfc3339(&raw.timestamp)
            .map_err(|_| FrameError::BadTimestamp(raw.timestamp.clone()))?
            .with_timezone(&Utc);

        Ok(Self {
            route_id: raw.route_id,
            bus_id,
            position,
            timestamp,
            velocity: raw.velocity,
        })
    }
}

pub struct TelemetryPipeline {
    config: TrackingConfig,
    store: Arc<BusStateStore>,
    catalog: Arc<CatalogReader>,
    broadcaster: Arc<Broadcaster>,
}

impl TelemetryPipeline {
    pub fn new(
        config: TrackingConfig,
        store: Arc<BusStateStore>,
        catalog: Arc<CatalogReader>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            store,
            catalog,
            broadcaster,
        }
    }

    /// Run one pipeline pass for a validated frame.
    ///
    /// Catalog failures are contained: the matcher and the estimator are
    /// skipped for this frame, the updated history is committed anyway and
    /// the next frame retries.
    pub async fn process_frame(&self, frame: TelemetryFrame) {
        let mut state = self.store.load_or_init(&frame.bus_id).await;

        // Route change wipes the inferred direction and the history it was
        // derived from; the quorum restarts in the new route's context.
        let route_changed = state
            .main_route_id
            .is_some_and(|route| route != frame.route_id);
        if route_changed {
            state.reset_route_context();
        }
        state.main_route_id = Some(frame.route_id);

        state.push_sample(
            TrackSample {
                position: frame.position,
                at: frame.timestamp,
            },
            self.config.history_size,
        );

        // Direction inference, once the quorum is met and not on the very
        // frame that switched routes.
        let mut catalog_ok = true;
        if !route_changed && state.history.len() >= self.config.min_signals_for_direction {
            match self.catalog.sublines_of_route(frame.route_id).await {
                Ok(sublines) => {
                    let track = state.history.make_contiguous().to_vec();
                    if let Some(subline_id) = matcher::best_subline(&track, &sublines, &self.config)
                    {
                        state.current_subline_id = Some(subline_id);
                    }
                    // A None result keeps the previously inferred subline.
                }
                Err(e) => {
                    warn!(bus_id = %frame.bus_id, route_id = frame.route_id, error = %e,
                        "catalog unavailable, skipping direction inference for this frame");
                    catalog_ok = false;
                }
            }
        }

        let mut outbox: Vec<FeedMessage> = Vec::new();

        // Subline transition: tell subscribers the old trajectory is done.
        // The close carries the next-to-last sample, the last position the
        // bus was seen at on the previous pass.
        if let (Some(previous), Some(current)) =
            (state.previous_subline_id, state.current_subline_id)
        {
            if previous != current {
                if let Some(sample) = state
                    .previous_sample()
                    .or_else(|| state.history.back().copied())
                {
                    outbox.push(FeedMessage::close(
                        previous,
                        sample.position.lat,
                        sample.position.lng,
                        sample.at,
                    ));
                }
            }
        }

        if let Some(subline_id) = state.current_subline_id {
            outbox.push(FeedMessage::position(
                subline_id,
                frame.position.lat,
                frame.position.lng,
                frame.velocity,
                frame.timestamp,
            ));
        }

        // Arrival estimation for the upcoming stops of the current subline.
        if catalog_ok {
            if let Some(subline_id) = state.current_subline_id {
                let stale = state
                    .cached_stops
                    .as_ref()
                    .is_none_or(|cached| cached.subline_id != subline_id);
                if stale {
                    match self.catalog.stops_of_subline(subline_id).await {
                        Ok(Some(stops)) => {
                            state.cached_stops = Some(CachedStops {
                                subline_id,
                                stops: Arc::new(stops),
                            });
                        }
                        Ok(None) => state.cached_stops = None,
                        Err(e) => {
                            warn!(bus_id = %frame.bus_id, subline_id, error = %e,
                                "catalog unavailable, skipping arrival estimation for this frame");
                            catalog_ok = false;
                        }
                    }
                }
                if catalog_ok {
                    if let Some(cached) = &state.cached_stops {
                        let stops = upcoming_estimates(
                            &cached.stops,
                            frame.position,
                            frame.velocity,
                            frame.timestamp,
                            &self.config,
                        );
                        outbox.push(FeedMessage::esta_info(
                            subline_id,
                            stops,
                            frame.position.lat,
                            frame.position.lng,
                            frame.velocity,
                            frame.timestamp,
                        ));
                    }
                }
            }
        }

        // Commit, then broadcast while still holding the bus lock so the
        // output of consecutive frames for one bus stays in order.
        state.previous_subline_id = state.current_subline_id;
        state.last_timestamp = Some(frame.timestamp);
        state.last_velocity = frame.velocity;

        for message in &outbox {
            self.broadcaster.broadcast(message).await;
        }
    }
}

/// Build the upcoming-stops block: the configured number of stops after the
/// one closest to the bus, each with a straight-line distance and, while
/// the bus is moving, an estimated arrival and departure.
fn upcoming_estimates(
    stops: &[Stop],
    position: Coordinate,
    velocity_ms: f64,
    at: DateTime<Utc>,
    config: &TrackingConfig,
) -> Vec<StopEstimate> {
    let mut closest: Option<(usize, f64)> = None;
    for (idx, stop) in stops.iter().enumerate() {
        let Ok(d) = geo::distance(position, stop.position()) else {
            continue;
        };
        if closest.is_none_or(|(_, best)| d < best) {
            closest = Some((idx, d));
        }
    }
    let Some((closest_idx, _)) = closest else {
        return Vec::new();
    };

    stops
        .iter()
        .skip(closest_idx + 1)
        .take(config.upcoming_stops_count)
        .filter_map(|stop| {
            let d = geo::distance(position, stop.position()).ok()?;
            let (arr_t, dep_t, esta_time) = if velocity_ms > 0.0 && d.is_finite() {
                let travel = Duration::milliseconds((d / velocity_ms * 1000.0) as i64);
                let arrival = at + travel;
                let departure =
                    arrival + Duration::seconds(config.stop_departure_offset_secs as i64);
                (
                    compact_time(arrival),
                    compact_time(departure),
                    compact_timestamp(arrival),
                )
            } else {
                (
                    UNKNOWN_MARKER.to_string(),
                    UNKNOWN_MARKER.to_string(),
                    UNKNOWN_MARKER.to_string(),
                )
            };
            Some(StopEstimate {
                stop_id: stop.id,
                stop_code: stop.code.clone(),
                stop_nam: stop.name.clone(),
                arr_t,
                dep_t,
                esta_dist: d.round(),
                esta_time,
            })
        })
        .collect()
}
