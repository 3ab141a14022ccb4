//! Wire format of the passenger feed.
//!
//! Outbound traffic is a closed set of three message kinds. The JSON shape
//! is contractual for deployed passenger clients; field names and the
//! compact `YYYYMMDDHHMMSS` timestamps must not drift.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Placeholder used where a time cannot be estimated (bus not moving) and
/// in close-message stop fields.
pub const UNKNOWN_MARKER: &str = "-";

/// Compact UTC instant, `YYYYMMDDHHMMSS`.
pub fn compact_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Compact UTC time of day, `HHMMSS`.
pub fn compact_time(at: DateTime<Utc>) -> String {
    at.format("%H%M%S").to_string()
}

fn to_kmh(velocity_ms: f64) -> f64 {
    (velocity_ms * 3.6 * 10.0).round() / 10.0
}

/// One message of the passenger feed. `rt_id` is always a subline id.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum FeedMessage {
    #[serde(rename = "position")]
    Position {
        rt_id: i64,
        upd: String,
        date: String,
        lat: f64,
        lng: f64,
        /// km/h on the wire.
        vel: f64,
    },
    /// The bus left a previously-tracked subline; clients retire its
    /// trajectory.
    #[serde(rename = "close")]
    Close {
        rt_id: i64,
        upd: String,
        date: String,
        del: i64,
        pass: String,
        lat: f64,
        lng: f64,
        stop_id: i64,
        stop_code: String,
        stop_nam: String,
    },
    #[serde(rename = "esta-info")]
    EstaInfo {
        rt_id: i64,
        upd: String,
        date: String,
        stops: Vec<StopEstimate>,
        pos: PositionBlock,
        bus: CapacityBlock,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct StopEstimate {
    pub stop_id: i64,
    pub stop_code: String,
    pub stop_nam: String,
    /// `HHMMSS`, or "-" when arrival cannot be estimated.
    pub arr_t: String,
    /// `HHMMSS`, or "-" when arrival cannot be estimated.
    pub dep_t: String,
    /// Straight-line distance in meters.
    pub esta_dist: f64,
    /// `YYYYMMDDHHMMSS`, or "-" when arrival cannot be estimated.
    pub esta_time: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PositionBlock {
    pub lat: f64,
    pub lng: f64,
    /// km/h on the wire.
    pub vel: f64,
    pub time: String,
}

/// Static placeholders until capacity derives from driver-reported fields.
#[derive(Debug, Clone, Serialize)]
pub struct CapacityBlock {
    pub pas: u32,
    pub cap: u32,
    pub cap_seated: u32,
    pub cap_standing: u32,
}

impl Default for CapacityBlock {
    fn default() -> Self {
        Self {
            pas: 0,
            cap: 50,
            cap_seated: 30,
            cap_standing: 20,
        }
    }
}

impl FeedMessage {
    pub fn position(
        subline_id: i64,
        lat: f64,
        lng: f64,
        velocity_ms: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let ts = compact_timestamp(at);
        FeedMessage::Position {
            rt_id: subline_id,
            upd: ts.clone(),
            date: ts,
            lat,
            lng,
            vel: to_kmh(velocity_ms),
        }
    }

    pub fn close(previous_subline_id: i64, lat: f64, lng: f64, at: DateTime<Utc>) -> Self {
        let ts = compact_timestamp(at);
        FeedMessage::Close {
            rt_id: previous_subline_id,
            upd: ts.clone(),
            date: ts,
            del: 0,
            pass: "0".to_string(),
            lat,
            lng,
            stop_id: 0,
            stop_code: UNKNOWN_MARKER.to_string(),
            stop_nam: UNKNOWN_MARKER.to_string(),
        }
    }

    pub fn esta_info(
        subline_id: i64,
        stops: Vec<StopEstimate>,
        lat: f64,
        lng: f64,
        velocity_ms: f64,
        at: DateTime<Utc>,
    ) -> Self {
        let ts = compact_timestamp(at);
        FeedMessage::EstaInfo {
            rt_id: subline_id,
            upd: ts.clone(),
            date: ts.clone(),
            stops,
            pos: PositionBlock {
                lat,
                lng,
                vel: to_kmh(velocity_ms),
                time: ts,
            },
            bus: CapacityBlock::default(),
        }
    }

    /// The subline this message concerns; the broadcaster resolves it to
    /// the owning main route.
    pub fn subline_id(&self) -> i64 {
        match self {
            FeedMessage::Position { rt_id, .. }
            | FeedMessage::Close { rt_id, .. }
            | FeedMessage::EstaInfo { rt_id, .. } => *rt_id,
        }
    }
}
