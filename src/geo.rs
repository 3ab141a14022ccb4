//! Geodesic helpers for the tracking pipeline.
//!
//! All math works on WGS84 latitude/longitude degrees and treats the earth
//! as a sphere of radius 6 371 000 m, which is plenty for stop-to-stop
//! distances and direction inference.

use serde::{Deserialize, Serialize};
use thiserror::Error;

const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("non-finite coordinate")]
    NonFiniteCoordinate,
}

/// A latitude/longitude pair in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinate {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }
}

/// Haversine distance between two points in meters.
///
/// Rejects non-finite inputs instead of propagating NaN into the
/// estimator's argmin scans.
pub fn distance(a: Coordinate, b: Coordinate) -> Result<f64, GeoError> {
    if !a.is_finite() || !b.is_finite() {
        return Err(GeoError::NonFiniteCoordinate);
    }
    let d_lat = (b.lat - a.lat).to_radians();
    let d_lng = (b.lng - a.lng).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.lat.to_radians().cos() * b.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    Ok(EARTH_RADIUS_METERS * c)
}

/// Initial forward azimuth from `a` to `b`, normalized to [0, 360).
///
/// Returns `None` when either point is non-finite.
pub fn bearing(a: Coordinate, b: Coordinate) -> Option<f64> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    let lat_a = a.lat.to_radians();
    let lat_b = b.lat.to_radians();
    let d_lng = (b.lng - a.lng).to_radians();

    let y = d_lng.sin() * lat_b.cos();
    let x = lat_a.cos() * lat_b.sin() - lat_a.sin() * lat_b.cos() * d_lng.cos();
    Some(normalize_degrees(y.atan2(x).to_degrees()))
}

/// Circular mean of the bearings along a track, in [0, 360).
///
/// Adjacent pairs closer than `min_movement_meters` are GPS noise and are
/// skipped. The mean is taken over unit vectors (sum of cos/sin, then
/// atan2) since an arithmetic mean is wrong across the 0/360 wrap.
/// Returns `None` when no pair qualifies.
pub fn average_bearing(track: &[Coordinate], min_movement_meters: f64) -> Option<f64> {
    let mut sum_cos = 0.0_f64;
    let mut sum_sin = 0.0_f64;
    let mut segments = 0usize;

    for pair in track.windows(2) {
        let moved = match distance(pair[0], pair[1]) {
            Ok(d) => d,
            Err(_) => continue,
        };
        if moved < min_movement_meters {
            continue;
        }
        let Some(theta) = bearing(pair[0], pair[1]) else {
            continue;
        };
        let rad = theta.to_radians();
        sum_cos += rad.cos();
        sum_sin += rad.sin();
        segments += 1;
    }

    if segments == 0 {
        return None;
    }
    Some(normalize_degrees(sum_sin.atan2(sum_cos).to_degrees()))
}

/// Shortest circular distance between two bearings, in [0, 180].
pub fn bearing_delta(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs() % 360.0;
    diff.min(360.0 - diff)
}

fn normalize_degrees(deg: f64) -> f64 {
    let n = deg % 360.0;
    if n < 0.0 { n + 360.0 } else { n }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lng: f64) -> Coordinate {
        Coordinate::new(lat, lng)
    }

    #[test]
    fn distance_of_known_pair() {
        // One degree of longitude at the equator is ~111.19 km.
        let d = distance(c(0.0, 0.0), c(0.0, 1.0)).unwrap();
        assert!((d - 111_195.0).abs() < 100.0, "got {d}");
    }

    #[test]
    fn distance_zero_for_same_point() {
        let d = distance(c(48.37, 10.89), c(48.37, 10.89)).unwrap();
        assert!(d < 1e-6);
    }

    #[test]
    fn distance_rejects_non_finite() {
        assert_eq!(
            distance(c(f64::NAN, 0.0), c(0.0, 0.0)),
            Err(GeoError::NonFiniteCoordinate)
        );
        assert_eq!(
            distance(c(0.0, 0.0), c(0.0, f64::INFINITY)),
            Err(GeoError::NonFiniteCoordinate)
        );
    }

    #[test]
    fn bearing_cardinal_directions() {
        assert!((bearing(c(0.0, 0.0), c(1.0, 0.0)).unwrap() - 0.0).abs() < 1e-9); // north
        assert!((bearing(c(0.0, 0.0), c(0.0, 1.0)).unwrap() - 90.0).abs() < 1e-9); // east
        assert!((bearing(c(1.0, 0.0), c(0.0, 0.0)).unwrap() - 180.0).abs() < 1e-9); // south
        assert!((bearing(c(0.0, 1.0), c(0.0, 0.0)).unwrap() - 270.0).abs() < 1e-9); // west
    }

    #[test]
    fn bearing_reciprocal_differs_by_half_turn() {
        let a = c(48.37, 10.89);
        let b = c(48.40, 10.95);
        let fwd = bearing(a, b).unwrap();
        let back = bearing(b, a).unwrap();
        let diff = bearing_delta(fwd, back);
        // Over short distances the back-azimuth is 180 degrees off.
        assert!((diff - 180.0).abs() < 0.1, "fwd {fwd} back {back}");
    }

    #[test]
    fn bearing_none_for_non_finite() {
        assert_eq!(bearing(c(f64::NAN, 0.0), c(0.0, 0.0)), None);
    }

    #[test]
    fn average_bearing_of_straight_eastward_track() {
        let track = vec![c(0.0, 0.0), c(0.0, 0.001), c(0.0, 0.002)];
        let avg = average_bearing(&track, 1.0).unwrap();
        assert!((avg - 90.0).abs() < 0.01, "got {avg}");
    }

    #[test]
    fn average_bearing_wraps_around_north() {
        // Two segments at 350 and 10 degrees must average to 0, not 180.
        let track = vec![
            c(0.0, 0.0),
            // ~350 degrees: north with a slight westward component
            c(0.001, -0.000176),
            // ~10 degrees from there
            c(0.002, 0.0),
        ];
        let avg = average_bearing(&track, 1.0).unwrap();
        assert!(avg < 1.0 || avg > 359.0, "got {avg}");
    }

    #[test]
    fn average_bearing_none_below_noise_floor() {
        // All movement is under a meter: no qualifying segment.
        let track = vec![c(0.0, 0.0), c(0.0, 0.000_000_1), c(0.0, 0.000_000_2)];
        assert_eq!(average_bearing(&track, 1.0), None);
    }

    #[test]
    fn average_bearing_none_for_short_track() {
        assert_eq!(average_bearing(&[c(0.0, 0.0)], 1.0), None);
        assert_eq!(average_bearing(&[], 1.0), None);
    }

    #[test]
    fn bearing_delta_shortest_arc() {
        assert!((bearing_delta(350.0, 10.0) - 20.0).abs() < 1e-9);
        assert!((bearing_delta(10.0, 350.0) - 20.0).abs() < 1e-9);
        assert!((bearing_delta(90.0, 270.0) - 180.0).abs() < 1e-9);
        assert!((bearing_delta(45.0, 45.0)).abs() < 1e-9);
    }
}
