//! Direction inference: decide which subline of a main route a bus is
//! driving, by comparing the bus's average bearing against the bearing of
//! every consecutive stop pair of every candidate subline.
//!
//! Coarse but cheap: a bus heading east matches the variant whose stop
//! sequence trends east and not its westbound sibling. The acceptance
//! threshold tolerates GPS jitter and street-grid detours.

use crate::catalog::Stop;
use crate::config::TrackingConfig;
use crate::geo;
use crate::tracking::store::TrackSample;
use std::collections::BTreeMap;

/// Pick the subline whose segments best align with the bus's recent track.
///
/// Returns `None` below the direction quorum, when the track yields no
/// usable bearing, or when no segment falls inside the acceptance band.
/// Iteration is ascending by subline id and stop order, and a later
/// candidate must score strictly higher to win, so ties resolve to the
/// first-encountered subline deterministically.
pub fn best_subline(
    history: &[TrackSample],
    sublines: &BTreeMap<i64, Vec<Stop>>,
    config: &TrackingConfig,
) -> Option<i64> {
    if history.len() < config.min_signals_for_direction {
        return None;
    }

    let track: Vec<_> = history.iter().map(|s| s.position).collect();
    let heading = geo::average_bearing(&track, config.min_movement_threshold_meters)?;

    let threshold = config.direction_match_threshold_degrees;
    let mut best: Option<(i64, f64)> = None;

    for (&subline_id, stops) in sublines {
        if stops.len() < 2 {
            continue;
        }
        for pair in stops.windows(2) {
            let Some(segment_bearing) = geo::bearing(pair[0].position(), pair[1].position())
            else {
                continue;
            };
            let delta = geo::bearing_delta(heading, segment_bearing);
            if delta > threshold {
                continue;
            }
            let score = threshold - delta;
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((subline_id, score));
            }
        }
    }

    best.map(|(subline_id, _)| subline_id)
}
