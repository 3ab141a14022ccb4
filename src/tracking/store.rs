//! In-memory per-bus tracking state.
//!
//! Each bus id owns a slot holding its recent GPS history and the inferred
//! subline. A pipeline pass locks exactly one slot for its whole duration,
//! so frames for the same bus are serialized while distinct buses proceed
//! in parallel. There is no global lock.

use crate::catalog::Stop;
use crate::geo::Coordinate;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One GPS sample from a driver frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSample {
    pub position: Coordinate,
    pub at: DateTime<Utc>,
}

/// Ordered stops of the subline the bus is currently matched to. Refreshed
/// whenever the matched subline changes, so `subline_id` always agrees with
/// the owner state's `current_subline_id`.
#[derive(Debug, Clone)]
pub struct CachedStops {
    pub subline_id: i64,
    pub stops: Arc<Vec<Stop>>,
}

#[derive(Debug, Clone)]
pub struct BusState {
    pub bus_id: String,
    /// Most recent samples, newest at the back.
    pub history: VecDeque<TrackSample>,
    /// Route declared by the driver client on the latest frame.
    pub main_route_id: Option<i64>,
    pub current_subline_id: Option<i64>,
    /// `current_subline_id` as of the end of the previous pipeline pass;
    /// a difference between the two is a subline transition.
    pub previous_subline_id: Option<i64>,
    pub cached_stops: Option<CachedStops>,
    pub last_timestamp: Option<DateTime<Utc>>,
    /// Velocity from the latest frame, m/s.
    pub last_velocity: f64,
    retired: bool,
}

impl BusState {
    fn new(bus_id: &str) -> Self {
        Self {
            bus_id: bus_id.to_string(),
            history: VecDeque::new(),
            main_route_id: None,
            current_subline_id: None,
            previous_subline_id: None,
            cached_stops: None,
            last_timestamp: None,
            last_velocity: 0.0,
            retired: false,
        }
    }

    /// Append a sample, dropping the oldest entries beyond `capacity`.
    pub fn push_sample(&mut self, sample: TrackSample, capacity: usize) {
        self.history.push_back(sample);
        while self.history.len() > capacity {
            self.history.pop_front();
        }
    }

    /// Forget everything tied to the previous route: inferred direction,
    /// cached stops and the GPS history the direction was derived from.
    /// The quorum must be rebuilt from samples seen on the new route.
    pub fn reset_route_context(&mut self) {
        self.current_subline_id = None;
        self.previous_subline_id = None;
        self.cached_stops = None;
        self.history.clear();
    }

    pub fn current_position(&self) -> Option<Coordinate> {
        self.history.back().map(|s| s.position)
    }

    /// The sample before the latest one, when the ring holds at least two.
    pub fn previous_sample(&self) -> Option<TrackSample> {
        if self.history.len() >= 2 {
            self.history.get(self.history.len() - 2).copied()
        } else {
            None
        }
    }
}

/// Thread-safe registry of per-bus slots.
pub struct BusStateStore {
    slots: DashMap<String, Arc<Mutex<BusState>>>,
}

impl BusStateStore {
    pub fn new() -> Self {
        Self { slots: DashMap::new() }
    }

    /// Lock the slot for `bus_id`, creating it on first sight. The returned
    /// guard is held for the whole pipeline pass; dropping it commits the
    /// mutations. Retired slots (a concurrent eviction won the race between
    /// map lookup and lock acquisition) are replaced with fresh ones.
    pub async fn load_or_init(&self, bus_id: &str) -> OwnedMutexGuard<BusState> {
        loop {
            let slot = self
                .slots
                .entry(bus_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(BusState::new(bus_id))))
                .clone();
            let guard = slot.lock_owned().await;
            if !guard.retired {
                return guard;
            }
        }
    }

    /// Clone of every live state. Slot handles are collected first and each
    /// lock is taken outside the map iteration, so no shard lock is held
    /// across a suspension point.
    pub async fn snapshot(&self) -> Vec<BusState> {
        let slots: Vec<Arc<Mutex<BusState>>> =
            self.slots.iter().map(|entry| entry.value().clone()).collect();

        let mut states = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock().await;
            if !guard.retired {
                states.push(guard.clone());
            }
        }
        states
    }

    pub fn active_count(&self) -> usize {
        self.slots.len()
    }

    /// Drop slots whose last frame is older than `idle_for`. A slot whose
    /// lock cannot be acquired immediately is mid-frame and is left alone.
    /// Returns the number of evicted buses.
    pub fn evict_idle(&self, idle_for: Duration, now: DateTime<Utc>) -> usize {
        let mut evicted = 0;
        self.slots.retain(|_, slot| match slot.try_lock() {
            Ok(mut state) => {
                let stale = state
                    .last_timestamp
                    .is_some_and(|seen| now - seen > idle_for);
                if stale {
                    state.retired = true;
                    evicted += 1;
                    false
                } else {
                    true
                }
            }
            Err(_) => true,
        });
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;

    fn sample(lat: f64, lng: f64, secs: i64) -> TrackSample {
        TrackSample {
            position: Coordinate::new(lat, lng),
            at: chrono::DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn load_or_init_creates_once_and_persists_mutations() {
        let store = BusStateStore::new();
        {
            let mut state = store.load_or_init("B1").await;
            state.main_route_id = Some(101);
            state.push_sample(sample(10.0, 0.0, 0), 5);
        }
        let state = store.load_or_init("B1").await;
        assert_eq!(state.main_route_id, Some(101));
        assert_eq!(state.history.len(), 1);
        assert_eq!(store.active_count(), 1);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let store = BusStateStore::new();
        let mut state = store.load_or_init("B1").await;
        for i in 0..7 {
            state.push_sample(sample(10.0, 0.001 * i as f64, i), 5);
        }
        assert_eq!(state.history.len(), 5);
        // The two oldest samples are gone.
        assert_eq!(state.history.front().unwrap().position.lng, 0.002);
        assert_eq!(state.history.back().unwrap().position.lng, 0.006);
    }

    #[tokio::test]
    async fn reset_route_context_clears_direction_state() {
        let store = BusStateStore::new();
        let mut state = store.load_or_init("B1").await;
        state.push_sample(sample(10.0, 0.0, 0), 5);
        state.current_subline_id = Some(1011);
        state.previous_subline_id = Some(1011);
        state.cached_stops = Some(CachedStops {
            subline_id: 1011,
            stops: Arc::new(Vec::new()),
        });

        state.reset_route_context();
        assert_eq!(state.current_subline_id, None);
        assert_eq!(state.previous_subline_id, None);
        assert!(state.cached_stops.is_none());
        assert!(state.history.is_empty());
    }

    #[tokio::test]
    async fn previous_sample_is_next_to_last() {
        let store = BusStateStore::new();
        let mut state = store.load_or_init("B1").await;
        assert!(state.previous_sample().is_none());

        state.push_sample(sample(10.0, 0.0, 0), 5);
        assert!(state.previous_sample().is_none());

        state.push_sample(sample(10.0, 0.001, 10), 5);
        state.push_sample(sample(10.0, 0.002, 20), 5);
        let prev = state.previous_sample().unwrap();
        assert_eq!(prev.position.lng, 0.001);
    }

    #[tokio::test]
    async fn snapshot_observes_committed_states() {
        let store = BusStateStore::new();
        {
            let mut a = store.load_or_init("A").await;
            a.main_route_id = Some(101);
        }
        {
            let mut b = store.load_or_init("B").await;
            b.main_route_id = Some(202);
        }
        let mut snapshot = store.snapshot().await;
        snapshot.sort_by(|x, y| x.bus_id.cmp(&y.bus_id));
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].main_route_id, Some(101));
        assert_eq!(snapshot[1].main_route_id, Some(202));
    }

    #[tokio::test]
    async fn evict_idle_removes_stale_keeps_fresh() {
        let store = BusStateStore::new();
        let now = chrono::Utc::now();
        {
            let mut stale = store.load_or_init("stale").await;
            stale.last_timestamp = Some(now - Duration::minutes(30));
        }
        {
            let mut fresh = store.load_or_init("fresh").await;
            fresh.last_timestamp = Some(now - Duration::minutes(1));
        }

        let evicted = store.evict_idle(Duration::minutes(15), now);
        assert_eq!(evicted, 1);
        assert_eq!(store.active_count(), 1);

        // A frame for the evicted bus starts over with a fresh slot.
        let state = store.load_or_init("stale").await;
        assert!(state.last_timestamp.is_none());
    }

    #[tokio::test]
    async fn evict_idle_skips_locked_slots() {
        let store = BusStateStore::new();
        let now = chrono::Utc::now();
        let mut held = store.load_or_init("held").await;
        held.last_timestamp = Some(now - Duration::hours(2));

        // Mid-frame: the slot is locked, so the sweep must leave it alone.
        let evicted = store.evict_idle(Duration::minutes(15), now);
        assert_eq!(evicted, 0);
        assert_eq!(store.active_count(), 1);
        drop(held);
    }
}
