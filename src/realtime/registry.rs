//! Route-partitioned registry of passenger subscribers.
//!
//! Each subscriber owns a bounded mpsc queue; the pipeline side only ever
//! `try_send`s into it. A queue that is full or closed gets its subscriber
//! evicted on the spot, so one slow client can never stall delivery to the
//! rest. Per-route sets are the unit of mutual exclusion; there is no
//! registry-wide lock on the delivery path.

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

/// Handle identifying one subscriber within one route's set. Returned by
/// `subscribe` and consumed by `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionToken {
    route_id: i64,
    subscriber_id: u64,
}

impl SubscriptionToken {
    pub fn route_id(&self) -> i64 {
        self.route_id
    }
}

pub struct SubscriptionRegistry {
    routes: DashMap<i64, HashMap<u64, mpsc::Sender<String>>>,
    next_subscriber_id: AtomicU64,
    queue_capacity: usize,
}

impl SubscriptionRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            routes: DashMap::new(),
            next_subscriber_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a subscriber for `route_id`. The set is created lazily on
    /// first use. Returns the removal token and the receiving end the
    /// connection's writer task drains.
    pub fn subscribe(&self, route_id: i64) -> (SubscriptionToken, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let subscriber_id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.routes.entry(route_id).or_default().insert(subscriber_id, tx);
        debug!(route_id, subscriber_id, "passenger subscribed");
        (
            SubscriptionToken {
                route_id,
                subscriber_id,
            },
            rx,
        )
    }

    /// Remove a subscriber; the route's set is reclaimed once empty.
    pub fn unsubscribe(&self, token: SubscriptionToken) {
        if let Some(mut entry) = self.routes.get_mut(&token.route_id) {
            entry.remove(&token.subscriber_id);
        }
        self.routes
            .remove_if(&token.route_id, |_, subscribers| subscribers.is_empty());
        debug!(
            route_id = token.route_id,
            subscriber_id = token.subscriber_id,
            "passenger unsubscribed"
        );
    }

    /// Hand `frame` to every subscriber of `route_id`. Subscribers whose
    /// queue is full or gone are evicted inline; backpressure resolves to
    /// eviction, never to blocking the caller. Returns how many queues
    /// accepted the frame.
    pub fn deliver(&self, route_id: i64, frame: &str) -> usize {
        let mut delivered = 0;
        if let Some(mut entry) = self.routes.get_mut(&route_id) {
            entry.retain(|subscriber_id, tx| match tx.try_send(frame.to_string()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(route_id, subscriber_id, "subscriber queue full, dropping connection");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            });
        }
        self.routes
            .remove_if(&route_id, |_, subscribers| subscribers.is_empty());
        delivered
    }

    /// Number of routes with at least one live subscriber.
    pub fn subscribed_route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn subscriber_count(&self, route_id: i64) -> usize {
        self.routes.get(&route_id).map_or(0, |entry| entry.len())
    }
}
