//! Fan-out of pipeline output to route-scoped subscriber sets.

use crate::catalog::CatalogReader;
use crate::realtime::messages::FeedMessage;
use crate::realtime::registry::SubscriptionRegistry;
use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct Broadcaster {
    catalog: Arc<CatalogReader>,
    registry: Arc<SubscriptionRegistry>,
    /// Unknown subline ids already complained about; each is logged once.
    unknown_sublines: DashSet<i64>,
}

impl Broadcaster {
    pub fn new(catalog: Arc<CatalogReader>, registry: Arc<SubscriptionRegistry>) -> Self {
        Self {
            catalog,
            registry,
            unknown_sublines: DashSet::new(),
        }
    }

    /// Resolve the message's subline to its main route, serialize once and
    /// hand the frame to every subscriber of that route. Resolution
    /// failures drop the message; a pipeline pass is never failed by its
    /// broadcast.
    pub async fn broadcast(&self, message: &FeedMessage) {
        let subline_id = message.subline_id();
        let route_id = match self.catalog.route_of_subline(subline_id).await {
            Ok(Some(route_id)) => route_id,
            Ok(None) => {
                if self.unknown_sublines.insert(subline_id) {
                    warn!(subline_id, "dropping feed message for unknown subline");
                }
                return;
            }
            Err(e) => {
                warn!(subline_id, error = %e, "dropping feed message, subline resolution failed");
                return;
            }
        };

        let frame = match serde_json::to_string(message) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(subline_id, error = %e, "failed to serialize feed message");
                return;
            }
        };

        let delivered = self.registry.deliver(route_id, &frame);
        debug!(subline_id, route_id, delivered, "feed message broadcast");
    }
}
