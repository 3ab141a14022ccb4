pub mod driver_ws;
pub mod error;
pub mod health;
pub mod passenger_ws;
pub mod stations;

pub use error::{internal_error, ErrorResponse};

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::catalog::CatalogReader;
use crate::realtime::registry::SubscriptionRegistry;
use crate::tracking::pipeline::TelemetryPipeline;
use crate::tracking::store::BusStateStore;

pub fn router(
    pipeline: Arc<TelemetryPipeline>,
    registry: Arc<SubscriptionRegistry>,
    catalog: Arc<CatalogReader>,
    store: Arc<BusStateStore>,
) -> Router {
    let driver_state = driver_ws::DriverWsState { pipeline };
    let passenger_state = passenger_ws::PassengerWsState {
        registry: registry.clone(),
    };

    Router::new()
        .route(
            "/driver-location-ws",
            get(driver_ws::ws_driver).with_state(driver_state),
        )
        .route(
            "/passenger-realtime-ws/{route_id}",
            get(passenger_ws::ws_passenger).with_state(passenger_state),
        )
        .nest("/stations", stations::router(catalog, store.clone()))
        .nest("/health", health::router(store, registry))
}
