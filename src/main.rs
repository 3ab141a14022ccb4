mod api;
mod catalog;
mod config;
mod geo;
mod realtime;
mod tracking;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use axum::{routing::get, Router};
use sqlx::SqlitePool;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use catalog::CatalogReader;
use config::Config;
use realtime::broadcaster::Broadcaster;
use realtime::registry::SubscriptionRegistry;
use tracking::pipeline::TelemetryPipeline;
use tracking::store::BusStateStore;

#[derive(OpenApi)]
#[openapi(
    info(title = "Bus Live API", version = "0.1.0"),
    paths(
        api::stations::get_station_departures,
        api::health::health_check,
    ),
    components(schemas(
        api::ErrorResponse,
        api::stations::StationDeparturesResponse,
        api::health::HealthResponse,
        tracking::departures::DepartureHint,
    )),
    tags(
        (name = "stations", description = "Station-directed departure hints"),
        (name = "health", description = "Service health check")
    )
)]
struct ApiDoc;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=info,sqlx=warn".into()),
        )
        .init();

    // Load config
    let config = Config::load("config.yaml").expect("Failed to load config");
    config.tracking.validate();
    tracing::info!(port = config.effective_port(), "Loaded configuration");

    // Build CORS layer based on config
    let cors_layer = if config.cors_permissive {
        tracing::warn!("CORS: Permissive mode explicitly enabled (all origins allowed) - DO NOT USE IN PRODUCTION");
        CorsLayer::permissive()
    } else if !config.cors_origins.is_empty() {
        tracing::info!(origins = ?config.cors_origins, "CORS: Restricting to configured origins");
        let origins: Vec<_> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        panic!("CORS configuration error: Either set 'cors_origins' with allowed origins, or set 'cors_permissive: true' for development");
    };

    // Initialize the catalog database
    if let Err(e) = std::fs::create_dir_all("database") {
        tracing::warn!("Could not create database directory: {}", e);
    }
    let pool = SqlitePool::connect(&config.database_url)
        .await
        .expect("Failed to connect to catalog database");

    let migrator = sqlx::migrate!("./migrations");
    migrator.run(&pool).await.expect("Failed to run migrations");
    tracing::info!("Database migrations completed");

    // Wire the telemetry core
    let store = Arc::new(BusStateStore::new());
    let catalog = Arc::new(CatalogReader::new(pool, &config.catalog));
    let registry = Arc::new(SubscriptionRegistry::new(
        config.realtime.subscriber_queue_capacity,
    ));
    let broadcaster = Arc::new(Broadcaster::new(catalog.clone(), registry.clone()));
    let pipeline = Arc::new(TelemetryPipeline::new(
        config.tracking.clone(),
        store.clone(),
        catalog.clone(),
        broadcaster,
    ));

    // Sweep idle bus states in the background
    let sweep_store = store.clone();
    let idle_minutes = config.tracking.idle_eviction_minutes;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        interval.tick().await;
        loop {
            interval.tick().await;
            let evicted =
                sweep_store.evict_idle(chrono::Duration::minutes(idle_minutes as i64), chrono::Utc::now());
            if evicted > 0 {
                tracing::info!(evicted, "Evicted idle bus states");
            }
        }
    });

    // Build the app
    let app = Router::new()
        .route("/", get(root))
        .nest("/api", api::router(pipeline, registry, catalog, store))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer);

    // Start server
    let port = config.effective_port();
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .unwrap_or_else(|e| panic!("Failed to bind to port {port}: {e}"));

    tracing::info!("Server running on http://localhost:{port}");
    tracing::info!("Swagger UI: http://localhost:{port}/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}

async fn root() -> &'static str {
    "Bus Live API"
}
