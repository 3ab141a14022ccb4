use serde::Deserialize;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP port for the HTTP+WebSocket listener. The PORT environment
    /// variable takes precedence when set.
    #[serde(default = "Config::default_port")]
    pub port: u16,
    /// SQLite connection string for the catalog database.
    #[serde(default = "Config::default_database_url")]
    pub database_url: String,
    /// Allowed CORS origins. Required unless cors_permissive is true.
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Explicitly allow all origins (development only). Defaults to false.
    #[serde(default)]
    pub cors_permissive: bool,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
}

/// Tuning knobs for direction inference and arrival estimation.
///
/// The defaults reproduce the behavior drivers and passenger apps were
/// calibrated against; change them only with matching client-side updates.
#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// GPS samples retained per bus.
    #[serde(default = "TrackingConfig::default_history_size")]
    pub history_size: usize,
    /// Minimum history length before the direction matcher runs.
    #[serde(default = "TrackingConfig::default_min_signals_for_direction")]
    pub min_signals_for_direction: usize,
    /// Adjacent samples closer than this are treated as GPS noise when
    /// averaging bearings.
    #[serde(default = "TrackingConfig::default_min_movement_threshold_meters")]
    pub min_movement_threshold_meters: f64,
    /// A subline segment's bearing must be within this many degrees of the
    /// bus's average bearing to count as a match.
    #[serde(default = "TrackingConfig::default_direction_match_threshold_degrees")]
    pub direction_match_threshold_degrees: f64,
    /// Dwell time added to an estimated arrival to produce the estimated
    /// departure.
    #[serde(default = "TrackingConfig::default_stop_departure_offset_secs")]
    pub stop_departure_offset_secs: u64,
    /// How many upcoming stops an esta-info message carries.
    #[serde(default = "TrackingConfig::default_upcoming_stops_count")]
    pub upcoming_stops_count: usize,
    /// Bus states idle for longer than this are evicted from memory.
    #[serde(default = "TrackingConfig::default_idle_eviction_minutes")]
    pub idle_eviction_minutes: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// How long cached subline/stop listings stay fresh. Operators publish
    /// sublines rarely, so minutes of staleness are acceptable.
    #[serde(default = "CatalogConfig::default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Deadline for a single catalog query. On expiry the current pipeline
    /// pass proceeds without matcher output.
    #[serde(default = "CatalogConfig::default_query_timeout_secs")]
    pub query_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// Outbound frames buffered per passenger connection. A subscriber that
    /// falls this far behind is dropped rather than allowed to stall the
    /// pipeline.
    #[serde(default = "RealtimeConfig::default_subscriber_queue_capacity")]
    pub subscriber_queue_capacity: usize,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            history_size: Self::default_history_size(),
            min_signals_for_direction: Self::default_min_signals_for_direction(),
            min_movement_threshold_meters: Self::default_min_movement_threshold_meters(),
            direction_match_threshold_degrees: Self::default_direction_match_threshold_degrees(),
            stop_departure_offset_secs: Self::default_stop_departure_offset_secs(),
            upcoming_stops_count: Self::default_upcoming_stops_count(),
            idle_eviction_minutes: Self::default_idle_eviction_minutes(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: Self::default_cache_ttl_secs(),
            query_timeout_secs: Self::default_query_timeout_secs(),
        }
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            subscriber_queue_capacity: Self::default_subscriber_queue_capacity(),
        }
    }
}

impl TrackingConfig {
    /// Log warnings for tuning values that are technically loadable but
    /// almost certainly misconfigured.
    pub fn validate(&self) {
        if self.history_size < self.min_signals_for_direction {
            warn!(
                history_size = self.history_size,
                min_signals = self.min_signals_for_direction,
                "history window smaller than the direction quorum; the matcher will never run"
            );
        }
        if self.direction_match_threshold_degrees <= 0.0
            || self.direction_match_threshold_degrees > 180.0
        {
            warn!(
                threshold = self.direction_match_threshold_degrees,
                "direction match threshold outside (0, 180]; matching will be degenerate"
            );
        }
        if self.min_movement_threshold_meters < 0.0 {
            warn!(
                threshold = self.min_movement_threshold_meters,
                "negative movement threshold treated as zero"
            );
        }
    }

    fn default_history_size() -> usize {
        5
    }
    fn default_min_signals_for_direction() -> usize {
        3
    }
    fn default_min_movement_threshold_meters() -> f64 {
        1.0
    }
    fn default_direction_match_threshold_degrees() -> f64 {
        45.0
    }
    fn default_stop_departure_offset_secs() -> u64 {
        30
    }
    fn default_upcoming_stops_count() -> usize {
        5
    }
    fn default_idle_eviction_minutes() -> u64 {
        15
    }
}

impl CatalogConfig {
    fn default_cache_ttl_secs() -> u64 {
        300
    }
    fn default_query_timeout_secs() -> u64 {
        2
    }
}

impl RealtimeConfig {
    fn default_subscriber_queue_capacity() -> usize {
        32
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::ReadError(e.to_string()))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Effective listen port: the PORT environment variable wins over the
    /// configured value.
    pub fn effective_port(&self) -> u16 {
        match std::env::var("PORT") {
            Ok(raw) => match raw.parse() {
                Ok(port) => port,
                Err(_) => {
                    warn!(value = %raw, "ignoring unparsable PORT environment variable");
                    self.port
                }
            },
            Err(_) => self.port,
        }
    }

    fn default_port() -> u16 {
        3000
    }
    fn default_database_url() -> String {
        "sqlite:database/catalog.db?mode=rwc".to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(String),
    #[error("Failed to parse config: {0}")]
    ParseError(String),
}
