//! Read-only access to the route catalog: main routes, their directional
//! sublines and each subline's ordered stop sequence.
//!
//! Listings are cached with a TTL because operators publish sublines
//! infrequently; staleness degrades matching accuracy for a few minutes but
//! never breaks an invariant. Every query runs under a bounded deadline so a
//! wedged database cannot stall the telemetry pipeline.

use crate::config::CatalogConfig;
use crate::geo::Coordinate;
use dashmap::DashMap;
use sqlx::SqlitePool;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog query failed: {0}")]
    Storage(#[from] sqlx::Error),
    #[error("catalog query exceeded {0:?}")]
    Timeout(Duration),
}

/// A stop on a subline. Immutable within a process lifetime.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Stop {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub ref_code: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

impl Stop {
    pub fn position(&self) -> Coordinate {
        Coordinate::new(self.lat, self.lng)
    }
}

/// Sublines of one main route, keyed by subline id in ascending order so
/// matcher iteration is deterministic.
pub type RouteSublines = Arc<BTreeMap<i64, Vec<Stop>>>;

struct CachedSublines {
    fetched_at: Instant,
    sublines: RouteSublines,
}

pub struct CatalogReader {
    pool: SqlitePool,
    ttl: Duration,
    deadline: Duration,
    sublines_by_route: DashMap<i64, CachedSublines>,
    // Subline ownership never changes while the process runs, so resolved
    // ids are kept without a TTL.
    owning_route: DashMap<i64, i64>,
}

impl CatalogReader {
    pub fn new(pool: SqlitePool, config: &CatalogConfig) -> Self {
        Self {
            pool,
            ttl: Duration::from_secs(config.cache_ttl_secs),
            deadline: Duration::from_secs(config.query_timeout_secs),
            sublines_by_route: DashMap::new(),
            owning_route: DashMap::new(),
        }
    }

    /// Ordered stop sequences for every subline of `main_route_id`. Empty
    /// mapping when the route has no sublines.
    pub async fn sublines_of_route(&self, main_route_id: i64) -> Result<RouteSublines, CatalogError> {
        if let Some(cached) = self.sublines_by_route.get(&main_route_id) {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.sublines.clone());
            }
        }

        let sublines = self.fetch_sublines(main_route_id).await?;
        self.sublines_by_route.insert(
            main_route_id,
            CachedSublines {
                fetched_at: Instant::now(),
                sublines: sublines.clone(),
            },
        );
        Ok(sublines)
    }

    /// The main route a subline belongs to, or `None` for an unknown id.
    pub async fn route_of_subline(&self, subline_id: i64) -> Result<Option<i64>, CatalogError> {
        if let Some(route_id) = self.owning_route.get(&subline_id) {
            return Ok(Some(*route_id));
        }

        let row: Option<(i64,)> = self
            .with_deadline(
                sqlx::query_as("SELECT main_route_id FROM sublines WHERE id = ?")
                    .bind(subline_id)
                    .fetch_optional(&self.pool),
            )
            .await?;

        if let Some((route_id,)) = row {
            self.owning_route.insert(subline_id, route_id);
            return Ok(Some(route_id));
        }
        Ok(None)
    }

    /// Ids of every subline whose stop sequence contains `stop_id`.
    pub async fn sublines_serving_stop(&self, stop_id: i64) -> Result<Vec<i64>, CatalogError> {
        let rows: Vec<(i64,)> = self
            .with_deadline(
                sqlx::query_as(
                    "SELECT DISTINCT subline_id FROM subline_stops WHERE stop_id = ? ORDER BY subline_id",
                )
                .bind(stop_id)
                .fetch_all(&self.pool),
            )
            .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Ordered stops of one subline, or `None` for an unknown id. Served
    /// from the per-route cache so the hot path and the station query share
    /// one storage read.
    pub async fn stops_of_subline(&self, subline_id: i64) -> Result<Option<Vec<Stop>>, CatalogError> {
        let Some(route_id) = self.route_of_subline(subline_id).await? else {
            return Ok(None);
        };
        let sublines = self.sublines_of_route(route_id).await?;
        Ok(sublines.get(&subline_id).cloned())
    }

    async fn fetch_sublines(&self, main_route_id: i64) -> Result<RouteSublines, CatalogError> {
        let subline_ids: Vec<(i64,)> = self
            .with_deadline(
                sqlx::query_as("SELECT id FROM sublines WHERE main_route_id = ? ORDER BY id")
                    .bind(main_route_id)
                    .fetch_all(&self.pool),
            )
            .await?;

        let mut map: BTreeMap<i64, Vec<Stop>> =
            subline_ids.into_iter().map(|(id,)| (id, Vec::new())).collect();

        let rows: Vec<SublineStopRow> = self
            .with_deadline(
                sqlx::query_as(
                    r#"
                    SELECT
                        ss.subline_id,
                        s.id, s.code, s.name, s.ref AS ref_code, s.lat, s.lng
                    FROM sublines sl
                    JOIN subline_stops ss ON ss.subline_id = sl.id
                    JOIN stops s ON s.id = ss.stop_id
                    WHERE sl.main_route_id = ?
                    ORDER BY ss.subline_id, ss.sequence
                    "#,
                )
                .bind(main_route_id)
                .fetch_all(&self.pool),
            )
            .await?;

        for row in rows {
            map.entry(row.subline_id).or_default().push(Stop {
                id: row.id,
                code: row.code,
                name: row.name,
                ref_code: row.ref_code,
                lat: row.lat,
                lng: row.lng,
            });
            // Ownership is free knowledge here; prime the resolution cache.
            self.owning_route.insert(row.subline_id, main_route_id);
        }

        Ok(Arc::new(map))
    }

    async fn with_deadline<T, F>(&self, query: F) -> Result<T, CatalogError>
    where
        F: Future<Output = Result<T, sqlx::Error>>,
    {
        match tokio::time::timeout(self.deadline, query).await {
            Ok(result) => result.map_err(CatalogError::from),
            Err(_) => Err(CatalogError::Timeout(self.deadline)),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SublineStopRow {
    subline_id: i64,
    id: i64,
    code: String,
    name: String,
    ref_code: Option<String>,
    lat: f64,
    lng: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[tokio::test]
    async fn sublines_of_route_orders_stops_by_sequence() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool, &CatalogConfig::default());

        let sublines = reader.sublines_of_route(101).await.unwrap();
        assert_eq!(sublines.len(), 2);

        let eastbound = &sublines[&1011];
        assert_eq!(eastbound.len(), 4);
        let codes: Vec<&str> = eastbound.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["E1", "E2", "E3", "E4"]);

        let westbound = &sublines[&1012];
        let codes: Vec<&str> = westbound.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(codes, ["W1", "W2", "W3", "W4"]);
    }

    #[tokio::test]
    async fn sublines_of_route_empty_for_unknown_route() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool, &CatalogConfig::default());

        let sublines = reader.sublines_of_route(999).await.unwrap();
        assert!(sublines.is_empty());
    }

    #[tokio::test]
    async fn route_of_subline_resolves_and_caches() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool.clone(), &CatalogConfig::default());

        assert_eq!(reader.route_of_subline(1011).await.unwrap(), Some(101));
        assert_eq!(reader.route_of_subline(1012).await.unwrap(), Some(101));
        assert_eq!(reader.route_of_subline(4242).await.unwrap(), None);

        // Deleting the row behind the cache must not affect resolution.
        sqlx::query("DELETE FROM subline_stops WHERE subline_id = 1011")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query("DELETE FROM sublines WHERE id = 1011")
            .execute(&pool)
            .await
            .unwrap();
        assert_eq!(reader.route_of_subline(1011).await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn sublines_serving_stop_lists_both_directions() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool, &CatalogConfig::default());

        // Stop 1 appears in the eastbound sequence only.
        let serving = reader.sublines_serving_stop(1).await.unwrap();
        assert_eq!(serving, vec![1011]);
    }

    #[tokio::test]
    async fn stops_of_subline_returns_ordered_sequence() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool, &CatalogConfig::default());

        let stops = reader.stops_of_subline(1012).await.unwrap().unwrap();
        assert_eq!(stops.len(), 4);
        assert_eq!(stops[0].code, "W1");

        assert!(reader.stops_of_subline(777).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn listing_cache_serves_stale_reads_within_ttl() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let reader = CatalogReader::new(pool.clone(), &CatalogConfig::default());

        let first = reader.sublines_of_route(101).await.unwrap();
        assert_eq!(first.len(), 2);

        sqlx::query("DELETE FROM subline_stops").execute(&pool).await.unwrap();
        sqlx::query("DELETE FROM sublines").execute(&pool).await.unwrap();

        // Within the TTL the deleted catalog is still visible.
        let second = reader.sublines_of_route(101).await.unwrap();
        assert_eq!(second.len(), 2);
    }

    #[tokio::test]
    async fn zero_ttl_refetches_every_time() {
        let pool = testutil::memory_pool().await;
        testutil::seed_route_101(&pool).await;
        let config = CatalogConfig {
            cache_ttl_secs: 0,
            ..CatalogConfig::default()
        };
        let reader = CatalogReader::new(pool.clone(), &config);

        assert_eq!(reader.sublines_of_route(101).await.unwrap().len(), 2);

        sqlx::query("DELETE FROM subline_stops").execute(&pool).await.unwrap();
        sqlx::query("DELETE FROM sublines").execute(&pool).await.unwrap();

        assert!(reader.sublines_of_route(101).await.unwrap().is_empty());
    }
}
