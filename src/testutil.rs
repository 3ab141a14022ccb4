//! Shared fixtures for module tests: in-memory catalog databases and a
//! small seeded network of routes.

use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

/// Fresh in-memory SQLite pool with migrations applied. A single connection
/// is used so every handle sees the same in-memory database.
pub async fn memory_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

pub async fn insert_route(pool: &SqlitePool, id: i64, name: &str) {
    sqlx::query("INSERT INTO main_routes (id, name) VALUES (?, ?)")
        .bind(id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_subline(pool: &SqlitePool, id: i64, main_route_id: i64, name: &str) {
    sqlx::query("INSERT INTO sublines (id, main_route_id, name) VALUES (?, ?, ?)")
        .bind(id)
        .bind(main_route_id)
        .bind(name)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn insert_stop(pool: &SqlitePool, id: i64, code: &str, lat: f64, lng: f64) {
    sqlx::query("INSERT INTO stops (id, code, name, ref, lat, lng) VALUES (?, ?, ?, NULL, ?, ?)")
        .bind(id)
        .bind(code)
        .bind(format!("Stop {code}"))
        .bind(lat)
        .bind(lng)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn link_stop(pool: &SqlitePool, subline_id: i64, stop_id: i64, sequence: i64) {
    sqlx::query("INSERT INTO subline_stops (subline_id, stop_id, sequence) VALUES (?, ?, ?)")
        .bind(subline_id)
        .bind(stop_id)
        .bind(sequence)
        .execute(pool)
        .await
        .unwrap();
}

/// Route 101 with an eastbound subline 1011 (stops E1..E4, ids 1..4) and a
/// westbound subline 1012 (stops W1..W4, ids 5..8). Stops are ~1.1 km
/// apart, so segment bearings are a clean 90 / 270 degrees.
pub async fn seed_route_101(pool: &SqlitePool) {
    insert_route(pool, 101, "Line 101").await;
    insert_subline(pool, 1011, 101, "101 eastbound").await;
    insert_subline(pool, 1012, 101, "101 westbound").await;

    for i in 0..4i64 {
        insert_stop(pool, i + 1, &format!("E{}", i + 1), 10.0, 0.01 * i as f64).await;
        link_stop(pool, 1011, i + 1, i).await;
    }
    for i in 0..4i64 {
        insert_stop(pool, i + 5, &format!("W{}", i + 1), 10.001, 0.01 * (3 - i) as f64).await;
        link_stop(pool, 1012, i + 5, i).await;
    }
}

/// Route 202, same shape as 101 but around latitude 20. Sublines 2021
/// (eastbound, stop ids 21..24) and 2022 (westbound, stop ids 25..28).
pub async fn seed_route_202(pool: &SqlitePool) {
    insert_route(pool, 202, "Line 202").await;
    insert_subline(pool, 2021, 202, "202 eastbound").await;
    insert_subline(pool, 2022, 202, "202 westbound").await;

    for i in 0..4i64 {
        insert_stop(pool, i + 21, &format!("N{}", i + 1), 20.0, 0.01 * i as f64).await;
        link_stop(pool, 2021, i + 21, i).await;
    }
    for i in 0..4i64 {
        insert_stop(pool, i + 25, &format!("S{}", i + 1), 20.001, 0.01 * (3 - i) as f64).await;
        link_stop(pool, 2022, i + 25, i).await;
    }
}
