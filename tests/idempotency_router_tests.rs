//! Idempotent creation through the HTTP surface (store-backed)

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{build_state, cleanup_all, get_test_pool, test_config};
use dispatch_rs::psp::MockPsp;
use dispatch_rs::routes::api_router;
use http_body_util::BodyExt;
use serial_test::serial;
use std::sync::Arc;
use tower::ServiceExt;

fn ride_body(pickup_lat: f64) -> String {
    serde_json::json!({
        "rider_id": uuid::Uuid::new_v4(),
        "pickup_lat": pickup_lat,
        "pickup_lon": -122.4194,
        "drop_lat": 37.8049,
        "drop_lon": -122.4094,
        "tier": "ECONOMY",
        "payment_method": "CARD"
    })
    .to_string()
}

fn post_ride(key: &str, body: String) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/rides")
        .header("content-type", "application/json")
        .header("idempotency-key", key)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
#[serial]
async fn test_same_key_replays_byte_identical_response() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let app = api_router(harness.state);

    let key = uuid::Uuid::new_v4().to_string();

    let first = app
        .clone()
        .oneshot(post_ride(&key, ride_body(37.7749)))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);
    let first_body = first.into_body().collect().await.unwrap().to_bytes();

    // second call carries a different body; the cached response wins
    let second = app
        .clone()
        .oneshot(post_ride(&key, ride_body(40.7128)))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CREATED);
    let second_body = second.into_body().collect().await.unwrap().to_bytes();

    assert_eq!(first_body, second_body, "replay must be byte-identical");

    let rides: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rides")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rides, 1, "only one ride row may exist");
}

#[tokio::test]
#[serial]
async fn test_different_keys_create_distinct_rides() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let app = api_router(harness.state);

    for _ in 0..2 {
        let key = uuid::Uuid::new_v4().to_string();
        let response = app
            .clone()
            .oneshot(post_ride(&key, ride_body(37.7749)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let rides: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rides")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rides, 2);
}

#[tokio::test]
#[serial]
async fn test_without_key_every_call_creates_a_ride() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let app = api_router(harness.state);

    for _ in 0..2 {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/rides")
                    .header("content-type", "application/json")
                    .body(Body::from(ride_body(37.7749)))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let rides: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rides")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rides, 2);
}
