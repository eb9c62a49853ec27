//! End-to-end scenarios over a live Postgres store
//!
//! These tests exercise the full dispatch pipeline with in-memory geo/cache
//! backends and a mock PSP. They skip (pass trivially) when DATABASE_URL is
//! unset. Serialized: the dispatch worker's poll sees the whole table.

mod common;

use common::{build_state, cleanup_all, get_test_pool, test_config, TestHarness};
use dispatch_rs::models::{CreateDriverRequest, CreateRideRequest};
use dispatch_rs::psp::{webhook, MockPsp};
use dispatch_rs::services::{assignment, drivers, matching, payments, rides, trips};
use dispatch_rs::workers::{dispatch, outbox};
use rust_decimal::Decimal;
use serial_test::serial;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const SF_LAT: f64 = 37.7749;
const SF_LON: f64 = -122.4194;

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn driver_request() -> CreateDriverRequest {
    CreateDriverRequest {
        name: "Test Driver".to_string(),
        phone: format!("+1415{}", &Uuid::new_v4().simple().to_string()[..10]),
        lat: SF_LAT,
        lon: SF_LON,
    }
}

fn ride_request(tier: &str, surge: Option<&str>) -> CreateRideRequest {
    CreateRideRequest {
        rider_id: Uuid::new_v4(),
        pickup_lat: SF_LAT,
        pickup_lon: SF_LON,
        drop_lat: 37.8049,
        drop_lon: -122.4094,
        tier: tier.to_string(),
        payment_method: "CARD".to_string(),
        surge_multiplier: surge.map(dec),
    }
}

/// Drive one ride from intake to ENDED; returns (trip_id, ride_id, driver_id)
async fn run_trip_to_end(
    harness: &TestHarness,
    tier: &str,
    surge: Option<&str>,
    distance_km: &str,
    duration_sec: i32,
) -> (Uuid, Uuid, Uuid) {
    let state = &harness.state;

    let driver = drivers::create_driver(state, driver_request()).await.unwrap();
    let created = rides::create_ride(state, ride_request(tier, surge)).await.unwrap();

    dispatch::run_iteration(state).await.unwrap();

    let ride = rides::get_ride(state, created.ride.id).await.unwrap();
    assert_eq!(ride.status, "DRIVER_ASSIGNED");
    assert_eq!(ride.assigned_driver_id, Some(driver.id));

    let (trip, driver_after) = assignment::initialize_trip(state, ride.id, driver.id)
        .await
        .unwrap();
    assert_eq!(trip.status, "CREATED");
    assert_eq!(driver_after.status, "ON_TRIP");

    let trip = trips::start(state, trip.id).await.unwrap();
    assert_eq!(trip.status, "STARTED");
    assert!(trip.started_at.is_some());

    let trip = trips::end(state, trip.id, Some(dec(distance_km)), Some(duration_sec))
        .await
        .unwrap();
    assert_eq!(trip.status, "ENDED");

    (trip.id, ride.id, driver.id)
}

#[tokio::test]
#[serial]
async fn test_happy_path_economy_ride() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let (trip_id, ride_id, driver_id) =
        run_trip_to_end(&harness, "ECONOMY", None, "10", 1200).await;

    // 5.00 + 10 * 1.50 + 20 * 0.25 = 25.00
    let receipt = trips::receipt(state, trip_id).await.unwrap();
    assert_eq!(receipt.trip.base_fare, Some(dec("25.00")));
    assert_eq!(receipt.trip.total_fare, Some(dec("25.00")));
    assert!(receipt.trip.ended_at >= receipt.trip.started_at);

    let ride = rides::get_ride(state, ride_id).await.unwrap();
    assert_eq!(ride.status, "COMPLETED");

    let driver = drivers::get_driver(state, driver_id).await.unwrap();
    assert_eq!(driver.status, "AVAILABLE");

    // back in the matcher's pool after the trip
    let candidates = matching::find_nearby(state, SF_LAT, SF_LON, None).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].driver_id, driver_id);
}

#[tokio::test]
#[serial]
async fn test_premium_surge_fare() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));

    let (trip_id, _, _) =
        run_trip_to_end(&harness, "PREMIUM", Some("2.0"), "10", 1200).await;

    // (8.00 + 10 * 2.50 + 20 * 0.40) * 2.0 = 82.00
    let receipt = trips::receipt(&harness.state, trip_id).await.unwrap();
    assert_eq!(receipt.trip.base_fare, Some(dec("41.00")));
    assert_eq!(receipt.trip.total_fare, Some(dec("82.00")));
}

#[tokio::test]
#[serial]
async fn test_ride_expires_without_candidates() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let created = rides::create_ride(state, ride_request("ECONOMY", None)).await.unwrap();
    assert!(created.candidates.is_empty());

    // young rides with no candidates are left alone
    dispatch::run_iteration(state).await.unwrap();
    let ride = rides::get_ride(state, created.ride.id).await.unwrap();
    assert_eq!(ride.status, "MATCHING");

    // age it past the match timeout, still inside the poll window
    sqlx::query("UPDATE rides SET created_at = NOW() - INTERVAL '2 minutes' WHERE id = $1")
        .bind(created.ride.id)
        .execute(&pool)
        .await
        .unwrap();

    dispatch::run_iteration(state).await.unwrap();
    let ride = rides::get_ride(state, created.ride.id).await.unwrap();
    assert_eq!(ride.status, "EXPIRED");

    // expired rides fall out of the poll
    dispatch::run_iteration(state).await.unwrap();
    let ride = rides::get_ride(state, created.ride.id).await.unwrap();
    assert_eq!(ride.status, "EXPIRED");
}

#[tokio::test]
#[serial]
async fn test_concurrent_assignment_race() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let d1 = drivers::create_driver(state, driver_request()).await.unwrap();
    let d2 = drivers::create_driver(state, driver_request()).await.unwrap();

    let r1 = rides::create_ride(state, ride_request("ECONOMY", None)).await.unwrap().ride;
    let r2 = rides::create_ride(state, ride_request("ECONOMY", None)).await.unwrap().ride;

    // both rides grab at the same driver; exactly one can win
    let (first, second) = tokio::join!(
        assignment::assign(state, r1.id, d1.id),
        assignment::assign(state, r2.id, d1.id),
    );
    assert!(
        first.is_ok() != second.is_ok(),
        "exactly one assignment of the same driver may succeed"
    );
    let first_is_ok = first.is_ok();
    let losing_ride = if first_is_ok { r2.id } else { r1.id };
    let loser_err = if first_is_ok { second.unwrap_err() } else { first.unwrap_err() };
    assert!(matches!(
        loser_err,
        dispatch_rs::errors::DispatchError::Conflict(_)
    ));

    // the loser retries with the next candidate, as the worker would
    assignment::assign(state, losing_ride, d2.id).await.unwrap();

    let r1 = rides::get_ride(state, r1.id).await.unwrap();
    let r2 = rides::get_ride(state, r2.id).await.unwrap();
    assert_eq!(r1.status, "DRIVER_ASSIGNED");
    assert_eq!(r2.status, "DRIVER_ASSIGNED");
    assert_ne!(r1.assigned_driver_id, r2.assigned_driver_id);
}

#[tokio::test]
#[serial]
async fn test_driver_cannot_hold_two_trips() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let driver = drivers::create_driver(state, driver_request()).await.unwrap();
    let ride = rides::create_ride(state, ride_request("ECONOMY", None)).await.unwrap().ride;

    dispatch::run_iteration(state).await.unwrap();
    assignment::initialize_trip(state, ride.id, driver.id).await.unwrap();

    // accepting again races the ON_TRIP transition and loses
    let second = assignment::initialize_trip(state, ride.id, driver.id).await;
    assert!(second.is_err());

    // the store-level net: a second live trip row is impossible
    let mut tx = pool.begin().await.unwrap();
    let direct = dispatch_rs::repos::trip_repo::insert(&mut tx, Uuid::new_v4(), ride.id, driver.id)
        .await;
    assert!(direct.is_err());
    tx.rollback().await.unwrap();

    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM trips WHERE driver_id = $1 AND status IN ('CREATED','STARTED','PAUSED')",
    )
    .bind(driver.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
#[serial]
async fn test_offline_driver_leaves_the_index() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let driver = drivers::create_driver(state, driver_request()).await.unwrap();
    assert_eq!(
        matching::find_nearby(state, SF_LAT, SF_LON, None).await.unwrap().len(),
        1
    );

    drivers::update_status(state, driver.id, "OFFLINE").await.unwrap();
    assert!(matching::find_nearby(state, SF_LAT, SF_LON, None)
        .await
        .unwrap()
        .is_empty());

    // and back
    drivers::update_status(state, driver.id, "AVAILABLE").await.unwrap();
    assert_eq!(
        matching::find_nearby(state, SF_LAT, SF_LON, None).await.unwrap().len(),
        1
    );
}

#[tokio::test]
#[serial]
async fn test_trip_pause_resume_and_cancel_flow() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let driver = drivers::create_driver(state, driver_request()).await.unwrap();
    let ride = rides::create_ride(state, ride_request("ECONOMY", None)).await.unwrap().ride;
    dispatch::run_iteration(state).await.unwrap();
    let (trip, _) = assignment::initialize_trip(state, ride.id, driver.id).await.unwrap();

    let trip2 = trips::start(state, trip.id).await.unwrap();
    let started_at = trip2.started_at;

    let trip3 = trips::pause(state, trip.id).await.unwrap();
    assert_eq!(trip3.status, "PAUSED");

    // resume keeps the original started_at
    let trip4 = trips::start(state, trip.id).await.unwrap();
    assert_eq!(trip4.status, "STARTED");
    assert_eq!(trip4.started_at, started_at);

    let trip5 = trips::cancel(state, trip.id, Some("rider no-show")).await.unwrap();
    assert_eq!(trip5.status, "CANCELLED");

    let ride = rides::get_ride(state, ride.id).await.unwrap();
    assert_eq!(ride.status, "CANCELLED");
    let driver = drivers::get_driver(state, driver.id).await.unwrap();
    assert_eq!(driver.status, "AVAILABLE");

    // cancelled trips cannot be revived
    assert!(trips::start(state, trip.id).await.is_err());
    // and have no receipt
    assert!(trips::receipt(state, trip.id).await.is_err());
}

#[tokio::test]
#[serial]
async fn test_payment_retry_then_webhook_completion() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let psp = Arc::new(MockPsp::failing_first(1));
    let harness = build_state(pool.clone(), test_config(), psp.clone());
    let state = &harness.state;

    let (trip_id, _, _) = run_trip_to_end(&harness, "ECONOMY", None, "10", 1200).await;

    let payment = payments::create_payment(state, trip_id).await.unwrap();
    assert_eq!(payment.status, "PENDING");

    // the outbox event was written with the payment, one for one
    let outbox_count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1 AND event_type = 'PAYMENT_CREATED'",
    )
    .bind(payment.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(outbox_count, 1);

    // tick 1: PSP fails, retry scheduled 30s out
    outbox::run_iteration(state).await.unwrap();
    let p = payments::get_payment(state, payment.id).await.unwrap();
    assert_eq!(p.status, "PENDING");
    assert_eq!(p.retry_count, 1);
    assert!(p.next_retry_at.is_some());
    assert!(p.failure_reason.is_some());
    assert_eq!(psp.call_count(), 1);

    // tick 2: backoff gates the event, no PSP call is made
    outbox::run_iteration(state).await.unwrap();
    assert_eq!(psp.call_count(), 1);

    // the backoff elapses
    sqlx::query("UPDATE payments SET next_retry_at = NOW() - INTERVAL '1 second' WHERE id = $1")
        .bind(payment.id)
        .execute(&pool)
        .await
        .unwrap();

    // tick 3: PSP accepts, payment parks in PROCESSING awaiting the webhook
    outbox::run_iteration(state).await.unwrap();
    let p = payments::get_payment(state, payment.id).await.unwrap();
    assert_eq!(p.status, "PROCESSING");
    assert!(p.psp_transaction_id.is_some());
    assert_eq!(psp.call_count(), 2);

    // the outbox row stays open until the provider confirms
    let unprocessed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1 AND processed = FALSE",
    )
    .bind(payment.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unprocessed, 1);

    // signed webhook finalizes
    let body = serde_json::json!({
        "payment_id": payment.id,
        "status": "succeeded",
        "transaction_id": p.psp_transaction_id,
    })
    .to_string();
    let signature = webhook::sign(&body, chrono::Utc::now().timestamp(), "whsec_test_secret");
    let finalized = payments::handle_webhook(state, &body, Some(&signature)).await.unwrap();
    assert_eq!(finalized.status, "COMPLETED");

    let unprocessed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1 AND processed = FALSE",
    )
    .bind(payment.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unprocessed, 0);

    // receipt now shows the settled payment
    let receipt = trips::receipt(state, trip_id).await.unwrap();
    assert_eq!(receipt.payment.unwrap().status, "COMPLETED");
}

#[tokio::test]
#[serial]
async fn test_outbox_reprocessing_is_idempotent() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let psp = Arc::new(MockPsp::new());
    let harness = build_state(pool.clone(), test_config(), psp.clone());
    let state = &harness.state;

    let (trip_id, _, _) = run_trip_to_end(&harness, "ECONOMY", None, "10", 1200).await;
    let payment = payments::create_payment(state, trip_id).await.unwrap();

    outbox::run_iteration(state).await.unwrap();
    let p = payments::get_payment(state, payment.id).await.unwrap();
    assert_eq!(p.status, "PROCESSING");
    assert_eq!(psp.call_count(), 1);

    // re-driving the same outbox event must not call the PSP again
    let outbox_id: Uuid =
        sqlx::query_scalar("SELECT id FROM outbox_events WHERE aggregate_id = $1")
            .bind(payment.id)
            .fetch_one(&pool)
            .await
            .unwrap();
    payments::process_payment(state, payment.id, outbox_id).await.unwrap();

    let p = payments::get_payment(state, payment.id).await.unwrap();
    assert_eq!(p.status, "PROCESSING");
    assert_eq!(psp.call_count(), 1);

    // the retired event no longer shows up as due
    outbox::run_iteration(state).await.unwrap();
    assert_eq!(psp.call_count(), 1);
}

#[tokio::test]
#[serial]
async fn test_payment_fails_after_retry_budget() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let psp = Arc::new(MockPsp::failing_first(100));
    let harness = build_state(pool.clone(), test_config(), psp.clone());
    let state = &harness.state;

    let (trip_id, _, _) = run_trip_to_end(&harness, "ECONOMY", None, "10", 1200).await;
    let payment = payments::create_payment(state, trip_id).await.unwrap();

    // burn the whole retry budget, forcing each backoff window shut
    for expected_count in 1..=3 {
        outbox::run_iteration(state).await.unwrap();
        let p = payments::get_payment(state, payment.id).await.unwrap();
        assert_eq!(p.retry_count, expected_count);
        sqlx::query("UPDATE payments SET next_retry_at = NOW() - INTERVAL '1 second' WHERE id = $1")
            .bind(payment.id)
            .execute(&pool)
            .await
            .unwrap();
    }

    // budget exhausted: the next pass retires the payment
    outbox::run_iteration(state).await.unwrap();
    let p = payments::get_payment(state, payment.id).await.unwrap();
    assert_eq!(p.status, "FAILED");
    assert_eq!(p.failure_reason.as_deref(), Some("max retries exceeded"));

    let unprocessed: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM outbox_events WHERE aggregate_id = $1 AND processed = FALSE",
    )
    .bind(payment.id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(unprocessed, 0);
}

#[tokio::test]
#[serial]
async fn test_webhook_finalization_is_idempotent() {
    let Some(pool) = get_test_pool().await else { return };
    cleanup_all(&pool).await;
    let harness = build_state(pool.clone(), test_config(), Arc::new(MockPsp::new()));
    let state = &harness.state;

    let (trip_id, _, _) = run_trip_to_end(&harness, "ECONOMY", None, "10", 1200).await;
    let payment = payments::create_payment(state, trip_id).await.unwrap();
    outbox::run_iteration(state).await.unwrap();

    let body = serde_json::json!({
        "payment_id": payment.id,
        "status": "succeeded",
        "transaction_id": "txn_1",
    })
    .to_string();
    let signature = webhook::sign(&body, chrono::Utc::now().timestamp(), "whsec_test_secret");

    let first = payments::handle_webhook(state, &body, Some(&signature)).await.unwrap();
    assert_eq!(first.status, "COMPLETED");

    // a redelivered webhook cannot move the payment again
    let body_failed = serde_json::json!({
        "payment_id": payment.id,
        "status": "failed",
    })
    .to_string();
    let signature_failed =
        webhook::sign(&body_failed, chrono::Utc::now().timestamp(), "whsec_test_secret");
    let second = payments::handle_webhook(state, &body_failed, Some(&signature_failed))
        .await
        .unwrap();
    assert_eq!(second.status, "COMPLETED");
}
