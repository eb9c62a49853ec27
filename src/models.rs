use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Driver record from the drivers table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Driver {
    pub id: Uuid,
    pub name: String,
    pub phone: String,
    pub status: String,
    pub rating: Decimal,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Ride record from the rides table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Ride {
    pub id: Uuid,
    pub rider_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub drop_lat: f64,
    pub drop_lon: f64,
    pub tier: String,
    pub payment_method: String,
    pub status: String,
    pub surge_multiplier: Decimal,
    pub assigned_driver_id: Option<Uuid>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Trip record from the trips table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Trip {
    pub id: Uuid,
    pub ride_id: Uuid,
    pub driver_id: Uuid,
    pub status: String,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub distance_km: Option<Decimal>,
    pub duration_sec: Option<i32>,
    pub base_fare: Option<Decimal>,
    pub total_fare: Option<Decimal>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Payment record from the payments table
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Payment {
    pub id: Uuid,
    pub trip_id: Uuid,
    pub amount: Decimal,
    pub status: String,
    pub psp_transaction_id: Option<String>,
    pub psp_response: Option<JsonValue>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_retry_at: Option<DateTime<Utc>>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outbox row: written in the same transaction as the domain write it mirrors
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Uuid,
    pub event_type: String,
    pub payload: JsonValue,
    pub processed: bool,
    pub created_at: DateTime<Utc>,
}

/// A matched driver candidate with its distance from the pickup point
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub distance_km: f64,
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRideRequest {
    pub rider_id: Uuid,
    pub pickup_lat: f64,
    pub pickup_lon: f64,
    pub drop_lat: f64,
    pub drop_lon: f64,
    pub tier: String,
    pub payment_method: String,
    pub surge_multiplier: Option<Decimal>,
}

/// Ride plus the advisory candidate list computed at intake
#[derive(Debug, Serialize, Deserialize)]
pub struct RideWithCandidates {
    #[serde(flatten)]
    pub ride: Ride,
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
pub struct ListRidesQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDriverRequest {
    pub name: String,
    pub phone: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLocationRequest {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDriverStatusRequest {
    pub status: String,
}

#[derive(Debug, Deserialize)]
pub struct ListDriversQuery {
    pub status: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DriverAcceptRequest {
    pub ride_id: Uuid,
}

/// Trip plus driver view returned on acceptance
#[derive(Debug, Serialize, Deserialize)]
pub struct AcceptResponse {
    pub trip: Trip,
    pub driver: Driver,
}

#[derive(Debug, Deserialize)]
pub struct EndTripRequest {
    pub distance_km: Option<Decimal>,
    pub duration_sec: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct CancelTripRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub trip_id: Uuid,
}

/// Receipt document: trip joined with ride, driver and payment state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    pub trip: Trip,
    pub ride: Ride,
    pub driver: Driver,
    pub payment: Option<Payment>,
}

/// Aggregate types referenced by outbox rows
pub const AGGREGATE_PAYMENT: &str = "PAYMENT";

/// Outbox event type for freshly created payments
pub const EVENT_PAYMENT_CREATED: &str = "PAYMENT_CREATED";
