//! Dispatch core for a ride-hailing platform
//!
//! Turns a stream of ride requests and a live population of driver
//! locations into consistent assignments, runs trip lifecycle through fare
//! calculation, and drives payments to durable completion through an
//! external provider via a transactional outbox.

pub mod audit;
pub mod cache;
pub mod config;
pub mod db;
pub mod errors;
pub mod events;
pub mod fanout;
pub mod fare;
pub mod geo;
pub mod idempotency;
pub mod metrics;
pub mod models;
pub mod notify;
pub mod psp;
pub mod rate_limit;
pub mod repos;
pub mod routes;
pub mod services;
pub mod state;
pub mod state_machine;
pub mod workers;
