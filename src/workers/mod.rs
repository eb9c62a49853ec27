pub mod dispatch;
pub mod location_writer;
pub mod outbox;
