use thiserror::Error;
use ulid::Ulid;

use crate::model::Booking;
use crate::rules::Violation;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("booking rejected: {}", join_violations(.0))]
    Validation(Vec<Violation>),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("conflict with {} existing booking(s): {}", .0.len(), join_ids(.0))]
    Conflict(Vec<Booking>),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("bid {bid_id} does not belong to {user_id}")]
    Unauthorized { bid_id: Ulid, user_id: String },
    #[error("illegal state: {0}")]
    State(String),
    #[error("concurrent modification, retry: {0}")]
    Concurrency(String),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}

fn join_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn join_ids(bookings: &[Booking]) -> String {
    bookings
        .iter()
        .map(|b| b.id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
