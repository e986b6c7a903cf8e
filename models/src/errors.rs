// models/src/errors.rs

pub use thiserror::Error;

use crate::appointment::AppointmentStatus;

/// Errors surfaced by the scheduling and authorization core.
///
/// Every variant is a terminal, user-facing outcome: nothing here is retried
/// internally. `SlotTaken` is the one variant callers are expected to handle
/// by picking a different slot.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("caller is not authenticated")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("invalid slot: {0}")]
    InvalidSlot(String),
    #[error("slot is already booked for this doctor")]
    SlotTaken,
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("doctor identity has no linked doctor record")]
    ProfileIncomplete,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid data provided: {0}")]
    InvalidData(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("an internal error occurred: {0}")]
    Internal(String),
    #[cfg(feature = "sled-errors")]
    #[error(transparent)]
    Sled(#[from] sled::Error),
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(format!("JSON processing error: {}", err))
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        CoreError::Internal(format!("{:#}", err))
    }
}

/// A type alias for a `Result` that returns a `CoreError` on failure.
pub type CoreResult<T> = Result<T, CoreError>;
