use ulid::Ulid;

use crate::model::{Ms, ReservationStatus, ResourceKey};

/// Coarse classification used by callers to decide how to surface a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input shape; never retried.
    Validation,
    /// Domain rule refused the request; surfaced verbatim, never retried.
    Conflict,
    NotFound,
    /// Durable storage failed; the request committed nothing.
    Storage,
}

#[derive(Debug)]
pub enum EngineError {
    InvalidDuration(i64),
    ResourceNotFound(ResourceKey),
    VenueNotFound(String),
    SlotUnavailable(Ulid),
    NotFound(Ulid),
    Forbidden(Ulid),
    AlreadyFinal {
        id: Ulid,
        status: ReservationStatus,
    },
    TooLateToCancel {
        id: Ulid,
        start: Ms,
    },
    LimitExceeded(&'static str),
    StorageFailure(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidDuration(_) | EngineError::LimitExceeded(_) => ErrorKind::Validation,
            EngineError::SlotUnavailable(_)
            | EngineError::Forbidden(_)
            | EngineError::AlreadyFinal { .. }
            | EngineError::TooLateToCancel { .. } => ErrorKind::Conflict,
            EngineError::ResourceNotFound(_)
            | EngineError::VenueNotFound(_)
            | EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::StorageFailure(_) => ErrorKind::Storage,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidDuration(_) => "invalid_duration",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::VenueNotFound(_) => "venue_not_found",
            EngineError::SlotUnavailable(_) => "slot_unavailable",
            EngineError::NotFound(_) => "not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::AlreadyFinal { .. } => "already_final",
            EngineError::TooLateToCancel { .. } => "too_late_to_cancel",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidDuration(hours) => {
                write!(f, "invalid duration: {hours} hours (must be at least 1)")
            }
            EngineError::ResourceNotFound(key) => write!(f, "resource not found: {key}"),
            EngineError::VenueNotFound(id) => write!(f, "venue not found: {id}"),
            EngineError::SlotUnavailable(id) => {
                write!(f, "slot unavailable: overlaps reservation {id}")
            }
            EngineError::NotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::Forbidden(id) => {
                write!(f, "reservation {id} belongs to another holder")
            }
            EngineError::AlreadyFinal { id, status } => {
                write!(f, "reservation {id} is already {}", status.as_str())
            }
            EngineError::TooLateToCancel { id, start } => {
                write!(f, "reservation {id} starts at {start}: cancellation closes one hour before start")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::StorageFailure(e) => write!(f, "storage failure: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
