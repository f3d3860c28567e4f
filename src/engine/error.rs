use ulid::Ulid;

use crate::model::{BookingStatus, Span, Weekday};

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Candidate interval overlaps the named non-cancelled booking.
    SlotUnavailable(Ulid),
    /// Candidate interval falls (partly) outside the tutor's declared hours.
    /// Only raised when the availability policy is enforced.
    OutsideAvailability {
        requested: Span,
        uncovered: Vec<Span>,
    },
    InvalidTransition {
        from: BookingStatus,
        to: BookingStatus,
    },
    Unauthorized {
        actor: Ulid,
        booking: Ulid,
    },
    InvalidSlotOrder {
        day: Weekday,
    },
    OverlappingSlots {
        day: Weekday,
    },
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::SlotUnavailable(id) => {
                write!(f, "the tutor is not available during this time (conflicts with booking {id})")
            }
            EngineError::OutsideAvailability {
                requested,
                uncovered,
            } => {
                write!(
                    f,
                    "requested time [{}, {}) is outside the tutor's declared hours; uncovered: {:?}",
                    requested.start, requested.end, uncovered
                )
            }
            EngineError::InvalidTransition { from, to } => {
                write!(f, "cannot move booking from {from} to {to}")
            }
            EngineError::Unauthorized { actor, booking } => {
                write!(f, "actor {actor} may not act on booking {booking}")
            }
            EngineError::InvalidSlotOrder { day } => {
                write!(f, "end time must be after start time on {day}")
            }
            EngineError::OverlappingSlots { day } => {
                write!(f, "overlapping time slots on {day}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
