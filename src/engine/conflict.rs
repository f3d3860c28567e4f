use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Bounds-check a requested session window and build its span.
pub(crate) fn validate_session_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::LimitExceeded("session end must be after start"));
    }
    if start < MIN_VALID_TIMESTAMP_MS || end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let span = Span::new(start, end);
    if span.duration_ms() > MAX_SESSION_DURATION_MS {
        return Err(EngineError::LimitExceeded("session too long"));
    }
    Ok(span)
}

/// First non-cancelled booking overlapping `candidate`, if any. Cancelled
/// bookings have released their slot and never conflict.
pub(crate) fn find_conflict<'a>(ts: &'a TutorState, candidate: &Span) -> Option<&'a Booking> {
    ts.overlapping(candidate).find(|b| b.status.blocks_slot())
}

pub(crate) fn check_slot_available(ts: &TutorState, candidate: &Span) -> Result<(), EngineError> {
    match find_conflict(ts, candidate) {
        Some(existing) => Err(EngineError::SlotUnavailable(existing.id)),
        None => Ok(()),
    }
}

/// Predicate form of the conflict check, for callers that only need a bool.
pub fn has_conflict(ts: &TutorState, candidate: &Span) -> bool {
    find_conflict(ts, candidate).is_some()
}
