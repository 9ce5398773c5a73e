use ulid::Ulid;

use crate::model::*;

use super::EngineError;

/// Outcome of checking a candidate window against a resource's active set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Free,
    Conflict(Ulid),
}

/// Pure overlap decision. `active` must be the resource's active set, read
/// under the same lock the caller will hold for the append.
pub fn detect_conflict(rs: &ResourceState, candidate: &Span) -> Verdict {
    match rs.overlapping(candidate).next() {
        Some(slot) => Verdict::Conflict(slot.id),
        None => Verdict::Free,
    }
}

pub(crate) fn check_no_conflict(rs: &ResourceState, candidate: &Span) -> Result<(), EngineError> {
    match detect_conflict(rs, candidate) {
        Verdict::Free => Ok(()),
        Verdict::Conflict(existing) => Err(EngineError::SlotUnavailable(existing)),
    }
}

/// Turn a start instant and an hour count into a reservation window.
/// Rejects non-positive and oversized durations before anything is looked up.
pub(crate) fn reservation_window(start: Ms, hours: i64) -> Result<Span, EngineError> {
    use crate::limits::*;
    if hours < 1 {
        return Err(EngineError::InvalidDuration(hours));
    }
    if hours > MAX_RESERVATION_HOURS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    // Bound start before adding so the end can never wrap.
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&start) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    let end = start + hours * HOUR_MS;
    if end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(Span::new(start, end))
}

pub(crate) fn price(hours: i64, rate: Money) -> Result<Money, EngineError> {
    (hours as Money)
        .checked_mul(rate)
        .ok_or(EngineError::LimitExceeded("price overflow"))
}
