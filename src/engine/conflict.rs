use chrono::NaiveDate;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_slot(slot: &Slot) -> Result<(), EngineError> {
    if slot.end <= slot.start {
        return Err(EngineError::Validation("end time must be after start time"));
    }
    Ok(())
}

pub(crate) fn validate_purpose(purpose: &str) -> Result<(), EngineError> {
    if purpose.len() > MAX_PURPOSE_LEN {
        return Err(EngineError::LimitExceeded("purpose too long"));
    }
    Ok(())
}

/// The booking-conflict rule. Requested `[s, e)` collides with an existing
/// active booking `[s', e')` iff `s < e' && e > s'` — half-open, so a
/// booking ending exactly when the next one starts is fine.
///
/// Returns the first overlapping booking in day order; callers only need
/// one to reject the request and render its interval.
pub(crate) fn check_conflict(
    room: &RoomState,
    date: NaiveDate,
    slot: &Slot,
) -> Result<(), EngineError> {
    for existing in room.active_on(date) {
        if slot.overlaps(&existing.slot) {
            return Err(EngineError::Conflict {
                booking: existing.id,
                existing: existing.slot,
            });
        }
    }
    Ok(())
}
