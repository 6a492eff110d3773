use chrono::{Local, NaiveDate, Timelike};

use crate::model::*;

/// Current local calendar date and time of day, the reference instant for
/// status derivation when the HTTP layer does not supply one.
pub fn now_local() -> (NaiveDate, TimeOfDay) {
    let now = Local::now();
    let minutes = (now.hour() * 60 + now.minute()) as u16;
    (now.date_naive(), TimeOfDay::from_minutes(minutes))
}

/// Classify a room for `date` at instant `now`, in precedence order:
///
/// 1. any active booking whose interval contains `now` → occupied
///    (interval bounds are inclusive on BOTH ends here — a booking ending
///    exactly at `now` still reads as occupied);
/// 2. else any active booking starting later today → booked;
/// 3. else available.
///
/// Always computed fresh from the booking set; nothing here is stored.
pub fn derive_room_status(room: &RoomState, date: NaiveDate, now: TimeOfDay) -> RoomStatus {
    if room.active_on(date).any(|b| b.slot.covers(now)) {
        return RoomStatus::Occupied;
    }
    if room.active_on(date).any(|b| b.slot.start > now) {
        return RoomStatus::Booked;
    }
    RoomStatus::Available
}
