use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use ulid::Ulid;

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Minute-resolution time of day. Wire format is `"HH:MM"` (24-hour);
/// internally it is minutes since midnight so comparisons are integer order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    pub fn from_minutes(minutes: u16) -> Self {
        debug_assert!(minutes < MINUTES_PER_DAY, "time of day out of range");
        Self(minutes)
    }

    pub fn minutes(&self) -> u16 {
        self.0
    }

    pub fn hour(&self) -> u16 {
        self.0 / 60
    }

    pub fn minute(&self) -> u16 {
        self.0 % 60
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseTimeError;

impl fmt::Display for ParseTimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "time must be HH:MM (24-hour)")
    }
}

impl std::error::Error for ParseTimeError {}

impl FromStr for TimeOfDay {
    type Err = ParseTimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (h, m) = s.split_once(':').ok_or(ParseTimeError)?;
        if h.len() != 2 || m.len() != 2 {
            return Err(ParseTimeError);
        }
        let hour: u16 = h.parse().map_err(|_| ParseTimeError)?;
        let minute: u16 = m.parse().map_err(|_| ParseTimeError)?;
        if hour > 23 || minute > 59 {
            return Err(ParseTimeError);
        }
        Ok(Self(hour * 60 + minute))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Half-open interval `[start, end)` within a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: TimeOfDay,
    pub end: TimeOfDay,
}

impl Slot {
    pub fn new(start: TimeOfDay, end: TimeOfDay) -> Self {
        debug_assert!(start < end, "Slot start must be before end");
        Self { start, end }
    }

    pub fn duration_min(&self) -> u16 {
        self.end.minutes() - self.start.minutes()
    }

    /// Half-open overlap test: touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `t` falls inside the slot, inclusive on BOTH bounds:
    /// a booking ending exactly at `t` still covers it. Room-status
    /// derivation depends on this, so it must stay inclusive even though
    /// the conflict test is half-open.
    pub fn covers(&self, t: TimeOfDay) -> bool {
        self.start <= t && t <= self.end
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Cancelled,
    /// Stored `occupied` exists only so imported history stays representable;
    /// the engine itself never persists it — occupancy is derived at read time.
    Occupied,
}

impl BookingStatus {
    /// Active bookings participate in conflict and status checks;
    /// cancelled ones are kept for history but ignored.
    pub fn is_active(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::Occupied)
    }
}

/// Read-time classification of a room, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Available,
    Booked,
    Occupied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub user_id: Ulid,
    /// Calendar date, day granularity.
    pub date: NaiveDate,
    pub slot: Slot,
    pub status: BookingStatus,
    pub purpose: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    pub id: Ulid,
    pub title: String,
    pub content: String,
    pub author: Ulid,
    pub created_at: DateTime<Utc>,
    /// Users who toggled a like / heart on. Toggling twice removes it.
    pub likes: Vec<Ulid>,
    pub hearts: Vec<Ulid>,
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub name: String,
    pub number: String,
    pub capacity: u32,
    pub description: String,
    /// Rooms are soft-deleted: the flag flips, the row never goes away,
    /// so historical bookings keep a valid reference.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    /// Every booking ever made for this room (cancelled ones included),
    /// sorted by `(date, slot.start)`.
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        name: String,
        number: String,
        capacity: u32,
        description: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            number,
            capacity,
            description,
            is_active: true,
            created_at,
            bookings: Vec::new(),
        }
    }

    /// Insert a booking maintaining `(date, slot.start)` order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let key = (booking.date, booking.slot.start);
        let pos = self
            .bookings
            .partition_point(|b| (b.date, b.slot.start) <= key);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    /// All bookings on `date`, any status. Binary search on the sorted list
    /// so a long history does not make day queries linear.
    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        let lo = self.bookings.partition_point(|b| b.date < date);
        let hi = self.bookings.partition_point(|b| b.date <= date);
        &self.bookings[lo..hi]
    }

    /// Active (confirmed/occupied) bookings on `date`.
    pub fn active_on(&self, date: NaiveDate) -> impl Iterator<Item = &Booking> {
        self.bookings_on(date).iter().filter(|b| b.status.is_active())
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        username: String,
        email: String,
        password_hash: String,
        role: Role,
        created_at: DateTime<Utc>,
    },
    UserRenamed {
        id: Ulid,
        username: String,
    },
    /// Removes the user and cancels their active bookings across all rooms.
    UserDeleted {
        id: Ulid,
    },
    RoomCreated {
        id: Ulid,
        name: String,
        number: String,
        capacity: u32,
        description: String,
        created_at: DateTime<Utc>,
    },
    RoomDeactivated {
        id: Ulid,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        purpose: String,
        created_at: DateTime<Utc>,
    },
    BookingCancelled {
        id: Ulid,
        room_id: Ulid,
    },
    AnnouncementPosted {
        id: Ulid,
        title: String,
        content: String,
        author: Ulid,
        created_at: DateTime<Utc>,
    },
    AnnouncementDeleted {
        id: Ulid,
    },
    LikeToggled {
        id: Ulid,
        user_id: Ulid,
    },
    HeartToggled {
        id: Ulid,
        user_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomView {
    pub id: Ulid,
    pub name: String,
    pub number: String,
    pub capacity: u32,
    pub description: String,
    pub status: RoomStatus,
}

/// Room without a derived status, for views that list bookings separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: Ulid,
    pub name: String,
    pub number: String,
    pub capacity: u32,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub id: Ulid,
    pub room_id: Ulid,
    pub room_name: String,
    pub room_number: String,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub status: BookingStatus,
    pub purpose: String,
}

/// One row of the day grid: an active booking plus who holds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub booking_id: Ulid,
    pub room_id: Ulid,
    pub date: NaiveDate,
    pub start_time: TimeOfDay,
    pub end_time: TimeOfDay,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnnouncementView {
    pub id: Ulid,
    pub title: String,
    pub content: String,
    pub author: String,
    pub created_at: DateTime<Utc>,
    pub likes: usize,
    pub hearts: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn time_of_day_parse_and_format() {
        assert_eq!(t("00:00").minutes(), 0);
        assert_eq!(t("09:30").minutes(), 570);
        assert_eq!(t("23:59").minutes(), 1439);
        assert_eq!(t("14:05").to_string(), "14:05");
    }

    #[test]
    fn time_of_day_rejects_malformed() {
        assert!("24:00".parse::<TimeOfDay>().is_err());
        assert!("12:60".parse::<TimeOfDay>().is_err());
        assert!("9:30".parse::<TimeOfDay>().is_err()); // must be zero-padded
        assert!("0930".parse::<TimeOfDay>().is_err());
        assert!("ab:cd".parse::<TimeOfDay>().is_err());
        assert!("12:3".parse::<TimeOfDay>().is_err());
    }

    #[test]
    fn time_of_day_orders_as_clock() {
        assert!(t("09:00") < t("09:01"));
        assert!(t("09:59") < t("10:00"));
    }

    #[test]
    fn slot_overlap_half_open() {
        let nine_ten = Slot::new(t("09:00"), t("10:00"));
        let half_past = Slot::new(t("09:30"), t("10:30"));
        let next = Slot::new(t("10:00"), t("11:00"));
        assert!(nine_ten.overlaps(&half_past));
        assert!(!nine_ten.overlaps(&next)); // touching, not overlapping
        assert!(!next.overlaps(&nine_ten));
    }

    #[test]
    fn slot_covers_is_inclusive_both_ends() {
        let s = Slot::new(t("14:00"), t("15:00"));
        assert!(s.covers(t("14:00")));
        assert!(s.covers(t("14:30")));
        assert!(s.covers(t("15:00"))); // inclusive upper bound
        assert!(!s.covers(t("15:01")));
        assert!(!s.covers(t("13:59")));
    }

    fn booking(date: &str, start: &str, end: &str, status: BookingStatus) -> Booking {
        Booking {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            date: date.parse().unwrap(),
            slot: Slot::new(t(start), t(end)),
            status,
            purpose: String::new(),
            created_at: Utc::now(),
        }
    }

    fn empty_room() -> RoomState {
        RoomState::new(
            Ulid::new(),
            "Classroom 301".into(),
            "301".into(),
            40,
            String::new(),
            Utc::now(),
        )
    }

    #[test]
    fn bookings_stay_sorted() {
        let mut room = empty_room();
        room.insert_booking(booking("2030-05-21", "09:00", "10:00", BookingStatus::Confirmed));
        room.insert_booking(booking("2030-05-20", "14:00", "15:00", BookingStatus::Confirmed));
        room.insert_booking(booking("2030-05-20", "09:00", "10:00", BookingStatus::Confirmed));
        let keys: Vec<_> = room
            .bookings
            .iter()
            .map(|b| (b.date.to_string(), b.slot.start.to_string()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("2030-05-20".to_string(), "09:00".to_string()),
                ("2030-05-20".to_string(), "14:00".to_string()),
                ("2030-05-21".to_string(), "09:00".to_string()),
            ]
        );
    }

    #[test]
    fn bookings_on_slices_one_day() {
        let mut room = empty_room();
        room.insert_booking(booking("2030-05-19", "09:00", "10:00", BookingStatus::Confirmed));
        room.insert_booking(booking("2030-05-20", "09:00", "10:00", BookingStatus::Confirmed));
        room.insert_booking(booking("2030-05-20", "11:00", "12:00", BookingStatus::Cancelled));
        room.insert_booking(booking("2030-05-21", "09:00", "10:00", BookingStatus::Confirmed));

        let day = room.bookings_on("2030-05-20".parse().unwrap());
        assert_eq!(day.len(), 2);
        assert!(day.iter().all(|b| b.date.to_string() == "2030-05-20"));
    }

    #[test]
    fn active_on_skips_cancelled() {
        let mut room = empty_room();
        room.insert_booking(booking("2030-05-20", "09:00", "10:00", BookingStatus::Cancelled));
        room.insert_booking(booking("2030-05-20", "11:00", "12:00", BookingStatus::Confirmed));
        room.insert_booking(booking("2030-05-20", "13:00", "14:00", BookingStatus::Occupied));

        let active: Vec<_> = room.active_on("2030-05-20".parse().unwrap()).collect();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|b| b.status.is_active()));
    }

    #[test]
    fn bookings_on_empty_day() {
        let mut room = empty_room();
        room.insert_booking(booking("2030-05-20", "09:00", "10:00", BookingStatus::Confirmed));
        assert!(room.bookings_on("2030-05-25".parse().unwrap()).is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            room_id: Ulid::new(),
            user_id: Ulid::new(),
            date: "2030-05-20".parse().unwrap(),
            slot: Slot::new(t("09:00"), t("10:00")),
            purpose: "standup".into(),
            created_at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }

    #[test]
    fn time_of_day_json_is_hhmm() {
        let s = serde_json::to_string(&t("09:05")).unwrap();
        assert_eq!(s, "\"09:05\"");
        let back: TimeOfDay = serde_json::from_str(&s).unwrap();
        assert_eq!(back, t("09:05"));
    }
}
