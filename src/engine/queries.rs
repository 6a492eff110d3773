use chrono::NaiveDate;
use ulid::Ulid;

use crate::model::*;

use super::Engine;
use super::status::derive_room_status;

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.users_by_email.get(email)?.value();
        self.user(&id)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    // ── Rooms ────────────────────────────────────────────────

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Every active room with its status derived for `(date, now)`.
    /// Recomputed fresh per call, insertion order, deactivated rooms skipped.
    pub async fn rooms_with_status(&self, date: NaiveDate, now: TimeOfDay) -> Vec<RoomView> {
        let order = self.room_order.read().await.clone();
        let mut out = Vec::with_capacity(order.len());
        for room_id in order {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;
            if !guard.is_active {
                continue;
            }
            out.push(RoomView {
                id: guard.id,
                name: guard.name.clone(),
                number: guard.number.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
                status: derive_room_status(&guard, date, now),
            });
        }
        out
    }

    /// The day grid: every active room plus the day's active bookings,
    /// requester usernames resolved for display.
    pub async fn schedule(&self, date: NaiveDate) -> (Vec<RoomSummary>, Vec<ScheduleEntry>) {
        let order = self.room_order.read().await.clone();
        let mut rooms = Vec::with_capacity(order.len());
        let mut entries = Vec::new();
        for room_id in order {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;
            if !guard.is_active {
                continue;
            }
            rooms.push(RoomSummary {
                id: guard.id,
                name: guard.name.clone(),
                number: guard.number.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
            });
            for b in guard.active_on(date) {
                let username = self
                    .user(&b.user_id)
                    .map(|u| u.username)
                    .unwrap_or_default();
                entries.push(ScheduleEntry {
                    booking_id: b.id,
                    room_id: b.room_id,
                    date: b.date,
                    start_time: b.slot.start,
                    end_time: b.slot.end,
                    username,
                });
            }
        }
        (rooms, entries)
    }

    /// Names of active rooms with no active booking at all on `date`.
    pub async fn rooms_free_on(&self, date: NaiveDate) -> Vec<String> {
        let order = self.room_order.read().await.clone();
        let mut free = Vec::new();
        for room_id in order {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;
            if guard.is_active && guard.active_on(date).next().is_none() {
                free.push(guard.name.clone());
            }
        }
        free
    }

    // ── Bookings ─────────────────────────────────────────────

    /// All of a user's bookings (any status), newest date first, earlier
    /// start first within a date.
    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<BookingView> {
        let order = self.room_order.read().await.clone();
        let mut out = Vec::new();
        for room_id in order {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;
            for b in guard.bookings.iter().filter(|b| b.user_id == user_id) {
                out.push(BookingView {
                    id: b.id,
                    room_id: b.room_id,
                    room_name: guard.name.clone(),
                    room_number: guard.number.clone(),
                    date: b.date,
                    start_time: b.slot.start,
                    end_time: b.slot.end,
                    status: b.status,
                    purpose: b.purpose.clone(),
                });
            }
        }
        out.sort_by(|a, b| {
            b.date
                .cmp(&a.date)
                .then(a.start_time.cmp(&b.start_time))
        });
        out
    }

    pub async fn booking(&self, id: Ulid) -> Option<Booking> {
        let room_id = self.room_for_booking(&id)?;
        let rs = self.room(&room_id)?;
        let guard = rs.read().await;
        guard.booking(id).cloned()
    }

    // ── Announcements ────────────────────────────────────────

    /// Newest first, author usernames resolved, reaction counts only.
    pub async fn list_announcements(&self) -> Vec<AnnouncementView> {
        let list = self.announcements.read().await;
        let mut out: Vec<AnnouncementView> = list
            .iter()
            .map(|a| AnnouncementView {
                id: a.id,
                title: a.title.clone(),
                content: a.content.clone(),
                author: self
                    .user(&a.author)
                    .map(|u| u.username)
                    .unwrap_or_default(),
                created_at: a.created_at,
                likes: a.likes.len(),
                hearts: a.hearts.len(),
            })
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }
}
