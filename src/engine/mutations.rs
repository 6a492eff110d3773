use chrono::{NaiveDate, Utc};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_conflict, validate_purpose, validate_slot};
use super::{Engine, EngineError, WalCommand, cancel_bookings_of, toggle_membership};

impl Engine {
    // ── Users ────────────────────────────────────────────────

    pub async fn register_user(
        &self,
        id: Ulid,
        username: String,
        email: String,
        password_hash: String,
        role: Role,
    ) -> Result<User, EngineError> {
        if self.users.len() >= MAX_USERS {
            return Err(EngineError::LimitExceeded("too many users"));
        }
        if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::Validation("username must be 3-30 characters"));
        }
        if email.len() > MAX_EMAIL_LEN {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        if self.users_by_email.contains_key(&email) {
            return Err(EngineError::Duplicate("email"));
        }
        if self.users_by_username.contains_key(&username) {
            return Err(EngineError::Duplicate("username"));
        }

        let created_at = Utc::now();
        let event = Event::UserRegistered {
            id,
            username: username.clone(),
            email: email.clone(),
            password_hash: password_hash.clone(),
            role,
            created_at,
        };
        self.wal_append(&event).await?;

        let user = User {
            id,
            username,
            email,
            password_hash,
            role,
            created_at,
        };
        self.index_user(user.clone());
        Ok(user)
    }

    pub async fn rename_user(&self, id: Ulid, username: String) -> Result<User, EngineError> {
        if username.len() < MIN_USERNAME_LEN || username.len() > MAX_USERNAME_LEN {
            return Err(EngineError::Validation("username must be 3-30 characters"));
        }
        if let Some(taken) = self.users_by_username.get(&username)
            && *taken.value() != id
        {
            return Err(EngineError::Duplicate("username"));
        }
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::UserRenamed {
            id,
            username: username.clone(),
        };
        self.wal_append(&event).await?;

        let mut user = self.users.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        self.users_by_username.remove(&user.username);
        user.username = username.clone();
        self.users_by_username.insert(username, id);
        Ok(user.clone())
    }

    /// Remove a user and cancel their active bookings everywhere, freeing
    /// the slots for rebooking. The booking rows stay (history invariant).
    pub async fn delete_user(&self, id: Ulid) -> Result<(), EngineError> {
        if !self.users.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }

        let event = Event::UserDeleted { id };
        self.wal_append(&event).await?;

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        for rid in room_ids {
            if let Some(rs) = self.room(&rid) {
                let mut guard = rs.write().await;
                cancel_bookings_of(&mut guard, id);
            }
        }
        self.unindex_user(id);
        Ok(())
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn create_room(
        &self,
        id: Ulid,
        name: String,
        number: String,
        capacity: u32,
        description: String,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.is_empty() || name.len() > MAX_ROOM_NAME_LEN {
            return Err(EngineError::Validation("room name must be 1-64 characters"));
        }
        if number.is_empty() || number.len() > MAX_ROOM_NUMBER_LEN {
            return Err(EngineError::Validation("room number must be 1-16 characters"));
        }
        if description.len() > MAX_DESCRIPTION_LEN {
            return Err(EngineError::LimitExceeded("description too long"));
        }
        // Uniqueness covers deactivated rooms too — the indexes keep them.
        if self.rooms_by_name.contains_key(&name) {
            return Err(EngineError::Duplicate("room name"));
        }
        if self.rooms_by_number.contains_key(&number) {
            return Err(EngineError::Duplicate("room number"));
        }

        let created_at = Utc::now();
        let event = Event::RoomCreated {
            id,
            name: name.clone(),
            number: number.clone(),
            capacity,
            description: description.clone(),
            created_at,
        };
        self.wal_append(&event).await?;

        let rs = RoomState::new(id, name.clone(), number.clone(), capacity, description, created_at);
        self.rooms
            .insert(id, std::sync::Arc::new(tokio::sync::RwLock::new(rs)));
        self.rooms_by_name.insert(name, id);
        self.rooms_by_number.insert(number, id);
        self.room_order.write().await.push(id);
        Ok(())
    }

    /// Soft delete: the room stops being listed or bookable but its history
    /// stays resolvable. Repeat deactivation is a no-op.
    pub async fn deactivate_room(&self, id: Ulid) -> Result<(), EngineError> {
        let rs = self.room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::RoomDeactivated { id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Bookings ─────────────────────────────────────────────

    /// Conflict-check-and-create. The room's write lock is held across the
    /// check, the WAL append and the in-memory insert, so two concurrent
    /// requests for overlapping intervals on the same room serialize here —
    /// the second sees the first's booking and gets the conflict.
    pub async fn create_booking(
        &self,
        id: Ulid,
        room_id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        slot: Slot,
        purpose: String,
    ) -> Result<Booking, EngineError> {
        validate_slot(&slot)?;
        validate_purpose(&purpose)?;

        let rs = self.room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;
        if !guard.is_active {
            // Deactivated rooms read as missing to bookers.
            return Err(EngineError::NotFound(room_id));
        }
        if guard.bookings.len() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        check_conflict(&guard, date, &slot)?;

        let created_at = Utc::now();
        let event = Event::BookingCreated {
            id,
            room_id,
            user_id,
            date,
            slot,
            purpose: purpose.clone(),
            created_at,
        };
        self.persist_and_apply(&mut guard, &event).await?;

        Ok(Booking {
            id,
            room_id,
            user_id,
            date,
            slot,
            status: BookingStatus::Confirmed,
            purpose,
            created_at,
        })
    }

    /// Cancel a booking on behalf of `requester`. Only the owner or an
    /// administrator may cancel; cancelling twice is harmless.
    pub async fn cancel_booking(
        &self,
        id: Ulid,
        requester: Ulid,
        requester_is_admin: bool,
    ) -> Result<(), EngineError> {
        let room_id = self.room_for_booking(&id).ok_or(EngineError::NotFound(id))?;
        let rs = self.room(&room_id).ok_or(EngineError::NotFound(room_id))?;
        let mut guard = rs.write().await;

        let booking = guard.booking(id).ok_or(EngineError::NotFound(id))?;
        if booking.user_id != requester && !requester_is_admin {
            return Err(EngineError::Forbidden);
        }

        let event = Event::BookingCancelled { id, room_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Announcements ────────────────────────────────────────

    pub async fn post_announcement(
        &self,
        id: Ulid,
        title: String,
        content: String,
        author: Ulid,
    ) -> Result<(), EngineError> {
        if title.is_empty() || title.len() > MAX_TITLE_LEN {
            return Err(EngineError::Validation("title must be 1-150 characters"));
        }
        if content.is_empty() || content.len() > MAX_CONTENT_LEN {
            return Err(EngineError::Validation("content must be 1-2000 characters"));
        }

        let mut list = self.announcements.write().await;
        if list.len() >= MAX_ANNOUNCEMENTS {
            return Err(EngineError::LimitExceeded("too many announcements"));
        }

        let created_at = Utc::now();
        let event = Event::AnnouncementPosted {
            id,
            title: title.clone(),
            content: content.clone(),
            author,
            created_at,
        };
        self.wal_append(&event).await?;

        list.push(Announcement {
            id,
            title,
            content,
            author,
            created_at,
            likes: Vec::new(),
            hearts: Vec::new(),
        });
        Ok(())
    }

    pub async fn delete_announcement(&self, id: Ulid) -> Result<(), EngineError> {
        let mut list = self.announcements.write().await;
        if !list.iter().any(|a| a.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::AnnouncementDeleted { id };
        self.wal_append(&event).await?;
        list.retain(|a| a.id != id);
        Ok(())
    }

    /// Toggle a like; returns the new like count.
    pub async fn toggle_like(&self, id: Ulid, user_id: Ulid) -> Result<usize, EngineError> {
        let mut list = self.announcements.write().await;
        if !list.iter().any(|a| a.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::LikeToggled { id, user_id };
        self.wal_append(&event).await?;
        let ann = list
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(toggle_membership(&mut ann.likes, user_id))
    }

    /// Toggle a heart; returns the new heart count.
    pub async fn toggle_heart(&self, id: Ulid, user_id: Ulid) -> Result<usize, EngineError> {
        let mut list = self.announcements.write().await;
        if !list.iter().any(|a| a.id == id) {
            return Err(EngineError::NotFound(id));
        }
        let event = Event::HeartToggled { id, user_id };
        self.wal_append(&event).await?;
        let ann = list
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(toggle_membership(&mut ann.hearts, user_id))
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Bookings re-emit as create (+ cancel for cancelled ones) so a
    /// replayed store is indistinguishable from the live one.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            let user = entry.value();
            events.push(Event::UserRegistered {
                id: user.id,
                username: user.username.clone(),
                email: user.email.clone(),
                password_hash: user.password_hash.clone(),
                role: user.role,
                created_at: user.created_at,
            });
        }

        // Rooms in insertion order so the rebuilt listing order matches.
        let order = self.room_order.read().await.clone();
        for room_id in order {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;

            events.push(Event::RoomCreated {
                id: guard.id,
                name: guard.name.clone(),
                number: guard.number.clone(),
                capacity: guard.capacity,
                description: guard.description.clone(),
                created_at: guard.created_at,
            });
            for b in &guard.bookings {
                events.push(Event::BookingCreated {
                    id: b.id,
                    room_id: b.room_id,
                    user_id: b.user_id,
                    date: b.date,
                    slot: b.slot,
                    purpose: b.purpose.clone(),
                    created_at: b.created_at,
                });
                if b.status == BookingStatus::Cancelled {
                    events.push(Event::BookingCancelled {
                        id: b.id,
                        room_id: b.room_id,
                    });
                }
            }
            if !guard.is_active {
                events.push(Event::RoomDeactivated { id: guard.id });
            }
        }

        for ann in self.announcements.read().await.iter() {
            events.push(Event::AnnouncementPosted {
                id: ann.id,
                title: ann.title.clone(),
                content: ann.content.clone(),
                author: ann.author,
                created_at: ann.created_at,
            });
            for user_id in &ann.likes {
                events.push(Event::LikeToggled {
                    id: ann.id,
                    user_id: *user_id,
                });
            }
            for user_id in &ann.hearts {
                events.push(Event::HeartToggled {
                    id: ann.id,
                    user_id: *user_id,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
