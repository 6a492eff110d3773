mod conflict;
mod error;
mod mutations;
mod queries;
mod status;

pub use error::EngineError;
pub use status::{derive_room_status, now_local};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush the batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The store behind the scheduling rules: per-room state guarded by its own
/// lock, plus flat directories for users and announcements. All mutation
/// goes through WAL events; replaying the log rebuilds everything.
pub struct Engine {
    pub(super) rooms: DashMap<Ulid, SharedRoomState>,
    /// Insertion order of rooms; listings follow it.
    pub(super) room_order: RwLock<Vec<Ulid>>,
    /// Name/number uniqueness spans active AND deactivated rooms, so these
    /// indexes are never cleaned up on deactivation.
    pub(super) rooms_by_name: DashMap<String, Ulid>,
    pub(super) rooms_by_number: DashMap<String, Ulid>,
    pub(super) users: DashMap<Ulid, User>,
    pub(super) users_by_email: DashMap<String, Ulid>,
    pub(super) users_by_username: DashMap<String, Ulid>,
    pub(super) announcements: RwLock<Vec<Announcement>>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a room-scoped event to a RoomState (no locking — caller holds the lock).
fn apply_room_event(rs: &mut RoomState, event: &Event, booking_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::BookingCreated {
            id,
            room_id,
            user_id,
            date,
            slot,
            purpose,
            created_at,
        } => {
            rs.insert_booking(Booking {
                id: *id,
                room_id: *room_id,
                user_id: *user_id,
                date: *date,
                slot: *slot,
                status: BookingStatus::Confirmed,
                purpose: purpose.clone(),
                created_at: *created_at,
            });
            booking_index.insert(*id, *room_id);
        }
        Event::BookingCancelled { id, .. } => {
            // Cancelled bookings stay in the list (history) and in the
            // booking index (so a repeat cancel resolves, harmlessly).
            if let Some(b) = rs.booking_mut(*id) {
                b.status = BookingStatus::Cancelled;
            }
        }
        Event::RoomDeactivated { .. } => {
            rs.is_active = false;
        }
        _ => {}
    }
}

/// Flip every active booking held by `user_id` to cancelled.
fn cancel_bookings_of(rs: &mut RoomState, user_id: Ulid) {
    for b in rs.bookings.iter_mut() {
        if b.user_id == user_id && b.status.is_active() {
            b.status = BookingStatus::Cancelled;
        }
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            room_order: RwLock::new(Vec::new()),
            rooms_by_name: DashMap::new(),
            rooms_by_number: DashMap::new(),
            users: DashMap::new(),
            users_by_email: DashMap::new(),
            users_by_username: DashMap::new(),
            announcements: RwLock::new(Vec::new()),
            booking_to_room: DashMap::new(),
            wal_tx,
        };

        // Replay — we're the sole owner of every lock here, so try_write
        // always succeeds instantly. Never block_on a lock in this path:
        // Engine::new may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::RoomCreated {
                id,
                name,
                number,
                capacity,
                description,
                created_at,
            } => {
                let rs = RoomState::new(
                    *id,
                    name.clone(),
                    number.clone(),
                    *capacity,
                    description.clone(),
                    *created_at,
                );
                self.rooms.insert(*id, Arc::new(RwLock::new(rs)));
                self.rooms_by_name.insert(name.clone(), *id);
                self.rooms_by_number.insert(number.clone(), *id);
                self.room_order
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(*id);
            }
            Event::UserRegistered {
                id,
                username,
                email,
                password_hash,
                role,
                created_at,
            } => {
                self.index_user(User {
                    id: *id,
                    username: username.clone(),
                    email: email.clone(),
                    password_hash: password_hash.clone(),
                    role: *role,
                    created_at: *created_at,
                });
            }
            Event::UserRenamed { id, username } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    self.users_by_username.remove(&user.username);
                    user.username = username.clone();
                    self.users_by_username.insert(username.clone(), *id);
                }
            }
            Event::UserDeleted { id } => {
                for entry in self.rooms.iter() {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    cancel_bookings_of(&mut guard, *id);
                }
                self.unindex_user(*id);
            }
            Event::AnnouncementPosted {
                id,
                title,
                content,
                author,
                created_at,
            } => {
                self.announcements
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(Announcement {
                        id: *id,
                        title: title.clone(),
                        content: content.clone(),
                        author: *author,
                        created_at: *created_at,
                        likes: Vec::new(),
                        hearts: Vec::new(),
                    });
            }
            Event::AnnouncementDeleted { id } => {
                self.announcements
                    .try_write()
                    .expect("replay: uncontended write")
                    .retain(|a| a.id != *id);
            }
            Event::LikeToggled { id, user_id } => {
                let mut list = self
                    .announcements
                    .try_write()
                    .expect("replay: uncontended write");
                if let Some(ann) = list.iter_mut().find(|a| a.id == *id) {
                    toggle_membership(&mut ann.likes, *user_id);
                }
            }
            Event::HeartToggled { id, user_id } => {
                let mut list = self
                    .announcements
                    .try_write()
                    .expect("replay: uncontended write");
                if let Some(ann) = list.iter_mut().find(|a| a.id == *id) {
                    toggle_membership(&mut ann.hearts, *user_id);
                }
            }
            room_scoped => {
                if let Some(room_id) = event_room_id(room_scoped)
                    && let Some(entry) = self.rooms.get(&room_id)
                {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    apply_room_event(&mut guard, room_scoped, &self.booking_to_room);
                }
            }
        }
    }

    pub(super) fn index_user(&self, user: User) {
        self.users_by_email.insert(user.email.clone(), user.id);
        self.users_by_username.insert(user.username.clone(), user.id);
        self.users.insert(user.id, user);
    }

    pub(super) fn unindex_user(&self, id: Ulid) {
        if let Some((_, user)) = self.users.remove(&id) {
            self.users_by_email.remove(&user.email);
            self.users_by_username.remove(&user.username);
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// WAL-append + apply under the caller's room lock, in one call.
    /// The append happening inside the lock is what makes replay order
    /// agree with lock order.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_room_event(rs, event, &self.booking_to_room);
        Ok(())
    }
}

/// Extract the room id from a room-scoped event.
fn event_room_id(event: &Event) -> Option<Ulid> {
    match event {
        Event::BookingCreated { room_id, .. } | Event::BookingCancelled { room_id, .. } => {
            Some(*room_id)
        }
        Event::RoomDeactivated { id } => Some(*id),
        _ => None,
    }
}

/// Toggle `user` in a reaction set: absent → added, present → removed.
pub(super) fn toggle_membership(set: &mut Vec<Ulid>, user: Ulid) -> usize {
    if let Some(pos) = set.iter().position(|u| *u == user) {
        set.remove(pos);
    } else {
        set.push(user);
    }
    set.len()
}
