mod capacity;
mod error;
mod lifecycle;
mod queries;

pub use capacity::{
    active_booking_count, actual_available_beds, check_bed_free, check_slot_free, occupied_beds,
    occupying_count, refresh_cached_availability,
};
pub use error::EngineError;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::ApprovalNotice;
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
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
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
    respond_batch(batch, &result);
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

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
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

/// The booking engine for one tenant (one event's accommodation).
///
/// Rooms live behind per-room write locks; every capacity-gating
/// transition validates and commits while holding its room's lock, so two
/// concurrent approvals near the capacity limit can never both succeed.
pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub(super) users: DashMap<Ulid, User>,
    /// Uniqueness index: email → user id. Claimed before commit.
    pub(super) email_index: DashMap<String, Ulid>,
    /// Uniqueness index: room_no → room id. Claimed before commit.
    pub(super) room_no_index: DashMap<String, Ulid>,
    /// Reverse lookup: booking id → room id.
    pub(super) booking_to_room: DashMap<Ulid, Ulid>,
    /// One-active-booking-per-user index: user id → booking id.
    /// Claimed atomically before commit; removed on reject/check-out.
    pub(super) active_booking: DashMap<Ulid, Ulid>,
    /// The audit trail, oldest first.
    pub(super) logs: RwLock<Vec<LogEntry>>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub(super) notify_tx: mpsc::Sender<ApprovalNotice>,
}

/// Content-derived log-entry id: the same event yields the same id on
/// live apply and on every replay, so exported log IDs survive restarts.
fn audit_entry_id(user_id: &Ulid, action: &str, at: Ms, details: &str) -> Ulid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut lo = DefaultHasher::new();
    (user_id, action, details).hash(&mut lo);
    let mut hi = DefaultHasher::new();
    (details, user_id, action).hash(&mut hi);
    Ulid::from_parts(
        at as u64,
        ((hi.finish() as u128) << 64) | lo.finish() as u128,
    )
}

/// Derive the audit record an event carries. Snapshot events restore
/// state without re-logging; `LogRestored` re-inserts its entry verbatim.
pub(super) fn audit_entry_for(event: &Event) -> Option<LogEntry> {
    let (user_id, action, at, details) = match event {
        Event::UserRegistered { id, at, details, .. } => (*id, "registration", *at, details),
        Event::UserUpdated { id, at, details, .. } => (*id, "profile_updated", *at, details),
        Event::UserDeleted { actor, at, details, .. } => (*actor, "user_deleted", *at, details),
        Event::RoomAdded { actor, at, details, .. } => (*actor, "room_added", *at, details),
        Event::RoomUpdated { actor, at, details, .. } => (*actor, "room_edited", *at, details),
        Event::RoomDeleted { actor, at, details, .. } => (*actor, "room_deleted", *at, details),
        Event::BookingRequested { user_id, at, details, .. } => {
            (*user_id, "booking_requested", *at, details)
        }
        Event::BookingApproved { actor, at, details, .. } => {
            (*actor, "booking_approved", *at, details)
        }
        Event::BookingRejected { actor, at, details, .. } => {
            (*actor, "booking_rejected", *at, details)
        }
        Event::CheckedIn { actor, at, details, .. } => (*actor, "check_in", *at, details),
        Event::CheckedOut { actor, at, details, .. } => (*actor, "check_out", *at, details),
        Event::ActionLogged {
            actor,
            action,
            at,
            details,
        } => {
            return Some(LogEntry {
                id: audit_entry_id(actor, action, *at, details),
                user_id: *actor,
                action: action.clone(),
                at: *at,
                details: details.clone(),
            });
        }
        Event::LogsCleared { actor, at, details, .. } => (*actor, "logs_cleared", *at, details),
        Event::UserRestored { .. }
        | Event::RoomRestored { .. }
        | Event::BookingRestored { .. }
        | Event::LogRestored { .. } => return None,
    };
    Some(LogEntry {
        id: audit_entry_id(&user_id, action, at, details),
        user_id,
        action: action.to_string(),
        at,
        details: details.clone(),
    })
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify_tx: mpsc::Sender<ApprovalNotice>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            users: DashMap::new(),
            email_index: DashMap::new(),
            room_no_index: DashMap::new(),
            booking_to_room: DashMap::new(),
            active_booking: DashMap::new(),
            logs: RwLock::new(Vec::new()),
            wal_tx,
            notify_tx,
        };

        // Replay — we're the sole owner of these locks, so try_read/try_write
        // always succeed instantly (no contention). Never use
        // blocking_read/blocking_write here because this may run inside an
        // async context (e.g. lazy tenant creation).
        for event in events {
            engine.replay_apply(&event);
        }

        Ok(engine)
    }

    fn replay_apply(&self, event: &Event) {
        match event {
            Event::UserRegistered {
                id,
                name,
                email,
                phone,
                role,
                at,
                ..
            } => {
                self.index_user(User {
                    id: *id,
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                    role: *role,
                    created_at: *at,
                });
            }
            Event::UserUpdated { id, name, phone, .. } => {
                if let Some(mut user) = self.users.get_mut(id) {
                    user.name = name.clone();
                    user.phone = phone.clone();
                }
            }
            Event::UserDeleted { id, .. } => {
                self.remove_user_unlogged(*id);
                for entry in self.rooms.iter() {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.cascade_remove_user_bookings(&mut guard, *id);
                }
                self.logs
                    .try_write()
                    .expect("replay: uncontended write")
                    .retain(|e| e.user_id != *id);
            }
            Event::RoomAdded {
                id,
                room_no,
                capacity,
                available_beds,
                description,
                at,
                ..
            } => {
                self.index_room(RoomState::new(
                    *id,
                    room_no.clone(),
                    *capacity,
                    *available_beds,
                    description.clone(),
                    *at,
                ));
            }
            Event::RoomUpdated { id, .. } => {
                if let Some(entry) = self.rooms.get(id) {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.apply_to_room(&mut guard, event);
                }
            }
            Event::RoomDeleted { id, .. } => {
                if let Some(entry) = self.rooms.get(id) {
                    let rs = entry.value().clone();
                    drop(entry);
                    let guard = rs.try_read().expect("replay: uncontended read");
                    self.unindex_room(&guard);
                    drop(guard);
                    self.rooms.remove(id);
                }
            }
            Event::BookingRequested { room_id, .. }
            | Event::BookingApproved { room_id, .. }
            | Event::BookingRejected { room_id, .. }
            | Event::CheckedIn { room_id, .. }
            | Event::CheckedOut { room_id, .. } => {
                if let Some(entry) = self.rooms.get(room_id) {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.apply_to_room(&mut guard, event);
                }
            }
            Event::ActionLogged { .. } => {}
            Event::LogsCleared { .. } => {
                self.logs
                    .try_write()
                    .expect("replay: uncontended write")
                    .clear();
            }
            Event::UserRestored { user } => {
                self.index_user(user.clone());
            }
            Event::RoomRestored {
                id,
                room_no,
                capacity,
                available_beds,
                description,
                created_at,
            } => {
                self.index_room(RoomState::new(
                    *id,
                    room_no.clone(),
                    *capacity,
                    *available_beds,
                    description.clone(),
                    *created_at,
                ));
            }
            Event::BookingRestored { booking } => {
                if let Some(entry) = self.rooms.get(&booking.room_id) {
                    let rs = entry.value().clone();
                    let mut guard = rs.try_write().expect("replay: uncontended write");
                    self.booking_to_room.insert(booking.id, booking.room_id);
                    if booking.status.is_active() {
                        self.active_booking.insert(booking.user_id, booking.id);
                    }
                    guard.bookings.push(booking.clone());
                    refresh_cached_availability(&mut guard);
                }
            }
            Event::LogRestored { entry } => {
                self.logs
                    .try_write()
                    .expect("replay: uncontended write")
                    .push(entry.clone());
            }
        }
        if let Some(entry) = audit_entry_for(event) {
            self.logs
                .try_write()
                .expect("replay: uncontended write")
                .push(entry);
        }
    }

    pub(super) fn index_user(&self, user: User) {
        self.email_index.insert(user.email.clone(), user.id);
        self.users.insert(user.id, user);
    }

    pub(super) fn remove_user_unlogged(&self, id: Ulid) {
        if let Some((_, user)) = self.users.remove(&id) {
            self.email_index.remove(&user.email);
        }
    }

    pub(super) fn index_room(&self, room: RoomState) {
        self.room_no_index.insert(room.room_no.clone(), room.id);
        self.rooms.insert(room.id, Arc::new(RwLock::new(room)));
    }

    /// Drop every index entry pointing into a room about to be removed.
    /// The room's bookings go with it (cascade), so their reverse entries
    /// must too. Caller holds the room's lock.
    pub(super) fn unindex_room(&self, rs: &RoomState) {
        self.room_no_index.remove(&rs.room_no);
        for booking in &rs.bookings {
            self.booking_to_room.remove(&booking.id);
            if booking.status.is_active() {
                self.active_booking.remove(&booking.user_id);
            }
        }
    }

    /// Remove one user's bookings from a room (user cascade delete).
    /// Caller holds the room's write lock.
    pub(super) fn cascade_remove_user_bookings(&self, rs: &mut RoomState, user_id: Ulid) {
        rs.bookings.retain(|b| {
            if b.user_id == user_id {
                self.booking_to_room.remove(&b.id);
                false
            } else {
                true
            }
        });
        self.active_booking.remove(&user_id);
        refresh_cached_availability(rs);
    }

    /// Apply a room-scoped event to a RoomState (no locking — caller holds
    /// the lock). Keeps the bed cache and the booking indexes in step.
    pub(super) fn apply_to_room(&self, rs: &mut RoomState, event: &Event) {
        match event {
            Event::RoomUpdated {
                room_no,
                capacity,
                available_beds,
                description,
                ..
            } => {
                if *room_no != rs.room_no {
                    self.room_no_index.remove(&rs.room_no);
                    self.room_no_index.insert(room_no.clone(), rs.id);
                    rs.room_no = room_no.clone();
                }
                rs.capacity = *capacity;
                rs.available_beds = *available_beds;
                rs.description = description.clone();
            }
            Event::BookingRequested {
                id, user_id, room_id, at, ..
            } => {
                rs.bookings.push(Booking {
                    id: *id,
                    user_id: *user_id,
                    room_id: *room_id,
                    status: BookingStatus::Pending,
                    checkin_time: None,
                    checkout_time: None,
                    created_at: *at,
                    updated_at: *at,
                });
                self.booking_to_room.insert(*id, *room_id);
                self.active_booking.insert(*user_id, *id);
            }
            Event::BookingApproved { id, at, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Approved;
                    b.updated_at = *at;
                }
            }
            Event::BookingRejected { id, at, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::Rejected;
                    b.updated_at = *at;
                    self.active_booking.remove(&b.user_id);
                }
            }
            Event::CheckedIn { id, at, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::CheckedIn;
                    b.checkin_time = Some(*at);
                    b.updated_at = *at;
                }
            }
            Event::CheckedOut { id, at, .. } => {
                if let Some(b) = rs.booking_mut(*id) {
                    b.status = BookingStatus::CheckedOut;
                    b.checkout_time = Some(*at);
                    b.updated_at = *at;
                    self.active_booking.remove(&b.user_id);
                }
            }
            _ => {}
        }
        refresh_cached_availability(rs);
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

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn room_for_booking(&self, booking_id: &Ulid) -> Option<Ulid> {
        self.booking_to_room.get(booking_id).map(|e| *e.value())
    }

    /// Append the audit record carried by `event` — same unit of work as
    /// the mutation; callers only reach this after the WAL accepted the
    /// event.
    pub(super) async fn push_audit(&self, event: &Event) {
        if let Some(entry) = audit_entry_for(event) {
            self.logs.write().await.push(entry);
        }
    }

    /// WAL-append + apply + audit in one call for room-scoped events.
    pub(super) async fn persist_and_apply_room(
        &self,
        rs: &mut RoomState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.apply_to_room(rs, event);
        self.push_audit(event).await;
        Ok(())
    }

    /// Lookup booking → room, get room, acquire write lock.
    pub(super) async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(*booking_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let guard = rs.write_owned().await;
        Ok((room_id, guard))
    }
}
