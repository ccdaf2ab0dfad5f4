use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::ApprovalNotice;
use crate::observability;

use super::capacity::{check_bed_free, check_slot_free};
use super::{Engine, EngineError, WalCommand, audit_entry_for};

fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.role.is_admin() {
        Ok(())
    } else {
        Err(EngineError::NotAuthorized)
    }
}

fn validate_user_fields(name: &str, email: &str, phone: &str) -> Result<(), EngineError> {
    if name.is_empty() || email.is_empty() {
        return Err(EngineError::Validation("name and email are required"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    if email.len() > MAX_EMAIL_LEN {
        return Err(EngineError::LimitExceeded("email too long"));
    }
    if phone.len() > MAX_PHONE_LEN {
        return Err(EngineError::LimitExceeded("phone too long"));
    }
    Ok(())
}

fn validate_room_fields(
    room_no: &str,
    capacity: u32,
    available_beds: u32,
    description: Option<&str>,
) -> Result<(), EngineError> {
    if room_no.is_empty() {
        return Err(EngineError::Validation("room number is required"));
    }
    if room_no.len() > MAX_ROOM_NO_LEN {
        return Err(EngineError::LimitExceeded("room number too long"));
    }
    if capacity == 0 {
        return Err(EngineError::Validation("capacity must be at least 1"));
    }
    if capacity > MAX_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    if available_beds > capacity {
        return Err(EngineError::Validation(
            "available beds cannot exceed room capacity",
        ));
    }
    if let Some(d) = description
        && d.len() > MAX_DESCRIPTION_LEN
    {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

// ── Users ────────────────────────────────────────────────

impl Engine {
    pub async fn register_user(
        &self,
        name: String,
        email: String,
        phone: String,
        role: Role,
    ) -> Result<Ulid, EngineError> {
        validate_user_fields(&name, &email, &phone)?;
        if self.users.len() >= MAX_USERS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many users"));
        }

        let id = Ulid::new();
        // Claim the email before commit so two concurrent registrations
        // can't both take it; rolled back if the WAL write fails.
        match self.email_index.entry(email.clone()) {
            dashmap::Entry::Occupied(_) => return Err(EngineError::EmailTaken(email)),
            dashmap::Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::UserRegistered {
            id,
            name: name.clone(),
            email: email.clone(),
            phone,
            role,
            at: now_ms(),
            details: format!("New user registered: {name}"),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.email_index.remove(&email);
            return Err(e);
        }
        if let Event::UserRegistered {
            id,
            name,
            email,
            phone,
            role,
            at,
            ..
        } = &event
        {
            self.users.insert(
                *id,
                User {
                    id: *id,
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                    role: *role,
                    created_at: *at,
                },
            );
        }
        self.push_audit(&event).await;
        info!("registered user {id}");
        Ok(id)
    }

    /// Idempotent bootstrap: create an admin account unless the email is
    /// already registered.
    pub async fn ensure_admin(
        &self,
        name: &str,
        email: &str,
        phone: &str,
    ) -> Result<Option<Ulid>, EngineError> {
        if self.email_index.contains_key(email) {
            return Ok(None);
        }
        let id = self
            .register_user(name.to_string(), email.to_string(), phone.to_string(), Role::Admin)
            .await?;
        Ok(Some(id))
    }

    /// Profile edit — a user updates their own name and phone.
    pub async fn update_profile(
        &self,
        actor: &Actor,
        name: String,
        phone: String,
    ) -> Result<(), EngineError> {
        let email = self
            .users
            .get(&actor.user_id)
            .map(|u| u.email.clone())
            .ok_or(EngineError::NotFound(actor.user_id))?;
        validate_user_fields(&name, &email, &phone)?;

        let event = Event::UserUpdated {
            id: actor.user_id,
            name: name.clone(),
            phone: phone.clone(),
            at: now_ms(),
            details: "User updated profile".into(),
        };
        self.wal_append(&event).await?;
        if let Some(mut user) = self.users.get_mut(&actor.user_id) {
            user.name = name;
            user.phone = phone;
        }
        self.push_audit(&event).await;
        Ok(())
    }

    /// Remove a user and cascade-delete their bookings and audit entries,
    /// freeing any bed they held.
    pub async fn delete_user(&self, actor: &Actor, user_id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let name = self
            .users
            .get(&user_id)
            .map(|u| u.name.clone())
            .ok_or(EngineError::NotFound(user_id))?;

        let event = Event::UserDeleted {
            id: user_id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin deleted user: {name}"),
        };
        self.wal_append(&event).await?;

        self.remove_user_unlogged(user_id);
        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_arcs {
            let mut guard = rs.write().await;
            self.cascade_remove_user_bookings(&mut guard, user_id);
        }
        {
            let mut logs = self.logs.write().await;
            logs.retain(|e| e.user_id != user_id);
        }
        self.push_audit(&event).await;
        info!("deleted user {user_id} and cascaded bookings/logs");
        Ok(())
    }
}

// ── Rooms ────────────────────────────────────────────────

impl Engine {
    pub async fn add_room(
        &self,
        actor: &Actor,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
    ) -> Result<Ulid, EngineError> {
        require_admin(actor)?;
        validate_room_fields(&room_no, capacity, available_beds, description.as_deref())?;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let id = Ulid::new();
        match self.room_no_index.entry(room_no.clone()) {
            dashmap::Entry::Occupied(_) => return Err(EngineError::RoomNoTaken(room_no)),
            dashmap::Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let event = Event::RoomAdded {
            id,
            room_no: room_no.clone(),
            capacity,
            available_beds,
            description: description.clone(),
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin added room: {room_no}"),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.room_no_index.remove(&room_no);
            return Err(e);
        }
        if let Event::RoomAdded { at, .. } = &event {
            self.rooms.insert(
                id,
                std::sync::Arc::new(tokio::sync::RwLock::new(RoomState::new(
                    id,
                    room_no,
                    capacity,
                    available_beds,
                    description,
                    *at,
                ))),
            );
        }
        self.push_audit(&event).await;
        Ok(id)
    }

    pub async fn update_room(
        &self,
        actor: &Actor,
        id: Ulid,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
    ) -> Result<(), EngineError> {
        require_admin(actor)?;
        validate_room_fields(&room_no, capacity, available_beds, description.as_deref())?;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;

        let renamed = room_no != guard.room_no;
        if renamed {
            match self.room_no_index.entry(room_no.clone()) {
                dashmap::Entry::Occupied(_) => return Err(EngineError::RoomNoTaken(room_no)),
                dashmap::Entry::Vacant(v) => {
                    v.insert(id);
                }
            }
        }

        let event = Event::RoomUpdated {
            id,
            room_no: room_no.clone(),
            capacity,
            available_beds,
            description,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin edited room: {} -> {}", guard.room_no, room_no),
        };
        if let Err(e) = self.persist_and_apply_room(&mut guard, &event).await {
            if renamed {
                self.room_no_index.remove(&room_no);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Delete a room. Denied while any booking is pending, approved, or
    /// checked in; history (rejected/checked_out) is cascade-deleted.
    pub async fn delete_room(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(id))?;
        let guard = rs.write().await;

        if super::capacity::active_booking_count(&guard) > 0 {
            return Err(EngineError::HasActiveBookings(id));
        }

        let event = Event::RoomDeleted {
            id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin deleted room: {}", guard.room_no),
        };
        self.wal_append(&event).await?;
        self.unindex_room(&guard);
        // Remove from the map before releasing the lock: anyone queued on
        // this room's lock must observe the deletion once they acquire it.
        self.rooms.remove(&id);
        drop(guard);
        self.push_audit(&event).await;
        Ok(())
    }
}

// ── Booking lifecycle ────────────────────────────────────

impl Engine {
    /// Submit a booking request: the user's one active booking, pending
    /// admin approval. Denied if the user already has an active booking or
    /// the room's occupying set (approved + checked_in) is at capacity.
    pub async fn request_booking(&self, actor: &Actor, room_id: Ulid) -> Result<Ulid, EngineError> {
        let res = self.do_request_booking(actor, room_id).await;
        observability::track_transition("request", &res);
        res
    }

    async fn do_request_booking(&self, actor: &Actor, room_id: Ulid) -> Result<Ulid, EngineError> {
        if !self.users.contains_key(&actor.user_id) {
            return Err(EngineError::NotFound(actor.user_id));
        }
        let id = Ulid::new();

        // Atomically claim the user's single active-booking slot before any
        // other validation; released again on every failure path below.
        match self.active_booking.entry(actor.user_id) {
            dashmap::Entry::Occupied(_) => {
                return Err(EngineError::ActiveBookingExists(actor.user_id));
            }
            dashmap::Entry::Vacant(v) => {
                v.insert(id);
            }
        }

        let release = |e: EngineError| {
            self.active_booking.remove(&actor.user_id);
            e
        };

        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))
            .map_err(release)?;
        let mut guard = rs.write().await;
        // The room may have been deleted while we waited for its lock; the
        // orphaned RoomState lives on until the last Arc drops, so a commit
        // against it would be durable-but-unreachable.
        if !self.rooms.contains_key(&room_id) {
            return Err(release(EngineError::NotFound(room_id)));
        }
        check_slot_free(&guard).map_err(release)?;

        let event = Event::BookingRequested {
            id,
            user_id: actor.user_id,
            room_id,
            at: now_ms(),
            details: format!("User requested booking for room {}", guard.room_no),
        };
        self.persist_and_apply_room(&mut guard, &event)
            .await
            .map_err(release)?;
        Ok(id)
    }

    /// Admin approval: pending → approved. Re-derives the occupying count
    /// from live bookings under the room's write lock — the cached bed
    /// figure is never consulted, so concurrent approvals cannot
    /// overcommit the room.
    pub async fn approve_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let res = self.do_approve_booking(actor, booking_id).await;
        observability::track_transition("approve", &res);
        res
    }

    async fn do_approve_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStatus {
                booking: booking_id,
                status: booking.status,
                expected: BookingStatus::Pending,
            });
        }
        let user = self
            .users
            .get(&booking.user_id)
            .map(|u| u.value().clone())
            .ok_or(EngineError::NotFound(booking.user_id))?;

        check_slot_free(&guard)?;

        let event = Event::BookingApproved {
            id: booking_id,
            room_id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin approved booking #{booking_id} for user {}", user.name),
        };
        self.persist_and_apply_room(&mut guard, &event).await?;

        // Fire-and-forget: a full or closed queue must never unwind the
        // committed approval.
        let notice = ApprovalNotice {
            email: user.email,
            name: user.name,
            room_no: guard.room_no.clone(),
            description: guard.description.clone(),
        };
        if self.notify_tx.try_send(notice).is_err() {
            warn!("approval notification for booking {booking_id} dropped (queue unavailable)");
            observability::record_notification("dropped");
        }
        Ok(())
    }

    /// Admin rejection: pending → rejected. Frees the user's active slot.
    pub async fn reject_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let res = self.do_reject_booking(actor, booking_id).await;
        observability::track_transition("reject", &res);
        res
    }

    async fn do_reject_booking(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.status != BookingStatus::Pending {
            return Err(EngineError::InvalidStatus {
                booking: booking_id,
                status: booking.status,
                expected: BookingStatus::Pending,
            });
        }
        let user_name = self
            .users
            .get(&booking.user_id)
            .map(|u| u.name.clone())
            .unwrap_or_else(|| booking.user_id.to_string());

        let event = Event::BookingRejected {
            id: booking_id,
            room_id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("Admin rejected booking #{booking_id} for user {user_name}"),
        };
        self.persist_and_apply_room(&mut guard, &event).await
    }

    /// Physical check-in: approved → checked_in, requester must own the
    /// booking and a bed must actually be free (checked_in count below
    /// capacity — an admin may have shrunk the room since approval).
    pub async fn check_in(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let res = self.do_check_in(actor, booking_id).await;
        observability::track_transition("check_in", &res);
        res
    }

    async fn do_check_in(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.user_id != actor.user_id {
            return Err(EngineError::NotBookingOwner(booking_id));
        }
        if booking.status != BookingStatus::Approved {
            return Err(EngineError::InvalidStatus {
                booking: booking_id,
                status: booking.status,
                expected: BookingStatus::Approved,
            });
        }
        check_bed_free(&guard)?;

        let event = Event::CheckedIn {
            id: booking_id,
            room_id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("User checked in to room {}", guard.room_no),
        };
        self.persist_and_apply_room(&mut guard, &event).await
    }

    /// checked_in → checked_out. Only ever frees capacity.
    pub async fn check_out(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let res = self.do_check_out(actor, booking_id).await;
        observability::track_transition("check_out", &res);
        res
    }

    async fn do_check_out(&self, actor: &Actor, booking_id: Ulid) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;

        let booking = guard
            .booking(booking_id)
            .ok_or(EngineError::NotFound(booking_id))?;
        if booking.user_id != actor.user_id {
            return Err(EngineError::NotBookingOwner(booking_id));
        }
        if booking.status != BookingStatus::CheckedIn {
            return Err(EngineError::InvalidStatus {
                booking: booking_id,
                status: booking.status,
                expected: BookingStatus::CheckedIn,
            });
        }

        let event = Event::CheckedOut {
            id: booking_id,
            room_id,
            actor: actor.user_id,
            at: now_ms(),
            details: format!("User checked out from room {}", guard.room_no),
        };
        self.persist_and_apply_room(&mut guard, &event).await
    }
}

// ── Audit trail ──────────────────────────────────────────

impl Engine {
    /// Append a free-form audit record on behalf of the identity layer
    /// (login, logout, password change, …).
    pub async fn record_action(
        &self,
        actor: &Actor,
        action: &str,
        details: &str,
    ) -> Result<(), EngineError> {
        if action.is_empty() || action.len() > MAX_ACTION_LEN {
            return Err(EngineError::Validation("bad action tag"));
        }
        if details.len() > MAX_DETAILS_LEN {
            return Err(EngineError::LimitExceeded("details too long"));
        }
        let event = Event::ActionLogged {
            actor: actor.user_id,
            action: action.to_string(),
            at: now_ms(),
            details: details.to_string(),
        };
        self.wal_append(&event).await?;
        self.push_audit(&event).await;
        Ok(())
    }

    /// Admin bulk clear: wipes the trail and appends one `logs_cleared`
    /// entry recording who cleared how many. Count and clear happen under
    /// one write guard, held across the WAL append, so the removed count
    /// is exact.
    pub async fn clear_logs(&self, actor: &Actor) -> Result<u64, EngineError> {
        require_admin(actor)?;
        let admin_name = self
            .users
            .get(&actor.user_id)
            .map(|u| u.name.clone())
            .ok_or(EngineError::NotFound(actor.user_id))?;

        let mut logs = self.logs.write().await;
        let removed = logs.len() as u64;
        let event = Event::LogsCleared {
            actor: actor.user_id,
            removed,
            at: now_ms(),
            details: format!("Admin {admin_name} cleared all {removed} logs"),
        };
        self.wal_append(&event).await?;
        logs.clear();
        if let Some(entry) = audit_entry_for(&event) {
            logs.push(entry);
        }
        info!("cleared {removed} audit log entries");
        Ok(removed)
    }
}

// ── WAL maintenance ──────────────────────────────────────

impl Engine {
    /// Compact the WAL by rewriting it with only the snapshot events
    /// needed to recreate the current state (including the audit trail).
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.users.iter() {
            events.push(Event::UserRestored {
                user: entry.value().clone(),
            });
        }

        let room_arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in room_arcs {
            let guard = rs.read().await;
            events.push(Event::RoomRestored {
                id: guard.id,
                room_no: guard.room_no.clone(),
                capacity: guard.capacity,
                available_beds: guard.available_beds,
                description: guard.description.clone(),
                created_at: guard.created_at,
            });
            for booking in &guard.bookings {
                events.push(Event::BookingRestored {
                    booking: booking.clone(),
                });
            }
        }

        for entry in self.logs.read().await.iter() {
            events.push(Event::LogRestored {
                entry: entry.clone(),
            });
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
