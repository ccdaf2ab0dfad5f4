use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// Who is performing an operation. Supplied by the identity layer per
/// request; the engine trusts it and never reads ambient session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Ulid,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: Ulid, role: Role) -> Self {
        Self { user_id, role }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub role: Role,
    pub created_at: Ms,
}

/// Lifecycle of a booking. The only legal sequences are
/// pending → approved → checked_in → checked_out and pending → rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Approved,
    Rejected,
    CheckedIn,
    CheckedOut,
}

impl BookingStatus {
    /// Active bookings count against a user's one-booking limit and block
    /// room deletion.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::Approved | Self::CheckedIn)
    }

    /// Occupying bookings count against room capacity for approval purposes.
    pub fn is_occupying(&self) -> bool {
        matches!(self, Self::Approved | Self::CheckedIn)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::CheckedIn => "checked_in",
            Self::CheckedOut => "checked_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub user_id: Ulid,
    pub room_id: Ulid,
    pub status: BookingStatus,
    pub checkin_time: Option<Ms>,
    pub checkout_time: Option<Ms>,
    pub created_at: Ms,
    /// Bumped on every status change.
    pub updated_at: Ms,
}

/// In-memory state of one room, including its live booking set.
///
/// `available_beds` is a display cache of `capacity − checked_in count`.
/// Capacity decisions never trust it — they recount from `bookings`.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub room_no: String,
    pub capacity: u32,
    pub available_beds: u32,
    pub description: Option<String>,
    pub created_at: Ms,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
        created_at: Ms,
    ) -> Self {
        Self {
            id,
            room_no,
            capacity,
            available_beds,
            description,
            created_at,
            bookings: Vec::new(),
        }
    }

    pub fn booking(&self, id: Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == id)
    }

    pub fn booking_mut(&mut self, id: Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == id)
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let pos = self.bookings.iter().position(|b| b.id == id)?;
        Some(self.bookings.remove(pos))
    }
}

/// One immutable audit record. Never mutated; removed only by the bulk
/// clear operation, which itself becomes the first new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Ulid,
    pub user_id: Ulid,
    pub action: String,
    pub at: Ms,
    pub details: String,
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Audit-bearing events carry their `details` text verbatim so replay
/// reconstructs the same audit trail without consulting state that may
/// have changed since the event was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    UserRegistered {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
        role: Role,
        at: Ms,
        details: String,
    },
    UserUpdated {
        id: Ulid,
        name: String,
        phone: String,
        at: Ms,
        details: String,
    },
    UserDeleted {
        id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    RoomAdded {
        id: Ulid,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    RoomUpdated {
        id: Ulid,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    RoomDeleted {
        id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    BookingRequested {
        id: Ulid,
        user_id: Ulid,
        room_id: Ulid,
        at: Ms,
        details: String,
    },
    BookingApproved {
        id: Ulid,
        room_id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    BookingRejected {
        id: Ulid,
        room_id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    CheckedIn {
        id: Ulid,
        room_id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    CheckedOut {
        id: Ulid,
        room_id: Ulid,
        actor: Ulid,
        at: Ms,
        details: String,
    },
    /// Free-form audit record from the identity layer (login, logout, …).
    ActionLogged {
        actor: Ulid,
        action: String,
        at: Ms,
        details: String,
    },
    LogsCleared {
        actor: Ulid,
        removed: u64,
        at: Ms,
        details: String,
    },
    // Snapshot events emitted only by WAL compaction. They restore state
    // verbatim and produce no audit side effects.
    UserRestored {
        user: User,
    },
    RoomRestored {
        id: Ulid,
        room_no: String,
        capacity: u32,
        available_beds: u32,
        description: Option<String>,
        created_at: Ms,
    },
    BookingRestored {
        booking: Booking,
    },
    LogRestored {
        entry: LogEntry,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_no: String,
    pub capacity: u32,
    pub available_beds: u32,
    pub description: Option<String>,
    pub created_at: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DashboardStats {
    pub total_users: usize,
    pub total_rooms: usize,
    pub total_bookings: usize,
    pub pending_bookings: usize,
    pub checked_in: usize,
}

#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    pub action: Option<String>,
    /// Case-insensitive substring match on the actor's email.
    pub user_email: Option<String>,
    pub from: Option<Ms>,
    /// Exclusive upper bound.
    pub to: Option<Ms>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LogStats {
    pub total: usize,
    pub unique_users: usize,
    pub unique_actions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_sets() {
        assert!(BookingStatus::Pending.is_active());
        assert!(BookingStatus::Approved.is_active());
        assert!(BookingStatus::CheckedIn.is_active());
        assert!(!BookingStatus::Rejected.is_active());
        assert!(!BookingStatus::CheckedOut.is_active());

        assert!(!BookingStatus::Pending.is_occupying());
        assert!(BookingStatus::Approved.is_occupying());
        assert!(BookingStatus::CheckedIn.is_occupying());
        assert!(!BookingStatus::CheckedOut.is_occupying());
    }

    #[test]
    fn room_booking_lookup() {
        let mut room = RoomState::new(Ulid::new(), "A-101".into(), 2, 2, None, 0);
        let id = Ulid::new();
        room.bookings.push(Booking {
            id,
            user_id: Ulid::new(),
            room_id: room.id,
            status: BookingStatus::Pending,
            checkin_time: None,
            checkout_time: None,
            created_at: 0,
            updated_at: 0,
        });
        assert!(room.booking(id).is_some());
        assert!(room.booking(Ulid::new()).is_none());
        room.booking_mut(id).unwrap().status = BookingStatus::Approved;
        assert_eq!(room.booking(id).unwrap().status, BookingStatus::Approved);
        assert!(room.remove_booking(id).is_some());
        assert!(room.bookings.is_empty());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingRequested {
            id: Ulid::new(),
            user_id: Ulid::new(),
            room_id: Ulid::new(),
            at: 1_700_000_000_000,
            details: "User requested booking for room A-101".into(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
