use ulid::Ulid;

use crate::model::BookingStatus;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    EmailTaken(String),
    RoomNoTaken(String),
    /// Illegal source state for the attempted transition.
    InvalidStatus {
        booking: Ulid,
        status: BookingStatus,
        expected: BookingStatus,
    },
    /// User already has a booking in {pending, approved, checked_in}.
    ActiveBookingExists(Ulid),
    /// Occupying count (approved + checked_in) has reached capacity.
    RoomFull {
        room: Ulid,
        capacity: u32,
    },
    /// No physically free bed (checked_in count has reached capacity).
    NoBedsFree(Ulid),
    /// Room still has bookings in {pending, approved, checked_in}.
    HasActiveBookings(Ulid),
    NotBookingOwner(Ulid),
    NotAuthorized,
    Validation(&'static str),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Policy violations deny the action but leave the request otherwise
    /// successful — the caller surfaces them as warnings, not failures.
    pub fn is_policy_violation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidStatus { .. }
                | EngineError::ActiveBookingExists(_)
                | EngineError::RoomFull { .. }
                | EngineError::NoBedsFree(_)
                | EngineError::HasActiveBookings(_)
        )
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::EmailTaken(email) => write!(f, "email already registered: {email}"),
            EngineError::RoomNoTaken(room_no) => write!(f, "room number already exists: {room_no}"),
            EngineError::InvalidStatus {
                booking,
                status,
                expected,
            } => write!(
                f,
                "booking {booking} is {}, only {} bookings allowed here",
                status.as_str(),
                expected.as_str()
            ),
            EngineError::ActiveBookingExists(user) => {
                write!(f, "user {user} already has an active booking")
            }
            EngineError::RoomFull { room, capacity } => {
                write!(f, "room {room} is full: all {capacity} slots taken")
            }
            EngineError::NoBedsFree(room) => write!(f, "room {room} has no free beds"),
            EngineError::HasActiveBookings(room) => {
                write!(f, "cannot delete room {room}: has active bookings")
            }
            EngineError::NotBookingOwner(booking) => {
                write!(f, "booking {booking} belongs to another user")
            }
            EngineError::NotAuthorized => write!(f, "admin privileges required"),
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_violation_classification() {
        assert!(EngineError::ActiveBookingExists(Ulid::new()).is_policy_violation());
        assert!(
            EngineError::RoomFull {
                room: Ulid::new(),
                capacity: 2
            }
            .is_policy_violation()
        );
        assert!(
            EngineError::InvalidStatus {
                booking: Ulid::new(),
                status: BookingStatus::Rejected,
                expected: BookingStatus::Pending,
            }
            .is_policy_violation()
        );
        assert!(!EngineError::NotFound(Ulid::new()).is_policy_violation());
        assert!(!EngineError::WalError("disk gone".into()).is_policy_violation());
        assert!(!EngineError::NotAuthorized.is_policy_violation());
    }
}
