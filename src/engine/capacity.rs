use crate::model::*;

use super::EngineError;

// ── Capacity accounting ───────────────────────────────────────────
//
// All counts derive from the room's live booking set. The persisted
// `available_beds` field is a display cache and is never consulted here.

/// Bookings physically occupying a bed right now (checked_in only).
pub fn occupied_beds(room: &RoomState) -> u32 {
    room.bookings
        .iter()
        .filter(|b| b.status == BookingStatus::CheckedIn)
        .count() as u32
}

/// Bookings holding a capacity slot for approval purposes
/// (approved + checked_in).
pub fn occupying_count(room: &RoomState) -> u32 {
    room.bookings
        .iter()
        .filter(|b| b.status.is_occupying())
        .count() as u32
}

/// Bookings that block room deletion (pending + approved + checked_in).
pub fn active_booking_count(room: &RoomState) -> usize {
    room.bookings.iter().filter(|b| b.status.is_active()).count()
}

/// The authoritative free-bed figure: `max(0, capacity − occupied)`.
pub fn actual_available_beds(room: &RoomState) -> u32 {
    room.capacity.saturating_sub(occupied_beds(room))
}

/// Recompute the cached `available_beds` field from live bookings.
pub fn refresh_cached_availability(room: &mut RoomState) {
    room.available_beds = actual_available_beds(room);
}

/// Guard for transitions that claim a capacity slot (create, approve):
/// deny once the occupying set has reached capacity.
pub fn check_slot_free(room: &RoomState) -> Result<(), EngineError> {
    if occupying_count(room) >= room.capacity {
        return Err(EngineError::RoomFull {
            room: room.id,
            capacity: room.capacity,
        });
    }
    Ok(())
}

/// Guard for physical check-in: deny when no bed is actually free.
pub fn check_bed_free(room: &RoomState) -> Result<(), EngineError> {
    if actual_available_beds(room) == 0 {
        return Err(EngineError::NoBedsFree(room.id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn room_with(capacity: u32, statuses: &[BookingStatus]) -> RoomState {
        let mut room = RoomState::new(Ulid::new(), "T-1".into(), capacity, capacity, None, 0);
        for &status in statuses {
            room.bookings.push(Booking {
                id: Ulid::new(),
                user_id: Ulid::new(),
                room_id: room.id,
                status,
                checkin_time: None,
                checkout_time: None,
                created_at: 0,
                updated_at: 0,
            });
        }
        room
    }

    #[test]
    fn occupied_counts_checked_in_only() {
        let room = room_with(
            4,
            &[
                BookingStatus::Pending,
                BookingStatus::Approved,
                BookingStatus::CheckedIn,
                BookingStatus::CheckedOut,
                BookingStatus::Rejected,
            ],
        );
        assert_eq!(occupied_beds(&room), 1);
        assert_eq!(occupying_count(&room), 2);
        assert_eq!(active_booking_count(&room), 3);
        assert_eq!(actual_available_beds(&room), 3);
    }

    #[test]
    fn available_beds_clamped_at_zero() {
        // Oversubscribed state (e.g. capacity lowered by an admin edit)
        // must clamp, never underflow.
        let room = room_with(1, &[BookingStatus::CheckedIn, BookingStatus::CheckedIn]);
        assert_eq!(actual_available_beds(&room), 0);
    }

    #[test]
    fn actual_available_beds_is_idempotent() {
        let room = room_with(3, &[BookingStatus::CheckedIn]);
        let first = actual_available_beds(&room);
        assert_eq!(first, actual_available_beds(&room));
        assert_eq!(first, 2);
    }

    #[test]
    fn refresh_overwrites_stale_cache() {
        let mut room = room_with(2, &[BookingStatus::CheckedIn]);
        room.available_beds = 0; // manually skewed
        refresh_cached_availability(&mut room);
        assert_eq!(room.available_beds, 1);
    }

    #[test]
    fn slot_guard_counts_approved_and_checked_in() {
        // capacity 2, one approved + one checked_in → full for approval
        let full = room_with(2, &[BookingStatus::Approved, BookingStatus::CheckedIn]);
        assert!(matches!(
            check_slot_free(&full),
            Err(EngineError::RoomFull { capacity: 2, .. })
        ));

        // pending bookings don't hold slots
        let open = room_with(2, &[BookingStatus::Pending, BookingStatus::Pending]);
        assert!(check_slot_free(&open).is_ok());
    }

    #[test]
    fn bed_guard_counts_checked_in_only() {
        // capacity 1, one approved (not yet in the bed) → check-in allowed
        let approved_only = room_with(1, &[BookingStatus::Approved]);
        assert!(check_bed_free(&approved_only).is_ok());

        let occupied = room_with(1, &[BookingStatus::CheckedIn]);
        assert!(matches!(
            check_bed_free(&occupied),
            Err(EngineError::NoBedsFree(_))
        ));
    }

    #[test]
    fn history_never_blocks() {
        let room = room_with(
            1,
            &[
                BookingStatus::Rejected,
                BookingStatus::CheckedOut,
                BookingStatus::CheckedOut,
            ],
        );
        assert!(check_slot_free(&room).is_ok());
        assert!(check_bed_free(&room).is_ok());
        assert_eq!(active_booking_count(&room), 0);
    }
}
