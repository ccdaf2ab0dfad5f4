use std::collections::HashSet;

use ulid::Ulid;

use crate::model::*;

use super::Engine;
use super::capacity::refresh_cached_availability;

// Read-side API. Room listings take each room's write lock briefly to
// refresh the cached bed figure, so what callers see never drifts from
// the live booking set.

impl Engine {
    pub async fn list_rooms(&self) -> Vec<RoomInfo> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for rs in arcs {
            let mut guard = rs.write().await;
            refresh_cached_availability(&mut guard);
            out.push(RoomInfo {
                id: guard.id,
                room_no: guard.room_no.clone(),
                capacity: guard.capacity,
                available_beds: guard.available_beds,
                description: guard.description.clone(),
                created_at: guard.created_at,
            });
        }
        out.sort_by(|a, b| a.room_no.cmp(&b.room_no));
        out
    }

    /// Rooms a user can still request: at least one bed showing free.
    pub async fn available_rooms(&self) -> Vec<RoomInfo> {
        let mut rooms = self.list_rooms().await;
        rooms.retain(|r| r.available_beds > 0);
        rooms
    }

    pub async fn get_room_info(&self, id: Ulid) -> Option<RoomInfo> {
        let rs = self.get_room(&id)?;
        let mut guard = rs.write().await;
        refresh_cached_availability(&mut guard);
        Some(RoomInfo {
            id: guard.id,
            room_no: guard.room_no.clone(),
            capacity: guard.capacity,
            available_beds: guard.available_beds,
            description: guard.description.clone(),
            created_at: guard.created_at,
        })
    }

    /// Non-admin accounts, newest first.
    pub fn list_users(&self) -> Vec<User> {
        let mut users: Vec<User> = self
            .users
            .iter()
            .filter(|e| e.value().role == Role::User)
            .map(|e| e.value().clone())
            .collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        users
    }

    pub fn get_user(&self, id: Ulid) -> Option<User> {
        self.users.get(&id).map(|e| e.value().clone())
    }

    pub fn find_user_by_email(&self, email: &str) -> Option<User> {
        let id = *self.email_index.get(email)?.value();
        self.get_user(id)
    }

    /// All bookings across rooms, optionally filtered by status, newest
    /// first.
    pub async fn list_bookings(&self, status: Option<BookingStatus>) -> Vec<Booking> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in arcs {
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| status.is_none_or(|s| b.status == s))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    pub async fn bookings_for_user(&self, user_id: Ulid) -> Vec<Booking> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for rs in arcs {
            let guard = rs.read().await;
            out.extend(
                guard
                    .bookings
                    .iter()
                    .filter(|b| b.user_id == user_id)
                    .cloned(),
            );
        }
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        out
    }

    /// The user's one booking in {pending, approved, checked_in}, if any.
    pub async fn active_booking_for(&self, user_id: Ulid) -> Option<Booking> {
        let booking_id = *self.active_booking.get(&user_id)?.value();
        self.get_booking(booking_id).await
    }

    pub async fn get_booking(&self, booking_id: Ulid) -> Option<Booking> {
        let room_id = self.room_for_booking(&booking_id)?;
        let rs = self.get_room(&room_id)?;
        let guard = rs.read().await;
        guard.booking(booking_id).cloned()
    }

    pub async fn dashboard_stats(&self) -> DashboardStats {
        let mut stats = DashboardStats {
            total_users: self.list_users().len(),
            total_rooms: self.rooms.len(),
            ..Default::default()
        };
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        for rs in arcs {
            let guard = rs.read().await;
            stats.total_bookings += guard.bookings.len();
            stats.pending_bookings += guard
                .bookings
                .iter()
                .filter(|b| b.status == BookingStatus::Pending)
                .count();
            stats.checked_in += guard
                .bookings
                .iter()
                .filter(|b| b.status == BookingStatus::CheckedIn)
                .count();
        }
        stats
    }

    /// Filtered view of the audit trail, newest first. `to` is exclusive
    /// so a day boundary can be passed as-is.
    pub async fn list_logs(&self, filter: &LogFilter) -> Vec<LogEntry> {
        let email_needle = filter.user_email.as_ref().map(|e| e.to_lowercase());
        let logs = self.logs.read().await;
        let mut out: Vec<LogEntry> = logs
            .iter()
            .filter(|entry| {
                if let Some(action) = &filter.action
                    && entry.action != *action
                {
                    return false;
                }
                if let Some(needle) = &email_needle {
                    let matched = self
                        .get_user(entry.user_id)
                        .is_some_and(|u| u.email.to_lowercase().contains(needle));
                    if !matched {
                        return false;
                    }
                }
                if let Some(from) = filter.from
                    && entry.at < from
                {
                    return false;
                }
                if let Some(to) = filter.to
                    && entry.at >= to
                {
                    return false;
                }
                true
            })
            .cloned()
            .collect();
        out.sort_by(|a, b| b.at.cmp(&a.at));
        out
    }

    pub async fn log_stats(&self) -> LogStats {
        let logs = self.logs.read().await;
        let users: HashSet<Ulid> = logs.iter().map(|e| e.user_id).collect();
        let actions: HashSet<&str> = logs.iter().map(|e| e.action.as_str()).collect();
        LogStats {
            total: logs.len(),
            unique_users: users.len(),
            unique_actions: actions.len(),
        }
    }
}
