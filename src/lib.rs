//! bunkd — room-booking engine for event accommodation.
//!
//! One [`engine::Engine`] per event holds users, rooms, bookings, and the
//! audit trail in memory, persisted through an append-only WAL. Booking
//! lifecycle: pending → approved → checked_in → checked_out, or
//! pending → rejected. Capacity-gating transitions validate and commit
//! under a per-room write lock.

pub mod compactor;
pub mod engine;
pub mod export;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod tenant;
pub mod wal;

pub use engine::{Engine, EngineError};
pub use model::{
    Actor, Booking, BookingStatus, DashboardStats, LogEntry, LogFilter, LogStats, RoomInfo, Role,
    User,
};
pub use notify::{ApprovalNotice, Notifier};
pub use tenant::TenantManager;
