//! Hard input limits. Everything user-supplied is bounded before it
//! reaches the WAL.

pub const MAX_USERS_PER_TENANT: usize = 100_000;
pub const MAX_ROOMS_PER_TENANT: usize = 10_000;

pub const MAX_NAME_LEN: usize = 100;
pub const MAX_EMAIL_LEN: usize = 120;
pub const MAX_PHONE_LEN: usize = 20;
pub const MAX_ROOM_NO_LEN: usize = 50;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;
pub const MAX_ACTION_LEN: usize = 100;
pub const MAX_DETAILS_LEN: usize = 2_000;

/// A room with more beds than this is a typo, not a room.
pub const MAX_CAPACITY: u32 = 10_000;

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 256;
