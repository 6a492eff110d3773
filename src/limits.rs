//! Hard bounds on store size and client-supplied input.
//! Everything here is enforced in the engine, before any WAL write.

pub const MAX_ROOMS: usize = 512;
pub const MAX_BOOKINGS_PER_ROOM: usize = 4096;
pub const MAX_USERS: usize = 10_000;
pub const MAX_ANNOUNCEMENTS: usize = 1024;

pub const MAX_ROOM_NAME_LEN: usize = 64;
pub const MAX_ROOM_NUMBER_LEN: usize = 16;
pub const MAX_DESCRIPTION_LEN: usize = 256;

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 30;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MIN_PASSWORD_LEN: usize = 8;

pub const MAX_TITLE_LEN: usize = 150;
pub const MAX_CONTENT_LEN: usize = 2000;
pub const MAX_PURPOSE_LEN: usize = 256;
pub const MAX_CHAT_MESSAGE_LEN: usize = 500;
