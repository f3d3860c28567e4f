//! Hard input limits. Everything user-supplied is bounded before it reaches
//! the WAL.

use crate::model::Ms;

pub const MAX_TUTORS: usize = 100_000;

pub const MAX_NAME_LEN: usize = 128;
pub const MAX_SUBJECT_LEN: usize = 128;
pub const MAX_NOTES_LEN: usize = 2_000;

pub const MAX_BOOKINGS_PER_TUTOR: usize = 100_000;
pub const MAX_SLOTS_PER_DAY: usize = 48;

pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 2100-01-01T00:00:00Z.
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// A single session may not span more than 24 hours.
pub const MAX_SESSION_DURATION_MS: Ms = 24 * 3_600_000;

/// Free-window queries are capped at 90 days.
pub const MAX_QUERY_WINDOW_MS: Ms = 90 * 86_400_000;
