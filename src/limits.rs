use crate::model::{HOUR_MS, Ms};

/// Longest reservation a single request may take.
pub const MAX_RESERVATION_HOURS: i64 = 24;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_VENUE_ID_LEN: usize = 128;
pub const MAX_HOLDER_ID_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 1024;
pub const MAX_UNITS_PER_VENUE: usize = 4096;

/// Minimum lead time between cancellation and reservation start.
pub const CANCEL_LEAD_MS: Ms = HOUR_MS;

/// Largest WAL record accepted on replay. A longer length header is treated as
/// corruption, ending the valid log.
pub const MAX_RECORD_BYTES: u32 = 1 << 20;

/// Attempts at a durable append before giving up with a storage failure.
pub const MAX_APPEND_ATTEMPTS: u32 = 3;
pub const APPEND_RETRY_BACKOFF_MS: u64 = 20;
