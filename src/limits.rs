use crate::model::Ms;

/// Earliest accepted timestamp (2000-01-01T00:00:00Z).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// Latest accepted timestamp (2100-01-01T00:00:00Z).
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
/// A single hold or assignment may not block more than a day.
pub const MAX_SPAN_DURATION_MS: Ms = 24 * 3_600_000;

pub const MAX_PARTY_SIZE: u32 = 100;
pub const MAX_TABLES_PER_VENUE: usize = 1_000;
/// Hard ceiling on tables per plan regardless of configuration.
pub const MAX_TABLES_PER_PLAN: usize = 6;
pub const MAX_EVALUATION_LIMIT: usize = 250_000;
/// Budget for each feasibility probe the lookahead runs per future booking.
pub const LOOKAHEAD_EVALUATION_LIMIT: usize = 500;

pub const MIN_HOLD_TTL_SECS: u64 = 30;
pub const MAX_HOLD_TTL_SECS: u64 = 600;

/// Spring-forward gaps are walked minute by minute up to this many minutes.
pub const MAX_DST_ADVANCE_MINUTES: i64 = 120;

pub const MAX_ACTOR_LEN: usize = 128;
pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;
pub const MAX_NEXT_TIME_PROBES: usize = 12;
