use thiserror::Error;
use ulid::Ulid;

use crate::model::Ms;

/// Faults raised by the allocation engine.
///
/// "No table fits" is not an error: it comes back as data on the plan result
/// and the quote. Everything here aborts the operation in flight.
#[derive(Debug, Clone, Error)]
pub enum AllocationError {
    /// Malformed booking parameters rejected at the boundary.
    #[error("invalid input: {0}")]
    Input(String),

    /// A strict-conflict check or the ledger's exclusion check rejected the
    /// write. Retry by re-quoting.
    #[error("hold conflict on table {table_id:?} (hold {hold_id:?}, booking {booking_id:?})")]
    HoldConflict {
        table_id: Option<Ulid>,
        hold_id: Option<Ulid>,
        booking_id: Option<Ulid>,
    },

    #[error("hold {hold_id} expired at {expired_at}")]
    HoldExpired { hold_id: Ulid, expired_at: Ms },

    #[error("not found: {0}")]
    NotFound(Ulid),

    #[error("hold {hold_id} belongs to booking {expected}, not {actual}")]
    BookingMismatch {
        hold_id: Ulid,
        expected: Ulid,
        actual: Ulid,
    },

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("inventory error: {0}")]
    Inventory(String),

    #[error("WAL error: {0}")]
    Wal(String),
}

impl AllocationError {
    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    /// Conflict and expiry errors are resolved by quoting again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::HoldConflict { .. } | Self::HoldExpired { .. })
    }
}
