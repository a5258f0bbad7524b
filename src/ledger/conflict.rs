use ulid::Ulid;

use crate::error::AllocationError;
use crate::model::*;

/// Which ledger entries count as occupying a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictScope {
    /// Confirmed assignments only: the exclusion rule for confirm.
    AssignmentsOnly,
    /// Assignments plus holds still active at `now`.
    AssignmentsAndHolds,
}

pub fn validate_span(span: &Span) -> Result<(), AllocationError> {
    use crate::limits::*;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(AllocationError::LimitExceeded("timestamp out of range"));
    }
    if span.is_empty() {
        return Err(AllocationError::input("block interval is empty"));
    }
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(AllocationError::LimitExceeded("span too wide"));
    }
    Ok(())
}

/// First entry on the table that overlaps `span` under `scope`.
///
/// Holds of `own_booking` are ignored so a booking can replace its own hold.
/// Its assignments are not: a table is never assigned twice for one window.
pub fn find_conflict(
    tl: &TableLedger,
    span: &Span,
    now: Ms,
    scope: ConflictScope,
    own_booking: Option<Ulid>,
) -> Option<Conflict> {
    tl.overlapping(span)
        .filter(|e| e.span.overlaps(span))
        .find(|e| match e.kind {
            EntryKind::Assignment { .. } => true,
            EntryKind::Hold { booking_id, expires_at } => {
                scope == ConflictScope::AssignmentsAndHolds
                    && expires_at > now
                    && Some(booking_id) != own_booking
            }
        })
        .map(|e| e.to_conflict(tl.table_id))
}

pub(crate) fn conflict_error(conflict: &Conflict) -> AllocationError {
    AllocationError::HoldConflict {
        table_id: Some(conflict.table_id),
        hold_id: conflict.hold_id,
        booking_id: conflict.booking_id,
    }
}
