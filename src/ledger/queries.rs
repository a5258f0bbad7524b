use ulid::Ulid;

use crate::model::*;

use super::Ledger;

impl Ledger {
    pub fn hold(&self, id: &Ulid) -> Option<Hold> {
        self.holds.get(id).map(|h| h.value().clone())
    }

    /// Holds not yet expired at `now`, oldest first. Expired holds the
    /// reaper has not removed are filtered here.
    pub fn active_holds(&self, now: Ms) -> Vec<Hold> {
        let mut holds: Vec<Hold> = self
            .holds
            .iter()
            .filter(|h| h.is_active(now))
            .map(|h| h.value().clone())
            .collect();
        holds.sort_by_key(|h| h.id);
        holds
    }

    pub fn holds_for_booking(&self, booking_id: &Ulid, now: Ms) -> Vec<Hold> {
        let mut holds: Vec<Hold> = self
            .holds
            .iter()
            .filter(|h| h.booking_id == *booking_id && h.is_active(now))
            .map(|h| h.value().clone())
            .collect();
        holds.sort_by_key(|h| h.id);
        holds
    }

    /// Ordered by table id so a multi-table group reads consistently.
    pub fn assignments_for_booking(&self, booking_id: &Ulid) -> Vec<Assignment> {
        let Some(ids) = self.booking_assignments.get(booking_id).map(|ids| ids.value().clone()) else {
            return Vec::new();
        };
        let mut rows: Vec<Assignment> = ids
            .iter()
            .filter_map(|id| self.assignments.get(id).map(|a| a.value().clone()))
            .collect();
        rows.sort_by(|a, b| a.table_id.cmp(&b.table_id).then(a.start_at.cmp(&b.start_at)));
        rows
    }

    /// Assignments whose interval overlaps `span`.
    pub fn assignments_overlapping(&self, span: &Span) -> Vec<Assignment> {
        let mut rows: Vec<Assignment> = self
            .assignments
            .iter()
            .filter(|a| a.span().overlaps(span))
            .map(|a| a.value().clone())
            .collect();
        rows.sort_by_key(|a| a.id);
        rows
    }

    pub fn group_of_hold(&self, hold_id: &Ulid) -> Option<Ulid> {
        self.confirmed_holds.get(hold_id).map(|g| *g.value())
    }

    pub fn hold_count(&self) -> usize {
        self.holds.len()
    }

    pub fn assignment_count(&self) -> usize {
        self.assignments.len()
    }
}
