//! Per-table occupancy index used to prune the planner's search.
//!
//! Each table gets an [`AvailabilityBitset`] for the fast "definitely free"
//! answer and the exact occupancy windows for re-validation. The bitset never
//! decides on its own that a table is busy.

use std::collections::{HashMap, HashSet};

use ulid::Ulid;

use crate::bitset::AvailabilityBitset;
use crate::model::{Assignment, Conflict, ConflictSource, Hold, Ms, Span, Table};

/// One exact busy window on one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupancy {
    pub span: Span,
    pub source: ConflictSource,
    pub booking_id: Ulid,
    pub hold_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default)]
pub struct AvailabilityIndex {
    bitsets: HashMap<Ulid, AvailabilityBitset>,
    occupancy: HashMap<Ulid, Vec<Occupancy>>,
}

impl AvailabilityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index confirmed assignments and the holds still active at `now`.
    /// Holds of `requesting_booking` are skipped since a new quote replaces
    /// them.
    pub fn build<'a>(
        assignments: impl IntoIterator<Item = &'a Assignment>,
        holds: impl IntoIterator<Item = &'a Hold>,
        now: Ms,
        requesting_booking: Option<Ulid>,
    ) -> Self {
        let mut index = Self::new();
        for a in assignments {
            index.mark(
                a.table_id,
                Occupancy {
                    span: a.span(),
                    source: ConflictSource::Booking,
                    booking_id: a.booking_id,
                    hold_id: None,
                },
            );
        }
        for h in holds {
            if !h.is_active(now) || Some(h.booking_id) == requesting_booking {
                continue;
            }
            for table_id in &h.table_ids {
                index.mark(
                    *table_id,
                    Occupancy {
                        span: h.span(),
                        source: ConflictSource::Hold,
                        booking_id: h.booking_id,
                        hold_id: Some(h.id),
                    },
                );
            }
        }
        index
    }

    pub fn mark(&mut self, table_id: Ulid, occupancy: Occupancy) {
        if occupancy.span.is_empty() {
            return;
        }
        self.bitsets
            .entry(table_id)
            .or_default()
            .mark_window(occupancy.span.start, occupancy.span.end);
        self.occupancy.entry(table_id).or_default().push(occupancy);
    }

    /// Whether the table has no occupancy overlapping `span`.
    pub fn is_table_free(&self, table_id: &Ulid, span: &Span) -> bool {
        let Some(bits) = self.bitsets.get(table_id) else {
            return true;
        };
        if bits.is_window_free(span.start, span.end) {
            return true;
        }
        // The bitset rounds to whole slots; confirm against exact windows.
        self.occupancy
            .get(table_id)
            .is_none_or(|windows| windows.iter().all(|o| !o.span.overlaps(span)))
    }

    /// Every exact occupancy on the table overlapping `span`.
    pub fn conflicts_for(&self, table_id: &Ulid, span: &Span) -> Vec<Conflict> {
        self.occupancy
            .get(table_id)
            .into_iter()
            .flatten()
            .filter(|o| o.span.overlaps(span))
            .map(|o| Conflict {
                table_id: *table_id,
                booking_id: Some(o.booking_id),
                hold_id: o.hold_id,
                start_at: o.span.start,
                end_at: o.span.end,
                source: o.source,
            })
            .collect()
    }

    /// Tables excluded by time for `span`. Every member has a genuinely
    /// overlapping window.
    pub fn busy_tables(&self, tables: &[Table], span: &Span) -> HashSet<Ulid> {
        tables
            .iter()
            .filter(|t| !self.is_table_free(&t.id, span))
            .map(|t| t.id)
            .collect()
    }

    /// Busy fraction of each zone's assignable tables for `span`.
    pub fn zone_load(&self, tables: &[Table], span: &Span) -> HashMap<Ulid, f64> {
        let mut counts: HashMap<Ulid, (usize, usize)> = HashMap::new();
        for t in tables.iter().filter(|t| t.is_assignable()) {
            let entry = counts.entry(t.zone_id).or_default();
            entry.1 += 1;
            if !self.is_table_free(&t.id, span) {
                entry.0 += 1;
            }
        }
        counts
            .into_iter()
            .map(|(zone, (busy, total))| (zone, busy as f64 / total.max(1) as f64))
            .collect()
    }
}
