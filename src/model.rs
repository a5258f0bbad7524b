use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::policy::ServiceType;

/// Unix milliseconds, the only time type used inside the engine.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start <= end, "Span start must not be after end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// Zero-length spans never overlap anything.
    pub fn overlaps(&self, other: &Span) -> bool {
        !self.is_empty() && !other.is_empty() && self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Inventory ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Available,
    OutOfService,
    Maintenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mobility {
    Fixed,
    Movable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableCategory {
    Standard,
    Premium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeatingType {
    Indoor,
    Outdoor,
    Bar,
    Booth,
    HighTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// A physical table as read from inventory. Never mutated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub id: Ulid,
    pub table_number: String,
    pub capacity: u32,
    #[serde(default = "default_min_party")]
    pub min_party_size: u32,
    #[serde(default)]
    pub max_party_size: Option<u32>,
    #[serde(default)]
    pub section: Option<String>,
    pub category: TableCategory,
    pub seating_type: SeatingType,
    pub mobility: Mobility,
    pub zone_id: Ulid,
    pub status: TableStatus,
    pub active: bool,
    #[serde(default)]
    pub position: Option<Position>,
}

fn default_min_party() -> u32 {
    1
}

impl Table {
    /// Active and in service.
    pub fn is_assignable(&self) -> bool {
        self.active && self.status == TableStatus::Available
    }

    /// Whether this table alone may seat `party_size` guests.
    pub fn seats_party(&self, party_size: u32) -> bool {
        self.capacity >= party_size
            && self.min_party_size <= party_size
            && self.max_party_size.is_none_or(|max| max >= party_size)
    }
}

// ── Bookings ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Seated,
    Completed,
    Cancelled,
    NoShow,
}

/// A booking as supplied by the booking collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingDetails {
    pub id: Ulid,
    pub restaurant_id: Ulid,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub party_size: u32,
    pub service: ServiceType,
    pub status: BookingStatus,
    #[serde(default)]
    pub seating_preference: Option<SeatingType>,
}

/// Guest-occupied dining span plus the buffered block span used for conflicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingWindow {
    pub service: ServiceType,
    pub party_size: u32,
    pub dining: Span,
    pub block: Span,
}

/// Another booking on the same day, as seen by the planner and lookahead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextBooking {
    pub id: Ulid,
    pub party_size: u32,
    pub status: BookingStatus,
    pub block: Span,
    pub seating_preference: Option<SeatingType>,
    pub table_ids: Vec<Ulid>,
}

// ── Plans ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjacencyStatus {
    Single,
    Adjacent,
    NonAdjacent,
}

/// Individual weighted penalty terms. Lower `total` is better.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub overage: f64,
    pub table_count: f64,
    pub fragmentation: f64,
    pub zone_balance: f64,
    pub adjacency_cost: f64,
    pub scarcity: f64,
    pub future_conflict_penalty: f64,
    pub total: f64,
}

impl ScoreBreakdown {
    pub fn recompute_total(&mut self) {
        self.total = self.overage
            + self.table_count
            + self.fragmentation
            + self.zone_balance
            + self.adjacency_cost
            + self.scarcity
            + self.future_conflict_penalty;
    }
}

/// A candidate assignment of one or more tables to a party.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub table_ids: Vec<Ulid>,
    pub table_numbers: Vec<String>,
    pub total_capacity: u32,
    pub table_count: usize,
    pub slack: u32,
    pub adjacency_status: AdjacencyStatus,
    /// Set when every table shares one zone.
    pub zone_id: Option<Ulid>,
    pub score: ScoreBreakdown,
}

impl Plan {
    /// Stable identity used to match plans across evaluation stages.
    pub fn key(&self) -> String {
        self.table_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join("+")
    }

    pub fn uses_table(&self, table_id: &Ulid) -> bool {
        self.table_ids.contains(table_id)
    }
}

// ── Holds, assignments, conflicts ────────────────────────────────

/// Time-boxed soft reservation of a set of tables for one booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub restaurant_id: Ulid,
    pub zone_id: Option<Ulid>,
    pub table_ids: BTreeSet<Ulid>,
    pub start_at: Ms,
    pub end_at: Ms,
    pub expires_at: Ms,
    pub created_by: Option<String>,
    pub created_at: Ms,
}

impl Hold {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }

    /// Expired holds never block anything, whether or not they were reaped.
    pub fn is_active(&self, now: Ms) -> bool {
        self.expires_at > now
    }
}

/// A persisted table assignment. One row per table; rows created together
/// share a `group_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Ulid,
    pub group_id: Ulid,
    pub booking_id: Ulid,
    pub table_id: Ulid,
    pub start_at: Ms,
    pub end_at: Ms,
    pub assigned_by: Option<String>,
    pub idempotency_key: Option<String>,
    pub created_at: Ms,
}

impl Assignment {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictSource {
    Booking,
    Hold,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub table_id: Ulid,
    pub booking_id: Option<Ulid>,
    pub hold_id: Option<Ulid>,
    pub start_at: Ms,
    pub end_at: Ms,
    pub source: ConflictSource,
}

// ── Per-table ledger ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Hold { booking_id: Ulid, expires_at: Ms },
    Assignment { booking_id: Ulid, group_id: Ulid },
}

/// One occupancy interval on a table. Hold entries reuse the hold id, so a
/// multi-table hold has one entry per table under the same id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub id: Ulid,
    pub span: Span,
    pub kind: EntryKind,
}

impl LedgerEntry {
    pub fn booking_id(&self) -> Ulid {
        match self.kind {
            EntryKind::Hold { booking_id, .. } | EntryKind::Assignment { booking_id, .. } => {
                booking_id
            }
        }
    }

    pub fn to_conflict(&self, table_id: Ulid) -> Conflict {
        let (source, hold_id) = match self.kind {
            EntryKind::Hold { .. } => (ConflictSource::Hold, Some(self.id)),
            EntryKind::Assignment { .. } => (ConflictSource::Booking, None),
        };
        Conflict {
            table_id,
            booking_id: Some(self.booking_id()),
            hold_id,
            start_at: self.span.start,
            end_at: self.span.end,
            source,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableLedger {
    pub table_id: Ulid,
    /// All entries (holds + assignments), sorted by `span.start`.
    pub entries: Vec<LedgerEntry>,
}

impl TableLedger {
    pub fn new(table_id: Ulid) -> Self {
        Self {
            table_id,
            entries: Vec::new(),
        }
    }

    /// Insert entry maintaining sort order by span.start.
    pub fn insert_entry(&mut self, entry: LedgerEntry) {
        let pos = self
            .entries
            .binary_search_by_key(&entry.span.start, |e| e.span.start)
            .unwrap_or_else(|e| e);
        self.entries.insert(pos, entry);
    }

    /// Remove entry by id.
    pub fn remove_entry(&mut self, id: Ulid) -> Option<LedgerEntry> {
        let pos = self.entries.iter().position(|e| e.id == id)?;
        Some(self.entries.remove(pos))
    }

    /// Return only entries whose span overlaps the query window.
    /// Uses binary search to skip entries starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &LedgerEntry> {
        let right_bound = self.entries.partition_point(|e| e.span.start < query.end);
        self.entries[..right_bound]
            .iter()
            .filter(move |e| e.span.end > query.start)
    }
}

/// Why a hold left the ledger without being confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    Released,
    Expired,
    Superseded,
}

/// The WAL record format. Multi-table writes are one record so a crash
/// never leaves half a group behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    HoldPlaced(Hold),
    HoldReleased {
        id: Ulid,
        reason: ReleaseReason,
    },
    /// Removes the hold and creates its assignment rows.
    HoldConfirmed {
        id: Ulid,
        group_id: Ulid,
        assignments: Vec<Assignment>,
    },
    AssignmentsCreated(Vec<Assignment>),
    AssignmentRemoved {
        id: Ulid,
    },
}
