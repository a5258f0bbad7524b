//! Read side of the world the allocator does not own: tables, adjacency,
//! venue policy and the bookings themselves.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::AllocationError;
use crate::limits::*;
use crate::lookahead::LookaheadConfig;
use crate::model::{BookingDetails, Ms, Table};
use crate::planner::{AdjacencyGraph, PlannerOptions, ScoringWeights};
use crate::policy::VenuePolicy;

/// Per-venue tuning for the allocator. Every field has a default so a venue
/// file only needs to name what it overrides.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocatorSettings {
    pub planner: PlannerOptions,
    pub weights: ScoringWeights,
    pub lookahead: LookaheadConfig,
    /// Spacing of alternative start times offered when nothing fits.
    pub next_time_step_minutes: u32,
}

impl Default for AllocatorSettings {
    fn default() -> Self {
        Self {
            planner: PlannerOptions::default(),
            weights: ScoringWeights::default(),
            lookahead: LookaheadConfig::default(),
            next_time_step_minutes: 15,
        }
    }
}

/// Everything static the allocator needs about one restaurant.
#[derive(Debug, Clone, PartialEq)]
pub struct Venue {
    pub restaurant_id: Ulid,
    pub policy: VenuePolicy,
    pub tables: Vec<Table>,
    pub adjacency: AdjacencyGraph,
    pub settings: AllocatorSettings,
}

impl Venue {
    pub fn table(&self, id: &Ulid) -> Option<&Table> {
        self.tables.iter().find(|t| t.id == *id)
    }

    fn validate(&self) -> Result<(), AllocationError> {
        if self.tables.len() > MAX_TABLES_PER_VENUE {
            return Err(AllocationError::Inventory(format!(
                "venue has {} tables, limit is {MAX_TABLES_PER_VENUE}",
                self.tables.len()
            )));
        }
        let mut ids = HashSet::with_capacity(self.tables.len());
        for t in &self.tables {
            if t.capacity == 0 {
                return Err(AllocationError::Inventory(format!(
                    "table {} has zero capacity",
                    t.table_number
                )));
            }
            if !ids.insert(t.id) {
                return Err(AllocationError::Inventory(format!("duplicate table id {}", t.id)));
            }
        }
        for (a, b) in self.adjacency.edge_list() {
            if !ids.contains(&a) || !ids.contains(&b) {
                return Err(AllocationError::Inventory(format!(
                    "adjacency {a} - {b} references an unknown table"
                )));
            }
        }
        if self.settings.planner.k_max == 0 || self.settings.planner.k_max > MAX_TABLES_PER_PLAN {
            return Err(AllocationError::Inventory(format!(
                "k_max must be between 1 and {MAX_TABLES_PER_PLAN}"
            )));
        }
        if self.settings.planner.evaluation_limit > MAX_EVALUATION_LIMIT {
            return Err(AllocationError::Inventory("evaluation limit too high".into()));
        }
        if self.settings.next_time_step_minutes == 0 {
            return Err(AllocationError::Inventory("next time step must be positive".into()));
        }
        Ok(())
    }
}

/// Source of venues and bookings. The engine only reads through it.
#[async_trait]
pub trait InventorySource: Send + Sync {
    async fn booking(&self, booking_id: Ulid) -> Result<Option<BookingDetails>, AllocationError>;

    async fn venue(&self, restaurant_id: Ulid) -> Result<Option<Venue>, AllocationError>;

    /// Every booking of the restaurant on a local date, any status.
    async fn bookings_for_day(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookingDetails>, AllocationError>;
}

/// On-disk JSON shape of a venue plus its bookings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueSnapshot {
    pub restaurant_id: Ulid,
    #[serde(default)]
    pub policy: VenuePolicy,
    pub tables: Vec<Table>,
    #[serde(default)]
    pub adjacency: AdjacencyGraph,
    #[serde(default)]
    pub bookings: Vec<BookingDetails>,
    #[serde(default)]
    pub settings: AllocatorSettings,
}

impl VenueSnapshot {
    pub fn from_json(json: &str) -> Result<Self, AllocationError> {
        serde_json::from_str(json).map_err(|e| AllocationError::Inventory(format!("venue file: {e}")))
    }

    pub fn venue(&self) -> Venue {
        Venue {
            restaurant_id: self.restaurant_id,
            policy: self.policy.clone(),
            tables: self.tables.clone(),
            adjacency: self.adjacency.clone(),
            settings: self.settings,
        }
    }

    pub fn validate(&self) -> Result<(), AllocationError> {
        self.venue().validate()?;
        for b in &self.bookings {
            if b.restaurant_id != self.restaurant_id {
                return Err(AllocationError::Inventory(format!(
                    "booking {} belongs to another restaurant",
                    b.id
                )));
            }
            if b.party_size > MAX_PARTY_SIZE {
                return Err(AllocationError::Inventory(format!(
                    "booking {} party of {} exceeds {MAX_PARTY_SIZE}",
                    b.id, b.party_size
                )));
            }
        }
        Ok(())
    }
}

/// In-memory inventory, loaded from snapshots. Used by the CLI and tests.
#[derive(Default)]
pub struct StaticInventory {
    venues: RwLock<HashMap<Ulid, Venue>>,
    bookings: RwLock<HashMap<Ulid, BookingDetails>>,
}

impl StaticInventory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: VenueSnapshot) -> Result<Self, AllocationError> {
        snapshot.validate()?;
        let venue = snapshot.venue();
        let bookings = snapshot.bookings.into_iter().map(|b| (b.id, b)).collect();
        Ok(Self {
            venues: RwLock::new(HashMap::from([(venue.restaurant_id, venue)])),
            bookings: RwLock::new(bookings),
        })
    }

    pub async fn upsert_venue(&self, venue: Venue) -> Result<(), AllocationError> {
        venue.validate()?;
        self.venues.write().await.insert(venue.restaurant_id, venue);
        Ok(())
    }

    pub async fn upsert_booking(&self, booking: BookingDetails) {
        self.bookings.write().await.insert(booking.id, booking);
    }
}

#[async_trait]
impl InventorySource for StaticInventory {
    async fn booking(&self, booking_id: Ulid) -> Result<Option<BookingDetails>, AllocationError> {
        Ok(self.bookings.read().await.get(&booking_id).cloned())
    }

    async fn venue(&self, restaurant_id: Ulid) -> Result<Option<Venue>, AllocationError> {
        Ok(self.venues.read().await.get(&restaurant_id).cloned())
    }

    async fn bookings_for_day(
        &self,
        restaurant_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookingDetails>, AllocationError> {
        let mut day: Vec<BookingDetails> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| b.restaurant_id == restaurant_id && b.date == date)
            .cloned()
            .collect();
        day.sort_by_key(|b| (b.start_time, b.id));
        Ok(day)
    }
}

/// Time-bounded cache of venues keyed by restaurant.
pub struct TableCatalogCache {
    entries: DashMap<Ulid, (Arc<Venue>, Ms)>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl TableCatalogCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Cached venue, unless it is older than the TTL.
    pub fn get(&self, restaurant_id: &Ulid) -> Option<Arc<Venue>> {
        let entry = self.entries.get(restaurant_id)?;
        let (venue, loaded_at) = entry.value();
        let age = self.clock.now_ms().saturating_sub(*loaded_at);
        if age >= self.ttl.as_millis() as Ms {
            return None;
        }
        Some(venue.clone())
    }

    pub fn insert(&self, venue: Venue) -> Arc<Venue> {
        let venue = Arc::new(venue);
        self.entries
            .insert(venue.restaurant_id, (venue.clone(), self.clock.now_ms()));
        venue
    }

    pub fn invalidate(&self, restaurant_id: &Ulid) {
        self.entries.remove(restaurant_id);
    }

    /// Cached venue or a fresh load from `source`.
    pub async fn load(
        &self,
        source: &dyn InventorySource,
        restaurant_id: Ulid,
    ) -> Result<Arc<Venue>, AllocationError> {
        if let Some(venue) = self.get(&restaurant_id) {
            return Ok(venue);
        }
        let venue = source
            .venue(restaurant_id)
            .await?
            .ok_or(AllocationError::NotFound(restaurant_id))?;
        venue.validate()?;
        tracing::debug!(%restaurant_id, tables = venue.tables.len(), "venue catalog loaded");
        Ok(self.insert(venue))
    }
}
