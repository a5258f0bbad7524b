//! Hold manager: quote, hold, confirm and manual assignment on top of the
//! planner, the lookahead and the ledger.
//!
//! Every request reads one snapshot (venue, day's bookings, ledger rows),
//! computes plans synchronously, then commits through the ledger. The
//! ledger's per-table locks are the only source of truth for conflicts.

mod assign;
mod quote;
#[cfg(test)]
mod tests;

pub use assign::{AssignOptions, ConfirmRequest, CreateHoldRequest};
pub use quote::{Quote, QuoteRequest};

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::Clock;
use crate::error::AllocationError;
use crate::inventory::{InventorySource, TableCatalogCache, Venue};
use crate::ledger::Ledger;
use crate::limits::*;
use crate::model::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub hold_ttl_seconds: u64,
    /// Check active holds and assignments before persisting a hold.
    pub strict_conflicts: bool,
    /// Runner-up plans returned next to a held candidate.
    pub alternate_limit: usize,
    pub next_times_limit: usize,
    /// Plans tried in order when the best one loses a race.
    pub max_quote_attempts: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hold_ttl_seconds: 120,
            strict_conflicts: true,
            alternate_limit: 3,
            next_times_limit: 4,
            max_quote_attempts: 3,
        }
    }
}

impl ManagerConfig {
    /// TTL for a hold, request override first, clamped to the allowed range.
    pub fn ttl_seconds(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.hold_ttl_seconds)
            .clamp(MIN_HOLD_TTL_SECS, MAX_HOLD_TTL_SECS)
    }
}

pub struct HoldManager {
    ledger: Arc<Ledger>,
    inventory: Arc<dyn InventorySource>,
    catalog: Arc<TableCatalogCache>,
    clock: Arc<dyn Clock>,
    config: ManagerConfig,
}

/// A booking resolved against its venue.
struct BookingContext {
    booking: BookingDetails,
    venue: Arc<Venue>,
    window: BookingWindow,
}

impl HoldManager {
    pub fn new(
        ledger: Arc<Ledger>,
        inventory: Arc<dyn InventorySource>,
        catalog: Arc<TableCatalogCache>,
        clock: Arc<dyn Clock>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            ledger,
            inventory,
            catalog,
            clock,
            config,
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    async fn booking_context(&self, booking_id: Ulid) -> Result<BookingContext, AllocationError> {
        let booking = self
            .inventory
            .booking(booking_id)
            .await?
            .ok_or(AllocationError::NotFound(booking_id))?;
        match booking.status {
            BookingStatus::Cancelled | BookingStatus::NoShow | BookingStatus::Completed => {
                return Err(AllocationError::input(format!(
                    "booking {booking_id} is {:?}",
                    booking.status
                )));
            }
            BookingStatus::Pending | BookingStatus::Confirmed | BookingStatus::Seated => {}
        }
        if booking.party_size > MAX_PARTY_SIZE {
            return Err(AllocationError::LimitExceeded("party size"));
        }
        let venue = self
            .catalog
            .load(self.inventory.as_ref(), booking.restaurant_id)
            .await?;
        let window = venue.policy.booking_window(
            booking.date,
            booking.start_time,
            booking.party_size,
            booking.service,
        )?;
        Ok(BookingContext {
            booking,
            venue,
            window,
        })
    }

    pub fn get_booking_table_assignments(&self, booking_id: Ulid) -> Vec<Assignment> {
        self.ledger.assignments_for_booking(&booking_id)
    }

    /// Explicitly drop a quoted hold before its TTL runs out.
    pub async fn release_hold(&self, hold_id: Ulid) -> Result<Hold, AllocationError> {
        self.ledger.release_hold(hold_id, ReleaseReason::Released).await
    }

    fn now(&self) -> Ms {
        self.clock.now_ms()
    }
}
