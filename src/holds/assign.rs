use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::AllocationError;
use crate::ledger::{AssignTables, ConfirmHold, UnassignOutcome};
use crate::limits::*;
use crate::model::*;

use super::{BookingContext, HoldManager};

/// Hold explicit tables for a booking, outside the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateHoldRequest {
    pub booking_id: Ulid,
    pub table_ids: Vec<Ulid>,
    #[serde(default)]
    pub hold_ttl_seconds: Option<u64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmRequest {
    pub hold_id: Ulid,
    pub booking_id: Ulid,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssignOptions {
    pub idempotency_key: Option<String>,
    /// Refuse a multi-table assignment whose tables are not connected.
    pub require_adjacency: bool,
}

impl HoldManager {
    /// Hold a caller-chosen set of tables for the booking's block.
    pub async fn create_hold(&self, req: CreateHoldRequest) -> Result<Hold, AllocationError> {
        let ctx = self.booking_context(req.booking_id).await?;
        let tables = resolve_tables(&ctx, &req.table_ids)?;
        let capacity: u32 = tables.iter().map(|t| t.capacity).sum();
        if capacity < ctx.booking.party_size {
            return Err(AllocationError::input(format!(
                "tables seat {capacity}, party is {}",
                ctx.booking.party_size
            )));
        }

        let now = self.now();
        let zones: BTreeSet<Ulid> = tables.iter().map(|t| t.zone_id).collect();
        let hold = Hold {
            id: Ulid::new(),
            booking_id: ctx.booking.id,
            restaurant_id: ctx.venue.restaurant_id,
            zone_id: if zones.len() == 1 { zones.first().copied() } else { None },
            table_ids: tables.iter().map(|t| t.id).collect(),
            start_at: ctx.window.block.start,
            end_at: ctx.window.block.end,
            expires_at: now + self.config.ttl_seconds(req.hold_ttl_seconds) as Ms * 1_000,
            created_by: req.created_by,
            created_at: now,
        };
        self.ledger
            .place_hold(hold.clone(), self.config.strict_conflicts, now)
            .await?;
        Ok(hold)
    }

    /// Turn a live hold into assignments. Returns the assignment group id;
    /// a retry with the same idempotency key returns the same id.
    pub async fn confirm_hold_assignment(&self, req: ConfirmRequest) -> Result<Ulid, AllocationError> {
        let hold_id = req.hold_id;
        let result = self
            .ledger
            .confirm_hold(
                ConfirmHold {
                    hold_id,
                    booking_id: req.booking_id,
                    idempotency_key: req.idempotency_key,
                    assigned_by: req.assigned_by,
                },
                self.now(),
            )
            .await;
        if let Err(e @ AllocationError::HoldExpired { .. }) = &result {
            warn!(%hold_id, "confirm rejected: {e}");
        }
        result
    }

    /// Staff override: assign tables directly for the booking's block. The
    /// same conflict rules as the hold path apply, and active holds of other
    /// bookings block it too.
    pub async fn assign_table_to_booking(
        &self,
        booking_id: Ulid,
        table_ids: &[Ulid],
        actor: Option<&str>,
        options: AssignOptions,
    ) -> Result<Ulid, AllocationError> {
        let ctx = self.booking_context(booking_id).await?;
        let tables = resolve_tables(&ctx, table_ids)?;
        let ids: Vec<Ulid> = tables.iter().map(|t| t.id).collect();
        if options.require_adjacency && !ctx.venue.adjacency.is_connected(&ids) {
            return Err(AllocationError::input("tables are not adjacent"));
        }

        self.ledger
            .assign_tables(
                AssignTables {
                    booking_id,
                    table_ids: ids,
                    span: ctx.window.block,
                    assigned_by: actor.map(str::to_string),
                    idempotency_key: options.idempotency_key,
                },
                self.now(),
            )
            .await
    }

    /// Remove one table from a booking. The outcome says whether the booking
    /// has no tables left, which callers use to revert its status.
    pub async fn unassign_table_from_booking(
        &self,
        booking_id: Ulid,
        table_id: Ulid,
    ) -> Result<UnassignOutcome, AllocationError> {
        let outcome = self.ledger.unassign(booking_id, table_id).await?;
        if outcome.booking_now_unassigned {
            info!(%booking_id, "booking has no tables left");
        }
        Ok(outcome)
    }
}

/// Venue tables for `ids`, deduplicated, all assignable.
fn resolve_tables<'a>(ctx: &'a BookingContext, ids: &[Ulid]) -> Result<Vec<&'a Table>, AllocationError> {
    let unique: BTreeSet<Ulid> = ids.iter().copied().collect();
    if unique.is_empty() {
        return Err(AllocationError::input("no tables given"));
    }
    if unique.len() > MAX_TABLES_PER_PLAN {
        return Err(AllocationError::LimitExceeded("too many tables"));
    }
    unique
        .iter()
        .map(|id| {
            let table = ctx.venue.table(id).ok_or(AllocationError::NotFound(*id))?;
            if !table.is_assignable() {
                return Err(AllocationError::input(format!(
                    "table {} is not available",
                    table.table_number
                )));
            }
            Ok(table)
        })
        .collect()
}
