use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tokio::sync::oneshot;
use tracing::{info, warn};
use ulid::Ulid;

use crate::error::AllocationError;
use crate::limits::*;
use crate::model::*;
use crate::notify::AllocationEvent;

use super::conflict::{ConflictScope, conflict_error, find_conflict, validate_span};
use super::{Ledger, TableGuards, WalCommand};

#[derive(Debug, Clone)]
pub struct ConfirmHold {
    pub hold_id: Ulid,
    pub booking_id: Ulid,
    pub idempotency_key: Option<String>,
    pub assigned_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AssignTables {
    pub booking_id: Ulid,
    pub table_ids: Vec<Ulid>,
    pub span: Span,
    pub assigned_by: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Result of removing one table from a booking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnassignOutcome {
    pub removed_assignment_id: Ulid,
    pub remaining_assignments: usize,
    /// The booking now has no tables at all; callers revert its status.
    pub booking_now_unassigned: bool,
}

fn check_text_limits(actor: &Option<String>, key: &Option<String>) -> Result<(), AllocationError> {
    if actor.as_ref().is_some_and(|a| a.len() > MAX_ACTOR_LEN) {
        return Err(AllocationError::LimitExceeded("actor too long"));
    }
    if let Some(k) = key {
        if k.is_empty() {
            return Err(AllocationError::input("idempotency key is empty"));
        }
        if k.len() > MAX_IDEMPOTENCY_KEY_LEN {
            return Err(AllocationError::LimitExceeded("idempotency key too long"));
        }
    }
    Ok(())
}

impl Ledger {
    /// Group already written under `key`, if any. A key reused for another
    /// booking is an input error.
    fn replayed_group(&self, key: &Option<String>, booking_id: Ulid) -> Result<Option<Ulid>, AllocationError> {
        let Some(key) = key else { return Ok(None) };
        match self.idempotency.get(key).map(|e| *e.value()) {
            Some((group_id, owner)) if owner == booking_id => Ok(Some(group_id)),
            Some(_) => Err(AllocationError::input(format!(
                "idempotency key '{key}' already used for another booking"
            ))),
            None => Ok(None),
        }
    }

    pub async fn place_hold(&self, hold: Hold, strict: bool, now: Ms) -> Result<(), AllocationError> {
        let span = hold.span();
        validate_span(&span)?;
        if hold.table_ids.is_empty() {
            return Err(AllocationError::input("hold has no tables"));
        }
        if hold.table_ids.len() > MAX_TABLES_PER_PLAN {
            return Err(AllocationError::LimitExceeded("too many tables in hold"));
        }
        if hold.expires_at <= now {
            return Err(AllocationError::input("hold would already be expired"));
        }
        if self.holds.contains_key(&hold.id) {
            return Err(AllocationError::input(format!("hold {} already exists", hold.id)));
        }

        let (_gate, mut guards) = self.lock_tables(hold.table_ids.iter().copied()).await;

        if strict {
            for tl in guards.values() {
                if let Some(conflict) =
                    find_conflict(tl, &span, now, ConflictScope::AssignmentsAndHolds, Some(hold.booking_id))
                {
                    warn!(
                        table_id = %conflict.table_id,
                        conflicting_hold = ?conflict.hold_id,
                        conflicting_booking = ?conflict.booking_id,
                        booking_id = %hold.booking_id,
                        "strict conflict rejected hold"
                    );
                    metrics::counter!(crate::observability::HOLD_CONFLICTS_TOTAL, "stage" => "hold")
                        .increment(1);
                    self.notify.send(
                        conflict.table_id,
                        &AllocationEvent::HoldConflictDetected {
                            table_id: conflict.table_id,
                            requested_by: hold.booking_id,
                            conflicting_hold: conflict.hold_id,
                            conflicting_booking: conflict.booking_id,
                            start_at: conflict.start_at,
                            end_at: conflict.end_at,
                        },
                    );
                    return Err(conflict_error(&conflict));
                }
            }
        }

        let (hold_id, booking_id, expires_at) = (hold.id, hold.booking_id, hold.expires_at);
        self.persist_and_apply(&mut guards, &Event::HoldPlaced(hold)).await?;
        metrics::counter!(crate::observability::HOLDS_PLACED_TOTAL).increment(1);
        info!(%hold_id, %booking_id, expires_at, "hold placed");
        Ok(())
    }

    pub async fn release_hold(&self, id: Ulid, reason: ReleaseReason) -> Result<Hold, AllocationError> {
        let table_ids: Vec<Ulid> = self
            .holds
            .get(&id)
            .map(|h| h.table_ids.iter().copied().collect())
            .ok_or(AllocationError::NotFound(id))?;
        let (_gate, mut guards) = self.lock_tables(table_ids).await;
        // Another writer may have confirmed or released it while we waited.
        let hold = self
            .holds
            .get(&id)
            .map(|h| h.value().clone())
            .ok_or(AllocationError::NotFound(id))?;
        self.persist_and_apply(&mut guards, &Event::HoldReleased { id, reason })
            .await?;
        if reason == ReleaseReason::Expired {
            metrics::counter!(crate::observability::HOLDS_EXPIRED_TOTAL).increment(1);
        }
        info!(hold_id = %id, ?reason, "hold released");
        Ok(hold)
    }

    /// Promote a live hold into assignment rows sharing one group id, which
    /// is returned. Retries under the same idempotency key, or for a hold
    /// that was already confirmed, return the original group.
    pub async fn confirm_hold(&self, req: ConfirmHold, now: Ms) -> Result<Ulid, AllocationError> {
        check_text_limits(&req.assigned_by, &req.idempotency_key)?;
        if let Some(group_id) = self.replayed_group(&req.idempotency_key, req.booking_id)? {
            return Ok(group_id);
        }
        if let Some(group_id) = self.confirmed_holds.get(&req.hold_id).map(|g| *g.value()) {
            return Ok(group_id);
        }
        let table_ids: BTreeSet<Ulid> = self
            .holds
            .get(&req.hold_id)
            .map(|h| h.table_ids.clone())
            .ok_or(AllocationError::NotFound(req.hold_id))?;

        let (_gate, mut guards) = self.lock_tables(table_ids).await;

        // Re-check under the locks: a concurrent confirm of the same hold
        // serializes on the same tables.
        if let Some(group_id) = self.replayed_group(&req.idempotency_key, req.booking_id)? {
            return Ok(group_id);
        }
        if let Some(group_id) = self.confirmed_holds.get(&req.hold_id).map(|g| *g.value()) {
            return Ok(group_id);
        }
        let hold = self
            .holds
            .get(&req.hold_id)
            .map(|h| h.value().clone())
            .ok_or(AllocationError::NotFound(req.hold_id))?;
        if hold.booking_id != req.booking_id {
            return Err(AllocationError::BookingMismatch {
                hold_id: hold.id,
                expected: hold.booking_id,
                actual: req.booking_id,
            });
        }
        if !hold.is_active(now) {
            return Err(AllocationError::HoldExpired {
                hold_id: hold.id,
                expired_at: hold.expires_at,
            });
        }

        let span = hold.span();
        self.check_exclusion(&guards, &span, now, ConflictScope::AssignmentsOnly, hold.booking_id, "confirm")?;

        let group_id = Ulid::new();
        let assignments: Vec<Assignment> = hold
            .table_ids
            .iter()
            .map(|table_id| Assignment {
                id: Ulid::new(),
                group_id,
                booking_id: hold.booking_id,
                table_id: *table_id,
                start_at: span.start,
                end_at: span.end,
                assigned_by: req.assigned_by.clone(),
                idempotency_key: req.idempotency_key.clone(),
                created_at: now,
            })
            .collect();
        let event = Event::HoldConfirmed {
            id: hold.id,
            group_id,
            assignments,
        };
        self.persist_and_apply(&mut guards, &event).await?;
        metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL, "source" => "hold").increment(1);
        info!(hold_id = %hold.id, booking_id = %hold.booking_id, %group_id, "hold confirmed");
        Ok(group_id)
    }

    /// Direct assignment outside the quote flow. Checked against assignments
    /// and other bookings' active holds.
    pub async fn assign_tables(&self, req: AssignTables, now: Ms) -> Result<Ulid, AllocationError> {
        validate_span(&req.span)?;
        check_text_limits(&req.assigned_by, &req.idempotency_key)?;
        if req.table_ids.is_empty() {
            return Err(AllocationError::input("no tables to assign"));
        }
        if req.table_ids.len() > MAX_TABLES_PER_PLAN {
            return Err(AllocationError::LimitExceeded("too many tables in assignment"));
        }
        if let Some(group_id) = self.replayed_group(&req.idempotency_key, req.booking_id)? {
            return Ok(group_id);
        }

        let (_gate, mut guards) = self.lock_tables(req.table_ids.iter().copied()).await;
        if let Some(group_id) = self.replayed_group(&req.idempotency_key, req.booking_id)? {
            return Ok(group_id);
        }
        self.check_exclusion(
            &guards,
            &req.span,
            now,
            ConflictScope::AssignmentsAndHolds,
            req.booking_id,
            "assign",
        )?;

        let group_id = Ulid::new();
        let rows: Vec<Assignment> = guards
            .keys()
            .map(|table_id| Assignment {
                id: Ulid::new(),
                group_id,
                booking_id: req.booking_id,
                table_id: *table_id,
                start_at: req.span.start,
                end_at: req.span.end,
                assigned_by: req.assigned_by.clone(),
                idempotency_key: req.idempotency_key.clone(),
                created_at: now,
            })
            .collect();
        self.persist_and_apply(&mut guards, &Event::AssignmentsCreated(rows))
            .await?;
        metrics::counter!(crate::observability::ASSIGNMENTS_TOTAL, "source" => "manual").increment(1);
        info!(booking_id = %req.booking_id, %group_id, tables = guards.len(), "tables assigned");
        Ok(group_id)
    }

    pub async fn unassign(&self, booking_id: Ulid, table_id: Ulid) -> Result<UnassignOutcome, AllocationError> {
        let find = || {
            self.assignments_for_booking(&booking_id)
                .into_iter()
                .find(|a| a.table_id == table_id)
                .map(|a| a.id)
                .ok_or(AllocationError::NotFound(table_id))
        };
        find()?;
        let (_gate, mut guards) = self.lock_tables([table_id]).await;
        let id = find()?;
        self.persist_and_apply(&mut guards, &Event::AssignmentRemoved { id })
            .await?;

        let remaining = self
            .booking_assignments
            .get(&booking_id)
            .map(|ids| ids.len())
            .unwrap_or(0);
        info!(%booking_id, %table_id, remaining, "table unassigned");
        Ok(UnassignOutcome {
            removed_assignment_id: id,
            remaining_assignments: remaining,
            booking_now_unassigned: remaining == 0,
        })
    }

    fn check_exclusion(
        &self,
        guards: &TableGuards,
        span: &Span,
        now: Ms,
        scope: ConflictScope,
        booking_id: Ulid,
        stage: &'static str,
    ) -> Result<(), AllocationError> {
        for tl in guards.values() {
            if let Some(conflict) = find_conflict(tl, span, now, scope, Some(booking_id)) {
                warn!(
                    stage,
                    table_id = %conflict.table_id,
                    conflicting_booking = ?conflict.booking_id,
                    conflicting_hold = ?conflict.hold_id,
                    %booking_id,
                    "exclusion check rejected write"
                );
                metrics::counter!(crate::observability::HOLD_CONFLICTS_TOTAL, "stage" => stage).increment(1);
                return Err(conflict_error(&conflict));
            }
        }
        Ok(())
    }

    /// Holds whose `expires_at` has passed and that are still in the ledger.
    pub fn collect_expired_holds(&self, now: Ms) -> Vec<Ulid> {
        let mut expired: Vec<Ulid> = self
            .holds
            .iter()
            .filter(|h| !h.is_active(now))
            .map(|h| *h.key())
            .collect();
        expired.sort();
        expired
    }

    /// Rewrite the WAL with only the events that recreate current state.
    pub async fn compact_wal(&self) -> Result<(), AllocationError> {
        // Held through the swap; a table first touched mid-compaction would
        // otherwise append to the old log after the snapshot.
        let _writes = self.write_gate.write().await;
        let mut events = Vec::new();

        let mut holds: Vec<Hold> = self.holds.iter().map(|h| h.value().clone()).collect();
        holds.sort_by_key(|h| h.id);
        events.extend(holds.into_iter().map(Event::HoldPlaced));

        let mut groups: HashMap<Ulid, Vec<Assignment>> = HashMap::new();
        for a in self.assignments.iter() {
            groups.entry(a.group_id).or_default().push(a.value().clone());
        }
        let mut groups: Vec<(Ulid, Vec<Assignment>)> = groups.into_iter().collect();
        groups.sort_by_key(|(group_id, _)| *group_id);
        for (_, mut rows) in groups {
            rows.sort_by_key(|a| a.id);
            events.push(Event::AssignmentsCreated(rows));
        }

        // Keeps confirm retries for these holds idempotent after compaction.
        let mut confirmed: Vec<(Ulid, Ulid)> = self
            .confirmed_holds
            .iter()
            .map(|e| (*e.key(), *e.value()))
            .collect();
        confirmed.sort();
        events.extend(confirmed.into_iter().map(|(id, group_id)| Event::HoldConfirmed {
            id,
            group_id,
            assignments: Vec::new(),
        }));

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| AllocationError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| AllocationError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| AllocationError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
