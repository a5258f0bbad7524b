use std::collections::HashSet;
use std::time::Instant;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::availability::AvailabilityIndex;
use crate::error::AllocationError;
use crate::inventory::Venue;
use crate::limits::*;
use crate::lookahead::{LookaheadConflict, LookaheadInput, evaluate_lookahead};
use crate::model::*;
use crate::observability;
use crate::planner::{PlanDiagnostics, PlanFilters, PlansResult, build_scored_table_plans};

use super::{BookingContext, HoldManager};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuoteRequest {
    pub booking_id: Ulid,
    pub zone_id: Option<Ulid>,
    pub max_tables: Option<usize>,
    pub require_adjacency: Option<bool>,
    pub avoid_tables: Vec<Ulid>,
    pub hold_ttl_seconds: Option<u64>,
    pub created_by: Option<String>,
}

impl QuoteRequest {
    pub fn new(booking_id: Ulid) -> Self {
        Self {
            booking_id,
            ..Default::default()
        }
    }
}

/// Result of a quote. "Nothing fits" comes back here with `reason` set,
/// never as an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Quote {
    pub hold: Option<Hold>,
    pub candidate: Option<Plan>,
    pub alternates: Vec<Plan>,
    /// Venue-local `HH:MM` start times that would fit, when nothing does now.
    pub next_times: Vec<String>,
    pub reason: Option<String>,
    pub diagnostics: PlanDiagnostics,
    pub lookahead_conflicts: Vec<LookaheadConflict>,
}

enum Selection {
    Selected { hold: Hold, plan: Plan },
    Rejected(String),
    Conflict(AllocationError),
}

/// Ledger state for the quoted day, read once per request.
struct Snapshot {
    context_bookings: Vec<ContextBooking>,
    holds: Vec<Hold>,
    index: AvailabilityIndex,
}

impl HoldManager {
    /// Plan tables for a booking and hold the best plan.
    pub async fn quote_tables_for_booking(&self, req: QuoteRequest) -> Result<Quote, AllocationError> {
        if req.max_tables == Some(0) {
            return Err(AllocationError::input("max_tables must be positive"));
        }
        if req.avoid_tables.len() > MAX_TABLES_PER_VENUE {
            return Err(AllocationError::LimitExceeded("too many avoided tables"));
        }
        if req.created_by.as_ref().is_some_and(|a| a.len() > MAX_ACTOR_LEN) {
            return Err(AllocationError::LimitExceeded("actor too long"));
        }

        let ctx = self.booking_context(req.booking_id).await?;
        let now = self.now();
        let snapshot = self.snapshot(&ctx, now).await?;
        let settings = &ctx.venue.settings;

        let started = Instant::now();
        let filters = self.filters(&req, &ctx, &snapshot, &ctx.window.block);
        let plans = build_scored_table_plans(
            &ctx.venue.tables,
            ctx.booking.party_size,
            &ctx.venue.adjacency,
            &settings.weights,
            &settings.planner,
            &filters,
        );
        let lookahead = evaluate_lookahead(&LookaheadInput {
            config: &settings.lookahead,
            window: &ctx.window,
            plans: &plans,
            tables: &ctx.venue.tables,
            adjacency: &ctx.venue.adjacency,
            weights: &settings.weights,
            options: &settings.planner,
            context_bookings: &snapshot.context_bookings,
            holds: &snapshot.holds,
            booking_id: Some(req.booking_id),
            now,
        });
        metrics::histogram!(observability::PLAN_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        if !lookahead.penalized_plans.is_empty() {
            debug!(
                booking_id = %req.booking_id,
                penalized = lookahead.penalized_plans.len(),
                "lookahead penalized plans"
            );
        }

        let ranked = PlansResult {
            plans: lookahead.updated_plans,
            diagnostics: plans.diagnostics,
        };
        let selection = self.select(&ctx, &req, &ranked, now).await?;

        let mut quote = Quote {
            diagnostics: ranked.diagnostics,
            lookahead_conflicts: lookahead.conflicts,
            ..Default::default()
        };
        match selection {
            Selection::Selected { hold, plan } => {
                metrics::counter!(observability::QUOTES_TOTAL, "outcome" => observability::quote_outcome(true, false))
                    .increment(1);
                self.release_superseded(&hold).await;
                quote.alternates = ranked
                    .plans
                    .iter()
                    .filter(|p| p.table_ids != plan.table_ids)
                    .take(self.config.alternate_limit)
                    .cloned()
                    .collect();
                quote.candidate = Some(plan);
                quote.hold = Some(hold);
            }
            Selection::Rejected(reason) => {
                metrics::counter!(observability::QUOTES_TOTAL, "outcome" => observability::quote_outcome(false, false))
                    .increment(1);
                quote.next_times = self.next_times(&req, &ctx, &snapshot);
                info!(booking_id = %req.booking_id, %reason, next_times = quote.next_times.len(), "no table plan");
                quote.reason = Some(reason);
            }
            Selection::Conflict(err) => {
                metrics::counter!(observability::QUOTES_TOTAL, "outcome" => observability::quote_outcome(false, true))
                    .increment(1);
                return Err(err);
            }
        }
        Ok(quote)
    }

    /// Try plans best first. A plan that loses a strict-conflict race falls
    /// through to the next one, up to `max_quote_attempts`.
    async fn select(
        &self,
        ctx: &BookingContext,
        req: &QuoteRequest,
        plans: &PlansResult,
        now: Ms,
    ) -> Result<Selection, AllocationError> {
        if plans.is_empty() {
            let reason = plans
                .rejection_reason()
                .unwrap_or_else(|| "No suitable tables available".to_string());
            return Ok(Selection::Rejected(reason));
        }
        let ttl_ms = self.config.ttl_seconds(req.hold_ttl_seconds) as Ms * 1_000;
        let mut last_conflict = None;
        for plan in plans.plans.iter().take(self.config.max_quote_attempts.max(1)) {
            let hold = Hold {
                id: Ulid::new(),
                booking_id: ctx.booking.id,
                restaurant_id: ctx.venue.restaurant_id,
                zone_id: plan.zone_id,
                table_ids: plan.table_ids.iter().copied().collect(),
                start_at: ctx.window.block.start,
                end_at: ctx.window.block.end,
                expires_at: now + ttl_ms,
                created_by: req.created_by.clone(),
                created_at: now,
            };
            match self
                .ledger
                .place_hold(hold.clone(), self.config.strict_conflicts, now)
                .await
            {
                Ok(()) => {
                    return Ok(Selection::Selected {
                        hold,
                        plan: plan.clone(),
                    });
                }
                Err(e @ AllocationError::HoldConflict { .. }) => {
                    warn!(booking_id = %ctx.booking.id, plan = %plan.key(), "plan lost a race, trying next");
                    last_conflict = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(match last_conflict {
            Some(e) => Selection::Conflict(e),
            None => Selection::Rejected("No suitable tables available".to_string()),
        })
    }

    /// A booking keeps one live hold: older ones go once the new one lands.
    async fn release_superseded(&self, kept: &Hold) {
        for old in self.ledger.holds_for_booking(&kept.booking_id, self.now()) {
            if old.id == kept.id {
                continue;
            }
            if let Err(e) = self.ledger.release_hold(old.id, ReleaseReason::Superseded).await {
                debug!(hold_id = %old.id, "superseded hold already gone: {e}");
            }
        }
    }

    async fn snapshot(&self, ctx: &BookingContext, now: Ms) -> Result<Snapshot, AllocationError> {
        let restaurant_id = ctx.venue.restaurant_id;
        let mut day = self
            .inventory
            .bookings_for_day(restaurant_id, ctx.booking.date)
            .await?;
        // Late services run past midnight into the next local date.
        if let Some(next) = ctx.booking.date.succ_opt() {
            day.extend(self.inventory.bookings_for_day(restaurant_id, next).await?);
        }

        let context_bookings = day
            .iter()
            .filter(|b| b.id != ctx.booking.id)
            .filter_map(|b| {
                let window = ctx
                    .venue
                    .policy
                    .booking_window(b.date, b.start_time, b.party_size, b.service)
                    .ok()?;
                Some(ContextBooking {
                    id: b.id,
                    party_size: b.party_size,
                    status: b.status,
                    block: window.block,
                    seating_preference: b.seating_preference,
                    table_ids: self
                        .ledger
                        .assignments_for_booking(&b.id)
                        .into_iter()
                        .map(|a| a.table_id)
                        .collect(),
                })
            })
            .collect();

        let lookahead_ms = ctx.venue.settings.lookahead.window_minutes as Ms * MINUTE_MS;
        let horizon = Span::new(
            ctx.window.block.start - MAX_SPAN_DURATION_MS,
            ctx.window.block.end + lookahead_ms + MAX_SPAN_DURATION_MS,
        );
        let assignments = self.ledger.assignments_overlapping(&horizon);
        let holds: Vec<Hold> = self
            .ledger
            .active_holds(now)
            .into_iter()
            .filter(|h| h.restaurant_id == restaurant_id)
            .collect();
        let index = AvailabilityIndex::build(&assignments, &holds, now, Some(ctx.booking.id));

        Ok(Snapshot {
            context_bookings,
            holds,
            index,
        })
    }

    fn filters(&self, req: &QuoteRequest, ctx: &BookingContext, snapshot: &Snapshot, block: &Span) -> PlanFilters {
        let tables = &ctx.venue.tables;
        PlanFilters {
            zone_id: req.zone_id,
            seating: ctx.booking.seating_preference,
            avoid_tables: req.avoid_tables.iter().copied().collect::<HashSet<_>>(),
            busy_tables: snapshot.index.busy_tables(tables, block),
            zone_load: snapshot.index.zone_load(tables, block),
            max_tables: req.max_tables,
            require_adjacency: req.require_adjacency,
        }
    }

    /// Nearby start times, alternating later and earlier by the venue's
    /// step, whose block fits inside the service and has at least one plan.
    fn next_times(&self, req: &QuoteRequest, ctx: &BookingContext, snapshot: &Snapshot) -> Vec<String> {
        let limit = self.config.next_times_limit;
        if limit == 0 {
            return Vec::new();
        }
        let venue: &Venue = &ctx.venue;
        let booking = &ctx.booking;
        let Some((opens, closes)) = venue.policy.service_bounds(booking.date, booking.service) else {
            return Vec::new();
        };
        let requested = booking.date.and_time(booking.start_time);
        let dining = Duration::minutes(venue.policy.duration_minutes(booking.service, booking.party_size) as i64);
        let step = venue.settings.next_time_step_minutes as i64;

        let mut found: Vec<(chrono::NaiveDateTime, String)> = Vec::new();
        let offsets = (1..=MAX_NEXT_TIME_PROBES as i64 / 2).flat_map(|k| [k * step, -k * step]);
        for offset in offsets {
            if found.len() >= limit {
                break;
            }
            let start = requested + Duration::minutes(offset);
            if start < opens || start + dining > closes {
                continue;
            }
            let Ok(window) =
                venue
                    .policy
                    .booking_window(start.date(), start.time(), booking.party_size, booking.service)
            else {
                continue;
            };
            let filters = self.filters(req, ctx, snapshot, &window.block);
            let probe = build_scored_table_plans(
                &venue.tables,
                booking.party_size,
                &venue.adjacency,
                &venue.settings.weights,
                &venue.settings.planner,
                &filters,
            );
            if !probe.is_empty() {
                found.push((start, start.format("%H:%M").to_string()));
            }
        }
        found.sort_by_key(|(t, _)| *t);
        found.into_iter().map(|(_, label)| label).collect()
    }
}
