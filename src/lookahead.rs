//! Lookahead evaluation: penalize plans that would strand bookings already
//! confirmed for later in the same service.

use std::collections::{BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::LOOKAHEAD_EVALUATION_LIMIT;
use crate::model::{BookingStatus, BookingWindow, ContextBooking, Hold, MINUTE_MS, Ms, Plan, Span, Table};
use crate::planner::{
    AdjacencyGraph, PlanFilters, PlannerOptions, PlansResult, ScoringWeights, build_scored_table_plans,
    sort_plans,
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookaheadConfig {
    pub enabled: bool,
    /// How far past the current block the plan's tables are treated as
    /// still occupied.
    pub window_minutes: u32,
    /// Added to a plan's score per future conflict it causes.
    pub penalty_weight: f64,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_minutes: 120,
            penalty_weight: 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookaheadConflictKind {
    /// The future booking is already assigned one of the plan's tables.
    AssignedTable,
    /// The future booking could be seated before, but not once the plan's
    /// tables are taken.
    CapacityStranded,
    /// An active hold on one of the plan's tables starts later.
    HeldTable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookaheadConflict {
    pub plan_key: String,
    pub booking_id: Ulid,
    pub hold_id: Option<Ulid>,
    pub table_ids: Vec<Ulid>,
    pub start_at: Ms,
    pub end_at: Ms,
    pub kind: LookaheadConflictKind,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookaheadResult {
    /// Keys of plans that received a penalty, in their original order.
    pub penalized_plans: Vec<String>,
    pub conflicts: Vec<LookaheadConflict>,
    /// All plans with penalties applied, re-ranked.
    pub updated_plans: Vec<Plan>,
}

pub struct LookaheadInput<'a> {
    pub config: &'a LookaheadConfig,
    pub window: &'a BookingWindow,
    pub plans: &'a PlansResult,
    pub tables: &'a [Table],
    pub adjacency: &'a AdjacencyGraph,
    pub weights: &'a ScoringWeights,
    pub options: &'a PlannerOptions,
    /// Other bookings of the day, with any tables already assigned to them.
    pub context_bookings: &'a [ContextBooking],
    pub holds: &'a [Hold],
    /// The booking being placed; never treated as its own future conflict.
    pub booking_id: Option<Ulid>,
    pub now: Ms,
}

/// Pure and deterministic: the only notion of time is `input.now`.
pub fn evaluate_lookahead(input: &LookaheadInput<'_>) -> LookaheadResult {
    let mut updated = input.plans.plans.clone();
    if !input.config.enabled || updated.is_empty() {
        return LookaheadResult {
            updated_plans: updated,
            ..Default::default()
        };
    }

    let block = input.window.block;
    let extended = Span::new(
        block.start,
        block.end + input.config.window_minutes as Ms * MINUTE_MS,
    );

    let mut futures: Vec<&ContextBooking> = input
        .context_bookings
        .iter()
        .filter(|b| Some(b.id) != input.booking_id)
        .filter(|b| b.status == BookingStatus::Confirmed)
        .filter(|b| b.block.start >= block.start && b.block.overlaps(&extended))
        .collect();
    futures.sort_by(|a, b| a.block.start.cmp(&b.block.start).then(a.id.cmp(&b.id)));

    let mut later_holds: Vec<&Hold> = input
        .holds
        .iter()
        .filter(|h| h.is_active(input.now) && Some(h.booking_id) != input.booking_id)
        .filter(|h| h.start_at >= block.start && h.span().overlaps(&extended))
        .collect();
    later_holds.sort_by(|a, b| a.start_at.cmp(&b.start_at).then(a.id.cmp(&b.id)));

    let mut conflicts = Vec::new();
    for future in &futures {
        if future.table_ids.is_empty() {
            stranded_conflicts(input, future, &updated, &mut conflicts);
        } else {
            for plan in &updated {
                let shared: Vec<Ulid> = plan
                    .table_ids
                    .iter()
                    .filter(|t| future.table_ids.contains(t))
                    .copied()
                    .collect();
                if !shared.is_empty() {
                    conflicts.push(LookaheadConflict {
                        plan_key: plan.key(),
                        booking_id: future.id,
                        hold_id: None,
                        table_ids: shared,
                        start_at: future.block.start,
                        end_at: future.block.end,
                        kind: LookaheadConflictKind::AssignedTable,
                    });
                }
            }
        }
    }
    for hold in &later_holds {
        for plan in &updated {
            let shared: Vec<Ulid> = plan
                .table_ids
                .iter()
                .filter(|t| hold.table_ids.contains(t))
                .copied()
                .collect();
            if !shared.is_empty() {
                conflicts.push(LookaheadConflict {
                    plan_key: plan.key(),
                    booking_id: hold.booking_id,
                    hold_id: Some(hold.id),
                    table_ids: shared,
                    start_at: hold.start_at,
                    end_at: hold.end_at,
                    kind: LookaheadConflictKind::HeldTable,
                });
            }
        }
    }

    let mut penalized_plans = Vec::new();
    for plan in &mut updated {
        let key = plan.key();
        let count = conflicts.iter().filter(|c| c.plan_key == key).count();
        if count > 0 {
            plan.score.future_conflict_penalty = input.config.penalty_weight * count as f64;
            plan.score.recompute_total();
            penalized_plans.push(key);
        }
    }
    sort_plans(&mut updated);

    if !conflicts.is_empty() {
        tracing::debug!(
            conflicts = conflicts.len(),
            penalized = penalized_plans.len(),
            "lookahead penalties applied"
        );
    }

    LookaheadResult {
        penalized_plans,
        conflicts,
        updated_plans: updated,
    }
}

/// For an unassigned future booking, flag each plan whose tables it could
/// not do without.
fn stranded_conflicts(
    input: &LookaheadInput<'_>,
    future: &ContextBooking,
    plans: &[Plan],
    conflicts: &mut Vec<LookaheadConflict>,
) {
    let occupied = occupied_during(input, future);
    let base = PlanFilters {
        seating: future.seating_preference,
        avoid_tables: occupied.clone(),
        ..PlanFilters::default()
    };
    let options = PlannerOptions {
        evaluation_limit: input.options.evaluation_limit.min(LOOKAHEAD_EVALUATION_LIMIT),
        ..*input.options
    };
    let before = build_scored_table_plans(
        input.tables,
        future.party_size,
        input.adjacency,
        input.weights,
        &options,
        &base,
    );
    if before.is_empty() {
        // Already unseatable; nothing we choose makes it worse.
        return;
    }

    for plan in plans {
        let taken: HashSet<Ulid> = plan.table_ids.iter().copied().collect();
        let still_fits = before
            .plans
            .iter()
            .any(|p| p.table_ids.iter().all(|t| !taken.contains(t)));
        if still_fits {
            continue;
        }
        let filters = PlanFilters {
            avoid_tables: occupied.union(&taken).copied().collect(),
            ..base.clone()
        };
        let after = build_scored_table_plans(
            input.tables,
            future.party_size,
            input.adjacency,
            input.weights,
            &options,
            &filters,
        );
        if after.is_empty() {
            // Tables every remaining option needed.
            let needed: BTreeSet<Ulid> = before
                .plans
                .iter()
                .flat_map(|p| p.table_ids.iter())
                .filter(|t| taken.contains(t))
                .copied()
                .collect();
            conflicts.push(LookaheadConflict {
                plan_key: plan.key(),
                booking_id: future.id,
                hold_id: None,
                table_ids: needed.into_iter().collect(),
                start_at: future.block.start,
                end_at: future.block.end,
                kind: LookaheadConflictKind::CapacityStranded,
            });
        }
    }
}

/// Tables other bookings or holds already occupy during the future
/// booking's block.
fn occupied_during(input: &LookaheadInput<'_>, future: &ContextBooking) -> HashSet<Ulid> {
    let mut occupied = HashSet::new();
    for other in input.context_bookings {
        if other.id != future.id
            && Some(other.id) != input.booking_id
            && other.block.overlaps(&future.block)
        {
            occupied.extend(other.table_ids.iter().copied());
        }
    }
    for hold in input.holds {
        if hold.is_active(input.now)
            && hold.booking_id != future.id
            && Some(hold.booking_id) != input.booking_id
            && hold.span().overlaps(&future.block)
        {
            occupied.extend(hold.table_ids.iter().copied());
        }
    }
    occupied
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Mobility, SeatingType, TableCategory, TableStatus};
    use crate::policy::ServiceType;

    const M: Ms = MINUTE_MS;
    const H: Ms = 60 * M;

    fn table(number: &str, capacity: u32, category: TableCategory, zone: Ulid) -> Table {
        Table {
            id: Ulid::new(),
            table_number: number.into(),
            capacity,
            min_party_size: 1,
            max_party_size: None,
            section: None,
            category,
            seating_type: SeatingType::Indoor,
            mobility: Mobility::Fixed,
            zone_id: zone,
            status: TableStatus::Available,
            active: true,
            position: None,
        }
    }

    fn window(start: Ms, party: u32) -> BookingWindow {
        BookingWindow {
            service: ServiceType::Dinner,
            party_size: party,
            dining: Span::new(start, start + 120 * M),
            block: Span::new(start, start + 135 * M),
        }
    }

    fn future(start: Ms, party: u32, tables: Vec<Ulid>) -> ContextBooking {
        ContextBooking {
            id: Ulid::new(),
            party_size: party,
            status: BookingStatus::Confirmed,
            block: Span::new(start, start + 165 * M),
            seating_preference: None,
            table_ids: tables,
        }
    }

    struct Fixture {
        tables: Vec<Table>,
        adjacency: AdjacencyGraph,
        weights: ScoringWeights,
        options: PlannerOptions,
        config: LookaheadConfig,
    }

    impl Fixture {
        fn new(tables: Vec<Table>) -> Self {
            Self {
                tables,
                adjacency: AdjacencyGraph::new(),
                weights: ScoringWeights::default(),
                options: PlannerOptions::default(),
                config: LookaheadConfig::default(),
            }
        }

        fn plans(&self, party: u32) -> PlansResult {
            build_scored_table_plans(
                &self.tables,
                party,
                &self.adjacency,
                &self.weights,
                &self.options,
                &PlanFilters::default(),
            )
        }

        fn run(&self, w: &BookingWindow, plans: &PlansResult, ctx: &[ContextBooking], holds: &[Hold]) -> LookaheadResult {
            evaluate_lookahead(&LookaheadInput {
                config: &self.config,
                window: w,
                plans,
                tables: &self.tables,
                adjacency: &self.adjacency,
                weights: &self.weights,
                options: &self.options,
                context_bookings: ctx,
                holds,
                booking_id: None,
                now: 0,
            })
        }
    }

    fn six_and_eight() -> Fixture {
        let zone = Ulid::new();
        Fixture::new(vec![
            table("T6", 6, TableCategory::Standard, zone),
            table("T8", 8, TableCategory::Premium, zone),
        ])
    }

    #[test]
    fn future_large_party_penalizes_rare_table() {
        let fx = six_and_eight();
        let w = window(19 * H + 45 * M, 6);
        let plans = fx.plans(6);
        assert_eq!(plans.plans.len(), 2);
        let ctx = vec![future(20 * H, 8, Vec::new())];

        let result = fx.run(&w, &plans, &ctx, &[]);
        let t8 = fx.tables[1].id;
        assert_eq!(result.conflicts.len(), 1);
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.booking_id, ctx[0].id);
        assert_eq!(conflict.kind, LookaheadConflictKind::CapacityStranded);
        assert_eq!(conflict.table_ids, vec![t8]);

        let penalized = result.updated_plans.iter().find(|p| p.uses_table(&t8)).unwrap();
        assert!(penalized.score.future_conflict_penalty > 0.0);
        assert_eq!(result.updated_plans[0].table_numbers, vec!["T6".to_string()]);
        assert_eq!(result.penalized_plans, vec![penalized.key()]);
    }

    #[test]
    fn assigned_future_booking_flags_shared_table() {
        let fx = six_and_eight();
        let w = window(18 * H, 6);
        let plans = fx.plans(6);
        let t6 = fx.tables[0].id;
        // Starts after our block ends but inside the lookahead window.
        let ctx = vec![future(20 * H + 30 * M, 6, vec![t6])];
        let result = fx.run(&w, &plans, &ctx, &[]);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, LookaheadConflictKind::AssignedTable);
        assert_eq!(result.updated_plans[0].table_numbers, vec!["T8".to_string()]);
    }

    #[test]
    fn later_hold_flags_plan() {
        let fx = six_and_eight();
        let w = window(18 * H, 6);
        let plans = fx.plans(6);
        let hold = Hold {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            restaurant_id: Ulid::new(),
            zone_id: None,
            table_ids: BTreeSet::from([fx.tables[0].id]),
            start_at: 20 * H + 30 * M,
            end_at: 22 * H,
            expires_at: 1_000,
            created_by: None,
            created_at: 0,
        };
        let result = fx.run(&w, &plans, &[], std::slice::from_ref(&hold));
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].hold_id, Some(hold.id));

        // Expired holds are ignored.
        let expired = Hold { expires_at: 0, ..hold };
        let result = fx.run(&w, &plans, &[], &[expired]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn bookings_beyond_window_are_ignored() {
        let mut fx = six_and_eight();
        fx.config.window_minutes = 0;
        let w = window(18 * H, 6);
        let plans = fx.plans(6);
        let ctx = vec![future(20 * H + 30 * M, 8, Vec::new())];
        let result = fx.run(&w, &plans, &ctx, &[]);
        assert!(result.conflicts.is_empty());
        assert!(result.penalized_plans.is_empty());
    }

    #[test]
    fn earlier_bookings_are_not_future() {
        let fx = six_and_eight();
        let w = window(19 * H + 45 * M, 6);
        let plans = fx.plans(6);
        let ctx = vec![future(19 * H, 8, Vec::new())];
        let result = fx.run(&w, &plans, &ctx, &[]);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn disabled_returns_plans_unchanged() {
        let mut fx = six_and_eight();
        fx.config.enabled = false;
        let w = window(19 * H + 45 * M, 6);
        let plans = fx.plans(6);
        let ctx = vec![future(20 * H, 8, Vec::new())];
        let result = fx.run(&w, &plans, &ctx, &[]);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.updated_plans, plans.plans);
    }

    #[test]
    fn evaluation_is_deterministic() {
        let fx = six_and_eight();
        let w = window(19 * H + 45 * M, 6);
        let plans = fx.plans(6);
        let ctx = vec![
            future(20 * H, 8, Vec::new()),
            future(20 * H + 15 * M, 6, Vec::new()),
        ];
        let a = fx.run(&w, &plans, &ctx, &[]);
        let b = fx.run(&w, &plans, &ctx, &[]);
        assert_eq!(a, b);
    }
}
