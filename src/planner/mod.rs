//! Table selector and combination planner.
//!
//! Enumerates single-table and merged plans for a party, scores them with
//! configurable weights and returns them best-first together with counters
//! explaining everything that was skipped.

mod adjacency;
mod scoring;

pub use adjacency::AdjacencyGraph;
pub use scoring::{ScoringContext, ScoringWeights, score_plan};

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::{MAX_EVALUATION_LIMIT, MAX_TABLES_PER_PLAN};
use crate::model::{AdjacencyStatus, Mobility, Plan, SeatingType, Table};

/// Venue-level knobs bounding the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerOptions {
    pub enable_combinations: bool,
    /// Max tables per plan.
    pub k_max: usize,
    /// Reject plans wasting more seats than this.
    pub max_overage: Option<u32>,
    /// Merges must form one connected piece in the adjacency graph.
    pub require_adjacency: bool,
    /// Merges must stay inside one zone.
    pub zone_exclusive: bool,
    /// Allow fixed tables in merges.
    pub allow_fixed_merges: bool,
    /// Search nodes visited before enumeration gives up.
    pub evaluation_limit: usize,
    /// Best-scoring merges kept per (table count, total capacity) bucket.
    pub bucket_limit: usize,
}

impl Default for PlannerOptions {
    fn default() -> Self {
        Self {
            enable_combinations: true,
            k_max: 3,
            max_overage: Some(6),
            require_adjacency: true,
            zone_exclusive: true,
            allow_fixed_merges: false,
            evaluation_limit: 5_000,
            bucket_limit: 16,
        }
    }
}

/// Request-scoped restrictions applied before enumeration.
#[derive(Debug, Clone, Default)]
pub struct PlanFilters {
    pub zone_id: Option<Ulid>,
    pub seating: Option<SeatingType>,
    pub avoid_tables: HashSet<Ulid>,
    /// Tables with a confirmed overlapping occupancy for the block interval.
    pub busy_tables: HashSet<Ulid>,
    /// Busy fraction per zone, feeding the zone-balance term.
    pub zone_load: HashMap<Ulid, f64>,
    /// Overrides `k_max` downward.
    pub max_tables: Option<usize>,
    pub require_adjacency: Option<bool>,
}

/// Why tables or combinations were dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkipCounts {
    pub inactive: usize,
    pub zone_filter: usize,
    pub seating: usize,
    pub avoided: usize,
    pub time_conflict: usize,
    pub capacity: usize,
    pub party_bounds: usize,
    pub overage: usize,
    pub adjacency: usize,
    pub kmax: usize,
    pub zone_mismatch: usize,
    pub mobility: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDiagnostics {
    pub tables_considered: usize,
    pub singles_considered: usize,
    pub singles_accepted: usize,
    pub combinations_enumerated: usize,
    pub combinations_accepted: usize,
    pub evaluations: usize,
    pub limit_hit: bool,
    pub skipped: SkipCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlansResult {
    /// Best first.
    pub plans: Vec<Plan>,
    pub diagnostics: PlanDiagnostics,
}

impl PlansResult {
    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    /// Human-readable explanation for an empty result, naming the dominant
    /// skip reason.
    pub fn rejection_reason(&self) -> Option<String> {
        if !self.plans.is_empty() {
            return None;
        }
        let d = &self.diagnostics;
        if d.tables_considered == 0 {
            return Some("No suitable tables available (no tables)".to_string());
        }
        let s = &d.skipped;
        let candidates = [
            (s.time_conflict, "time_conflict"),
            (s.capacity, "capacity"),
            (s.overage, "overage"),
            (s.adjacency, "adjacency"),
            (s.zone_mismatch, "zone_mismatch"),
            (s.kmax, "kmax"),
            (s.party_bounds, "party_bounds"),
            (s.inactive, "inactive"),
            (s.zone_filter, "zone_filter"),
            (s.seating, "seating"),
            (s.avoided, "avoided"),
            (s.mobility, "mobility"),
            (s.limit, "limit"),
        ];
        // Earlier entries win ties.
        let mut reason = "capacity";
        let mut best = 0;
        for (count, name) in candidates {
            if count > best {
                best = count;
                reason = name;
            }
        }
        Some(format!("No suitable tables available ({reason})"))
    }
}

pub fn build_scored_table_plans(
    tables: &[Table],
    party_size: u32,
    adjacency: &AdjacencyGraph,
    weights: &ScoringWeights,
    options: &PlannerOptions,
    filters: &PlanFilters,
) -> PlansResult {
    let mut diag = PlanDiagnostics {
        tables_considered: tables.len(),
        ..Default::default()
    };
    if tables.is_empty() || party_size == 0 {
        return PlansResult {
            plans: Vec::new(),
            diagnostics: diag,
        };
    }

    let ctx = ScoringContext::new(tables, adjacency, filters.zone_load.clone());
    let require_adjacency = filters.require_adjacency.unwrap_or(options.require_adjacency);
    let k_max = options
        .k_max
        .min(filters.max_tables.unwrap_or(usize::MAX))
        .min(MAX_TABLES_PER_PLAN);
    let evaluation_limit = options.evaluation_limit.min(MAX_EVALUATION_LIMIT);

    let eligible = filter_eligible(tables, filters, &mut diag.skipped);
    let mut plans = Vec::new();

    for table in &eligible {
        diag.singles_considered += 1;
        if table.capacity < party_size {
            diag.skipped.capacity += 1;
            continue;
        }
        if !table.seats_party(party_size) {
            diag.skipped.party_bounds += 1;
            continue;
        }
        let slack = table.capacity - party_size;
        if options.max_overage.is_some_and(|max| slack > max) {
            diag.skipped.overage += 1;
            continue;
        }
        diag.singles_accepted += 1;
        plans.push(make_plan(&[table], party_size, 1, AdjacencyStatus::Single, &ctx, weights));
    }

    if options.enable_combinations && k_max >= 2 {
        let pool: Vec<&Table> = eligible
            .iter()
            .copied()
            .filter(|t| {
                if t.mobility == Mobility::Fixed && !options.allow_fixed_merges {
                    diag.skipped.mobility += 1;
                    return false;
                }
                if t.min_party_size > party_size {
                    diag.skipped.party_bounds += 1;
                    return false;
                }
                true
            })
            .collect();
        let search = CombinationSearch {
            pool: sort_pool(pool),
            party_size,
            k_max,
            evaluation_limit,
            require_adjacency,
            zone_exclusive: options.zone_exclusive,
            max_overage: options.max_overage,
            bucket_limit: options.bucket_limit.max(1),
            adjacency,
            ctx: &ctx,
            weights,
            buckets: HashMap::new(),
            diag: &mut diag,
        };
        let merges = search.run();
        diag.combinations_accepted = merges.len();
        plans.extend(merges);
    }

    sort_plans(&mut plans);
    metrics::histogram!(crate::observability::PLANS_ENUMERATED)
        .record((diag.singles_considered + diag.combinations_enumerated) as f64);
    tracing::debug!(
        party_size,
        plans = plans.len(),
        singles = diag.singles_accepted,
        combos = diag.combinations_accepted,
        limit_hit = diag.limit_hit,
        "table plans built"
    );

    PlansResult {
        plans,
        diagnostics: diag,
    }
}

/// Best first: total score, then less waste, fewer tables, table ids.
pub fn sort_plans(plans: &mut [Plan]) {
    plans.sort_by(plan_order);
}

fn plan_order(a: &Plan, b: &Plan) -> Ordering {
    a.score
        .total
        .total_cmp(&b.score.total)
        .then(a.slack.cmp(&b.slack))
        .then(a.table_count.cmp(&b.table_count))
        .then_with(|| a.table_ids.cmp(&b.table_ids))
}

fn filter_eligible<'a>(tables: &'a [Table], filters: &PlanFilters, skipped: &mut SkipCounts) -> Vec<&'a Table> {
    tables
        .iter()
        .filter(|t| {
            if !t.is_assignable() {
                skipped.inactive += 1;
                false
            } else if filters.zone_id.is_some_and(|z| z != t.zone_id) {
                skipped.zone_filter += 1;
                false
            } else if filters.seating.is_some_and(|s| s != t.seating_type) {
                skipped.seating += 1;
                false
            } else if filters.avoid_tables.contains(&t.id) {
                skipped.avoided += 1;
                false
            } else if filters.busy_tables.contains(&t.id) {
                skipped.time_conflict += 1;
                false
            } else {
                true
            }
        })
        .collect()
}

/// Largest tables first, so dropping any table from a merge that first
/// reaches the party size leaves it short.
fn sort_pool(mut pool: Vec<&Table>) -> Vec<&Table> {
    pool.sort_by(|a, b| {
        b.capacity
            .cmp(&a.capacity)
            .then_with(|| a.table_number.cmp(&b.table_number))
            .then(a.id.cmp(&b.id))
    });
    pool
}

fn make_plan(
    tables: &[&Table],
    party_size: u32,
    components: usize,
    status: AdjacencyStatus,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
) -> Plan {
    let total_capacity: u32 = tables.iter().map(|t| t.capacity).sum();
    let first_zone = tables.first().map(|t| t.zone_id);
    let zone_id = first_zone.filter(|z| tables.iter().all(|t| t.zone_id == *z));
    let mut ordered: Vec<&Table> = tables.to_vec();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));
    Plan {
        table_ids: ordered.iter().map(|t| t.id).collect(),
        table_numbers: ordered.iter().map(|t| t.table_number.clone()).collect(),
        total_capacity,
        table_count: tables.len(),
        slack: total_capacity.saturating_sub(party_size),
        adjacency_status: status,
        zone_id,
        score: score_plan(tables, party_size, components, status, ctx, weights),
    }
}

struct CombinationSearch<'a, 'd> {
    pool: Vec<&'a Table>,
    party_size: u32,
    k_max: usize,
    evaluation_limit: usize,
    require_adjacency: bool,
    zone_exclusive: bool,
    max_overage: Option<u32>,
    bucket_limit: usize,
    adjacency: &'a AdjacencyGraph,
    ctx: &'a ScoringContext,
    weights: &'a ScoringWeights,
    /// Kept merges per (table count, total capacity).
    buckets: HashMap<(usize, u32), Vec<Plan>>,
    diag: &'d mut PlanDiagnostics,
}

/// What became of a merge that seats the party.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Kept,
    Rejected,
    /// Seats the party but splits into pieces; a bridging table may join them.
    Disconnected,
}

impl<'a> CombinationSearch<'a, '_> {
    fn run(mut self) -> Vec<Plan> {
        let mut current: Vec<&'a Table> = Vec::with_capacity(self.k_max);
        for first in 0..self.pool.len() {
            if self.diag.limit_hit {
                break;
            }
            // A table that seats the party alone is already a single plan.
            if self.pool[first].capacity >= self.party_size {
                continue;
            }
            current.push(self.pool[first]);
            self.extend(&mut current, first + 1, self.pool[first].capacity);
            current.pop();
        }
        self.buckets.into_values().flatten().collect()
    }

    fn extend(&mut self, current: &mut Vec<&'a Table>, from: usize, capacity: u32) {
        for next in from..self.pool.len() {
            if self.diag.evaluations >= self.evaluation_limit {
                if !self.diag.limit_hit {
                    self.diag.limit_hit = true;
                    self.diag.skipped.limit += 1;
                }
                return;
            }
            self.diag.evaluations += 1;

            let table = self.pool[next];
            if self.zone_exclusive && current.first().is_some_and(|f| f.zone_id != table.zone_id) {
                self.diag.skipped.zone_mismatch += 1;
                continue;
            }

            let total = capacity + table.capacity;
            current.push(table);
            if total >= self.party_size {
                let verdict = self.consider(current, total);
                if verdict == Verdict::Disconnected && current.len() < self.k_max {
                    self.extend(current, next + 1, total);
                }
            } else if current.len() >= self.k_max {
                self.diag.skipped.kmax += 1;
            } else if self.can_still_reach(current.len(), next + 1, total) {
                self.extend(current, next + 1, total);
            } else {
                self.diag.skipped.capacity += 1;
            }
            current.pop();
        }
    }

    /// Upper bound: the pool is sorted largest first, so the next tables
    /// after `from` are the biggest remaining.
    fn can_still_reach(&self, len: usize, from: usize, capacity: u32) -> bool {
        let room = self.k_max.saturating_sub(len);
        let best: u32 = self.pool[from.min(self.pool.len())..]
            .iter()
            .take(room)
            .map(|t| t.capacity)
            .sum();
        capacity + best >= self.party_size
    }

    fn consider(&mut self, current: &[&'a Table], total: u32) -> Verdict {
        self.diag.combinations_enumerated += 1;
        let slack = total - self.party_size;
        if self.max_overage.is_some_and(|max| slack > max) {
            self.diag.skipped.overage += 1;
            return Verdict::Rejected;
        }
        let ids: Vec<Ulid> = current.iter().map(|t| t.id).collect();
        let components = self.adjacency.components(&ids);
        let status = if components <= 1 {
            AdjacencyStatus::Adjacent
        } else {
            AdjacencyStatus::NonAdjacent
        };
        if self.require_adjacency && status == AdjacencyStatus::NonAdjacent {
            self.diag.skipped.adjacency += 1;
            return Verdict::Disconnected;
        }
        // A bridged merge may contain a smaller connected one that seats the
        // party; that one is enumerated on its own.
        if status == AdjacencyStatus::Adjacent && self.has_smaller_cover(current, total) {
            return Verdict::Rejected;
        }
        let plan = make_plan(current, self.party_size, components, status, self.ctx, self.weights);
        self.keep(current.len(), total, plan);
        Verdict::Kept
    }

    /// Some table can be dropped and the rest still seats the party in one
    /// piece.
    fn has_smaller_cover(&self, current: &[&Table], total: u32) -> bool {
        current.iter().any(|dropped| {
            if total - dropped.capacity < self.party_size {
                return false;
            }
            let rest: Vec<Ulid> = current
                .iter()
                .filter(|t| t.id != dropped.id)
                .map(|t| t.id)
                .collect();
            self.adjacency.components(&rest) <= 1
        })
    }

    /// Keep the best `bucket_limit` plans per bucket, evicting the worst.
    fn keep(&mut self, count: usize, total: u32, plan: Plan) {
        let bucket = self.buckets.entry((count, total)).or_default();
        if bucket.len() < self.bucket_limit {
            bucket.push(plan);
            return;
        }
        self.diag.skipped.limit += 1;
        if let Some(worst) = bucket.iter_mut().max_by(|a, b| plan_order(a, b)) {
            if plan_order(&plan, worst) == Ordering::Less {
                *worst = plan;
            }
        }
    }
}
