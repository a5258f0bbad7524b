use std::collections::{BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::AdjacencyGraph;
use crate::model::{AdjacencyStatus, ScoreBreakdown, Table, TableCategory};

/// Weight applied to each penalty term. Venues calibrate these; nothing in
/// the planner assumes particular values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    /// Per wasted seat.
    pub overage: f64,
    /// Per table beyond the first.
    pub table_count: f64,
    /// Per odd-capacity table the plan leaves without a merge partner.
    pub fragmentation: f64,
    /// Multiplies the busy fraction of the plan's zones.
    pub zone_balance: f64,
    /// Per disconnected piece beyond the first.
    pub adjacency_cost: f64,
    /// Multiplies the rarity of oversized tables.
    pub scarcity: f64,
    /// Extra rarity multiplier for premium tables.
    pub premium_scarcity_factor: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            overage: 1.0,
            table_count: 5.0,
            fragmentation: 2.0,
            zone_balance: 1.5,
            adjacency_cost: 3.0,
            scarcity: 4.0,
            premium_scarcity_factor: 1.5,
        }
    }
}

/// Inventory-wide facts the per-plan score depends on.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    /// Capacities of every assignable table, for rarity lookups.
    capacities: Vec<u32>,
    zone_load: HashMap<Ulid, f64>,
    /// Adjacent assignable tables per assignable table.
    partners: HashMap<Ulid, Vec<Ulid>>,
    odd: HashSet<Ulid>,
}

impl ScoringContext {
    pub fn new(inventory: &[Table], adjacency: &AdjacencyGraph, zone_load: HashMap<Ulid, f64>) -> Self {
        let assignable: Vec<&Table> = inventory.iter().filter(|t| t.is_assignable()).collect();
        let ids: HashSet<Ulid> = assignable.iter().map(|t| t.id).collect();
        let mut capacities: Vec<u32> = assignable.iter().map(|t| t.capacity).collect();
        capacities.sort_unstable();
        let partners = assignable
            .iter()
            .map(|t| {
                let near: Vec<Ulid> = adjacency.neighbors(&t.id).filter(|n| ids.contains(n)).copied().collect();
                (t.id, near)
            })
            .collect();
        let odd = assignable
            .iter()
            .filter(|t| t.capacity % 2 == 1)
            .map(|t| t.id)
            .collect();
        Self {
            capacities,
            zone_load,
            partners,
            odd,
        }
    }

    /// Odd-capacity tables outside the plan whose every merge partner the
    /// plan takes. Tables that never had a partner are not counted.
    fn stranded_odd_tables(&self, tables: &[&Table]) -> usize {
        let taken: HashSet<Ulid> = tables.iter().map(|t| t.id).collect();
        let mut stranded = BTreeSet::new();
        for table in tables {
            for near in self.partners.get(&table.id).into_iter().flatten() {
                if taken.contains(near) || !self.odd.contains(near) {
                    continue;
                }
                if self
                    .partners
                    .get(near)
                    .is_some_and(|ps| ps.iter().all(|p| taken.contains(p)))
                {
                    stranded.insert(*near);
                }
            }
        }
        stranded.len()
    }

    /// Tables in the whole inventory at least this large.
    fn count_at_least(&self, capacity: u32) -> usize {
        let idx = self.capacities.partition_point(|c| *c < capacity);
        self.capacities.len() - idx
    }

    fn rarity(&self, table: &Table, weights: &ScoringWeights) -> f64 {
        let count = self.count_at_least(table.capacity).max(1) as f64;
        let factor = match table.category {
            TableCategory::Premium => weights.premium_scarcity_factor,
            TableCategory::Standard => 1.0,
        };
        factor / count
    }
}

pub fn score_plan(
    tables: &[&Table],
    party_size: u32,
    components: usize,
    adjacency_status: AdjacencyStatus,
    ctx: &ScoringContext,
    weights: &ScoringWeights,
) -> ScoreBreakdown {
    let total_capacity: u32 = tables.iter().map(|t| t.capacity).sum();
    let slack = total_capacity.saturating_sub(party_size);

    let fragmentation = ctx.stranded_odd_tables(tables) as f64;

    let zone_balance = if tables.is_empty() {
        0.0
    } else {
        tables
            .iter()
            .map(|t| ctx.zone_load.get(&t.zone_id).copied().unwrap_or(0.0))
            .sum::<f64>()
            / tables.len() as f64
    };

    let adjacency_cost = match adjacency_status {
        AdjacencyStatus::NonAdjacent => components.saturating_sub(1).max(1) as f64,
        AdjacencyStatus::Single | AdjacencyStatus::Adjacent => 0.0,
    };

    // Only tables bigger than the party could have been spared for a
    // larger group.
    let scarcity: f64 = tables
        .iter()
        .filter(|t| t.capacity > party_size)
        .map(|t| ctx.rarity(t, weights))
        .sum();

    let mut score = ScoreBreakdown {
        overage: weights.overage * slack as f64,
        table_count: weights.table_count * tables.len().saturating_sub(1) as f64,
        fragmentation: weights.fragmentation * fragmentation,
        zone_balance: weights.zone_balance * zone_balance,
        adjacency_cost: weights.adjacency_cost * adjacency_cost,
        scarcity: weights.scarcity * scarcity,
        future_conflict_penalty: 0.0,
        total: 0.0,
    };
    score.recompute_total();
    score
}
