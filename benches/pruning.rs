use std::collections::HashSet;
use std::time::{Duration, Instant};

use ulid::Ulid;

use tablecap::availability::AvailabilityIndex;
use tablecap::limits::MAX_EVALUATION_LIMIT;
use tablecap::model::{Assignment, Mobility, SeatingType, Span, Table, TableCategory, TableStatus};
use tablecap::planner::{AdjacencyGraph, PlanFilters, PlannerOptions, PlansResult, ScoringWeights, build_scored_table_plans};

const MINUTE: i64 = 60_000;
const SERVICE_START: i64 = 1_781_290_800_000; // 2026-06-12T19:00:00Z
const ROUNDS: usize = 200;
const TARGET_REDUCTION: f64 = 0.25;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        latencies.last().copied().unwrap_or_default().as_secs_f64() * 1000.0,
    );
}

fn table(number: String, capacity: u32, mobility: Mobility, zone: Ulid) -> Table {
    Table {
        id: Ulid::new(),
        table_number: number,
        capacity,
        min_party_size: 1,
        max_party_size: None,
        section: None,
        category: TableCategory::Standard,
        seating_type: SeatingType::Indoor,
        mobility,
        zone_id: zone,
        status: TableStatus::Available,
        active: true,
        position: None,
    }
}

/// A 4x6 grid of movable 4-tops with orthogonal neighbours adjacent, plus a
/// row of fixed 2-tops along the bar.
fn floor() -> (Vec<Table>, AdjacencyGraph) {
    const ROWS: usize = 4;
    const COLS: usize = 6;
    let zone = Ulid::new();
    let mut tables = Vec::new();
    let mut graph = AdjacencyGraph::new();
    for r in 0..ROWS {
        for c in 0..COLS {
            tables.push(table(format!("{}{}", (b'A' + r as u8) as char, c + 1), 4, Mobility::Movable, zone));
            let idx = r * COLS + c;
            if c > 0 {
                graph.connect(tables[idx - 1].id, tables[idx].id);
            }
            if r > 0 {
                graph.connect(tables[idx - COLS].id, tables[idx].id);
            }
        }
    }
    for n in 1..=6 {
        tables.push(table(format!("B{n}"), 2, Mobility::Fixed, zone));
    }
    (tables, graph)
}

/// An earlier sitting on every other grid table and the whole front row,
/// all overlapping the 19:30 request.
fn earlier_sittings(tables: &[Table]) -> Vec<Assignment> {
    tables
        .iter()
        .enumerate()
        .filter(|(i, t)| t.capacity == 4 && (i % 2 == 0 || *i < 6))
        .map(|(_, t)| Assignment {
            id: Ulid::new(),
            group_id: Ulid::new(),
            booking_id: Ulid::new(),
            table_id: t.id,
            start_at: SERVICE_START,
            end_at: SERVICE_START + 120 * MINUTE,
            assigned_by: None,
            idempotency_key: None,
            created_at: SERVICE_START - 60 * MINUTE,
        })
        .collect()
}

fn run(
    label: &str,
    tables: &[Table],
    graph: &AdjacencyGraph,
    options: &PlannerOptions,
    filters: &PlanFilters,
) -> PlansResult {
    let weights = ScoringWeights::default();
    let mut latencies = Vec::with_capacity(ROUNDS);
    let mut result = PlansResult::default();
    for _ in 0..ROUNDS {
        let start = Instant::now();
        result = build_scored_table_plans(tables, 10, graph, &weights, options, filters);
        latencies.push(start.elapsed());
    }
    print_latency(label, &mut latencies);
    let d = &result.diagnostics;
    println!(
        "    plans={}, combinations={}, evaluations={}, limit_hit={}",
        result.plans.len(),
        d.combinations_enumerated,
        d.evaluations,
        d.limit_hit
    );
    result
}

fn main() {
    let (tables, graph) = floor();
    let assignments = earlier_sittings(&tables);
    let block = Span::new(SERVICE_START + 30 * MINUTE, SERVICE_START + 195 * MINUTE);
    let index = AvailabilityIndex::build(&assignments, &[], SERVICE_START, None);
    let busy: HashSet<Ulid> = index.busy_tables(&tables, &block);

    let options = PlannerOptions {
        evaluation_limit: MAX_EVALUATION_LIMIT,
        ..PlannerOptions::default()
    };

    println!("=== Plan pruning: party of 10, {} tables, {} busy ===\n", tables.len(), busy.len());
    let unpruned = run("no time pruning", &tables, &graph, &options, &PlanFilters::default());
    let pruned = run(
        "busy tables pruned",
        &tables,
        &graph,
        &options,
        &PlanFilters {
            busy_tables: busy,
            ..PlanFilters::default()
        },
    );

    let before = unpruned.diagnostics.combinations_enumerated.max(1) as f64;
    let after = pruned.diagnostics.combinations_enumerated as f64;
    let reduction = 1.0 - after / before;
    println!("\n  enumerated combinations reduced by {:.1}%", reduction * 100.0);

    if reduction < TARGET_REDUCTION {
        eprintln!(
            "pruning below target: {:.1}% < {:.0}%",
            reduction * 100.0,
            TARGET_REDUCTION * 100.0
        );
        std::process::exit(1);
    }
}
