use std::net::SocketAddr;

// ── Allocation (request-driven) ─────────────────────────────────

/// Counter: quote attempts. Labels: outcome (held, no_plan, conflict, error).
pub const QUOTES_TOTAL: &str = "tablecap_quotes_total";

/// Histogram: plans surviving enumeration per planner call.
pub const PLANS_ENUMERATED: &str = "tablecap_plans_enumerated";

/// Histogram: plan + lookahead latency in seconds.
pub const PLAN_DURATION_SECONDS: &str = "tablecap_plan_duration_seconds";

/// Counter: writes refused by a conflict. Labels: stage (hold, confirm, assign).
pub const HOLD_CONFLICTS_TOTAL: &str = "tablecap_hold_conflicts_total";

/// Counter: holds placed.
pub const HOLDS_PLACED_TOTAL: &str = "tablecap_holds_placed_total";

/// Counter: holds released because their TTL lapsed.
pub const HOLDS_EXPIRED_TOTAL: &str = "tablecap_holds_expired_total";

/// Counter: assignment groups written. Labels: source (hold, manual).
pub const ASSIGNMENTS_TOTAL: &str = "tablecap_assignments_total";

// ── Storage ─────────────────────────────────────────────────────

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "tablecap_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "tablecap_wal_flush_batch_size";

/// Install the Prometheus exporter on `port`. No-op if port is None.
/// A failed install is logged; allocation keeps working without metrics.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus exporter: {e}"),
    }
}

/// Label for [`QUOTES_TOTAL`] from a quote's result.
pub fn quote_outcome(held: bool, conflict: bool) -> &'static str {
    match (held, conflict) {
        (true, _) => "held",
        (false, true) => "conflict",
        (false, false) => "no_plan",
    }
}
