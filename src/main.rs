use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use tablecap::capacity::calculate_capacity_for_tables;
use tablecap::clock::{Clock, SystemClock};
use tablecap::config::EngineConfig;
use tablecap::holds::{AssignOptions, ConfirmRequest, HoldManager, QuoteRequest};
use tablecap::inventory::{InventorySource, StaticInventory, TableCatalogCache, VenueSnapshot};
use tablecap::ledger::Ledger;
use tablecap::notify::NotifyHub;
use tablecap::policy::ServiceType;
use tablecap::reaper;

/// Replay allocator decisions against a venue file and the local ledger.
#[derive(Debug, Parser)]
#[command(name = "tablecap", version, about)]
struct Cli {
    /// Directory holding the ledger WAL. Defaults to TABLECAP_DATA_DIR or ./data.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Venue snapshot (tables, adjacency, policy, bookings) as JSON.
    #[arg(long, env = "TABLECAP_VENUE")]
    venue: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Plan tables for a booking and hold the best fit.
    Quote {
        #[arg(long)]
        booking: Ulid,
        #[arg(long)]
        zone: Option<Ulid>,
        #[arg(long)]
        max_tables: Option<usize>,
        #[arg(long)]
        require_adjacency: Option<bool>,
        /// Tables to leave out; repeatable.
        #[arg(long)]
        avoid: Vec<Ulid>,
        #[arg(long)]
        ttl: Option<u64>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Promote a hold into table assignments.
    Confirm {
        #[arg(long)]
        hold: Ulid,
        #[arg(long)]
        booking: Ulid,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        actor: Option<String>,
    },
    /// Drop a hold before it expires.
    Release {
        #[arg(long)]
        hold: Ulid,
    },
    /// Assign tables directly, bypassing the quote.
    Assign {
        #[arg(long)]
        booking: Ulid,
        #[arg(long = "table", required = true)]
        tables: Vec<Ulid>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        actor: Option<String>,
        #[arg(long)]
        require_adjacency: bool,
    },
    /// Remove one table from a booking.
    Unassign {
        #[arg(long)]
        booking: Ulid,
        #[arg(long)]
        table: Ulid,
    },
    /// List a booking's assignments.
    Assignments {
        #[arg(long)]
        booking: Ulid,
    },
    /// Theoretical covers for a service.
    Capacity {
        #[arg(long)]
        service: ServiceType,
    },
    /// Remove expired holds and compact the WAL if it has grown.
    Sweep,
    /// Keep the ledger open, reaping holds and compacting the WAL until Ctrl-C.
    Serve,
}

#[derive(Serialize)]
struct AssignmentId {
    assignment_id: Ulid,
}

fn print_json(value: &impl Serialize) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = EngineConfig::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    tablecap::observability::init(config.metrics_port);

    let snapshot = VenueSnapshot::from_json(&std::fs::read_to_string(&cli.venue)?)?;
    let restaurant_id = snapshot.restaurant_id;
    let inventory = Arc::new(StaticInventory::from_snapshot(snapshot)?);

    std::fs::create_dir_all(&config.data_dir)?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ledger = Arc::new(Ledger::new(config.wal_path(), Arc::new(NotifyHub::new()))?);
    let catalog = Arc::new(TableCatalogCache::new(config.catalog_ttl, clock.clone()));
    let manager = HoldManager::new(ledger.clone(), inventory.clone(), catalog, clock.clone(), config.manager);
    info!(data_dir = %config.data_dir.display(), %restaurant_id, "tablecap ready");

    match cli.command {
        Command::Quote {
            booking,
            zone,
            max_tables,
            require_adjacency,
            avoid,
            ttl,
            actor,
        } => {
            let quote = manager
                .quote_tables_for_booking(QuoteRequest {
                    booking_id: booking,
                    zone_id: zone,
                    max_tables,
                    require_adjacency,
                    avoid_tables: avoid,
                    hold_ttl_seconds: ttl,
                    created_by: actor,
                })
                .await?;
            print_json(&quote)?;
        }
        Command::Confirm {
            hold,
            booking,
            key,
            actor,
        } => {
            let assignment_id = manager
                .confirm_hold_assignment(ConfirmRequest {
                    hold_id: hold,
                    booking_id: booking,
                    idempotency_key: key,
                    assigned_by: actor,
                })
                .await?;
            print_json(&AssignmentId { assignment_id })?;
        }
        Command::Release { hold } => {
            print_json(&manager.release_hold(hold).await?)?;
        }
        Command::Assign {
            booking,
            tables,
            key,
            actor,
            require_adjacency,
        } => {
            let assignment_id = manager
                .assign_table_to_booking(
                    booking,
                    &tables,
                    actor.as_deref(),
                    AssignOptions {
                        idempotency_key: key,
                        require_adjacency,
                    },
                )
                .await?;
            print_json(&AssignmentId { assignment_id })?;
        }
        Command::Unassign { booking, table } => {
            print_json(&manager.unassign_table_from_booking(booking, table).await?)?;
        }
        Command::Assignments { booking } => {
            print_json(&manager.get_booking_table_assignments(booking))?;
        }
        Command::Capacity { service } => {
            let venue = inventory
                .venue(restaurant_id)
                .await?
                .ok_or("venue missing from snapshot")?;
            print_json(&calculate_capacity_for_tables(service, &venue.tables, &venue.policy))?;
        }
        Command::Sweep => {
            let reaped = reaper::reap_once(&ledger, clock.as_ref()).await;
            let appends = ledger.wal_appends_since_compact().await;
            let compacted = appends >= config.compact_threshold;
            if compacted {
                ledger.compact_wal().await?;
            }
            print_json(&serde_json::json!({ "reaped": reaped, "compacted": compacted }))?;
        }
        Command::Serve => {
            let reaper = tokio::spawn(reaper::run_reaper(ledger.clone(), clock.clone(), config.reaper_interval));
            let compactor = tokio::spawn(reaper::run_compactor(
                ledger.clone(),
                config.compact_threshold,
                config.reaper_interval,
            ));
            info!(
                reaper_interval = ?config.reaper_interval,
                compact_threshold = config.compact_threshold,
                "serving until Ctrl-C"
            );
            tokio::signal::ctrl_c().await?;
            reaper.abort();
            compactor.abort();
            info!("shutting down");
        }
    }

    Ok(())
}
