//! Durable per-table interval ledger.
//!
//! Holds and assignments live in memory, one sorted [`TableLedger`] per
//! table behind its own lock, and every change goes through the WAL first.
//! Writers lock all tables they touch in id order before validating, which
//! stands in for a database range-exclusion constraint.

mod conflict;
mod mutations;
mod queries;

pub use conflict::{ConflictScope, find_conflict, validate_span};
pub use mutations::{AssignTables, ConfirmHold, UnassignOutcome};

use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use ulid::Ulid;

use crate::error::AllocationError;
use crate::model::*;
use crate::notify::{AllocationEvent, NotifyHub};
use crate::wal::Wal;

pub type SharedTableLedger = Arc<RwLock<TableLedger>>;

/// Write guards for every table an operation touches, keyed (and acquired)
/// in id order.
pub(crate) type TableGuards = BTreeMap<Ulid, OwnedRwLockWriteGuard<TableLedger>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(crate) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type Pending = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while one fsync runs are committed
/// together by the next one; compaction and counters run between batches.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut next = rx.recv().await;
    while let Some(cmd) = next.take() {
        let first = match cmd {
            WalCommand::Append { event, response } => (event, response),
            control => {
                run_control(&mut wal, control);
                next = rx.recv().await;
                continue;
            }
        };
        let mut batch: Vec<Pending> = vec![first];
        while let Ok(cmd) = rx.try_recv() {
            match cmd {
                WalCommand::Append { event, response } => batch.push((event, response)),
                control => {
                    next = Some(control);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
        if next.is_none() {
            next = rx.recv().await;
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<Pending>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();
    let appended = batch.iter().try_for_each(|(event, _)| wal.append_buffered(event));
    // Always flush so a half-written batch is not glued onto the next one.
    let flushed = wal.flush_sync();
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    let failure = appended.and(flushed).err();
    for (_, tx) in batch {
        let reply = match &failure {
            None => Ok(()),
            Some(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn run_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
    }
}

pub struct Ledger {
    tables: DashMap<Ulid, SharedTableLedger>,
    pub(crate) holds: DashMap<Ulid, Hold>,
    pub(crate) assignments: DashMap<Ulid, Assignment>,
    /// booking id → assignment ids
    pub(crate) booking_assignments: DashMap<Ulid, Vec<Ulid>>,
    /// idempotency key → (group id, booking id)
    pub(crate) idempotency: DashMap<String, (Ulid, Ulid)>,
    /// confirmed hold id → group id
    pub(crate) confirmed_holds: DashMap<Ulid, Ulid>,
    pub(crate) wal_tx: mpsc::Sender<WalCommand>,
    /// Writers hold it shared from locking until applied; compaction holds
    /// it exclusively, so no append can slip between snapshot and swap.
    write_gate: RwLock<()>,
    pub notify: Arc<NotifyHub>,
}

impl Ledger {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let ledger = Self {
            tables: DashMap::new(),
            holds: DashMap::new(),
            assignments: DashMap::new(),
            booking_assignments: DashMap::new(),
            idempotency: DashMap::new(),
            confirmed_holds: DashMap::new(),
            wal_tx,
            write_gate: RwLock::new(()),
            notify,
        };

        // Sole owner of every lock during replay, so try_write_owned never
        // contends. Blocking acquisition is not an option inside a runtime.
        for event in &events {
            let mut guards = TableGuards::new();
            let touched: BTreeSet<Ulid> = ledger.event_tables(event).into_iter().collect();
            for table_id in touched {
                let guard = ledger
                    .table(table_id)
                    .try_write_owned()
                    .map_err(|e| io::Error::other(format!("replay lock on {table_id}: {e}")))?;
                guards.insert(table_id, guard);
            }
            ledger.apply(&mut guards, event);
        }
        if !events.is_empty() {
            tracing::info!(
                events = events.len(),
                holds = ledger.holds.len(),
                assignments = ledger.assignments.len(),
                "ledger replayed"
            );
        }

        Ok(ledger)
    }

    /// The table's ledger, created empty on first touch.
    pub fn table(&self, table_id: Ulid) -> SharedTableLedger {
        self.tables
            .entry(table_id)
            .or_insert_with(|| Arc::new(RwLock::new(TableLedger::new(table_id))))
            .clone()
    }

    /// Acquire the shared write gate, then write locks for `table_ids` in
    /// sorted order. Keep the gate alive until the event is applied.
    pub(crate) async fn lock_tables(
        &self,
        table_ids: impl IntoIterator<Item = Ulid>,
    ) -> (RwLockReadGuard<'_, ()>, TableGuards) {
        let gate = self.write_gate.read().await;
        let mut sorted: Vec<Ulid> = table_ids.into_iter().collect();
        sorted.sort();
        sorted.dedup();
        let mut guards = TableGuards::new();
        for id in sorted {
            let guard = self.table(id).write_owned().await;
            guards.insert(id, guard);
        }
        (gate, guards)
    }

    /// Tables an event writes to, resolved against current state.
    fn event_tables(&self, event: &Event) -> Vec<Ulid> {
        match event {
            Event::HoldPlaced(hold) => hold.table_ids.iter().copied().collect(),
            Event::HoldReleased { id, .. } => self
                .holds
                .get(id)
                .map(|h| h.table_ids.iter().copied().collect())
                .unwrap_or_default(),
            Event::HoldConfirmed { id, assignments, .. } => {
                let mut ids: Vec<Ulid> = self
                    .holds
                    .get(id)
                    .map(|h| h.table_ids.iter().copied().collect())
                    .unwrap_or_default();
                ids.extend(assignments.iter().map(|a| a.table_id));
                ids
            }
            Event::AssignmentsCreated(rows) => rows.iter().map(|a| a.table_id).collect(),
            Event::AssignmentRemoved { id } => {
                self.assignments.get(id).map(|a| vec![a.table_id]).unwrap_or_default()
            }
        }
    }

    /// Apply an event to in-memory state. The caller holds write guards for
    /// every table in `event_tables(event)`.
    fn apply(&self, guards: &mut TableGuards, event: &Event) {
        match event {
            Event::HoldPlaced(hold) => {
                for table_id in &hold.table_ids {
                    if let Some(tl) = guards.get_mut(table_id) {
                        tl.insert_entry(LedgerEntry {
                            id: hold.id,
                            span: hold.span(),
                            kind: EntryKind::Hold {
                                booking_id: hold.booking_id,
                                expires_at: hold.expires_at,
                            },
                        });
                    }
                }
                self.holds.insert(hold.id, hold.clone());
            }
            Event::HoldReleased { id, .. } => self.remove_hold(guards, id),
            Event::HoldConfirmed {
                id,
                group_id,
                assignments,
            } => {
                self.remove_hold(guards, id);
                for a in assignments {
                    self.insert_assignment(guards, a);
                }
                self.confirmed_holds.insert(*id, *group_id);
            }
            Event::AssignmentsCreated(rows) => {
                for a in rows {
                    self.insert_assignment(guards, a);
                }
            }
            Event::AssignmentRemoved { id } => {
                if let Some((_, a)) = self.assignments.remove(id) {
                    if let Some(tl) = guards.get_mut(&a.table_id) {
                        tl.remove_entry(a.id);
                    }
                    if let Some(mut ids) = self.booking_assignments.get_mut(&a.booking_id) {
                        ids.retain(|x| x != id);
                    }
                    self.booking_assignments.remove_if(&a.booking_id, |_, ids| ids.is_empty());
                }
            }
        }
    }

    fn remove_hold(&self, guards: &mut TableGuards, id: &Ulid) {
        if let Some((_, hold)) = self.holds.remove(id) {
            for table_id in &hold.table_ids {
                if let Some(tl) = guards.get_mut(table_id) {
                    tl.remove_entry(hold.id);
                }
            }
        }
    }

    fn insert_assignment(&self, guards: &mut TableGuards, a: &Assignment) {
        if let Some(tl) = guards.get_mut(&a.table_id) {
            tl.insert_entry(LedgerEntry {
                id: a.id,
                span: a.span(),
                kind: EntryKind::Assignment {
                    booking_id: a.booking_id,
                    group_id: a.group_id,
                },
            });
        }
        self.booking_assignments.entry(a.booking_id).or_default().push(a.id);
        if let Some(key) = &a.idempotency_key {
            self.idempotency.insert(key.clone(), (a.group_id, a.booking_id));
        }
        self.assignments.insert(a.id, a.clone());
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), AllocationError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| AllocationError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| AllocationError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| AllocationError::Wal(e.to_string()))
    }

    /// WAL-append, apply, then notify every touched table.
    pub(crate) async fn persist_and_apply(
        &self,
        guards: &mut TableGuards,
        event: &Event,
    ) -> Result<(), AllocationError> {
        self.wal_append(event).await?;
        let touched: Vec<Ulid> = guards.keys().copied().collect();
        self.apply(guards, event);
        let note = AllocationEvent::Ledger(event.clone());
        for table_id in touched {
            self.notify.send(table_id, &note);
        }
        Ok(())
    }
}
