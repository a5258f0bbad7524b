use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::{Event, Ms};

const CHANNEL_CAPACITY: usize = 256;

/// What subscribers of a table hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationEvent {
    /// A ledger write touching the table.
    Ledger(Event),
    /// A strict-conflict check refused a new hold on the table.
    HoldConflictDetected {
        table_id: Ulid,
        requested_by: Ulid,
        conflicting_hold: Option<Ulid>,
        conflicting_booking: Option<Ulid>,
        start_at: Ms,
        end_at: Ms,
    },
}

/// Broadcast hub of allocation events per table.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<AllocationEvent>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to events for a table. Creates the channel if needed.
    pub fn subscribe(&self, table_id: Ulid) -> broadcast::Receiver<AllocationEvent> {
        let sender = self
            .channels
            .entry(table_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, table_id: Ulid, event: &AllocationEvent) {
        if let Some(sender) = self.channels.get(&table_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a table's channel, e.g. when it leaves the inventory.
    pub fn remove(&self, table_id: &Ulid) {
        self.channels.remove(table_id);
    }
}
