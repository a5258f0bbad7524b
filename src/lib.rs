//! Table-capacity allocation for restaurant bookings: plan which tables a
//! party gets, hold them briefly, and commit assignments without ever
//! double-booking a table.

pub mod availability;
pub mod bitset;
pub mod capacity;
pub mod clock;
pub mod config;
pub mod error;
pub mod holds;
pub mod inventory;
pub mod ledger;
pub mod limits;
pub mod lookahead;
pub mod model;
pub mod notify;
pub mod observability;
pub mod planner;
pub mod policy;
pub mod reaper;
pub mod time;
pub mod wal;
