//! Theoretical covers per service from turn times.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::model::Table;
use crate::policy::{ServiceType, VenuePolicy};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRotation {
    pub table_id: Ulid,
    pub capacity: u32,
    pub rotations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacitySummary {
    pub service: ServiceType,
    pub service_minutes: u32,
    pub total_covers: u64,
    pub tables: Vec<TableRotation>,
}

/// How many times each assignable table turns over during `service`, using
/// the same duration bands as the planner with the table's capacity as the
/// party size.
pub fn calculate_capacity_for_tables(
    service: ServiceType,
    tables: &[Table],
    policy: &VenuePolicy,
) -> CapacitySummary {
    let service_minutes = policy.service_minutes(service);
    let rows: Vec<TableRotation> = tables
        .iter()
        .filter(|t| t.is_assignable())
        .map(|t| {
            let turn = policy.duration_minutes(service, t.capacity);
            TableRotation {
                table_id: t.id,
                capacity: t.capacity,
                rotations: service_minutes.checked_div(turn).unwrap_or(0),
            }
        })
        .collect();
    let total_covers = rows
        .iter()
        .map(|r| r.capacity as u64 * r.rotations as u64)
        .sum();
    CapacitySummary {
        service,
        service_minutes,
        total_covers,
        tables: rows,
    }
}
