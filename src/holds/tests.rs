use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use super::*;
use crate::clock::ManualClock;
use crate::inventory::{AllocatorSettings, StaticInventory, TableCatalogCache, Venue};
use crate::ledger::Ledger;
use crate::notify::NotifyHub;
use crate::policy::{ServiceType, VenuePolicy};

/// 2026-06-12T12:00:00Z
const NOW: Ms = 1_781_265_600_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("tablecap_test_holds");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 6, 12).unwrap()
}

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
        mobility: Mobility::Movable,
        zone_id: zone,
        status: TableStatus::Available,
        active: true,
        position: None,
    }
}

struct Fixture {
    manager: HoldManager,
    inventory: Arc<StaticInventory>,
    clock: Arc<ManualClock>,
    restaurant_id: Ulid,
    t6: Ulid,
    t8: Ulid,
}

impl Fixture {
    /// One 6-top and one premium 8-top, not mergeable.
    async fn new(name: &str) -> Self {
        let restaurant_id = Ulid::new();
        let zone = Ulid::new();
        let t6 = table("6", 6, TableCategory::Standard, zone);
        let t8 = table("8", 8, TableCategory::Premium, zone);
        let (t6_id, t8_id) = (t6.id, t8.id);

        let inventory = Arc::new(StaticInventory::new());
        inventory
            .upsert_venue(Venue {
                restaurant_id,
                policy: VenuePolicy::default(),
                tables: vec![t6, t8],
                adjacency: Default::default(),
                settings: AllocatorSettings::default(),
            })
            .await
            .unwrap();

        let clock = Arc::new(ManualClock::new(NOW));
        let ledger = Arc::new(Ledger::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap());
        let catalog = Arc::new(TableCatalogCache::new(Duration::from_secs(60), clock.clone()));
        let manager = HoldManager::new(
            ledger,
            inventory.clone(),
            catalog,
            clock.clone(),
            ManagerConfig::default(),
        );
        Self {
            manager,
            inventory,
            clock,
            restaurant_id,
            t6: t6_id,
            t8: t8_id,
        }
    }

    async fn booking(&self, h: u32, m: u32, party_size: u32, status: BookingStatus) -> Ulid {
        let id = Ulid::new();
        self.inventory
            .upsert_booking(BookingDetails {
                id,
                restaurant_id: self.restaurant_id,
                date: date(),
                start_time: NaiveTime::from_hms_opt(h, m, 0).unwrap(),
                party_size,
                service: ServiceType::Dinner,
                status,
                seating_preference: None,
            })
            .await;
        id
    }
}

#[tokio::test]
async fn future_booking_steers_party_away_from_scarce_table() {
    let f = Fixture::new("e2e.wal").await;
    let booking = f.booking(19, 45, 6, BookingStatus::Pending).await;
    let future = f.booking(20, 0, 8, BookingStatus::Confirmed).await;

    let quote = f.manager.quote_tables_for_booking(QuoteRequest::new(booking)).await.unwrap();

    let candidate = quote.candidate.unwrap();
    assert_eq!(candidate.table_ids, vec![f.t6]);
    assert_eq!(candidate.score.future_conflict_penalty, 0.0);

    let t8_plan = quote.alternates.iter().find(|p| p.table_ids == vec![f.t8]).unwrap();
    assert!(t8_plan.score.future_conflict_penalty > 0.0);
    assert!(
        quote
            .lookahead_conflicts
            .iter()
            .any(|c| c.booking_id == future && c.table_ids.contains(&f.t8))
    );

    let hold = quote.hold.unwrap();
    assert_eq!(hold.booking_id, booking);
    assert_eq!(hold.expires_at, NOW + 120_000);
    assert!(quote.reason.is_none());
    assert!(quote.next_times.is_empty());
}

#[tokio::test]
async fn quote_then_confirm_is_idempotent() {
    let f = Fixture::new("quote_confirm.wal").await;
    let booking = f.booking(19, 0, 4, BookingStatus::Pending).await;
    let hold = f
        .manager
        .quote_tables_for_booking(QuoteRequest::new(booking))
        .await
        .unwrap()
        .hold
        .unwrap();

    let req = ConfirmRequest {
        hold_id: hold.id,
        booking_id: booking,
        idempotency_key: Some("confirm-1".into()),
        assigned_by: Some("host".into()),
    };
    let first = f.manager.confirm_hold_assignment(req.clone()).await.unwrap();
    let second = f.manager.confirm_hold_assignment(req).await.unwrap();
    assert_eq!(first, second);

    let rows = f.manager.get_booking_table_assignments(booking);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].table_id, f.t6);
    assert_eq!(rows[0].group_id, first);
    assert_eq!(rows[0].assigned_by.as_deref(), Some("host"));
}

#[tokio::test]
async fn held_table_is_skipped_by_next_quote() {
    let f = Fixture::new("held_skip.wal").await;
    let first = f.booking(19, 0, 6, BookingStatus::Pending).await;
    let second = f.booking(19, 30, 6, BookingStatus::Pending).await;

    let a = f.manager.quote_tables_for_booking(QuoteRequest::new(first)).await.unwrap();
    let b = f.manager.quote_tables_for_booking(QuoteRequest::new(second)).await.unwrap();
    assert_eq!(a.candidate.unwrap().table_ids, vec![f.t6]);
    assert_eq!(b.candidate.unwrap().table_ids, vec![f.t8]);
    assert!(b.diagnostics.skipped.time_conflict >= 1);

    // Once the first hold lapses its table is free again.
    f.clock.advance(120_000);
    let third = f.booking(19, 15, 6, BookingStatus::Pending).await;
    let c = f.manager.quote_tables_for_booking(QuoteRequest::new(third)).await.unwrap();
    assert_eq!(c.candidate.unwrap().table_ids, vec![f.t6]);
}

#[tokio::test]
async fn concurrent_quotes_never_share_tables() {
    let f = Fixture::new("concurrent_quotes.wal").await;
    let a = f.booking(19, 0, 6, BookingStatus::Pending).await;
    let b = f.booking(19, 0, 6, BookingStatus::Pending).await;

    let (qa, qb) = tokio::join!(
        f.manager.quote_tables_for_booking(QuoteRequest::new(a)),
        f.manager.quote_tables_for_booking(QuoteRequest::new(b)),
    );
    let ha = qa.unwrap().hold.unwrap();
    let hb = qb.unwrap().hold.unwrap();
    assert!(ha.table_ids.is_disjoint(&hb.table_ids));
    assert_eq!(f.manager.ledger().hold_count(), 2);
}

#[tokio::test]
async fn requote_supersedes_previous_hold() {
    let f = Fixture::new("supersede.wal").await;
    let booking = f.booking(19, 0, 4, BookingStatus::Pending).await;
    let first = f
        .manager
        .quote_tables_for_booking(QuoteRequest::new(booking))
        .await
        .unwrap()
        .hold
        .unwrap();
    let second = f
        .manager
        .quote_tables_for_booking(QuoteRequest::new(booking))
        .await
        .unwrap()
        .hold
        .unwrap();

    assert_ne!(first.id, second.id);
    // The booking's own hold does not push it off its table.
    assert_eq!(first.table_ids, second.table_ids);
    let live = f.manager.ledger().holds_for_booking(&booking, NOW);
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].id, second.id);
}

#[tokio::test]
async fn oversized_party_gets_reason_not_error() {
    let f = Fixture::new("no_fit.wal").await;
    let booking = f.booking(19, 0, 20, BookingStatus::Pending).await;
    let quote = f.manager.quote_tables_for_booking(QuoteRequest::new(booking)).await.unwrap();

    assert!(quote.hold.is_none());
    assert!(quote.candidate.is_none());
    assert!(quote.alternates.is_empty());
    assert!(quote.next_times.is_empty());
    assert!(quote.reason.unwrap().starts_with("No suitable tables available"));
    assert_eq!(f.manager.ledger().hold_count(), 0);
}

#[tokio::test]
async fn full_house_suggests_later_times() {
    let f = Fixture::new("next_times.wal").await;
    // 18:00 seatings: the 6-top is blocked until 20:15, the 8-top until 20:45.
    let early6 = f.booking(18, 0, 6, BookingStatus::Confirmed).await;
    let early8 = f.booking(18, 0, 8, BookingStatus::Confirmed).await;
    f.manager
        .assign_table_to_booking(early6, &[f.t6], Some("host"), AssignOptions::default())
        .await
        .unwrap();
    f.manager
        .assign_table_to_booking(early8, &[f.t8], Some("host"), AssignOptions::default())
        .await
        .unwrap();

    let booking = f.booking(19, 0, 6, BookingStatus::Pending).await;
    let quote = f.manager.quote_tables_for_booking(QuoteRequest::new(booking)).await.unwrap();

    assert!(quote.hold.is_none());
    assert_eq!(
        quote.reason.as_deref(),
        Some("No suitable tables available (time_conflict)")
    );
    assert_eq!(quote.next_times, vec!["20:15".to_string(), "20:30".to_string()]);
}

#[tokio::test]
async fn avoid_and_zone_filters_apply() {
    let f = Fixture::new("filters.wal").await;
    let booking = f.booking(19, 0, 6, BookingStatus::Pending).await;

    let mut req = QuoteRequest::new(booking);
    req.avoid_tables = vec![f.t6];
    let quote = f.manager.quote_tables_for_booking(req).await.unwrap();
    assert_eq!(quote.candidate.unwrap().table_ids, vec![f.t8]);

    let other = f.booking(21, 0, 6, BookingStatus::Pending).await;
    let mut req = QuoteRequest::new(other);
    req.zone_id = Some(Ulid::new());
    let quote = f.manager.quote_tables_for_booking(req).await.unwrap();
    assert!(quote.hold.is_none());
    assert_eq!(
        quote.reason.as_deref(),
        Some("No suitable tables available (zone_filter)")
    );
}

#[tokio::test]
async fn strict_create_hold_conflict_leaves_one_row() {
    let f = Fixture::new("strict_create.wal").await;
    let a = f.booking(18, 0, 4, BookingStatus::Pending).await;
    let b = f.booking(18, 0, 4, BookingStatus::Pending).await;

    let first = f
        .manager
        .create_hold(CreateHoldRequest {
            booking_id: a,
            table_ids: vec![f.t6],
            hold_ttl_seconds: None,
            created_by: None,
        })
        .await
        .unwrap();
    let err = f
        .manager
        .create_hold(CreateHoldRequest {
            booking_id: b,
            table_ids: vec![f.t6],
            hold_ttl_seconds: None,
            created_by: None,
        })
        .await
        .unwrap_err();

    match err {
        AllocationError::HoldConflict { hold_id, .. } => assert_eq!(hold_id, Some(first.id)),
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(err_is_retryable_conflict(&f, b).await);
    assert_eq!(f.manager.ledger().hold_count(), 1);
}

async fn err_is_retryable_conflict(f: &Fixture, booking: Ulid) -> bool {
    f.manager
        .create_hold(CreateHoldRequest {
            booking_id: booking,
            table_ids: vec![f.t6],
            hold_ttl_seconds: None,
            created_by: None,
        })
        .await
        .is_err_and(|e| e.is_retryable())
}

#[tokio::test]
async fn create_hold_validates_tables() {
    let f = Fixture::new("create_validate.wal").await;
    let booking = f.booking(19, 0, 8, BookingStatus::Pending).await;

    let too_small = f
        .manager
        .create_hold(CreateHoldRequest {
            booking_id: booking,
            table_ids: vec![f.t6],
            hold_ttl_seconds: None,
            created_by: None,
        })
        .await;
    assert!(matches!(too_small, Err(AllocationError::Input(_))));

    let unknown = f
        .manager
        .create_hold(CreateHoldRequest {
            booking_id: booking,
            table_ids: vec![Ulid::new()],
            hold_ttl_seconds: None,
            created_by: None,
        })
        .await;
    assert!(matches!(unknown, Err(AllocationError::NotFound(_))));

    let hold = f
        .manager
        .create_hold(CreateHoldRequest {
            booking_id: booking,
            table_ids: vec![f.t8, f.t8],
            hold_ttl_seconds: Some(5),
            created_by: Some("manager".into()),
        })
        .await
        .unwrap();
    assert_eq!(hold.table_ids.len(), 1);
    // Clamped up to the minimum TTL.
    assert_eq!(hold.expires_at, NOW + 30_000);
}

#[tokio::test]
async fn confirm_after_ttl_is_expired() {
    let f = Fixture::new("confirm_expired.wal").await;
    let booking = f.booking(19, 0, 4, BookingStatus::Pending).await;
    let hold = f
        .manager
        .quote_tables_for_booking(QuoteRequest::new(booking))
        .await
        .unwrap()
        .hold
        .unwrap();

    f.clock.advance(121_000);
    let err = f
        .manager
        .confirm_hold_assignment(ConfirmRequest {
            hold_id: hold.id,
            booking_id: booking,
            idempotency_key: Some("late".into()),
            assigned_by: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::HoldExpired { .. }));
    assert!(err.is_retryable());
    assert!(f.manager.get_booking_table_assignments(booking).is_empty());
}

#[tokio::test]
async fn released_hold_cannot_be_confirmed() {
    let f = Fixture::new("release.wal").await;
    let booking = f.booking(19, 0, 4, BookingStatus::Pending).await;
    let hold = f
        .manager
        .quote_tables_for_booking(QuoteRequest::new(booking))
        .await
        .unwrap()
        .hold
        .unwrap();

    f.manager.release_hold(hold.id).await.unwrap();
    let result = f
        .manager
        .confirm_hold_assignment(ConfirmRequest {
            hold_id: hold.id,
            booking_id: booking,
            idempotency_key: None,
            assigned_by: None,
        })
        .await;
    assert!(matches!(result, Err(AllocationError::NotFound(_))));
}

#[tokio::test]
async fn manual_assignment_and_unassign() {
    let f = Fixture::new("manual.wal").await;
    let booking = f.booking(19, 0, 12, BookingStatus::Confirmed).await;

    // Not adjacent, so refused when adjacency is required.
    let refused = f
        .manager
        .assign_table_to_booking(
            booking,
            &[f.t6, f.t8],
            Some("manager"),
            AssignOptions {
                idempotency_key: None,
                require_adjacency: true,
            },
        )
        .await;
    assert!(matches!(refused, Err(AllocationError::Input(_))));

    let options = AssignOptions {
        idempotency_key: Some("walk-in-12".into()),
        require_adjacency: false,
    };
    let group = f
        .manager
        .assign_table_to_booking(booking, &[f.t6, f.t8], Some("manager"), options.clone())
        .await
        .unwrap();
    let again = f
        .manager
        .assign_table_to_booking(booking, &[f.t6, f.t8], Some("manager"), options)
        .await
        .unwrap();
    assert_eq!(group, again);
    assert_eq!(f.manager.get_booking_table_assignments(booking).len(), 2);

    let first = f.manager.unassign_table_from_booking(booking, f.t6).await.unwrap();
    assert!(!first.booking_now_unassigned);
    let last = f.manager.unassign_table_from_booking(booking, f.t8).await.unwrap();
    assert!(last.booking_now_unassigned);
}

#[tokio::test]
async fn manual_assignment_respects_confirmed_rows() {
    let f = Fixture::new("manual_conflict.wal").await;
    let a = f.booking(19, 0, 4, BookingStatus::Confirmed).await;
    let b = f.booking(20, 0, 4, BookingStatus::Confirmed).await;
    f.manager
        .assign_table_to_booking(a, &[f.t6], None, AssignOptions::default())
        .await
        .unwrap();
    let err = f
        .manager
        .assign_table_to_booking(b, &[f.t6], None, AssignOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, AllocationError::HoldConflict { .. }));
}

#[tokio::test]
async fn cancelled_and_unknown_bookings_are_rejected() {
    let f = Fixture::new("bad_booking.wal").await;
    let cancelled = f.booking(19, 0, 4, BookingStatus::Cancelled).await;
    assert!(matches!(
        f.manager.quote_tables_for_booking(QuoteRequest::new(cancelled)).await,
        Err(AllocationError::Input(_))
    ));
    assert!(matches!(
        f.manager.quote_tables_for_booking(QuoteRequest::new(Ulid::new())).await,
        Err(AllocationError::NotFound(_))
    ));
    let booking = f.booking(19, 0, 4, BookingStatus::Pending).await;
    let mut req = QuoteRequest::new(booking);
    req.max_tables = Some(0);
    assert!(matches!(
        f.manager.quote_tables_for_booking(req).await,
        Err(AllocationError::Input(_))
    ));
}

#[test]
fn ttl_is_clamped() {
    let config = ManagerConfig::default();
    assert_eq!(config.ttl_seconds(None), 120);
    assert_eq!(config.ttl_seconds(Some(1)), 30);
    assert_eq!(config.ttl_seconds(Some(86_400)), 600);
}
