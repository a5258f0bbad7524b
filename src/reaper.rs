use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::ledger::Ledger;
use crate::model::ReleaseReason;

/// Release every hold that has lapsed by `clock`'s now. Returns how many
/// were removed by this pass.
pub async fn reap_once(ledger: &Ledger, clock: &dyn Clock) -> usize {
    let expired = ledger.collect_expired_holds(clock.now_ms());
    let mut reaped = 0;
    for hold_id in expired {
        match ledger.release_hold(hold_id, ReleaseReason::Expired).await {
            Ok(_) => {
                reaped += 1;
                info!("reaped expired hold {hold_id}");
            }
            // Confirmed or released between the scan and the lock.
            Err(e) => debug!("reaper skip {hold_id}: {e}"),
        }
    }
    reaped
}

/// Background task that periodically removes expired holds. Expired holds
/// already stop blocking on their own; this only keeps the ledger small.
pub async fn run_reaper(ledger: Arc<Ledger>, clock: Arc<dyn Clock>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        reap_once(&ledger, clock.as_ref()).await;
    }
}

/// Background task that rewrites the WAL once `threshold` appends have
/// piled up since the last compaction.
pub async fn run_compactor(ledger: Arc<Ledger>, threshold: u64, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let appends = ledger.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match ledger.compact_wal().await {
            Ok(()) => info!(appends, "WAL compacted"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use std::collections::BTreeSet;
    use std::path::PathBuf;
    use ulid::Ulid;

    const NOW: Ms = 1_781_265_600_000;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("tablecap_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn hold(expires_at: Ms) -> Hold {
        Hold {
            id: Ulid::new(),
            booking_id: Ulid::new(),
            restaurant_id: Ulid::new(),
            zone_id: None,
            table_ids: BTreeSet::from([Ulid::new()]),
            start_at: NOW + 6 * 3_600_000,
            end_at: NOW + 8 * 3_600_000,
            expires_at,
            created_by: None,
            created_at: NOW,
        }
    }

    #[tokio::test]
    async fn reaper_collects_expired_holds() {
        let path = test_wal_path("reaper_collect.wal");
        let ledger = Arc::new(Ledger::new(path, Arc::new(NotifyHub::new())).unwrap());
        let clock = ManualClock::new(NOW);

        let short = hold(NOW + 60_000);
        let long = hold(NOW + 600_000);
        ledger.place_hold(short.clone(), true, NOW).await.unwrap();
        ledger.place_hold(long.clone(), true, NOW).await.unwrap();

        assert_eq!(reap_once(&ledger, &clock).await, 0);

        clock.advance(60_000);
        assert_eq!(reap_once(&ledger, &clock).await, 1);
        assert!(ledger.hold(&short.id).is_none());
        assert!(ledger.hold(&long.id).is_some());

        // Nothing left to do on a second pass.
        assert_eq!(reap_once(&ledger, &clock).await, 0);
    }

    #[tokio::test]
    async fn compactor_rewrites_after_threshold() {
        let path = test_wal_path("compactor.wal");
        let ledger = Arc::new(Ledger::new(path, Arc::new(NotifyHub::new())).unwrap());
        for _ in 0..3 {
            let h = hold(NOW + 60_000);
            ledger.place_hold(h.clone(), true, NOW).await.unwrap();
            ledger.release_hold(h.id, ReleaseReason::Released).await.unwrap();
        }
        assert_eq!(ledger.wal_appends_since_compact().await, 6);

        let task = tokio::spawn(run_compactor(ledger.clone(), 5, Duration::from_millis(10)));
        for _ in 0..100 {
            if ledger.wal_appends_since_compact().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        task.abort();
        assert_eq!(ledger.wal_appends_since_compact().await, 0);
    }
}
