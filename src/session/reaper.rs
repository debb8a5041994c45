// src/session/reaper.rs — Background expiry sweep
//
// Lazy expiry on access handles correctness; this only bounds memory for
// sessions nobody touches again.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::store::SessionStore;
use crate::infra::config::SessionPolicy;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReapReport {
    /// Active sessions this pass moved to Expired.
    pub expired: usize,
    /// Terminal sessions moved from the live map to tombstones.
    pub retired: usize,
    pub tombstones_pruned: usize,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.expired == 0 && self.retired == 0 && self.tombstones_pruned == 0
    }
}

/// One pass over the store. Busy sessions are skipped even when stale;
/// they are picked up on a later pass once their job releases them.
pub fn sweep_once(store: &SessionStore, policy: &SessionPolicy, now: DateTime<Utc>) -> ReapReport {
    let mut report = ReapReport::default();
    for session in store.snapshot() {
        if session.expire_if_stale(now, policy) {
            report.expired += 1;
        }
        if session.status().is_terminal() && store.retire(&session) {
            report.retired += 1;
        }
    }
    report.tombstones_pruned = store.prune_tombstones(now, policy.tombstone_ttl);

    if report.is_empty() {
        tracing::trace!(live = store.len(), "reaper pass: nothing to do");
    } else {
        tracing::info!(
            expired = report.expired,
            retired = report.retired,
            tombstones_pruned = report.tombstones_pruned,
            live = store.len(),
            "reaper pass"
        );
    }
    report
}

/// Handle to the running reaper task.
pub struct Reaper {
    shutdown_tx: Option<broadcast::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl Reaper {
    /// Spawn the periodic sweep on the current runtime.
    pub fn start(store: Arc<SessionStore>, policy: SessionPolicy) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(policy.reap_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Consume the immediate first tick
            interval.tick().await;
            tracing::info!(interval_secs = policy.reap_interval.as_secs(), "reaper started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        sweep_once(&store, &policy, Utc::now());
                    }
                    _ = shutdown_rx.recv() => {
                        tracing::info!("reaper stopping");
                        break;
                    }
                }
            }
        });
        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Signal the loop to stop and wait for it.
    pub async fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!("reaper task ended abnormally: {e}");
            }
        }
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tests::{image_data, policy, tabular_data};
    use crate::session::{InvalidationReason, SessionStatus};
    use chrono::TimeDelta;
    use std::time::Duration;

    #[test]
    fn test_sweep_expires_and_retires_stale_sessions() {
        let store = SessionStore::new();
        let stale = store.create(tabular_data(), vec![]).unwrap();
        let p = policy(60, 3600);

        let later = Utc::now() + TimeDelta::seconds(120);
        // Touch one so it stays fresh relative to `later`.
        let fresh = store.create(image_data(), vec![]).unwrap();
        fresh.check_access(later - TimeDelta::seconds(1), &p).unwrap();

        let report = sweep_once(&store, &p, later);
        assert_eq!(report.expired, 1);
        assert_eq!(report.retired, 1);
        assert_eq!(stale.status(), SessionStatus::Expired);
        assert_eq!(store.len(), 1);
        assert!(store.get(&fresh.id()).is_ok());
        assert!(matches!(
            store.get(&stale.id()),
            Err(crate::infra::errors::SessionError::Expired(_))
        ));
    }

    #[test]
    fn test_sweep_skips_busy_sessions() {
        let store = SessionStore::new();
        let s = store.create(image_data(), vec![]).unwrap();
        s.begin_job().unwrap();
        let p = policy(60, 3600);
        let later = Utc::now() + TimeDelta::seconds(120);

        let report = sweep_once(&store, &p, later);
        assert!(report.is_empty());
        assert_eq!(s.status(), SessionStatus::Busy);

        s.end_job();
        let report = sweep_once(&store, &p, later);
        assert_eq!(report.expired, 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_retires_invalidated_sessions() {
        let store = SessionStore::new();
        let s = store.create(tabular_data(), vec![]).unwrap();
        s.invalidate(InvalidationReason::RetryBudget { failures: 3 });
        let report = sweep_once(&store, &SessionPolicy::default(), Utc::now());
        assert_eq!(report.expired, 0);
        assert_eq!(report.retired, 1);
        assert_eq!(store.tombstone_count(), 1);
    }

    #[test]
    fn test_sweep_prunes_old_tombstones() {
        let store = SessionStore::new();
        let s = store.create(tabular_data(), vec![]).unwrap();
        s.invalidate(InvalidationReason::Cleanup);
        let p = SessionPolicy {
            tombstone_ttl: Duration::from_secs(10),
            ..SessionPolicy::default()
        };
        sweep_once(&store, &p, Utc::now());
        let report = sweep_once(&store, &p, Utc::now() + TimeDelta::seconds(11));
        assert_eq!(report.tombstones_pruned, 1);
        assert!(!store.knows(&s.id()));
    }

    #[tokio::test]
    async fn test_background_reaper_runs_and_stops() {
        let store = Arc::new(SessionStore::new());
        let s = store.create(image_data(), vec![]).unwrap();
        s.invalidate(InvalidationReason::Cleanup);

        let p = SessionPolicy {
            reap_interval: Duration::from_millis(20),
            ..SessionPolicy::default()
        };
        let reaper = Reaper::start(Arc::clone(&store), p);
        tokio::time::sleep(Duration::from_millis(100)).await;
        reaper.stop().await;

        assert!(store.is_empty());
        assert_eq!(store.tombstone_count(), 1);
    }
}
