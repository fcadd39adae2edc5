use super::ledger::DeliveryLedger;
use super::processor::{InboxProcessor, Outcome};
use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub applied: usize,
    pub ignored: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Another sweep was already running; nothing was attempted.
    pub busy: bool,
}

impl SweepReport {
    pub fn attempted(&self) -> usize {
        self.applied + self.ignored + self.failed + self.skipped
    }
}

/// Drains the ledger's pending entries oldest-first.
#[derive(Clone)]
pub struct Sweeper {
    processor: InboxProcessor,
    ledger: DeliveryLedger,
    running: Arc<Mutex<()>>,
}

impl Sweeper {
    pub fn new(processor: InboxProcessor, ledger: DeliveryLedger) -> Self {
        Self {
            processor,
            ledger,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// One pass over everything pending. Failed entries stay pending for the
    /// next pass; a store error while listing aborts the pass.
    pub async fn run_once(&self) -> Result<SweepReport> {
        let Ok(_guard) = self.running.try_lock() else {
            tracing::debug!("sweep already in progress");
            return Ok(SweepReport {
                busy: true,
                ..SweepReport::default()
            });
        };

        let mut report = SweepReport::default();
        for entry in self.ledger.pending() {
            let entry = entry?;
            match self.processor.process_entry(&entry).await {
                Ok(Outcome::Applied) => report.applied += 1,
                Ok(Outcome::Ignored) => report.ignored += 1,
                Ok(Outcome::Skipped) => report.skipped += 1,
                Err(_) => report.failed += 1,
            }
        }
        Ok(report)
    }
}

/// Background sweep worker, woken by a fixed interval or by [`SweepHandle::wake`].
#[derive(Clone)]
pub struct SweepHandle {
    wake_tx: mpsc::Sender<()>,
    worker: Arc<JoinHandle<()>>,
}

impl SweepHandle {
    pub fn start(sweeper: Sweeper, interval: Duration) -> Self {
        // One slot: a wake that arrives while one is queued adds nothing.
        let (wake_tx, wake_rx) = mpsc::channel(1);
        let worker = tokio::spawn(run_sweep_loop(sweeper, interval, wake_rx));
        tracing::info!(interval_secs = interval.as_secs(), "sweep worker started");
        Self {
            wake_tx,
            worker: Arc::new(worker),
        }
    }

    pub fn wake(&self) {
        let _ = self.wake_tx.try_send(());
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }
}

async fn run_sweep_loop(sweeper: Sweeper, interval: Duration, mut wake_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            woken = wake_rx.recv() => {
                if woken.is_none() {
                    break;
                }
            }
        }

        match sweeper.run_once().await {
            Ok(report) if report.attempted() > 0 => {
                tracing::info!(
                    applied = report.applied,
                    ignored = report.ignored,
                    failed = report.failed,
                    skipped = report.skipped,
                    "sweep finished"
                );
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = ?err, "sweep aborted"),
        }
    }
    tracing::info!("sweep worker shutting down");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activitypub::actors::ActorDirectory;
    use crate::activitypub::testing::{memory_database, profile_json, StubFetcher, ALICE, ALICE_PUBLIC_PEM};
    use crate::database::repositories::StatusRepository;
    use crate::database::Database;
    use serde_json::json;

    fn sweeper() -> (Database, DeliveryLedger, Sweeper) {
        let database = memory_database();
        let fetcher = Arc::new(StubFetcher::with_profile(ALICE, profile_json(ALICE, ALICE_PUBLIC_PEM)));
        let directory = ActorDirectory::new(database.clone(), fetcher, Duration::from_secs(5));
        let ledger = DeliveryLedger::new(database.clone(), Duration::from_secs(300));
        let processor = InboxProcessor::new(database.clone(), directory, ledger.clone());
        (database.clone(), ledger.clone(), Sweeper::new(processor, ledger))
    }

    fn activity(kind: &str, object: serde_json::Value) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": format!("https://remote/{kind}"),
            "type": kind,
            "actor": ALICE,
            "object": object,
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn one_pass_drains_and_reports() {
        let (database, ledger, sweeper) = sweeper();
        let note = json!({"type": "Note", "content": "hi", "published": "2024-01-01T00:00:00Z"});
        ledger.enqueue(&activity("Create", note), None, Some(ALICE)).unwrap();
        ledger
            .enqueue(&activity("Follow", json!("https://local/users/bob")), None, Some(ALICE))
            .unwrap();
        ledger
            .enqueue(&activity("Create", json!({"type": "Note"})), None, Some(ALICE))
            .unwrap();

        let report = sweeper.run_once().await.unwrap();
        assert_eq!(
            report,
            SweepReport {
                applied: 1,
                ignored: 1,
                failed: 1,
                skipped: 0,
                busy: false
            }
        );
        assert_eq!(ledger.count_pending().unwrap(), 1);
        assert_eq!(database.with_repositories(|repos| repos.statuses().count()).unwrap(), 1);

        // The failed entry is retried on the next pass and fails again.
        let again = sweeper.run_once().await.unwrap();
        assert_eq!(again.failed, 1);
        assert_eq!(again.attempted(), 1);
    }

    #[tokio::test]
    async fn concurrent_sweeps_do_not_overlap() {
        let (_database, _ledger, sweeper) = sweeper();
        let _held = sweeper.running.try_lock().unwrap();
        let report = sweeper.run_once().await.unwrap();
        assert!(report.busy);
        assert_eq!(report.attempted(), 0);
    }

    #[tokio::test]
    async fn wake_triggers_a_sweep() {
        let (database, ledger, sweeper) = sweeper();
        let handle = SweepHandle::start(sweeper, Duration::from_secs(3600));
        let note = json!({"type": "Note", "content": "hi", "published": "2024-01-01T00:00:00Z"});
        ledger.enqueue(&activity("Create", note), None, Some(ALICE)).unwrap();
        handle.wake();

        let mut drained = false;
        for _ in 0..100 {
            if ledger.count_pending().unwrap() == 0 {
                drained = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        handle.shutdown();
        assert!(drained, "woken worker should drain the ledger");
        assert_eq!(database.with_repositories(|repos| repos.statuses().count()).unwrap(), 1);
    }
}
