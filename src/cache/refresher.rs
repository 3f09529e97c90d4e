//! Background Refresher
//!
//! Sweeps the store on a fixed interval and refreshes whatever the staleness
//! policy reports as due. A failed refresh is recorded on its node and the
//! sweep moves on.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::engine::{now, CacheEngine};
use super::node::Status;
use crate::drive::path::split;
use crate::graph::RemoteFetch;

/// Outcome of one sweep
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub attempted: usize,
    pub refreshed: usize,
    pub failed: usize,
}

/// Refresh every due node once, then save the snapshot if anything was attempted
pub async fn sweep<F: RemoteFetch>(engine: &CacheEngine<F>) -> SweepReport {
    let at = now();
    let policy = engine.policy();
    let due: Vec<String> = engine
        .store()
        .descriptions()
        .into_iter()
        .filter(|d| policy.needs_update(d, at))
        .map(|d| d.path)
        .collect();

    let mut report = SweepReport::default();
    for path in due {
        report.attempted += 1;
        match engine.refresh(&path).await {
            Ok(_) => report.refreshed += 1,
            Err(e) => {
                report.failed += 1;
                warn!(path = %path, error = %e, "Sweep refresh failed, continuing");
            }
        }
    }

    if report.attempted > 0 {
        if let Err(e) = engine.store().save() {
            error!(error = %e, "Failed to save cache snapshot after sweep");
        }
        info!(
            attempted = report.attempted,
            refreshed = report.refreshed,
            failed = report.failed,
            "Refresh sweep finished"
        );
    } else {
        debug!("Refresh sweep found nothing due");
    }

    report
}

/// Mark `path` and its parent for refresh on the next sweep.
///
/// Nodes currently being populated are left alone. Returns how many nodes
/// were marked.
pub fn force_refresh<F: RemoteFetch>(engine: &CacheEngine<F>, path: &str) -> usize {
    let (parent, _) = split(path);
    let mut targets = vec![path];
    if parent != path {
        targets.push(parent);
    }

    let mut marked = 0;
    for target in targets {
        let updated = engine.store().update_description(target, |d| {
            if d.status != Status::Caching {
                d.status = Status::Force;
            }
        });
        if updated && engine.store().find(target).and_then(|n| n.status()) == Some(Status::Force) {
            marked += 1;
        }
    }
    info!(path = %path, marked = marked, "Forced refresh");
    marked
}

/// Running refresher task for one drive
pub struct RefresherHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl RefresherHandle {
    /// Start sweeping every `interval`. The first sweep runs immediately.
    pub fn start<F: RemoteFetch>(engine: Arc<CacheEngine<F>>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        sweep(&*engine).await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("Refresher stopping");
                            break;
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "Refresher started");
        Self { shutdown, handle }
    }

    /// Signal the task and wait for it to finish its current sweep
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Refresher task ended abnormally");
        }
    }
}
