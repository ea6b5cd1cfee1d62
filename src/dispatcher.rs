use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, CancellationController};
use crate::probe::Prober;
use crate::stats::StatsAggregator;
use crate::types::{AggregateStats, ProbeOutcome, ProbeResult, ProbeTarget, WorkerPoolConfig};

/// Upper bound on a single dequeue wait before the worker re-checks the stop flag.
const DEQUEUE_WAIT: Duration = Duration::from_millis(250);
/// Slack on top of the per-probe timeout before a probe task is abandoned.
const PROBE_GRACE: Duration = Duration::from_millis(500);

type TargetQueue = Arc<Mutex<mpsc::Receiver<ProbeTarget>>>;

/// Fixed-size worker pool that drains a target list through a [`Prober`].
pub struct WorkDispatcher<P> {
    prober: Arc<P>,
}

impl<P: Prober> WorkDispatcher<P> {
    pub fn new(prober: P) -> Self {
        Self {
            prober: Arc::new(prober),
        }
    }

    pub fn from_shared(prober: Arc<P>) -> Self {
        Self { prober }
    }

    pub fn prober(&self) -> &Arc<P> {
        &self.prober
    }

    /// Probe every target once and return the settled statistics.
    ///
    /// - Spawns exactly `cfg.size()` workers.
    /// - Each target is probed at most once; after cancellation no new target is dequeued,
    ///   but probes already running finish and are counted.
    /// - Returns only after every worker and the controller's listeners have been joined.
    pub async fn run(
        &self,
        targets: Vec<ProbeTarget>,
        cfg: &WorkerPoolConfig,
        controller: CancellationController,
    ) -> AggregateStats {
        let stats = Arc::new(StatsAggregator::new());
        self.run_with_shared(targets, cfg, controller, stats).await
    }

    /// Variant that records into a caller-owned aggregator, so progress can be read mid-run.
    pub async fn run_with_shared(
        &self,
        targets: Vec<ProbeTarget>,
        cfg: &WorkerPoolConfig,
        mut controller: CancellationController,
        stats: Arc<StatsAggregator>,
    ) -> AggregateStats {
        let total = targets.len();
        if total == 0 {
            controller.shutdown().await;
            return stats.snapshot();
        }

        let queue = fill_queue(targets);
        let timeout = cfg.per_probe_timeout();
        info!(
            targets = total,
            workers = cfg.size(),
            timeout_ms = timeout.as_millis() as u64,
            profile = ?cfg.task_profile(),
            "dispatch started"
        );

        let mut set = JoinSet::new();
        for worker_id in 0..cfg.size() {
            set.spawn(worker_loop(
                worker_id,
                self.prober.clone(),
                queue.clone(),
                stats.clone(),
                controller.handle(),
                timeout,
            ));
        }

        while let Some(res) = set.join_next().await {
            if let Err(e) = res {
                warn!(error = %e, "worker task ended abnormally");
            }
        }
        controller.shutdown().await;

        let settled = stats.snapshot();
        info!(
            attempts = settled.attempts,
            successes = settled.successes,
            failures = settled.failures,
            cancelled = controller.is_signaled(),
            "dispatch finished"
        );
        settled
    }
}

fn fill_queue(targets: Vec<ProbeTarget>) -> TargetQueue {
    let (tx, rx) = mpsc::channel(targets.len());
    for target in targets {
        // Capacity equals the target count, so this never fails.
        let _ = tx.try_send(target);
    }
    // Dropping the sender lets `recv` report a drained queue instead of waiting.
    drop(tx);
    Arc::new(Mutex::new(rx))
}

async fn worker_loop<P: Prober>(
    worker_id: usize,
    prober: Arc<P>,
    queue: TargetQueue,
    stats: Arc<StatsAggregator>,
    cancel: CancelHandle,
    timeout: Duration,
) {
    let mut probed = 0usize;
    loop {
        if cancel.is_signaled() {
            debug!(worker_id, probed, "worker stopping on cancel");
            break;
        }
        let next = {
            let mut rx = queue.lock().await;
            if cancel.is_signaled() {
                break;
            }
            time::timeout(DEQUEUE_WAIT, rx.recv()).await
        };
        let target = match next {
            Ok(Some(t)) => t,
            Ok(None) => break,
            Err(_) => continue,
        };

        let outcome = probe_isolated(prober.clone(), target.clone(), timeout).await;
        debug!(worker_id, target = %target, result = ?outcome.result, "probe finished");
        stats.record(target, outcome);
        probed += 1;
    }
    debug!(worker_id, probed, "worker exited");
}

/// Run one probe in its own task so a panic or a runaway future cannot take the worker down.
async fn probe_isolated<P: Prober>(
    prober: Arc<P>,
    target: ProbeTarget,
    timeout: Duration,
) -> ProbeOutcome {
    let mut handle = tokio::spawn(async move { prober.probe(&target, timeout).await });
    match time::timeout(timeout + PROBE_GRACE, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => ProbeResult::protocol_error(format!("probe task failed: {e}")).into(),
        Err(_) => {
            handle.abort();
            // Reap the aborted task so at most one probe per worker is ever alive.
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "aborted probe ended abnormally");
                }
            }
            ProbeResult::Timeout.into()
        }
    }
}
