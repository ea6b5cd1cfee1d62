use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time;
use tracing::{debug, info, warn};

use crate::cancel::{CancelHandle, CancellationController};
use crate::privilege::LatencyStrategy;
use crate::probe::Prober;
use crate::stats::StatsAggregator;
use crate::types::{AggregateStats, ProbeResult, ProbeTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingSettings {
    /// Pause between the end of one probe and the start of the next.
    pub interval: Duration,
    pub timeout: Duration,
    /// Stop after this many probes; `None` runs until cancelled.
    pub count: Option<u64>,
}

impl Default for PingSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(3),
            count: None,
        }
    }
}

/// Target to use for a latency strategy, or `None` when an external ICMP engine must handle it.
pub fn latency_target(host: &str, strategy: LatencyStrategy) -> Option<ProbeTarget> {
    match strategy {
        LatencyStrategy::TcpConnect { port } => Some(ProbeTarget::tcp(host, port)),
        LatencyStrategy::RawIcmp => None,
    }
}

/// Probe `target` repeatedly until `settings.count` is reached or the controller is signaled.
///
/// `on_result` sees every result as it lands (sequence number starting at 1). A probe that is
/// in flight when cancellation arrives still completes and is counted.
pub async fn run_ping<P, F>(
    prober: &P,
    target: &ProbeTarget,
    settings: &PingSettings,
    mut controller: CancellationController,
    on_result: F,
) -> AggregateStats
where
    P: Prober,
    F: FnMut(u64, &ProbeResult),
{
    let cancel = controller.handle();
    let stats = ping_loop(prober, target, settings, &cancel, on_result).await;
    controller.shutdown().await;
    stats
}

/// Ping every target at once, one loop per host, all stopped by the same controller.
///
/// Results come back in input order, each host with its own statistics.
pub async fn run_mass_ping<P, F>(
    prober: Arc<P>,
    targets: Vec<ProbeTarget>,
    settings: PingSettings,
    mut controller: CancellationController,
    on_result: F,
) -> Vec<(ProbeTarget, AggregateStats)>
where
    P: Prober,
    F: Fn(&ProbeTarget, u64, &ProbeResult) + Send + Sync + 'static,
{
    let on_result = Arc::new(on_result);
    let mut loops = JoinSet::new();
    info!(hosts = targets.len(), "mass ping started");
    for (idx, target) in targets.into_iter().enumerate() {
        let prober = prober.clone();
        let cancel = controller.handle();
        let on_result = on_result.clone();
        loops.spawn(async move {
            let stats = ping_loop(&*prober, &target, &settings, &cancel, |seq, r| {
                on_result(&target, seq, r)
            })
            .await;
            (idx, target, stats)
        });
    }

    let mut finished = Vec::with_capacity(loops.len());
    while let Some(joined) = loops.join_next().await {
        match joined {
            Ok(entry) => finished.push(entry),
            Err(e) => warn!(error = %e, "ping loop ended abnormally"),
        }
    }
    controller.shutdown().await;
    finished.sort_by_key(|(idx, ..)| *idx);
    finished
        .into_iter()
        .map(|(_, target, stats)| (target, stats))
        .collect()
}

async fn ping_loop<P, F>(
    prober: &P,
    target: &ProbeTarget,
    settings: &PingSettings,
    cancel: &CancelHandle,
    mut on_result: F,
) -> AggregateStats
where
    P: Prober,
    F: FnMut(u64, &ProbeResult),
{
    let stats = StatsAggregator::new();
    let mut seq = 0u64;
    info!(target = %target, count = ?settings.count, "ping started");

    while !cancel.is_signaled() && settings.count.map_or(true, |c| seq < c) {
        let outcome = prober.probe(target, settings.timeout).await;
        seq += 1;
        on_result(seq, &outcome.result);
        stats.add(outcome.result);

        if settings.count.is_some_and(|c| seq >= c) {
            break;
        }
        tokio::select! {
            _ = cancel.signaled() => {
                debug!(target = %target, seq, "ping cancelled during interval");
            }
            _ = time::sleep(settings.interval) => {}
        }
    }

    let stats = stats.into_stats();
    info!(target = %target, attempts = stats.attempts, successes = stats.successes, "ping finished");
    stats
}
