use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::types::{summarize, AggregateStats, ProbeOutcome, ProbeResult, ProbeTarget, ScanSummary};

/// Thread-safe accumulator for one run.
///
/// Every completion is applied under a single lock, so `attempts == successes + failures`
/// and `latencies.len() == successes` hold for any snapshot a reader can observe.
#[derive(Debug, Default)]
pub struct StatsAggregator {
    inner: Mutex<AggregateStats>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a result that is not tied to a particular target entry (e.g. repeated pings).
    pub fn add(&self, result: ProbeResult) {
        let mut stats = self.lock();
        apply(&mut stats, &result);
    }

    /// Count a result and remember it as the outcome for `target`.
    pub fn record(&self, target: ProbeTarget, outcome: ProbeOutcome) {
        let mut stats = self.lock();
        apply(&mut stats, &outcome.result);
        if let Some(obs) = outcome.observation {
            stats.observations.insert(target.clone(), obs);
        }
        stats.per_target.insert(target, outcome.result);
    }

    /// Consistent summary; callable while workers are still recording.
    pub fn summary(&self) -> ScanSummary {
        let stats = self.lock();
        summarize(
            stats.attempts,
            stats.successes,
            stats.failures,
            stats.timeouts,
            &stats.latencies,
        )
    }

    pub fn attempts(&self) -> u64 {
        self.lock().attempts
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> AggregateStats {
        self.lock().clone()
    }

    /// Consume the aggregator and return its final state without copying.
    pub fn into_stats(self) -> AggregateStats {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, AggregateStats> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn apply(stats: &mut AggregateStats, result: &ProbeResult) {
    stats.attempts += 1;
    match result {
        ProbeResult::Success { latency_ms } => {
            stats.successes += 1;
            stats.latencies.push(*latency_ms);
        }
        ProbeResult::Timeout => {
            stats.failures += 1;
            stats.timeouts += 1;
        }
        ProbeResult::Refused | ProbeResult::Unreachable | ProbeResult::ProtocolError { .. } => {
            stats.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counts_each_variant() {
        let agg = StatsAggregator::new();
        agg.add(ProbeResult::Success { latency_ms: 12.0 });
        agg.add(ProbeResult::Timeout);
        agg.add(ProbeResult::Refused);
        agg.add(ProbeResult::protocol_error("boom"));

        let s = agg.snapshot();
        assert_eq!(s.attempts, 4);
        assert_eq!(s.successes, 1);
        assert_eq!(s.failures, 3);
        assert_eq!(s.timeouts, 1);
        assert_eq!(s.latencies, vec![12.0]);
        assert!(s.per_target.is_empty());
    }

    #[test]
    fn record_keeps_per_target_result() {
        let agg = StatsAggregator::new();
        let t = ProbeTarget::tcp("127.0.0.1", 22);
        agg.record(t.clone(), ProbeResult::Success { latency_ms: 1.5 }.into());
        let s = agg.into_stats();
        assert_eq!(s.per_target.get(&t), Some(&ProbeResult::Success { latency_ms: 1.5 }));
    }

    #[test]
    fn concurrent_adds_lose_nothing() {
        let agg = Arc::new(StatsAggregator::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let agg = agg.clone();
                thread::spawn(move || {
                    for n in 0..500 {
                        if (i + n) % 3 == 0 {
                            agg.add(ProbeResult::Timeout);
                        } else {
                            agg.add(ProbeResult::Success { latency_ms: n as f64 });
                        }
                        let s = agg.summary();
                        assert_eq!(s.attempts, s.successes + s.failures);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let s = agg.snapshot();
        assert_eq!(s.attempts, 4_000);
        assert_eq!(s.attempts, s.successes + s.failures);
        assert_eq!(s.latencies.len() as u64, s.successes);
    }
}
