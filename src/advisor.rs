use std::thread;

use serde::{Deserialize, Serialize};

/// Lower bound of any recommendation.
pub const MIN_RECOMMENDED: usize = 4;
/// Upper bound of any recommendation; matches the pool's hard ceiling.
pub const MAX_RECOMMENDED: usize = crate::types::MAX_WORKERS;

/// The kind of workload a pool is being sized for.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskProfile {
    PortScan,
    /// DNS lookups are lighter on the target than raw connects, so this profile gets more workers.
    SubdomainBruteForce,
    ProxyCheck,
    General,
}

/// Recommend a worker-pool size for `logical_cores` and `profile`.
///
/// Pure and deterministic. The result is always within `MIN_RECOMMENDED..=MAX_RECOMMENDED`.
pub fn recommend(logical_cores: usize, profile: TaskProfile) -> usize {
    let c = logical_cores;
    let raw = match profile {
        TaskProfile::PortScan => match c {
            16.. => c.saturating_mul(2).min(100),
            8.. => c.saturating_mul(2).min(50),
            4.. => c.saturating_mul(2).min(25),
            _ => c.max(4).min(10),
        },
        TaskProfile::SubdomainBruteForce => match c {
            16.. => c.saturating_mul(4).min(200),
            8.. => c.saturating_mul(3).min(100),
            4.. => c.saturating_mul(2).min(50),
            _ => c.max(8).min(20),
        },
        TaskProfile::ProxyCheck | TaskProfile::General => (c / 2).max(4),
    };
    raw.clamp(MIN_RECOMMENDED, MAX_RECOMMENDED)
}

/// Logical cores visible to this process, or 1 if the platform cannot say.
pub fn host_logical_cores() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_scan_tiers() {
        assert_eq!(recommend(32, TaskProfile::PortScan), 64);
        assert_eq!(recommend(64, TaskProfile::PortScan), 100);
        assert_eq!(recommend(8, TaskProfile::PortScan), 16);
        assert_eq!(recommend(4, TaskProfile::PortScan), 8);
        assert_eq!(recommend(2, TaskProfile::PortScan), 4);
    }

    #[test]
    fn subdomain_gets_higher_multiplier() {
        assert_eq!(recommend(16, TaskProfile::SubdomainBruteForce), 64);
        assert_eq!(recommend(8, TaskProfile::SubdomainBruteForce), 24);
        assert_eq!(recommend(1, TaskProfile::SubdomainBruteForce), 8);
        for cores in [1, 4, 8, 16, 32] {
            assert!(
                recommend(cores, TaskProfile::SubdomainBruteForce)
                    >= recommend(cores, TaskProfile::PortScan)
            );
        }
    }

    #[test]
    fn huge_hosts_stay_under_ceiling() {
        assert_eq!(recommend(1024, TaskProfile::SubdomainBruteForce), 200);
        assert_eq!(recommend(1024, TaskProfile::General), 200);
    }

    #[test]
    fn absurd_core_counts_saturate() {
        for profile in [
            TaskProfile::PortScan,
            TaskProfile::SubdomainBruteForce,
            TaskProfile::ProxyCheck,
            TaskProfile::General,
        ] {
            let n = recommend(usize::MAX, profile);
            assert!((MIN_RECOMMENDED..=MAX_RECOMMENDED).contains(&n), "{profile:?} -> {n}");
        }
        assert_eq!(recommend(usize::MAX / 3, TaskProfile::SubdomainBruteForce), 200);
    }

    #[test]
    fn zero_cores_still_yields_floor() {
        assert_eq!(recommend(0, TaskProfile::General), 4);
        assert_eq!(recommend(0, TaskProfile::PortScan), 4);
    }
}
