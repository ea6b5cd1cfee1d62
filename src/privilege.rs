use tracing::{info, warn};

/// External capability answering whether raw-socket probing is permitted.
pub trait PrivilegeCheck {
    fn has_privilege(&self) -> bool;
}

/// Treats an effective uid of 0 as privileged. Always unprivileged off Unix.
#[derive(Debug, Clone, Copy, Default)]
pub struct EffectiveUser;

impl PrivilegeCheck for EffectiveUser {
    fn has_privilege(&self) -> bool {
        #[cfg(unix)]
        {
            // SAFETY: geteuid has no preconditions and cannot fail.
            unsafe { libc::geteuid() == 0 }
        }
        #[cfg(not(unix))]
        {
            false
        }
    }
}

/// Fixed answer, for callers that already know (and for tests).
#[derive(Debug, Clone, Copy)]
pub struct StaticPrivilege(pub bool);

impl PrivilegeCheck for StaticPrivilege {
    fn has_privilege(&self) -> bool {
        self.0
    }
}

/// How latency to a host will be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyStrategy {
    /// Raw ICMP echo, delegated to an external engine.
    RawIcmp,
    /// Timed TCP connects to `port`.
    TcpConnect { port: u16 },
}

/// Pick raw ICMP only when both the privilege and an ICMP engine are present;
/// otherwise fall back to TCP connects against `fallback_port`.
///
/// The privilege is always queried first, so the log records why the fallback happened.
pub fn select_latency_strategy(
    privilege: &dyn PrivilegeCheck,
    raw_engine_available: bool,
    fallback_port: u16,
) -> LatencyStrategy {
    let privileged = privilege.has_privilege();
    match (privileged, raw_engine_available) {
        (true, true) => {
            info!("raw ICMP permitted and available");
            LatencyStrategy::RawIcmp
        }
        (true, false) => {
            info!(
                port = fallback_port,
                "privileged, but no raw ICMP engine; using TCP connect latency"
            );
            LatencyStrategy::TcpConnect {
                port: fallback_port,
            }
        }
        (false, _) => {
            warn!(
                port = fallback_port,
                "raw ICMP needs elevated privileges; falling back to TCP connect latency"
            );
            LatencyStrategy::TcpConnect {
                port: fallback_port,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn unprivileged_falls_back_to_tcp() {
        assert_eq!(
            select_latency_strategy(&StaticPrivilege(false), true, 443),
            LatencyStrategy::TcpConnect { port: 443 }
        );
    }

    #[test]
    fn privileged_with_engine_uses_icmp() {
        assert_eq!(
            select_latency_strategy(&StaticPrivilege(true), true, 443),
            LatencyStrategy::RawIcmp
        );
    }

    struct Counting(AtomicUsize);

    impl PrivilegeCheck for Counting {
        fn has_privilege(&self) -> bool {
            self.0.fetch_add(1, Ordering::SeqCst);
            true
        }
    }

    #[test]
    fn privilege_is_queried_even_without_engine() {
        let check = Counting(AtomicUsize::new(0));
        assert_eq!(
            select_latency_strategy(&check, false, 22),
            LatencyStrategy::TcpConnect { port: 22 }
        );
        assert_eq!(check.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn effective_user_answers() {
        #[cfg(unix)]
        assert_eq!(EffectiveUser.has_privilege(), unsafe { libc::geteuid() } == 0);
        #[cfg(not(unix))]
        assert!(!EffectiveUser.has_privilege());
    }

    #[test]
    fn missing_engine_wins_over_privilege() {
        assert_eq!(
            select_latency_strategy(&StaticPrivilege(true), false, 80),
            LatencyStrategy::TcpConnect { port: 80 }
        );
    }
}
