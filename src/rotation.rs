//! Round-robin proxy rotation for enrichment lookups.
//!
//! A proxy that cannot complete a lookup through any endpoint is retired for the rest of the
//! rotation's life. Lookups never fall back to a direct connection.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{info, warn};

use crate::enrich::enrichment_client;
use crate::error::ReconError;
use crate::fallback::{EndpointCandidate, FallbackResolver, Resolved};
use crate::types::ProxyRecord;

#[derive(Debug, Default)]
struct RotationState {
    working: Vec<ProxyRecord>,
    failed: Vec<ProxyRecord>,
    cursor: usize,
}

/// Shared working/failed proxy lists with a round-robin cursor.
#[derive(Debug, Default)]
pub struct ProxyRotation {
    state: Mutex<RotationState>,
}

impl ProxyRotation {
    pub fn new(proxies: Vec<ProxyRecord>) -> Self {
        Self {
            state: Mutex::new(RotationState {
                working: proxies,
                ..RotationState::default()
            }),
        }
    }

    /// Next working proxy in turn, or `None` once every proxy has failed.
    pub fn next(&self) -> Option<ProxyRecord> {
        let mut state = self.lock();
        if state.working.is_empty() {
            return None;
        }
        let idx = state.cursor % state.working.len();
        state.cursor = idx + 1;
        Some(state.working[idx].clone())
    }

    /// Retire `proxy`. Unknown or already retired proxies are ignored.
    pub fn mark_failed(&self, proxy: &ProxyRecord) {
        let mut state = self.lock();
        let Some(pos) = state.working.iter().position(|p| p == proxy) else {
            return;
        };
        let retired = state.working.remove(pos);
        if state.cursor > pos {
            state.cursor -= 1;
        }
        state.failed.push(retired);
    }

    pub fn working_count(&self) -> usize {
        self.lock().working.len()
    }

    pub fn failed(&self) -> Vec<ProxyRecord> {
        self.lock().failed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run an ordered fallback lookup through the rotation's proxies, one proxy at a time.
///
/// `build` makes the candidate list for a given proxy and its client. A proxy whose client
/// cannot be built, or for which every candidate fails, is marked failed and the next one is
/// tried. Returns [`ReconError::NoWorkingProxy`] when the rotation runs dry.
pub async fn resolve_through_proxies<T, B>(
    resolver: &FallbackResolver,
    rotation: &ProxyRotation,
    timeout: Duration,
    build: B,
) -> Result<Resolved<T>, ReconError>
where
    T: Send + 'static,
    B: Fn(&ProxyRecord, &reqwest::Client) -> Vec<EndpointCandidate<T>>,
{
    let mut failed = Vec::new();
    while let Some(proxy) = rotation.next() {
        let client = match enrichment_client(Some(&proxy), timeout) {
            Ok(c) => c,
            Err(e) => {
                warn!(proxy = %proxy, error = %e, "cannot build client for proxy");
                rotation.mark_failed(&proxy);
                failed.push(proxy.to_string());
                continue;
            }
        };
        match resolver.resolve(&build(&proxy, &client)).await {
            Ok(found) => {
                info!(proxy = %proxy, source = %found.source_id, "lookup answered through proxy");
                return Ok(found);
            }
            Err(e) => {
                warn!(proxy = %proxy, error = %e, "every endpoint failed through proxy; rotating");
                rotation.mark_failed(&proxy);
                failed.push(proxy.to_string());
            }
        }
    }
    Err(ReconError::NoWorkingProxy { failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProxyProtocol;

    fn proxy(host: &str) -> ProxyRecord {
        ProxyRecord::new(host, 8080, ProxyProtocol::Http)
    }

    #[test]
    fn round_robin_wraps() {
        let r = ProxyRotation::new(vec![proxy("a"), proxy("b"), proxy("c")]);
        let hosts: Vec<_> = (0..4).filter_map(|_| r.next()).map(|p| p.host).collect();
        assert_eq!(hosts, ["a", "b", "c", "a"]);
    }

    #[test]
    fn failed_proxy_leaves_rotation_without_skipping_others() {
        let r = ProxyRotation::new(vec![proxy("a"), proxy("b"), proxy("c")]);
        assert_eq!(r.next().map(|p| p.host).as_deref(), Some("a"));
        r.mark_failed(&proxy("a"));
        r.mark_failed(&proxy("a"));
        assert_eq!(r.next().map(|p| p.host).as_deref(), Some("b"));
        assert_eq!(r.next().map(|p| p.host).as_deref(), Some("c"));
        assert_eq!(r.working_count(), 2);
        assert_eq!(r.failed(), vec![proxy("a")]);
    }

    #[test]
    fn empty_rotation_yields_nothing() {
        let r = ProxyRotation::new(vec![proxy("a")]);
        r.mark_failed(&proxy("a"));
        assert!(r.next().is_none());
    }

    #[tokio::test]
    async fn lookup_moves_past_a_failing_proxy() {
        let rotation = ProxyRotation::new(vec![proxy("a"), proxy("b")]);
        let found = resolve_through_proxies(
            &FallbackResolver::new(),
            &rotation,
            Duration::from_secs(1),
            |p, _client| {
                let host = p.host.clone();
                vec![EndpointCandidate::new("echo", Duration::from_secs(1), move || {
                    let host = host.clone();
                    async move {
                        anyhow::ensure!(host != "a", "proxy a refused");
                        Ok(host)
                    }
                })]
            },
        )
        .await
        .unwrap();
        assert_eq!(found.value, "b");
        assert_eq!(rotation.failed(), vec![proxy("a")]);
        assert_eq!(rotation.working_count(), 1);
    }

    #[tokio::test]
    async fn exhausted_rotation_names_every_failed_proxy() {
        let rotation = ProxyRotation::new(vec![proxy("a"), proxy("b")]);
        let err = resolve_through_proxies(
            &FallbackResolver::new(),
            &rotation,
            Duration::from_secs(1),
            |_, _| {
                vec![EndpointCandidate::new("echo", Duration::from_secs(1), || async {
                    Err::<(), _>(anyhow::anyhow!("down"))
                })]
            },
        )
        .await
        .unwrap_err();
        match err {
            ReconError::NoWorkingProxy { failed } => {
                assert_eq!(failed, ["http://a:8080", "http://b:8080"]);
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
