use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use anyhow::anyhow;
use serde::Serialize;
use tokio::time;
use tracing::{debug, info, warn};

use crate::error::ReconError;

pub type QueryFuture<T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send>>;

/// One backend endpoint: an id for traceability, a timeout, and the query itself.
///
/// Candidates hold no mutable state, so the same list can be used by concurrent callers.
pub struct EndpointCandidate<T: Send + 'static> {
    id: String,
    timeout: Duration,
    query: Box<dyn Fn() -> QueryFuture<T> + Send + Sync>,
}

impl<T: Send + 'static> EndpointCandidate<T> {
    pub fn new<F, Fut>(id: impl Into<String>, timeout: Duration, query: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self {
            id: id.into(),
            timeout,
            query: Box::new(move || Box::pin(query())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn attempt(&self) -> anyhow::Result<T> {
        match time::timeout(self.timeout, (self.query)()).await {
            Ok(res) => res,
            Err(_) => Err(anyhow!("timed out after {:?}", self.timeout)),
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for EndpointCandidate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointCandidate")
            .field("id", &self.id)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// A value together with the endpoint that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolved<T> {
    pub value: T,
    pub source_id: String,
}

/// Heuristic bounds separating GeoDNS/load-balancer diversity from suspicious divergence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsistencyThresholds {
    /// Largest answer set may be at most this many times the smallest.
    pub max_size_ratio: usize,
    /// Union of all answers may hold at most this many distinct values.
    pub max_union: usize,
}

impl Default for ConsistencyThresholds {
    fn default() -> Self {
        Self {
            max_size_ratio: 3,
            max_union: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsistencyVerdict {
    Consistent,
    NormalVariation,
    Suspicious,
    InsufficientData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointResponse {
    pub source_id: String,
    pub values: Option<BTreeSet<String>>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsistencyReport {
    pub verdict: ConsistencyVerdict,
    pub responses: Vec<EndpointResponse>,
}

/// Ordered endpoint fallback and cross-endpoint consistency checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct FallbackResolver {
    thresholds: ConsistencyThresholds,
}

impl FallbackResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_thresholds(thresholds: ConsistencyThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> ConsistencyThresholds {
        self.thresholds
    }

    /// Try candidates strictly in order; the first success wins.
    ///
    /// Returns [`ReconError::ServiceUnavailable`] when every candidate fails.
    pub async fn resolve<T: Send + 'static>(
        &self,
        candidates: &[EndpointCandidate<T>],
    ) -> Result<Resolved<T>, ReconError> {
        let mut attempted = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            attempted.push(candidate.id.clone());
            match candidate.attempt().await {
                Ok(value) => {
                    info!(source = %candidate.id, "endpoint answered");
                    return Ok(Resolved {
                        value,
                        source_id: candidate.id.clone(),
                    });
                }
                Err(e) => {
                    warn!(source = %candidate.id, error = %e, "endpoint failed, trying next");
                }
            }
        }
        Err(ReconError::ServiceUnavailable { attempted })
    }

    /// Query every candidate for the same record and classify how the answers agree.
    pub async fn check_consistency(
        &self,
        candidates: &[EndpointCandidate<BTreeSet<String>>],
    ) -> ConsistencyReport {
        let mut responses = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let response = match candidate.attempt().await {
                Ok(values) => {
                    debug!(source = %candidate.id, count = values.len(), "consistency answer");
                    EndpointResponse {
                        source_id: candidate.id.clone(),
                        values: Some(values),
                        error: None,
                    }
                }
                Err(e) => {
                    warn!(source = %candidate.id, error = %e, "consistency query failed");
                    EndpointResponse {
                        source_id: candidate.id.clone(),
                        values: None,
                        error: Some(e.to_string()),
                    }
                }
            };
            responses.push(response);
        }

        let sets: Vec<&BTreeSet<String>> =
            responses.iter().filter_map(|r| r.values.as_ref()).collect();
        let verdict = classify_sets(&sets, &self.thresholds);
        info!(?verdict, usable = sets.len(), "consistency check finished");
        ConsistencyReport { verdict, responses }
    }
}

/// Classify answer sets from independent endpoints.
pub fn classify_sets(
    sets: &[&BTreeSet<String>],
    thresholds: &ConsistencyThresholds,
) -> ConsistencyVerdict {
    let Some((first, rest)) = sets.split_first() else {
        return ConsistencyVerdict::InsufficientData;
    };
    if rest.is_empty() {
        return ConsistencyVerdict::InsufficientData;
    }
    if rest.iter().all(|s| s == first) {
        return ConsistencyVerdict::Consistent;
    }

    let max = sets.iter().map(|s| s.len()).max().unwrap_or(0);
    let min = sets.iter().map(|s| s.len()).min().unwrap_or(0);
    let union: BTreeSet<&String> = sets.iter().flat_map(|s| s.iter()).collect();

    if max <= min.saturating_mul(thresholds.max_size_ratio) && union.len() <= thresholds.max_union {
        ConsistencyVerdict::NormalVariation
    } else {
        ConsistencyVerdict::Suspicious
    }
}
