use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::advisor::{self, TaskProfile};

/// Hard ceiling on the number of concurrent workers, regardless of hardware or user input.
pub const MAX_WORKERS: usize = 200;

/// Proxy protocols understood by the proxied HTTP probe.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProxyProtocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl ProxyProtocol {
    pub fn scheme(self) -> &'static str {
        match self {
            ProxyProtocol::Http => "http",
            ProxyProtocol::Https => "https",
            ProxyProtocol::Socks4 => "socks4",
            ProxyProtocol::Socks5 => "socks5",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Credentials {
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// What kind of probe to run against a target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ProbeKind {
    TcpConnect,
    DnsA,
    ProxyHttp {
        protocol: ProxyProtocol,
        credentials: Option<Credentials>,
    },
    /// Plain GET of the URL stored in `host`.
    HttpGet,
}

/// One unit of work for the dispatcher. Never mutated after it is enqueued.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeTarget {
    pub host: String,
    pub port: Option<u16>,
    pub kind: ProbeKind,
}

impl ProbeTarget {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port: Some(port),
            kind: ProbeKind::TcpConnect,
        }
    }

    pub fn dns(name: impl Into<String>) -> Self {
        Self {
            host: name.into(),
            port: None,
            kind: ProbeKind::DnsA,
        }
    }

    pub fn http(url: impl Into<String>) -> Self {
        Self {
            host: url.into(),
            port: None,
            kind: ProbeKind::HttpGet,
        }
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.kind, self.port) {
            (ProbeKind::TcpConnect, Some(p)) => write!(f, "{}:{} (tcp)", self.host, p),
            (ProbeKind::ProxyHttp { protocol, .. }, Some(p)) => {
                write!(f, "{}://{}:{}", protocol.scheme(), self.host, p)
            }
            (ProbeKind::DnsA, _) => write!(f, "{} (A)", self.host),
            (_, Some(p)) => write!(f, "{}:{}", self.host, p),
            (_, None) => write!(f, "{}", self.host),
        }
    }
}

/// Classified outcome of a single probe. Exactly one per probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ProbeResult {
    Success { latency_ms: f64 },
    Timeout,
    Refused,
    Unreachable,
    ProtocolError { message: String },
}

impl ProbeResult {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        ProbeResult::ProtocolError {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ProbeResult::Success { .. })
    }

    pub fn latency_ms(&self) -> Option<f64> {
        match self {
            ProbeResult::Success { latency_ms } => Some(*latency_ms),
            _ => None,
        }
    }
}

/// How much a proxy reveals about the client behind it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnonymityLevel {
    Transparent,
    Anonymous,
    Elite,
    Unknown,
}

/// Side data a probe may report next to its result.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Observation {
    Addresses { addrs: Vec<IpAddr> },
    EchoedOrigin { origin: String, anonymity: AnonymityLevel },
    HttpStatus { code: u16 },
    /// Greeting a service sent unprompted right after the TCP handshake.
    Banner {
        text: String,
        service: String,
        version: Option<String>,
    },
}

/// What a prober hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeOutcome {
    pub result: ProbeResult,
    pub observation: Option<Observation>,
}

impl ProbeOutcome {
    pub fn with_observation(result: ProbeResult, observation: Observation) -> Self {
        Self {
            result,
            observation: Some(observation),
        }
    }
}

impl From<ProbeResult> for ProbeOutcome {
    fn from(result: ProbeResult) -> Self {
        Self {
            result,
            observation: None,
        }
    }
}

/// A proxy candidate as produced by an external proxy-list parser.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyRecord {
    pub host: String,
    pub port: u16,
    pub protocol: ProxyProtocol,
    pub username: Option<String>,
    #[serde(skip_serializing, default)]
    pub password: Option<String>,
}

impl ProxyRecord {
    pub fn new(host: impl Into<String>, port: u16, protocol: ProxyProtocol) -> Self {
        Self {
            host: host.into(),
            port,
            protocol,
            username: None,
            password: None,
        }
    }

    pub fn with_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn to_target(&self) -> ProbeTarget {
        let credentials = self.username.as_ref().map(|u| Credentials {
            username: u.clone(),
            password: self.password.clone().unwrap_or_default(),
        });
        ProbeTarget {
            host: self.host.clone(),
            port: Some(self.port),
            kind: ProbeKind::ProxyHttp {
                protocol: self.protocol,
                credentials,
            },
        }
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.protocol.scheme(), self.host, self.port)
    }
}

/// Pool parameters for one dispatcher run. `size` is always within `1..=MAX_WORKERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    size: usize,
    per_probe_timeout: Duration,
    task_profile: TaskProfile,
}

impl WorkerPoolConfig {
    pub fn new(size: usize, per_probe_timeout: Duration, task_profile: TaskProfile) -> Self {
        Self {
            size: size.clamp(1, MAX_WORKERS),
            per_probe_timeout,
            task_profile,
        }
    }

    /// Size the pool from the advisor using this host's logical core count.
    pub fn recommended(task_profile: TaskProfile, per_probe_timeout: Duration) -> Self {
        let size = advisor::recommend(advisor::host_logical_cores(), task_profile);
        Self::new(size, per_probe_timeout, task_profile)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn per_probe_timeout(&self) -> Duration {
        self.per_probe_timeout
    }

    pub fn task_profile(&self) -> TaskProfile {
        self.task_profile
    }
}

/// Point-in-time summary of a run, safe to compute while workers are still writing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ScanSummary {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub loss_pct: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

/// Settled statistics for one run. Built fresh per run and read-only once returned.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateStats {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub latencies: Vec<f64>,
    pub per_target: HashMap<ProbeTarget, ProbeResult>,
    pub observations: HashMap<ProbeTarget, Observation>,
}

impl AggregateStats {
    pub fn summary(&self) -> ScanSummary {
        summarize(
            self.attempts,
            self.successes,
            self.failures,
            self.timeouts,
            &self.latencies,
        )
    }

    /// Per-target results ordered by target, for callers that need stable output.
    pub fn sorted_results(&self) -> Vec<(&ProbeTarget, &ProbeResult)> {
        let mut out: Vec<_> = self.per_target.iter().collect();
        out.sort_by(|a, b| a.0.cmp(b.0));
        out
    }

    pub fn anonymity_of(&self, target: &ProbeTarget) -> AnonymityLevel {
        match self.observations.get(target) {
            Some(Observation::EchoedOrigin { anonymity, .. }) => *anonymity,
            _ => AnonymityLevel::Unknown,
        }
    }
}

pub(crate) fn summarize(
    attempts: u64,
    successes: u64,
    failures: u64,
    timeouts: u64,
    latencies: &[f64],
) -> ScanSummary {
    if successes == 0 || latencies.is_empty() {
        return ScanSummary {
            attempts,
            successes,
            failures,
            timeouts,
            loss_pct: 100.0,
            avg_ms: 0.0,
            min_ms: 0.0,
            max_ms: 0.0,
        };
    }
    let sum: f64 = latencies.iter().sum();
    let min = latencies.iter().copied().fold(f64::INFINITY, f64::min);
    let max = latencies.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ScanSummary {
        attempts,
        successes,
        failures,
        timeouts,
        loss_pct: failures as f64 / attempts as f64 * 100.0,
        avg_ms: sum / latencies.len() as f64,
        min_ms: min,
        max_ms: max,
    }
}
