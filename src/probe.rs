use std::error::Error as _;
use std::future::Future;
use std::io;
use std::time::Duration;

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::TokioAsyncResolver;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};
use tracing::debug;

use crate::error::ReconError;
use crate::service;
use crate::types::{
    AnonymityLevel, Credentials, Observation, ProbeKind, ProbeOutcome, ProbeResult, ProbeTarget,
    ProxyProtocol,
};

/// Default endpoint that echoes the caller's address as `{"origin": "..."}`.
pub const DEFAULT_ECHO_URL: &str = "http://httpbin.org/ip";

const BANNER_BYTES: usize = 256;
const BANNER_WAIT: Duration = Duration::from_millis(200);

const USER_AGENT: &str = concat!("recon-scan-rs/", env!("CARGO_PKG_VERSION"));

/// Anything that can run one bounded probe. The dispatcher is generic over this.
pub trait Prober: Send + Sync + 'static {
    fn probe(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send;
}

/// Real network prober: TCP connect with a passive banner read, DNS A lookup, proxied GET
/// and plain GET.
///
/// Each call opens at most one transient connection and never retries.
pub struct ProbeExecutor {
    resolver: TokioAsyncResolver,
    http: reqwest::Client,
    echo_url: String,
}

impl ProbeExecutor {
    pub fn new() -> Result<Self, ReconError> {
        Self::with_resolver_config(ResolverConfig::default())
    }

    pub fn with_resolver_config(config: ResolverConfig) -> Result<Self, ReconError> {
        let mut opts = ResolverOpts::default();
        opts.attempts = 1;
        let resolver = TokioAsyncResolver::tokio(config, opts);
        let http = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            resolver,
            http,
            echo_url: DEFAULT_ECHO_URL.to_string(),
        })
    }

    /// Override the IP-echo endpoint used by proxy checks.
    pub fn with_echo_url(mut self, url: impl Into<String>) -> Self {
        self.echo_url = url.into();
        self
    }

    async fn run(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
        match &target.kind {
            ProbeKind::TcpConnect => self.probe_tcp(target, timeout).await,
            ProbeKind::DnsA => self.probe_dns(target).await,
            ProbeKind::ProxyHttp {
                protocol,
                credentials,
            } => {
                self.probe_proxy(target, *protocol, credentials.as_ref(), timeout)
                    .await
            }
            ProbeKind::HttpGet => self.probe_http(target, timeout).await,
        }
    }

    async fn probe_tcp(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
        let Some(port) = target.port else {
            return ProbeResult::protocol_error("tcp probe needs a port").into();
        };
        let start = Instant::now();
        let mut stream = match TcpStream::connect((target.host.as_str(), port)).await {
            Ok(s) => s,
            Err(e) => return classify_io_error(&e).into(),
        };
        let result = ProbeResult::Success {
            latency_ms: elapsed_ms(start),
        };

        // Greeting wait is capped at half of what the timeout leaves.
        let wait = BANNER_WAIT.min(timeout.saturating_sub(start.elapsed()) / 2);
        match read_banner(&mut stream, wait).await {
            Some(raw) => {
                let observation = Observation::Banner {
                    service: service::identify(port, &raw),
                    version: service::extract_version(&raw),
                    text: raw.trim().replace('\n', "\\n").replace('\r', "\\r"),
                };
                ProbeOutcome::with_observation(result, observation)
            }
            None => result.into(),
        }
    }

    async fn probe_dns(&self, target: &ProbeTarget) -> ProbeOutcome {
        let start = Instant::now();
        match self.resolver.ipv4_lookup(target.host.as_str()).await {
            Ok(lookup) => {
                let addrs: Vec<_> = lookup.iter().map(|a| a.0.into()).collect();
                if addrs.is_empty() {
                    return ProbeResult::protocol_error("no A records").into();
                }
                ProbeOutcome::with_observation(
                    ProbeResult::Success {
                        latency_ms: elapsed_ms(start),
                    },
                    Observation::Addresses { addrs },
                )
            }
            Err(e) => classify_resolve_error(&e).into(),
        }
    }

    async fn probe_proxy(
        &self,
        target: &ProbeTarget,
        protocol: ProxyProtocol,
        credentials: Option<&Credentials>,
        timeout: Duration,
    ) -> ProbeOutcome {
        let url = match proxy_url(target, protocol, credentials) {
            Ok(u) => u,
            Err(msg) => return ProbeResult::protocol_error(msg).into(),
        };
        let client = match reqwest::Proxy::all(url).and_then(|proxy| {
            reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .proxy(proxy)
                .timeout(timeout)
                .build()
        }) {
            Ok(c) => c,
            Err(e) => return ProbeResult::protocol_error(format!("proxy setup: {e}")).into(),
        };

        let start = Instant::now();
        let resp = match client.get(&self.echo_url).send().await {
            Ok(r) => r,
            Err(e) => return classify_http_error(&e).into(),
        };
        let latency_ms = elapsed_ms(start);
        if resp.status() != StatusCode::OK {
            return ProbeResult::protocol_error(format!("HTTP {}", resp.status().as_u16())).into();
        }

        let origin = match resp.json::<Value>().await {
            Ok(body) => body.get("origin").and_then(Value::as_str).map(str::to_owned),
            Err(e) => {
                debug!(proxy = %target, error = %e, "echo body unreadable");
                None
            }
        };
        let observation = match origin {
            Some(origin) => Observation::EchoedOrigin {
                anonymity: classify_anonymity(&target.host, &origin),
                origin,
            },
            None => Observation::EchoedOrigin {
                origin: String::new(),
                anonymity: AnonymityLevel::Unknown,
            },
        };
        ProbeOutcome::with_observation(ProbeResult::Success { latency_ms }, observation)
    }

    async fn probe_http(&self, target: &ProbeTarget, timeout: Duration) -> ProbeOutcome {
        let start = Instant::now();
        let resp = match self.http.get(&target.host).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) => return classify_http_error(&e).into(),
        };
        let latency_ms = elapsed_ms(start);
        let code = resp.status().as_u16();
        let result = if resp.status() == StatusCode::OK {
            ProbeResult::Success { latency_ms }
        } else {
            ProbeResult::protocol_error(format!("HTTP {code}"))
        };
        ProbeOutcome::with_observation(result, Observation::HttpStatus { code })
    }
}

impl Prober for ProbeExecutor {
    fn probe(
        &self,
        target: &ProbeTarget,
        timeout: Duration,
    ) -> impl Future<Output = ProbeOutcome> + Send {
        async move {
            match time::timeout(timeout, self.run(target, timeout)).await {
                Ok(outcome) => outcome,
                Err(_) => ProbeResult::Timeout.into(),
            }
        }
    }
}

/// Derive a proxy's anonymity from the origin string the echo endpoint saw.
///
/// The proxy's own address appearing in the origin means it forwards client addresses
/// verbatim; a comma-separated origin means it appends a forwarding chain. Anything else,
/// an empty origin included, is elite. `Unknown` is reserved for an unreadable echo body.
pub fn classify_anonymity(proxy_host: &str, echoed_origin: &str) -> AnonymityLevel {
    if echoed_origin.contains(proxy_host) {
        AnonymityLevel::Transparent
    } else if echoed_origin.contains(',') {
        AnonymityLevel::Anonymous
    } else {
        AnonymityLevel::Elite
    }
}

fn proxy_url(
    target: &ProbeTarget,
    protocol: ProxyProtocol,
    credentials: Option<&Credentials>,
) -> Result<reqwest::Url, String> {
    let port = target.port.ok_or("proxy target needs a port")?;
    let mut url = reqwest::Url::parse(&format!("{}://{}:{}", protocol.scheme(), target.host, port))
        .map_err(|e| format!("invalid proxy address {}: {e}", target.host))?;
    if let Some(c) = credentials {
        url.set_username(&c.username)
            .map_err(|_| "proxy url cannot carry credentials".to_string())?;
        url.set_password(Some(&c.password))
            .map_err(|_| "proxy url cannot carry credentials".to_string())?;
    }
    Ok(url)
}

pub(crate) fn classify_io_error(e: &io::Error) -> ProbeResult {
    match e.kind() {
        io::ErrorKind::ConnectionRefused => ProbeResult::Refused,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeResult::Timeout,
        io::ErrorKind::InvalidInput | io::ErrorKind::InvalidData => {
            ProbeResult::protocol_error(e.to_string())
        }
        _ => ProbeResult::Unreachable,
    }
}

fn classify_http_error(e: &reqwest::Error) -> ProbeResult {
    if e.is_timeout() {
        return ProbeResult::Timeout;
    }
    if e.is_connect() {
        let mut source = e.source();
        while let Some(err) = source {
            if let Some(io_err) = err.downcast_ref::<io::Error>() {
                return classify_io_error(io_err);
            }
            source = err.source();
        }
        return ProbeResult::Unreachable;
    }
    ProbeResult::protocol_error(e.to_string())
}

pub(crate) fn classify_resolve_error(e: &ResolveError) -> ProbeResult {
    match e.kind() {
        ResolveErrorKind::Timeout => ProbeResult::Timeout,
        ResolveErrorKind::NoRecordsFound { response_code, .. } => {
            ProbeResult::protocol_error(format!("no A records ({response_code})"))
        }
        _ => ProbeResult::protocol_error(e.to_string()),
    }
}

/// Passive read of whatever the service sends first. Silence or an error yields `None`.
async fn read_banner(stream: &mut TcpStream, wait: Duration) -> Option<String> {
    if wait.is_zero() {
        return None;
    }
    let mut buf = vec![0u8; BANNER_BYTES];
    match time::timeout(wait, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => {
            buf.truncate(n);
            Some(String::from_utf8_lossy(&buf).into_owned())
        }
        _ => None,
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}
