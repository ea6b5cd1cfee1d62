use std::fs::{self, File};
use std::io::{self, Write};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::warn;

use recon_scan_rs::advisor::TaskProfile;
use recon_scan_rs::cancel::CancellationController;
use recon_scan_rs::dispatcher::WorkDispatcher;
use recon_scan_rs::enrich::{self, PUBLIC_RESOLVERS};
use recon_scan_rs::fallback::{ConsistencyThresholds, FallbackResolver};
use recon_scan_rs::pinger::{self, PingSettings};
use recon_scan_rs::privilege::{self, EffectiveUser};
use recon_scan_rs::probe::ProbeExecutor;
use recon_scan_rs::report::{JsonExporter, ReportExporter, ScanReport, TableExporter};
use recon_scan_rs::rotation::{self, ProxyRotation};
use recon_scan_rs::session::{self, SessionControl};
use recon_scan_rs::types::{
    AggregateStats, ProbeResult, ProbeTarget, ProxyRecord, WorkerPoolConfig, MAX_WORKERS,
};
use recon_scan_rs::{logging, targets, tls};

/// recon-scan-rs: concurrent port, subdomain and proxy probing with latency and enrichment tools.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "recon-scan-rs",
    version,
    about = "Concurrent port, subdomain and proxy probing with latency and enrichment tools.",
    long_about = None
)]
struct Cli {
    /// Worker pool size. Defaults to a hardware-based recommendation; capped at 200.
    #[arg(long, global = true)]
    threads: Option<usize>,

    /// Per-probe timeout in milliseconds.
    #[arg(long = "timeout-ms", global = true, default_value_t = 1000)]
    timeout_ms: u64,

    /// Write results as pretty JSON to this path (optional).
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// List failed targets too, not only successes.
    #[arg(long = "show-failures", global = true, default_value_t = false)]
    show_failures: bool,

    /// After each run, ask whether to run again, pick a new target, or quit.
    #[arg(long, global = true, default_value_t = false)]
    interactive: bool,

    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// TCP connect scan of a port list on one host.
    Portscan {
        host: String,
        /// Ports, e.g. `22,80,8000-8100`.
        #[arg(long, default_value = "1-1024")]
        ports: String,
    },
    /// Brute-force subdomains of a domain from a wordlist.
    Subdomains {
        domain: String,
        /// One word per line.
        #[arg(long)]
        wordlist: PathBuf,
    },
    /// Check proxies from a JSON array of `{host, port, protocol, username?, password?}`.
    Proxies {
        file: PathBuf,
        /// IP-echo endpoint used to judge anonymity.
        #[arg(long = "echo-url", default_value = recon_scan_rs::probe::DEFAULT_ECHO_URL)]
        echo_url: String,
    },
    /// Repeated timed TCP connects (ICMP-style ping without raw sockets). Several hosts are
    /// pinged concurrently, each with its own statistics.
    TcpPing {
        #[arg(required = true, num_args = 1..)]
        hosts: Vec<String>,
        #[arg(long, default_value_t = 443)]
        port: u16,
        /// Stop after this many probes; runs until Ctrl-C if omitted.
        #[arg(long)]
        count: Option<u64>,
        #[arg(long = "interval-ms", default_value_t = 1000)]
        interval_ms: u64,
    },
    /// Repeated HTTP GETs, counting 200 responses as replies.
    HttpPing {
        url: String,
        #[arg(long)]
        count: Option<u64>,
        #[arg(long = "interval-ms", default_value_t = 1000)]
        interval_ms: u64,
    },
    /// GeoIP lookup with provider fallback.
    Geoip {
        target: String,
        /// Route lookups through these proxies (JSON array, as for `proxies`), rotating on failure.
        #[arg(long)]
        via: Option<PathBuf>,
    },
    /// WHOIS lookup with provider fallback.
    Whois {
        target: String,
        /// Route lookups through these proxies (JSON array, as for `proxies`), rotating on failure.
        #[arg(long)]
        via: Option<PathBuf>,
    },
    /// Fetch and assess the TLS certificate a server presents.
    Tls {
        host: String,
        #[arg(long, default_value_t = 443)]
        port: u16,
    },
    /// Compare A records across public resolvers to spot DNS drift.
    DnsDrift {
        host: String,
        #[arg(long = "max-ratio", default_value_t = 3)]
        max_ratio: usize,
        #[arg(long = "max-union", default_value_t = 20)]
        max_union: usize,
    },
}

impl Command {
    fn set_target(&mut self, target: String) {
        match self {
            Command::Portscan { host, .. }
            | Command::DnsDrift { host, .. }
            | Command::Tls { host, .. } => *host = target,
            Command::TcpPing { hosts, .. } => {
                *hosts = target.split_whitespace().map(str::to_owned).collect()
            }
            Command::Subdomains { domain, .. } => *domain = target,
            Command::Proxies { file, .. } => *file = PathBuf::from(target),
            Command::HttpPing { url, .. } => *url = target,
            Command::Geoip { target: t, .. } | Command::Whois { target: t, .. } => *t = target,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize_logging(cli.verbose)?;
    let rt = tokio::runtime::Runtime::new().context("failed to start async runtime")?;

    if !cli.interactive {
        return rt.block_on(run_command(&cli, &cli.command));
    }

    let mut command = cli.command.clone();
    let outcome = session::drive(|pass, restarted| {
        if restarted && pass > 1 {
            match rt.block_on(prompt("New target: "))? {
                Some(t) if !t.trim().is_empty() => command.set_target(t.trim().to_string()),
                Some(_) => {}
                None => return Ok(SessionControl::Exit),
            }
        }
        rt.block_on(run_command(&cli, &command))?;
        let answer = rt.block_on(prompt("\n[Enter] run again, [r] new target, [q] quit: "))?;
        Ok(answer
            .map(|a| SessionControl::from_answer(&a))
            .unwrap_or(SessionControl::Exit))
    });
    // An interrupted prompt leaves its stdin reader blocked; do not wait for it.
    rt.shutdown_background();
    outcome.map(|_| ())
}

/// Ask on stdout and read one line. Ctrl-C or end of input gives `None`.
async fn prompt(text: &str) -> Result<Option<String>> {
    print!("{text}");
    io::stdout().flush()?;
    let answer = session::prompt_line(session::stdin_line(), async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C at the prompt");
            std::future::pending::<()>().await;
        }
    })
    .await?;
    if answer.is_none() {
        println!();
    }
    Ok(answer)
}

async fn run_command(cli: &Cli, command: &Command) -> Result<()> {
    let timeout = Duration::from_millis(cli.timeout_ms);
    match command {
        Command::Portscan { host, ports } => {
            let ports = targets::parse_port_spec(ports)?;
            let list = targets::port_targets(host, &ports);
            let cfg = pool_config(cli, TaskProfile::PortScan);
            print_config(cli, &cfg, list.len());
            let exec = ProbeExecutor::new()?;
            run_pool(cli, &format!("Port scan of {host}"), exec, list, &cfg).await
        }
        Command::Subdomains { domain, wordlist } => {
            let domain = targets::normalize_domain(domain);
            if domain.is_empty() {
                bail!("please enter a valid domain");
            }
            let words = load_lines(wordlist)?;
            let names = targets::subdomain_candidates(&domain, &words);
            let list = targets::dns_targets(names);
            let cfg = pool_config(cli, TaskProfile::SubdomainBruteForce);
            print_config(cli, &cfg, list.len());
            let exec = ProbeExecutor::new()?;
            run_pool(cli, &format!("Subdomains of {domain}"), exec, list, &cfg).await
        }
        Command::Proxies { file, echo_url } => {
            let proxies = load_proxies(file)?;
            let list = targets::proxy_targets(&proxies);
            let cfg = pool_config(cli, TaskProfile::ProxyCheck);
            print_config(cli, &cfg, list.len());
            let exec = ProbeExecutor::new()?.with_echo_url(echo_url.clone());
            run_pool(cli, "Proxy check", exec, list, &cfg).await
        }
        Command::TcpPing {
            hosts,
            port,
            count,
            interval_ms,
        } => {
            let strategy = privilege::select_latency_strategy(&EffectiveUser, false, *port);
            let list = hosts
                .iter()
                .map(|h| pinger::latency_target(h, strategy))
                .collect::<Option<Vec<_>>>();
            let Some(list) = list else {
                bail!("raw ICMP echo requires an external engine");
            };
            let settings = PingSettings {
                interval: Duration::from_millis(*interval_ms),
                timeout,
                count: *count,
            };
            if let [single] = list.as_slice() {
                let title = format!("TCP ping {single}");
                return run_ping(cli, &title, single.clone(), &settings).await;
            }
            run_mass_ping(cli, list, settings).await
        }
        Command::HttpPing {
            url,
            count,
            interval_ms,
        } => {
            let settings = PingSettings {
                interval: Duration::from_millis(*interval_ms),
                timeout,
                count: *count,
            };
            run_ping(cli, &format!("HTTP ping {url}"), ProbeTarget::http(url), &settings).await
        }
        Command::Geoip { target, via } => {
            let ip = resolve_ip(target).await?;
            let resolver = FallbackResolver::new();
            let found = match via {
                Some(file) => {
                    let rotation = ProxyRotation::new(load_proxies(file)?);
                    rotation::resolve_through_proxies(&resolver, &rotation, timeout, |_, client| {
                        enrich::geoip_candidates(client, ip, timeout)
                    })
                    .await
                }
                None => {
                    let client = enrich::enrichment_client(None, timeout)?;
                    resolver
                        .resolve(&enrich::geoip_candidates(&client, ip, timeout))
                        .await
                }
            };
            match found {
                Ok(found) => {
                    println!("GeoIP for {ip} (source: {})", found.source_id);
                    println!("{}", serde_json::to_string_pretty(&found.value)?);
                    write_json(cli.output.as_deref(), &found)
                }
                Err(e) => {
                    println!("GeoIP lookup for {ip} failed: {e}");
                    Ok(())
                }
            }
        }
        Command::Whois { target, via } => {
            let ip = resolve_ip(target).await?;
            let resolver = FallbackResolver::new();
            let found = match via {
                Some(file) => {
                    let rotation = ProxyRotation::new(load_proxies(file)?);
                    rotation::resolve_through_proxies(&resolver, &rotation, timeout, |_, client| {
                        enrich::whois_candidates(client, ip, timeout)
                    })
                    .await
                }
                None => {
                    let client = enrich::enrichment_client(None, timeout)?;
                    resolver
                        .resolve(&enrich::whois_candidates(&client, ip, timeout))
                        .await
                }
            };
            match found {
                Ok(found) => {
                    println!("WHOIS for {ip} (source: {})", found.source_id);
                    println!("{}", serde_json::to_string_pretty(&found.value)?);
                    write_json(cli.output.as_deref(), &found)
                }
                Err(e) => {
                    println!("WHOIS lookup for {ip} failed: {e}");
                    Ok(())
                }
            }
        }
        Command::Tls { host, port } => {
            let host = targets::normalize_domain(host);
            let candidates = tls::tls_candidates(&host, *port, timeout);
            match FallbackResolver::new().resolve(&candidates).await {
                Ok(found) => {
                    let now = time::OffsetDateTime::now_utc().unix_timestamp();
                    let assessment = tls::assess_certificate(&found.value, &host, now);
                    print_certificate(&host, *port, &found.value, &assessment);
                    write_json(
                        cli.output.as_deref(),
                        &serde_json::json!({
                            "certificate": found.value,
                            "assessment": assessment,
                        }),
                    )
                }
                Err(e) => {
                    println!("TLS check of {host}:{port} failed: {e}");
                    Ok(())
                }
            }
        }
        Command::DnsDrift {
            host,
            max_ratio,
            max_union,
        } => {
            let resolver = FallbackResolver::with_thresholds(ConsistencyThresholds {
                max_size_ratio: *max_ratio,
                max_union: *max_union,
            });
            let candidates = enrich::dns_drift_candidates(host, PUBLIC_RESOLVERS, timeout);
            let report = resolver.check_consistency(&candidates).await;
            println!("DNS drift check for {host}: {:?}", report.verdict);
            for r in &report.responses {
                match (&r.values, &r.error) {
                    (Some(v), _) => println!(
                        "  {:<28} {}",
                        r.source_id,
                        v.iter().cloned().collect::<Vec<_>>().join(", ")
                    ),
                    (None, Some(e)) => println!("  {:<28} error: {e}", r.source_id),
                    (None, None) => println!("  {:<28} no answer", r.source_id),
                }
            }
            write_json(cli.output.as_deref(), &report)
        }
    }
}

fn pool_config(cli: &Cli, profile: TaskProfile) -> WorkerPoolConfig {
    let timeout = Duration::from_millis(cli.timeout_ms);
    match cli.threads {
        Some(n) => {
            if n > MAX_WORKERS {
                warn!(requested = n, cap = MAX_WORKERS, "thread count capped");
            }
            WorkerPoolConfig::new(n, timeout, profile)
        }
        None => WorkerPoolConfig::recommended(profile, timeout),
    }
}

fn print_config(cli: &Cli, cfg: &WorkerPoolConfig, total: usize) {
    println!("recon-scan-rs configuration:");
    println!("  targets      : {total}");
    println!("  workers      : {}", cfg.size());
    println!("  timeout_ms   : {}", cli.timeout_ms);
    println!(
        "  output       : {}",
        cli.output
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<none>".to_string())
    );
    println!("Press Ctrl+C to stop early.");
}

fn new_controller() -> CancellationController {
    let mut controller = CancellationController::new();
    controller.watch_ctrl_c();
    controller
}

async fn run_pool(
    cli: &Cli,
    title: &str,
    exec: ProbeExecutor,
    list: Vec<ProbeTarget>,
    cfg: &WorkerPoolConfig,
) -> Result<()> {
    let controller = new_controller();
    let cancel = controller.handle();
    let stats = WorkDispatcher::new(exec).run(list, cfg, controller).await;
    emit(cli, title, &stats, cancel.is_signaled())
}

async fn run_ping(cli: &Cli, title: &str, target: ProbeTarget, settings: &PingSettings) -> Result<()> {
    let exec = ProbeExecutor::new()?;
    let controller = new_controller();
    let cancel = controller.handle();
    let stats = pinger::run_ping(&exec, &target, settings, controller, |seq, result| {
        match result {
            ProbeResult::Success { latency_ms } => {
                println!("[{seq}] reply from {target}: time={latency_ms:.2}ms")
            }
            other => println!("[{seq}] {target}: {other:?}"),
        }
    })
    .await;
    emit(cli, title, &stats, cancel.is_signaled())
}

async fn run_mass_ping(cli: &Cli, list: Vec<ProbeTarget>, settings: PingSettings) -> Result<()> {
    let exec = Arc::new(ProbeExecutor::new()?);
    let controller = new_controller();
    let cancel = controller.handle();
    let per_host = pinger::run_mass_ping(exec, list, settings, controller, |target, seq, result| {
        match result {
            ProbeResult::Success { latency_ms } => {
                println!("[{seq}] reply from {target}: time={latency_ms:.2}ms")
            }
            other => println!("[{seq}] {target}: {other:?}"),
        }
    })
    .await;

    let cancelled = cancel.is_signaled();
    let table = TableExporter {
        show_failures: cli.show_failures,
    };
    let mut reports = Vec::with_capacity(per_host.len());
    for (target, stats) in &per_host {
        let report = ScanReport::from_stats(&format!("TCP ping {target}"), stats, cancelled);
        table.export(&report)?;
        reports.push(report);
    }
    write_json(cli.output.as_deref(), &reports)
}

fn print_certificate(
    host: &str,
    port: u16,
    cert: &tls::CertificateInfo,
    assessment: &tls::CertificateAssessment,
) {
    println!("TLS certificate for {host}:{port}");
    println!("  subject      : {}", cert.subject);
    println!("  issuer       : {}", cert.issuer);
    println!("  names        : {}", cert.dns_names.join(", "));
    println!("  serial       : {}", cert.serial);
    println!("  signature    : {}", cert.signature_algorithm);
    println!("  expires in   : {} days", assessment.days_until_expiry);
    println!("  rating       : {:?}", assessment.rating);
    for issue in &assessment.issues {
        println!("  ! {issue}");
    }
}

fn emit(cli: &Cli, title: &str, stats: &AggregateStats, cancelled: bool) -> Result<()> {
    let report = ScanReport::from_stats(title, stats, cancelled);
    TableExporter {
        show_failures: cli.show_failures,
    }
    .export(&report)?;
    if let Some(path) = cli.output.as_deref() {
        let json = JsonExporter::new(path);
        match json.export(&report) {
            Ok(()) => println!("Wrote JSON results to {}", json.path().display()),
            Err(e) => eprintln!("Failed to write JSON to {}: {e:#}", path.display()),
        }
    }
    Ok(())
}

fn write_json<T: Serialize>(path: Option<&Path>, value: &T) -> Result<()> {
    if let Some(path) = path {
        let file = File::create(path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        serde_json::to_writer_pretty(file, value)?;
        println!("Wrote JSON results to {}", path.display());
    }
    Ok(())
}

fn load_proxies(path: &Path) -> Result<Vec<ProxyRecord>> {
    let reader = File::open(path)
        .with_context(|| format!("failed to open proxy list: {}", path.display()))?;
    serde_json::from_reader(reader)
        .with_context(|| format!("invalid proxy list: {}", path.display()))
}

fn load_lines(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read wordlist: {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_owned)
        .collect())
}

async fn resolve_ip(target: &str) -> Result<IpAddr> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }
    let host = targets::normalize_domain(target);
    let mut addrs = tokio::net::lookup_host((host.as_str(), 0))
        .await
        .with_context(|| format!("failed to resolve {host}"))?;
    match addrs.next() {
        Some(addr) => Ok(addr.ip()),
        None => bail!("{host} has no addresses"),
    }
}
