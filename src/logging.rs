use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable consulted after `RUST_LOG`.
pub const LOG_ENV: &str = "RECON_SCAN_RS_LOGLEVEL";

/// Filter directive: `RUST_LOG`, then `RECON_SCAN_RS_LOGLEVEL`, then a default by verbosity.
pub fn log_directive(verbose: u8) -> String {
    std::env::var("RUST_LOG")
        .or_else(|_| std::env::var(LOG_ENV))
        .unwrap_or_else(|_| {
            let level = match verbose {
                0 => "info",
                1 => "debug",
                _ => "trace",
            };
            format!("{}={level}", env!("CARGO_CRATE_NAME"))
        })
}

/// Install a stderr subscriber so log lines never mix with report output on stdout.
pub fn initialize_logging(verbose: u8) -> Result<()> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(EnvFilter::new(log_directive(verbose)));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {e}"))
}
