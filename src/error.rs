use thiserror::Error;

/// Errors surfaced by the library. Per-probe failures are `ProbeResult` values, not errors.
#[derive(Error, Debug)]
pub enum ReconError {
    #[error("no service available (tried: {})", attempted.join(", "))]
    ServiceUnavailable { attempted: Vec<String> },
    #[error("no working proxy left (failed: {})", failed.join(", "))]
    NoWorkingProxy { failed: Vec<String> },
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}
