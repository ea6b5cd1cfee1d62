use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;
use time::{format_description::well_known, OffsetDateTime};

use crate::types::{AggregateStats, Observation, ProbeResult, ProbeTarget, ScanSummary};

/// Widest detail cell in the table, in characters.
const DETAIL_WIDTH: usize = 60;

/// One row of a report: a target, its result and whatever the probe observed.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub target: ProbeTarget,
    pub result: ProbeResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observation: Option<Observation>,
}

/// Serializable view of a finished run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub title: String,
    pub generated_at: String,
    pub cancelled: bool,
    pub summary: ScanSummary,
    pub outcomes: Vec<TargetOutcome>,
}

impl ScanReport {
    /// Outcomes are sorted by target so output is stable across runs.
    pub fn from_stats(title: impl Into<String>, stats: &AggregateStats, cancelled: bool) -> Self {
        let outcomes = stats
            .sorted_results()
            .into_iter()
            .map(|(target, result)| TargetOutcome {
                target: target.clone(),
                result: result.clone(),
                observation: stats.observations.get(target).cloned(),
            })
            .collect();
        Self {
            title: title.into(),
            generated_at: now_rfc3339(),
            cancelled,
            summary: stats.summary(),
            outcomes,
        }
    }

    pub fn successes(&self) -> impl Iterator<Item = &TargetOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_success())
    }
}

/// Output sink for finished runs. The engine has no knowledge of formats.
pub trait ReportExporter {
    fn export(&self, report: &ScanReport) -> Result<()>;
}

/// Pretty JSON written to a file.
#[derive(Debug, Clone)]
pub struct JsonExporter {
    path: PathBuf,
}

impl JsonExporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ReportExporter for JsonExporter {
    fn export(&self, report: &ScanReport) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("failed to create {}", self.path.display()))?;
        serde_json::to_writer_pretty(file, report)?;
        Ok(())
    }
}

/// Plain aligned table on stdout. Only successful targets are listed unless `show_failures`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TableExporter {
    pub show_failures: bool,
}

impl ReportExporter for TableExporter {
    fn export(&self, report: &ScanReport) -> Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        write_table(&mut out, report, self.show_failures)?;
        Ok(())
    }
}

pub fn write_table<W: Write>(out: &mut W, report: &ScanReport, show_failures: bool) -> Result<()> {
    let rows: Vec<(String, String, String)> = report
        .outcomes
        .iter()
        .filter(|o| show_failures || o.result.is_success())
        .map(|o| {
            (
                o.target.to_string(),
                result_cell(&o.result),
                o.observation.as_ref().map(observation_cell).unwrap_or_default(),
            )
        })
        .collect();

    let mut target_w = "target".len();
    let mut result_w = "result".len();
    for (t, r, _) in &rows {
        target_w = target_w.max(t.len());
        result_w = result_w.max(r.len());
    }

    let s = &report.summary;
    writeln!(out, "\n{}{}", report.title, if report.cancelled { " (cancelled)" } else { "" })?;
    writeln!(
        out,
        "attempts: {}  successes: {}  failures: {}  timeouts: {}  loss: {:.1}%",
        s.attempts, s.successes, s.failures, s.timeouts, s.loss_pct
    )?;
    writeln!(
        out,
        "latency ms  avg: {:.2}  min: {:.2}  max: {:.2}",
        s.avg_ms, s.min_ms, s.max_ms
    )?;
    if rows.is_empty() {
        return Ok(());
    }
    writeln!(
        out,
        "{:<target_w$}  {:<result_w$}  detail",
        "target",
        "result",
        target_w = target_w,
        result_w = result_w
    )?;
    writeln!(
        out,
        "{:-<target_w$}  {:-<result_w$}  ------",
        "",
        "",
        target_w = target_w,
        result_w = result_w
    )?;
    for (t, r, d) in rows {
        let detail: String = d.chars().take(DETAIL_WIDTH).collect();
        writeln!(
            out,
            "{:<target_w$}  {:<result_w$}  {}",
            t,
            r,
            detail,
            target_w = target_w,
            result_w = result_w
        )?;
    }
    Ok(())
}

fn result_cell(r: &ProbeResult) -> String {
    match r {
        ProbeResult::Success { latency_ms } => format!("ok {latency_ms:.1}ms"),
        ProbeResult::Timeout => "timeout".into(),
        ProbeResult::Refused => "refused".into(),
        ProbeResult::Unreachable => "unreachable".into(),
        ProbeResult::ProtocolError { message } => format!("error: {message}"),
    }
}

fn observation_cell(o: &Observation) -> String {
    match o {
        Observation::Addresses { addrs } => addrs
            .iter()
            .map(|a| a.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        Observation::EchoedOrigin { origin, anonymity } => format!("{anonymity:?} ({origin})"),
        Observation::HttpStatus { code } => format!("HTTP {code}"),
        Observation::Banner {
            text,
            service,
            version,
        } => match version {
            Some(v) => format!("{service} [{v}] {text}"),
            None => format!("{service} {text}"),
        },
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&well_known::Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
