use std::collections::{BTreeSet, HashSet};
use std::ops::RangeInclusive;

use anyhow::{ensure, Context, Result};

use crate::types::{ProbeTarget, ProxyRecord};

/// Words from the front of the list that are also combined pairwise.
const COMBO_HEAD: usize = 100;
/// Second words used in pairwise combinations.
const COMBO_TAIL: usize = 20;

/// Parse a port specification into TCP ports (1..=65535), first occurrence wins.
///
/// Entries are `80` or `8000-8010`, separated by commas or newlines. Text after `#`
/// on a line is a comment.
pub fn parse_port_spec(s: &str) -> Result<Vec<u16>> {
    let mut seen = HashSet::new();
    let mut ports = Vec::new();
    for entry in spec_entries(s) {
        let range = port_range(entry).with_context(|| format!("bad port entry `{entry}`"))?;
        ports.extend(range.filter(|p| seen.insert(*p)));
    }
    Ok(ports)
}

fn spec_entries(s: &str) -> impl Iterator<Item = &str> {
    s.lines()
        .filter_map(|line| line.split('#').next())
        .flat_map(|line| line.split(','))
        .map(str::trim)
        .filter(|e| !e.is_empty())
}

fn port_range(entry: &str) -> Result<RangeInclusive<u16>> {
    let Some((lo, hi)) = entry.split_once('-') else {
        let p = port_number(entry)?;
        return Ok(p..=p);
    };
    let (lo, hi) = (port_number(lo)?, port_number(hi)?);
    ensure!(lo <= hi, "range {lo}-{hi} has start > end");
    Ok(lo..=hi)
}

fn port_number(s: &str) -> Result<u16> {
    let n: u16 = s.trim().parse().with_context(|| format!("`{}` is not a port", s.trim()))?;
    ensure!(n != 0, "port 0 is reserved");
    Ok(n)
}

/// One TCP connect target per port on `host`, in port order as given.
pub fn port_targets(host: &str, ports: &[u16]) -> Vec<ProbeTarget> {
    ports.iter().map(|&p| ProbeTarget::tcp(host, p)).collect()
}

/// Strip a URL scheme and path so `https://example.com/x` becomes `example.com`.
pub fn normalize_domain(input: &str) -> String {
    let s = input.trim();
    let s = s
        .strip_prefix("http://")
        .or_else(|| s.strip_prefix("https://"))
        .unwrap_or(s);
    s.split('/').next().unwrap_or("").trim_end_matches('.').to_ascii_lowercase()
}

/// Candidate subdomains for `domain` from a wordlist.
///
/// Every word yields `word.domain`. The first 100 words are also paired with the first 20
/// as `w1.w2.domain` and `w1-w2.domain`. Output is deduplicated and sorted.
pub fn subdomain_candidates(domain: &str, words: &[String]) -> Vec<String> {
    let words: Vec<&str> = words
        .iter()
        .map(|w| w.trim())
        .filter(|w| !w.is_empty())
        .collect();
    let mut out = BTreeSet::new();
    for w in &words {
        out.insert(format!("{w}.{domain}"));
    }
    let head = &words[..words.len().min(COMBO_HEAD)];
    let tail = &head[..head.len().min(COMBO_TAIL)];
    for w1 in head {
        for w2 in tail {
            out.insert(format!("{w1}.{w2}.{domain}"));
            out.insert(format!("{w1}-{w2}.{domain}"));
        }
    }
    out.into_iter().collect()
}

pub fn dns_targets(names: impl IntoIterator<Item = String>) -> Vec<ProbeTarget> {
    names.into_iter().map(ProbeTarget::dns).collect()
}

pub fn proxy_targets(proxies: &[ProxyRecord]) -> Vec<ProbeTarget> {
    proxies.iter().map(ProxyRecord::to_target).collect()
}
