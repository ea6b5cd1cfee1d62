//! TLS certificate retrieval and a coarse security assessment of what the server presents.
//!
//! The handshake accepts any certificate so that expired, self-signed or mismatched ones can
//! still be inspected. Nothing here should be read as chain validation.

use std::time::Duration;

use anyhow::{anyhow, Context};
use serde::Serialize;
use tokio::net::TcpStream;
use tracing::{debug, info};
use x509_parser::prelude::*;

use crate::fallback::EndpointCandidate;

/// Days before expiry at which a certificate is flagged.
pub const EXPIRY_WARNING_DAYS: i64 = 30;
/// Handshake attempts, each with a longer timeout than the last.
pub const HANDSHAKE_ATTEMPTS: u32 = 3;

const SECS_PER_DAY: i64 = 86_400;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateInfo {
    pub subject: String,
    pub issuer: String,
    pub common_names: Vec<String>,
    pub dns_names: Vec<String>,
    /// X.509 version as printed by tools, i.e. 3 for v3.
    pub version: u32,
    pub serial: String,
    pub signature_algorithm: String,
    /// Unix seconds.
    pub not_before: i64,
    /// Unix seconds.
    pub not_after: i64,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityRating {
    Good,
    Fair,
    Poor,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct CertificateAssessment {
    pub days_until_expiry: i64,
    pub is_valid: bool,
    pub is_expired: bool,
    pub expires_soon: bool,
    pub hostname_match: bool,
    pub weak_signature: bool,
    pub issues: Vec<String>,
    pub rating: SecurityRating,
}

/// Judge `cert` for `hostname` at `now` (unix seconds).
pub fn assess_certificate(cert: &CertificateInfo, hostname: &str, now: i64) -> CertificateAssessment {
    let days_until_expiry = (cert.not_after - now).div_euclid(SECS_PER_DAY);
    let is_expired = now > cert.not_after;
    let not_yet_valid = now < cert.not_before;
    let is_valid = !is_expired && !not_yet_valid;
    let expires_soon = !is_expired && days_until_expiry <= EXPIRY_WARNING_DAYS;
    let hostname_match = cert
        .dns_names
        .iter()
        .chain(&cert.common_names)
        .any(|pattern| name_matches(pattern, hostname));
    let weak_signature = is_weak_signature(&cert.signature_algorithm);

    let mut issues = Vec::new();
    if is_expired {
        issues.push(format!("certificate expired {} days ago", -days_until_expiry));
    } else if expires_soon {
        issues.push(format!("certificate expires in {days_until_expiry} days"));
    }
    if not_yet_valid {
        issues.push("certificate is not yet valid".to_string());
    }
    if !hostname_match {
        issues.push(format!("certificate does not cover {hostname}"));
    }
    if weak_signature {
        issues.push(format!("weak signature algorithm {}", cert.signature_algorithm));
    }

    let rating = match issues.len() {
        0 => SecurityRating::Good,
        1 | 2 => SecurityRating::Fair,
        _ => SecurityRating::Poor,
    };
    CertificateAssessment {
        days_until_expiry,
        is_valid,
        is_expired,
        expires_soon,
        hostname_match,
        weak_signature,
        issues,
        rating,
    }
}

/// Certificate name matching with a single leftmost wildcard label (`*.example.com`).
pub fn name_matches(pattern: &str, hostname: &str) -> bool {
    let pattern = pattern.trim_end_matches('.').to_ascii_lowercase();
    let host = hostname.trim_end_matches('.').to_ascii_lowercase();
    match pattern.strip_prefix("*.") {
        Some(suffix) => match host.split_once('.') {
            Some((label, rest)) => !label.is_empty() && rest == suffix,
            None => false,
        },
        None => pattern == host,
    }
}

fn is_weak_signature(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.contains("md5") || name.contains("sha1")
}

fn signature_name(oid: &str) -> String {
    let name = match oid {
        "1.2.840.113549.1.1.4" => "md5WithRSAEncryption",
        "1.2.840.113549.1.1.5" => "sha1WithRSAEncryption",
        "1.2.840.113549.1.1.10" => "rsassaPss",
        "1.2.840.113549.1.1.11" => "sha256WithRSAEncryption",
        "1.2.840.113549.1.1.12" => "sha384WithRSAEncryption",
        "1.2.840.113549.1.1.13" => "sha512WithRSAEncryption",
        "1.2.840.10040.4.3" => "dsa-with-sha1",
        "1.2.840.10045.4.1" => "ecdsa-with-SHA1",
        "1.2.840.10045.4.3.2" => "ecdsa-with-SHA256",
        "1.2.840.10045.4.3.3" => "ecdsa-with-SHA384",
        "1.2.840.10045.4.3.4" => "ecdsa-with-SHA512",
        "1.3.101.112" => "Ed25519",
        other => return other.to_string(),
    };
    name.to_string()
}

/// Decode a DER certificate into the fields the assessment needs.
pub fn certificate_from_der(der: &[u8]) -> anyhow::Result<CertificateInfo> {
    let (_, x509) = parse_x509_certificate(der).map_err(|e| anyhow!("X.509 parse error: {e}"))?;
    let common_names = x509
        .subject()
        .iter_common_name()
        .filter_map(|cn| cn.as_str().ok())
        .map(str::to_owned)
        .collect();
    let dns_names = match x509.subject_alternative_name() {
        Ok(Some(san)) => san
            .value
            .general_names
            .iter()
            .filter_map(|name| match name {
                GeneralName::DNSName(dns) => Some(dns.to_string()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    let validity = x509.validity();
    Ok(CertificateInfo {
        subject: x509.subject().to_string(),
        issuer: x509.issuer().to_string(),
        common_names,
        dns_names,
        version: x509.version().0 + 1,
        serial: x509.raw_serial_as_string(),
        signature_algorithm: signature_name(&x509.signature_algorithm.algorithm.to_id_string()),
        not_before: validity.not_before.timestamp(),
        not_after: validity.not_after.timestamp(),
    })
}

/// Handshake with `host:port` and return the leaf certificate it presents.
pub async fn fetch_certificate(host: &str, port: u16) -> anyhow::Result<CertificateInfo> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .context("failed to build TLS connector")?;
    let connector = tokio_native_tls::TlsConnector::from(connector);

    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connect to {host}:{port}"))?;
    debug!(host, port, "TCP connected, starting TLS handshake");
    let stream = connector
        .connect(host, tcp)
        .await
        .with_context(|| format!("TLS handshake with {host}:{port}"))?;
    let cert = stream
        .get_ref()
        .peer_certificate()
        .context("reading peer certificate")?
        .ok_or_else(|| anyhow!("{host}:{port} presented no certificate"))?;
    let info = certificate_from_der(&cert.to_der().context("encoding certificate")?)?;
    info!(host, subject = %info.subject, issuer = %info.issuer, "certificate retrieved");
    Ok(info)
}

/// `HANDSHAKE_ATTEMPTS` tries against the same server with timeouts of 1x, 2x and 3x `base`.
pub fn tls_candidates(
    host: &str,
    port: u16,
    base: Duration,
) -> Vec<EndpointCandidate<CertificateInfo>> {
    (1..=HANDSHAKE_ATTEMPTS)
        .map(|n| {
            let host = host.to_string();
            EndpointCandidate::new(format!("{host}:{port} attempt {n}"), base * n, move || {
                let host = host.clone();
                async move { fetch_certificate(&host, port).await }
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const DAY: i64 = SECS_PER_DAY;

    fn cert(not_before: i64, not_after: i64, sig: &str) -> CertificateInfo {
        CertificateInfo {
            subject: "CN=www.example.test".into(),
            issuer: "CN=Example CA".into(),
            common_names: vec!["www.example.test".into()],
            dns_names: vec!["www.example.test".into(), "*.api.example.test".into()],
            version: 3,
            serial: "01".into(),
            signature_algorithm: sig.into(),
            not_before,
            not_after,
        }
    }

    #[test]
    fn healthy_certificate_is_good() {
        let now = 1_000 * DAY;
        let c = cert(now - DAY, now + 200 * DAY, "ecdsa-with-SHA256");
        let a = assess_certificate(&c, "www.example.test", now);
        assert!(a.is_valid && a.hostname_match && !a.expires_soon);
        assert_eq!(a.days_until_expiry, 200);
        assert!(a.issues.is_empty());
        assert_eq!(a.rating, SecurityRating::Good);
    }

    #[test]
    fn expiring_certificate_is_fair() {
        let now = 1_000 * DAY;
        let c = cert(now - DAY, now + 30 * DAY, "sha256WithRSAEncryption");
        let a = assess_certificate(&c, "x.api.example.test", now);
        assert!(a.expires_soon);
        assert_eq!(a.issues.len(), 1);
        assert_eq!(a.rating, SecurityRating::Fair);
    }

    #[test]
    fn expired_mismatched_sha1_is_poor() {
        let now = 1_000 * DAY;
        let c = cert(now - 400 * DAY, now - 10 * DAY, "sha1WithRSAEncryption");
        let a = assess_certificate(&c, "other.test", now);
        assert!(a.is_expired && !a.is_valid && !a.expires_soon);
        assert!(!a.hostname_match && a.weak_signature);
        assert_eq!(a.days_until_expiry, -10);
        assert_eq!(a.rating, SecurityRating::Poor);
    }

    #[test]
    fn wildcard_covers_one_label_only() {
        assert!(name_matches("*.example.com", "WWW.example.com."));
        assert!(!name_matches("*.example.com", "a.b.example.com"));
        assert!(!name_matches("*.example.com", "example.com"));
        assert!(name_matches("example.com", "example.com"));
    }

    #[test]
    fn unknown_signature_oid_is_kept_verbatim() {
        assert_eq!(signature_name("1.2.3.4"), "1.2.3.4");
        assert_eq!(signature_name("1.2.840.113549.1.1.5"), "sha1WithRSAEncryption");
    }

    #[test]
    fn garbage_der_is_an_error() {
        assert!(certificate_from_der(b"not a certificate").is_err());
    }
}
