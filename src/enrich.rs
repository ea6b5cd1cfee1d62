//! Concrete fallback chains for GeoIP, WHOIS and DNS drift checks.
//!
//! Only candidate construction and payload normalisation live here; ordering and
//! classification are the [`FallbackResolver`](crate::fallback::FallbackResolver)'s job.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ReconError;
use crate::fallback::EndpointCandidate;
use crate::types::ProxyRecord;

/// Public resolvers queried by the DNS drift check, in query order.
pub const PUBLIC_RESOLVERS: &[(&str, IpAddr)] = &[
    ("google", IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8))),
    ("cloudflare", IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))),
    ("opendns", IpAddr::V4(Ipv4Addr::new(208, 67, 222, 222))),
    ("quad9", IpAddr::V4(Ipv4Addr::new(9, 9, 9, 9))),
];

/// GeoIP data normalised to one shape regardless of which provider answered.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoIpRecord {
    pub ip: Option<String>,
    pub hostname: Option<String>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
    pub loc: Option<String>,
    pub org: Option<String>,
    pub postal: Option<String>,
    pub timezone: Option<String>,
}

/// HTTP client for enrichment lookups, optionally routed through a proxy.
pub fn enrichment_client(
    proxy: Option<&ProxyRecord>,
    timeout: Duration,
) -> Result<reqwest::Client, ReconError> {
    let mut builder = reqwest::Client::builder()
        .user_agent(concat!("recon-scan-rs/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout);
    if let Some(p) = proxy {
        let mut proxy =
            reqwest::Proxy::all(format!("{}://{}:{}", p.protocol.scheme(), p.host, p.port))?;
        if let Some(user) = &p.username {
            proxy = proxy.basic_auth(user, p.password.as_deref().unwrap_or(""));
        }
        builder = builder.proxy(proxy);
    }
    Ok(builder.build()?)
}

/// ipinfo.io, then ipapi.co, then ip-api.com.
pub fn geoip_candidates(
    client: &reqwest::Client,
    ip: IpAddr,
    timeout: Duration,
) -> Vec<EndpointCandidate<GeoIpRecord>> {
    vec![
        json_candidate(
            "ipinfo.io",
            client,
            format!("https://ipinfo.io/{ip}/json"),
            timeout,
            geoip_from_ipinfo,
        ),
        json_candidate(
            "ipapi.co",
            client,
            format!("https://ipapi.co/{ip}/json/"),
            timeout,
            geoip_from_ipapi_co,
        ),
        json_candidate(
            "ip-api.com",
            client,
            format!("http://ip-api.com/json/{ip}"),
            timeout,
            geoip_from_ip_api,
        ),
    ]
}

/// ARIN's REST service, then ipwhois.app.
pub fn whois_candidates(
    client: &reqwest::Client,
    ip: IpAddr,
    timeout: Duration,
) -> Vec<EndpointCandidate<Value>> {
    vec![
        json_candidate(
            "ARIN",
            client,
            format!("https://whois.arin.net/rest/ip/{ip}.json"),
            timeout,
            Some,
        ),
        json_candidate(
            "ipwhois.app",
            client,
            format!("https://ipwhois.app/json/{ip}"),
            timeout,
            |v: Value| {
                let ok = v.get("success").and_then(Value::as_bool) == Some(true);
                ok.then_some(v)
            },
        ),
    ]
}

/// One candidate per resolver, each asking only that server for `host`'s A records.
pub fn dns_drift_candidates(
    host: &str,
    resolvers: &[(&str, IpAddr)],
    timeout: Duration,
) -> Vec<EndpointCandidate<BTreeSet<String>>> {
    resolvers
        .iter()
        .map(|&(id, server)| {
            let host = host.to_string();
            EndpointCandidate::new(format!("{id} ({server})"), timeout, move || {
                let host = host.clone();
                async move { a_records_via(server, &host, timeout).await }
            })
        })
        .collect()
}

async fn a_records_via(
    server: IpAddr,
    host: &str,
    timeout: Duration,
) -> anyhow::Result<BTreeSet<String>> {
    let config = ResolverConfig::from_parts(
        None,
        Vec::new(),
        NameServerConfigGroup::from_ips_clear(&[server], 53, true),
    );
    let mut opts = ResolverOpts::default();
    opts.timeout = timeout;
    opts.attempts = 1;
    opts.cache_size = 0;
    let resolver = TokioAsyncResolver::tokio(config, opts);
    let lookup = resolver
        .ipv4_lookup(host)
        .await
        .with_context(|| format!("A lookup for {host} via {server}"))?;
    let ips: BTreeSet<String> = lookup.iter().map(|a| a.0.to_string()).collect();
    if ips.is_empty() {
        bail!("{server} returned no A records for {host}");
    }
    Ok(ips)
}

fn json_candidate<T, F>(
    id: &'static str,
    client: &reqwest::Client,
    url: String,
    timeout: Duration,
    normalize: F,
) -> EndpointCandidate<T>
where
    T: Send + 'static,
    F: Fn(Value) -> Option<T> + Copy + Send + Sync + 'static,
{
    let client = client.clone();
    EndpointCandidate::new(id, timeout, move || {
        let client = client.clone();
        let url = url.clone();
        async move {
            let body = fetch_json(&client, &url).await?;
            normalize(body).ok_or_else(|| anyhow!("{id} returned an unusable payload"))
        }
    })
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    let resp = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("GET {url}"))?;
    if resp.status() != reqwest::StatusCode::OK {
        bail!("GET {url}: HTTP {}", resp.status().as_u16());
    }
    Ok(resp.json::<Value>().await?)
}

pub fn geoip_from_ipinfo(v: Value) -> Option<GeoIpRecord> {
    if v.get("error").is_some() {
        return None;
    }
    Some(GeoIpRecord {
        ip: field(&v, "ip"),
        hostname: field(&v, "hostname"),
        city: field(&v, "city"),
        region: field(&v, "region"),
        country: field(&v, "country"),
        loc: field(&v, "loc"),
        org: field(&v, "org"),
        postal: field(&v, "postal"),
        timezone: field(&v, "timezone"),
    })
}

pub fn geoip_from_ipapi_co(v: Value) -> Option<GeoIpRecord> {
    if v.get("error").is_some() {
        return None;
    }
    Some(GeoIpRecord {
        ip: field(&v, "ip"),
        hostname: field(&v, "hostname"),
        city: field(&v, "city"),
        region: field(&v, "region"),
        country: field(&v, "country_name"),
        loc: coords(&v, "latitude", "longitude"),
        org: field(&v, "org"),
        postal: field(&v, "postal"),
        timezone: field(&v, "timezone"),
    })
}

pub fn geoip_from_ip_api(v: Value) -> Option<GeoIpRecord> {
    if v.get("status").and_then(Value::as_str) != Some("success") {
        return None;
    }
    Some(GeoIpRecord {
        ip: field(&v, "query"),
        hostname: None,
        city: field(&v, "city"),
        region: field(&v, "regionName"),
        country: field(&v, "country"),
        loc: coords(&v, "lat", "lon"),
        org: field(&v, "isp"),
        postal: field(&v, "zip"),
        timezone: field(&v, "timezone"),
    })
}

fn field(v: &Value, key: &str) -> Option<String> {
    match v.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn coords(v: &Value, lat: &str, lon: &str) -> Option<String> {
    Some(format!("{},{}", field(v, lat)?, field(v, lon)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ipinfo_error_payload_is_rejected() {
        let v = json!({"error": {"title": "Wrong ip"}});
        assert!(geoip_from_ipinfo(v).is_none());
    }

    #[test]
    fn ipapi_co_is_normalised() {
        let v = json!({
            "ip": "198.51.100.7",
            "city": "Lisbon",
            "region": "Lisbon",
            "country_name": "Portugal",
            "latitude": 38.72,
            "longitude": -9.13,
            "org": "Example ISP",
            "postal": "1000-001",
            "timezone": "Europe/Lisbon"
        });
        let rec = geoip_from_ipapi_co(v).unwrap();
        assert_eq!(rec.country.as_deref(), Some("Portugal"));
        assert_eq!(rec.loc.as_deref(), Some("38.72,-9.13"));
        assert_eq!(rec.hostname, None);
    }

    #[test]
    fn ip_api_requires_success_status() {
        let fail = json!({"status": "fail", "message": "reserved range"});
        assert!(geoip_from_ip_api(fail).is_none());

        let ok = json!({
            "status": "success",
            "query": "203.0.113.9",
            "regionName": "Bavaria",
            "country": "Germany",
            "lat": 48.1,
            "lon": 11.5,
            "isp": "Example GmbH",
            "zip": "80331"
        });
        let rec = geoip_from_ip_api(ok).unwrap();
        assert_eq!(rec.ip.as_deref(), Some("203.0.113.9"));
        assert_eq!(rec.region.as_deref(), Some("Bavaria"));
        assert_eq!(rec.org.as_deref(), Some("Example GmbH"));
    }

    #[test]
    fn candidate_order_is_stable() {
        let client = reqwest::Client::new();
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        let ids: Vec<String> = geoip_candidates(&client, ip, Duration::from_secs(1))
            .iter()
            .map(|c| c.id().to_string())
            .collect();
        assert_eq!(ids, ["ipinfo.io", "ipapi.co", "ip-api.com"]);

        let drift = dns_drift_candidates("example.com", PUBLIC_RESOLVERS, Duration::from_secs(1));
        assert_eq!(drift.len(), 4);
        assert!(drift[0].id().starts_with("google"));
    }
}
