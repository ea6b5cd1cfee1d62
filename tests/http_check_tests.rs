use std::net::IpAddr;
use std::time::Duration;

use recon_scan_rs::enrich;
use recon_scan_rs::fallback::FallbackResolver;
use recon_scan_rs::probe::{ProbeExecutor, Prober};
use recon_scan_rs::rotation::{self, ProxyRotation};
use recon_scan_rs::types::{
    AnonymityLevel, Observation, ProbeOutcome, ProbeResult, ProbeTarget, ProxyProtocol,
    ProxyRecord,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(3);

/// Loopback HTTP server (or forward proxy) that answers every GET with the same response
/// and refuses CONNECT tunnels.
async fn canned_http(status: u16, body: &'static str) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        while let Ok((mut sock, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let (status, body) = if request.starts_with(b"CONNECT") {
                    (403, "")
                } else {
                    (status, body)
                };
                let response = format!(
                    "HTTP/1.1 {status} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(response.as_bytes()).await;
                let _ = sock.shutdown().await;
            });
        }
    });
    port
}

fn closed_port() -> u16 {
    let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    l.local_addr().unwrap().port()
}

async fn check_proxy(status: u16, body: &'static str) -> ProbeOutcome {
    let port = canned_http(status, body).await;
    let target = ProxyRecord::new("127.0.0.1", port, ProxyProtocol::Http).to_target();
    ProbeExecutor::new()
        .unwrap()
        .with_echo_url("http://echo.test/ip")
        .probe(&target, WAIT)
        .await
}

fn anonymity(out: &ProbeOutcome) -> AnonymityLevel {
    match &out.observation {
        Some(Observation::EchoedOrigin { anonymity, .. }) => *anonymity,
        other => panic!("expected an echoed origin, got {other:?}"),
    }
}

#[tokio::test]
async fn proxy_leaking_its_own_address_is_transparent() {
    let out = check_proxy(200, r#"{"origin": "127.0.0.1"}"#).await;
    assert!(out.result.is_success());
    assert_eq!(anonymity(&out), AnonymityLevel::Transparent);
}

#[tokio::test]
async fn proxy_hiding_everything_is_elite() {
    let out = check_proxy(200, r#"{"origin": "203.0.113.9"}"#).await;
    assert_eq!(anonymity(&out), AnonymityLevel::Elite);

    let out = check_proxy(200, r#"{"origin": ""}"#).await;
    assert_eq!(anonymity(&out), AnonymityLevel::Elite);
}

#[tokio::test]
async fn forwarding_chain_is_anonymous() {
    let out = check_proxy(200, r#"{"origin": "203.0.113.9, 198.51.100.4"}"#).await;
    assert_eq!(anonymity(&out), AnonymityLevel::Anonymous);
}

#[tokio::test]
async fn unreadable_echo_body_is_unknown() {
    let out = check_proxy(200, "not json").await;
    assert!(out.result.is_success());
    assert_eq!(anonymity(&out), AnonymityLevel::Unknown);

    let out = check_proxy(200, r#"{"ip": "203.0.113.9"}"#).await;
    assert_eq!(anonymity(&out), AnonymityLevel::Unknown);
}

#[tokio::test]
async fn proxy_error_status_is_protocol_error() {
    let out = check_proxy(503, "").await;
    assert_eq!(out.result, ProbeResult::protocol_error("HTTP 503"));
    assert_eq!(out.observation, None);
}

#[tokio::test]
async fn dead_proxy_is_refused() {
    let target = ProxyRecord::new("127.0.0.1", closed_port(), ProxyProtocol::Http).to_target();
    let out = ProbeExecutor::new()
        .unwrap()
        .with_echo_url("http://echo.test/ip")
        .probe(&target, WAIT)
        .await;
    assert!(matches!(
        out.result,
        ProbeResult::Refused | ProbeResult::Unreachable
    ));
}

#[tokio::test]
async fn plain_get_reports_status() {
    let exec = ProbeExecutor::new().unwrap();

    let port = canned_http(200, "{}").await;
    let ok = exec
        .probe(&ProbeTarget::http(format!("http://127.0.0.1:{port}/health")), WAIT)
        .await;
    assert!(ok.result.is_success());
    assert_eq!(ok.observation, Some(Observation::HttpStatus { code: 200 }));

    let port = canned_http(404, "{}").await;
    let missing = exec
        .probe(&ProbeTarget::http(format!("http://127.0.0.1:{port}/nope")), WAIT)
        .await;
    assert_eq!(missing.result, ProbeResult::protocol_error("HTTP 404"));
    assert_eq!(missing.observation, Some(Observation::HttpStatus { code: 404 }));
}

#[tokio::test]
async fn geoip_lookup_rotates_past_a_dead_proxy() {
    let live = canned_http(
        200,
        r#"{"status": "success", "query": "203.0.113.9", "country": "Germany"}"#,
    )
    .await;
    let dead = ProxyRecord::new("127.0.0.1", closed_port(), ProxyProtocol::Http);
    let rotation = ProxyRotation::new(vec![
        dead.clone(),
        ProxyRecord::new("127.0.0.1", live, ProxyProtocol::Http),
    ]);
    let ip: IpAddr = "203.0.113.9".parse().unwrap();

    let found = rotation::resolve_through_proxies(
        &FallbackResolver::new(),
        &rotation,
        WAIT,
        |_, client| enrich::geoip_candidates(client, ip, WAIT),
    )
    .await
    .unwrap();

    assert_eq!(found.source_id, "ip-api.com");
    assert_eq!(found.value.country.as_deref(), Some("Germany"));
    assert_eq!(rotation.failed(), vec![dead]);
}
