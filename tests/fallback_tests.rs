use std::collections::BTreeSet;
use std::time::Duration;

use recon_scan_rs::error::ReconError;
use recon_scan_rs::fallback::{
    ConsistencyThresholds, ConsistencyVerdict, EndpointCandidate, FallbackResolver,
};

const WAIT: Duration = Duration::from_millis(200);

fn failing<T: Send + 'static>(id: &str) -> EndpointCandidate<T> {
    EndpointCandidate::new(id, WAIT, || async { Err::<T, _>(anyhow::anyhow!("no answer")) })
}

fn answering(id: &str, values: &[&str]) -> EndpointCandidate<BTreeSet<String>> {
    let set: BTreeSet<String> = values.iter().map(|s| s.to_string()).collect();
    EndpointCandidate::new(id, WAIT, move || {
        let set = set.clone();
        async move { Ok::<_, anyhow::Error>(set) }
    })
}

#[tokio::test]
async fn second_endpoint_answers_after_first_fails() {
    let candidates = vec![
        failing("A"),
        EndpointCandidate::new("B", WAIT, || async { Ok::<_, anyhow::Error>("from-b".to_string()) }),
    ];
    let found = FallbackResolver::new().resolve(&candidates).await.unwrap();
    assert_eq!(found.value, "from-b");
    assert_eq!(found.source_id, "B");
}

#[tokio::test]
async fn all_failing_is_service_unavailable() {
    let candidates: Vec<EndpointCandidate<String>> = vec![failing("A"), failing("B")];
    let err = FallbackResolver::new().resolve(&candidates).await.unwrap_err();
    match err {
        ReconError::ServiceUnavailable { attempted } => assert_eq!(attempted, vec!["A", "B"]),
        other => panic!("unexpected error {other:?}"),
    }
}

#[tokio::test]
async fn slow_endpoint_times_out_and_falls_through() {
    let candidates = vec![
        EndpointCandidate::new("slow", Duration::from_millis(20), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, anyhow::Error>(1u32)
        }),
        EndpointCandidate::new("fast", WAIT, || async { Ok::<_, anyhow::Error>(2u32) }),
    ];
    let found = FallbackResolver::new().resolve(&candidates).await.unwrap();
    assert_eq!(found.value, 2);
    assert_eq!(found.source_id, "fast");
}

#[tokio::test]
async fn geodns_rotation_is_normal_variation() {
    let candidates = vec![
        answering("r1", &["10.0.0.1", "10.0.0.2"]),
        answering("r2", &["10.0.0.1", "10.0.0.2"]),
        answering("r3", &["10.0.0.1", "10.0.0.2"]),
        answering("r4", &["10.0.0.1", "10.0.0.2", "10.0.0.3"]),
    ];
    let report = FallbackResolver::new().check_consistency(&candidates).await;
    assert_eq!(report.verdict, ConsistencyVerdict::NormalVariation);
    assert_eq!(report.responses.len(), 4);
}

#[tokio::test]
async fn wildly_larger_answer_is_suspicious() {
    let many: Vec<String> = (1..=25).map(|i| format!("10.1.0.{i}")).collect();
    let many: Vec<&str> = many.iter().map(String::as_str).collect();
    let candidates = vec![
        answering("r1", &["10.0.0.1", "10.0.0.2"]),
        answering("r2", &["10.0.0.1", "10.0.0.2"]),
        answering("r3", &many),
    ];
    let report = FallbackResolver::new().check_consistency(&candidates).await;
    assert_eq!(report.verdict, ConsistencyVerdict::Suspicious);
}

#[tokio::test]
async fn identical_answers_are_consistent() {
    let candidates = vec![
        answering("r1", &["10.0.0.1"]),
        answering("r2", &["10.0.0.1"]),
        answering("r3", &["10.0.0.1"]),
    ];
    let report = FallbackResolver::new().check_consistency(&candidates).await;
    assert_eq!(report.verdict, ConsistencyVerdict::Consistent);
}

#[tokio::test]
async fn single_usable_answer_is_insufficient() {
    let candidates = vec![
        answering("r1", &["10.0.0.1"]),
        failing("r2"),
        failing("r3"),
    ];
    let report = FallbackResolver::new().check_consistency(&candidates).await;
    assert_eq!(report.verdict, ConsistencyVerdict::InsufficientData);
    assert!(report.responses[1].error.is_some());
}

#[tokio::test]
async fn thresholds_are_configurable() {
    let candidates = vec![
        answering("r1", &["10.0.0.1"]),
        answering("r2", &["10.0.0.1", "10.0.0.2"]),
    ];
    let strict = FallbackResolver::with_thresholds(ConsistencyThresholds {
        max_size_ratio: 1,
        max_union: 20,
    });
    let report = strict.check_consistency(&candidates).await;
    assert_eq!(report.verdict, ConsistencyVerdict::Suspicious);
}
