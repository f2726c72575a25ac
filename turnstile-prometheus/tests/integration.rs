use chrono::NaiveDate;
use prometheus::{Registry, TextEncoder};
use std::time::Duration;
use tower_service::Service;
use turnstile::{EndpointId, MetricsAccumulator};
use turnstile_prometheus::PrometheusSink;

fn value(registry: &Registry, name: &str, endpoint: &str) -> f64 {
    let text = TextEncoder::new().encode_to_string(&registry.gather()).expect("encode");
    let series = format!("{name}{{endpoint=\"{endpoint}\"}} ");
    text.lines()
        .find_map(|line| line.strip_prefix(series.as_str()))
        .map_or(0.0, |v| v.trim().parse().expect("sample value"))
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
}

#[tokio::test]
async fn counters_accumulate_across_batches() {
    let registry = Registry::new();
    let mut sink = PrometheusSink::new(registry.clone()).expect("sink");
    let acc = MetricsAccumulator::new();
    let e = EndpointId::new("GET /a");

    acc.record_latency(&e, Duration::from_millis(40));
    acc.record_rejection(&e);
    sink.call(acc.drain_and_reset_for(day())).await.unwrap();

    acc.record_latency(&e, Duration::from_millis(5));
    sink.call(acc.drain_and_reset_for(day())).await.unwrap();

    assert_eq!(value(&registry, "turnstile_requests_total", "GET /a"), 2.0);
    assert_eq!(value(&registry, "turnstile_rejections_total", "GET /a"), 1.0);
    assert_eq!(value(&registry, "turnstile_latency_ms_total", "GET /a"), 45.0);
    assert_eq!(value(&registry, "turnstile_max_latency_ms", "GET /a"), 5.0);
}

#[test]
fn duplicate_registration_fails() {
    let registry = Registry::new();
    let _first = PrometheusSink::new(registry.clone()).expect("sink");
    assert!(PrometheusSink::new(registry).is_err());
}
