//! Prometheus metrics sink for `turnstile`.
//! Bring your own `prometheus::Registry`; counters are registered once and incremented
//! by every flushed batch, labelled by endpoint.

use prometheus::{IntCounterVec, IntGaugeVec, Opts, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};
use turnstile::{MetricsBatch, MetricsSink};

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    requests: IntCounterVec,
    rejections: IntCounterVec,
    latency_ms: IntCounterVec,
    max_latency_ms: IntGaugeVec,
}

impl PrometheusSink {
    /// Create a sink and register its metrics into the provided registry.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let requests = IntCounterVec::new(
            Opts::new("turnstile_requests_total", "Completed requests per endpoint"),
            &["endpoint"],
        )?;
        let rejections = IntCounterVec::new(
            Opts::new("turnstile_rejections_total", "Requests rejected by admission"),
            &["endpoint"],
        )?;
        let latency_ms = IntCounterVec::new(
            Opts::new("turnstile_latency_ms_total", "Summed request latency in milliseconds"),
            &["endpoint"],
        )?;
        let max_latency_ms = IntGaugeVec::new(
            Opts::new("turnstile_max_latency_ms", "Slowest request in the last flushed period"),
            &["endpoint"],
        )?;
        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(rejections.clone()))?;
        registry.register(Box::new(latency_ms.clone()))?;
        registry.register(Box::new(max_latency_ms.clone()))?;
        Ok(Self { registry, requests, rejections, latency_ms, max_latency_ms })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<MetricsBatch> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: MetricsBatch) -> Self::Future {
        for metric in &batch.metrics {
            let labels = [metric.endpoint.as_str()];
            self.requests.with_label_values(&labels).inc_by(metric.samples);
            self.rejections.with_label_values(&labels).inc_by(metric.rejections);
            self.latency_ms.with_label_values(&labels).inc_by(metric.total_latency_ms);
            let max = i64::try_from(metric.max_latency_ms).unwrap_or(i64::MAX);
            self.max_latency_ms.with_label_values(&labels).set(max);
        }
        tracing::trace!(target: "turnstile::prometheus", endpoints = batch.len(), "batch exported");
        ready(Ok(()))
    }
}

impl MetricsSink for PrometheusSink {
    type SinkError = Infallible;
}
