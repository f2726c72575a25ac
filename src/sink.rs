//! Metrics sinks.
//!
//! A sink is a `tower::Service` that persists one [`MetricsBatch`] per call. The flush
//! scheduler drives it through `poll_ready` and `call` like any other service, so sinks
//! compose with ordinary tower middleware (timeouts, buffering, retries).

use crate::metrics::MetricsBatch;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use tower::Service;

/// A destination for drained metrics batches.
pub trait MetricsSink:
    tower::Service<MetricsBatch, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + Sync + 'static;
}

/// Wait for `sink` to become ready, then hand it `batch`.
pub async fn persist<S>(sink: S, batch: MetricsBatch) -> Result<(), S::Error>
where
    S: tower::Service<MetricsBatch, Response = ()>,
{
    use tower::ServiceExt;

    sink.oneshot(batch).await
}

/// Discards every batch.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<MetricsBatch> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _batch: MetricsBatch) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl MetricsSink for NullSink {
    type SinkError = Infallible;
}

/// Logs one `tracing` event per endpoint.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<MetricsBatch> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: MetricsBatch) -> Self::Future {
        for metric in &batch.metrics {
            tracing::info!(
                target: "turnstile::metrics",
                period = %batch.period,
                endpoint = %metric.endpoint,
                samples = metric.samples,
                total_latency_ms = metric.total_latency_ms,
                max_latency_ms = metric.max_latency_ms,
                rejections = metric.rejections,
                "endpoint_metrics"
            );
        }
        Box::pin(async { Ok(()) })
    }
}

impl MetricsSink for LogSink {
    type SinkError = Infallible;
}

/// Keeps batches in memory, dropping the oldest beyond `capacity`.
#[derive(Clone, Debug)]
pub struct MemorySink {
    batches: Arc<Mutex<Vec<MetricsBatch>>>,
    capacity: usize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::with_capacity(1_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { batches: Arc::new(Mutex::new(Vec::new())), capacity: capacity.max(1) }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MetricsBatch>> {
        self.batches.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn batches(&self) -> Vec<MetricsBatch> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<MetricsBatch> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, batch: MetricsBatch) -> Self::Future {
        let mut guard = self.lock();
        if guard.len() >= self.capacity {
            guard.remove(0);
        }
        guard.push(batch);
        Box::pin(async { Ok(()) })
    }
}

impl MetricsSink for MemorySink {
    type SinkError = Infallible;
}
