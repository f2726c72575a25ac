//! Per-endpoint latency and rejection counters.
//!
//! The accumulator is a sharded map keyed by endpoint. Every record updates one entry
//! while holding that entry's shard lock, and draining removes entries one by one, so a
//! record is counted wholly in the batch being drained or wholly in the next one.

use crate::rule::EndpointId;
use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Counters {
    samples: u64,
    total_latency_ms: u64,
    max_latency_ms: u64,
    rejections: u64,
}

/// Aggregated metrics for one endpoint over one flush period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointMetric {
    pub endpoint: EndpointId,
    /// Completed requests whose latency was recorded.
    pub samples: u64,
    pub total_latency_ms: u64,
    pub max_latency_ms: u64,
    /// Requests rejected by admission.
    pub rejections: u64,
}

impl EndpointMetric {
    fn from_counters(endpoint: EndpointId, c: Counters) -> Self {
        Self {
            endpoint,
            samples: c.samples,
            total_latency_ms: c.total_latency_ms,
            max_latency_ms: c.max_latency_ms,
            rejections: c.rejections,
        }
    }

    /// Mean latency, `None` without samples.
    pub fn average_latency_ms(&self) -> Option<f64> {
        (self.samples > 0).then(|| self.total_latency_ms as f64 / self.samples as f64)
    }
}

/// Everything drained in one flush, tagged with the period's UTC calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsBatch {
    pub period: NaiveDate,
    /// Sorted by endpoint.
    pub metrics: Vec<EndpointMetric>,
}

impl MetricsBatch {
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    pub fn get(&self, endpoint: &EndpointId) -> Option<&EndpointMetric> {
        self.metrics.iter().find(|m| &m.endpoint == endpoint)
    }
}

/// Concurrent metrics accumulator. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    counters: Arc<DashMap<EndpointId, Counters>>,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed request.
    pub fn record_latency(&self, endpoint: &EndpointId, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        let mut entry = self.counters.entry(endpoint.clone()).or_default();
        entry.samples += 1;
        entry.total_latency_ms = entry.total_latency_ms.saturating_add(millis);
        entry.max_latency_ms = entry.max_latency_ms.max(millis);
    }

    /// Record one rejected request.
    pub fn record_rejection(&self, endpoint: &EndpointId) {
        self.counters.entry(endpoint.clone()).or_default().rejections += 1;
    }

    /// Take everything accumulated so far, dated today (UTC).
    pub fn drain_and_reset(&self) -> MetricsBatch {
        self.drain_and_reset_for(Utc::now().date_naive())
    }

    /// Take everything accumulated so far, dated `period`.
    pub fn drain_and_reset_for(&self, period: NaiveDate) -> MetricsBatch {
        let keys: Vec<EndpointId> = self.counters.iter().map(|e| e.key().clone()).collect();
        let mut metrics: Vec<EndpointMetric> = keys
            .into_iter()
            .filter_map(|key| self.counters.remove(&key))
            .map(|(endpoint, counters)| EndpointMetric::from_counters(endpoint, counters))
            .collect();
        metrics.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        MetricsBatch { period, metrics }
    }

    /// Endpoints with undrained counters.
    pub fn pending_endpoints(&self) -> usize {
        self.counters.len()
    }

    /// Current counters for `endpoint` without draining.
    pub fn snapshot(&self, endpoint: &EndpointId) -> Option<EndpointMetric> {
        self.counters
            .get(endpoint)
            .map(|c| EndpointMetric::from_counters(endpoint.clone(), *c.value()))
    }
}
