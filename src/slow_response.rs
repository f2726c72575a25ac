//! Slow-response detection.
//!
//! Each endpoint is either `Normal` or in `Warning`. Crossing the threshold upwards emits
//! one [`SlowResponseAlert::Degraded`]; the first latency back at or under the threshold
//! emits [`SlowResponseAlert::Recovered`]. Observations in between stay silent, so a
//! sustained slowdown produces exactly two alerts.

use crate::dynamic::DynamicConfig;
use crate::rule::EndpointId;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

/// A change in an endpoint's latency health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlowResponseAlert {
    Degraded { endpoint: EndpointId, latency: Duration, threshold: Duration },
    Recovered { endpoint: EndpointId, latency: Duration, threshold: Duration },
}

impl SlowResponseAlert {
    pub fn endpoint(&self) -> &EndpointId {
        match self {
            SlowResponseAlert::Degraded { endpoint, .. } | SlowResponseAlert::Recovered { endpoint, .. } => endpoint,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, SlowResponseAlert::Degraded { .. })
    }
}

impl fmt::Display for SlowResponseAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlowResponseAlert::Degraded { endpoint, latency, threshold } => write!(
                f,
                "{endpoint} responded in {}ms, over the {}ms threshold",
                latency.as_millis(),
                threshold.as_millis()
            ),
            SlowResponseAlert::Recovered { endpoint, latency, threshold } => write!(
                f,
                "{endpoint} recovered: {}ms within the {}ms threshold",
                latency.as_millis(),
                threshold.as_millis()
            ),
        }
    }
}

/// Receives slow-response alerts. Delivery (mail, chat, paging) is up to the host.
pub trait SlowResponseNotifier: Send + Sync + fmt::Debug {
    fn notify(&self, alert: SlowResponseAlert);
}

/// Logs alerts through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl SlowResponseNotifier for LogNotifier {
    fn notify(&self, alert: SlowResponseAlert) {
        if alert.is_degraded() {
            warn!(target: "turnstile::slow_response", endpoint = %alert.endpoint(), "{alert}");
        } else {
            info!(target: "turnstile::slow_response", endpoint = %alert.endpoint(), "{alert}");
        }
    }
}

/// Keeps alerts in memory, for tests and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    alerts: Arc<Mutex<Vec<SlowResponseAlert>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<SlowResponseAlert> {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

impl SlowResponseNotifier for RecordingNotifier {
    fn notify(&self, alert: SlowResponseAlert) {
        self.alerts.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(alert);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Health {
    Normal,
    Warning,
}

/// Per-endpoint slow-response state machine.
#[derive(Debug, Clone)]
pub struct SlowResponseMonitor {
    threshold: DynamicConfig<Option<Duration>>,
    states: Arc<DashMap<EndpointId, Health>>,
    notifier: Arc<dyn SlowResponseNotifier>,
}

impl SlowResponseMonitor {
    /// `threshold` of `None` disables the monitor.
    pub fn new(threshold: Option<Duration>, notifier: Arc<dyn SlowResponseNotifier>) -> Self {
        Self {
            threshold: DynamicConfig::new(threshold),
            states: Arc::new(DashMap::new()),
            notifier,
        }
    }

    pub fn threshold(&self) -> Option<Duration> {
        self.threshold.load()
    }

    /// Change the threshold at runtime. Disabling forgets every endpoint's state.
    pub fn set_threshold(&self, threshold: Option<Duration>) {
        self.threshold.set(threshold);
        if threshold.is_none() {
            self.states.clear();
        }
    }

    /// Feed one completed request's latency.
    pub fn observe(&self, endpoint: &EndpointId, latency: Duration) {
        let Some(threshold) = self.threshold.load() else {
            return;
        };
        let slow = latency > threshold;

        let alert = {
            let mut state = self.states.entry(endpoint.clone()).or_insert(Health::Normal);
            match (*state, slow) {
                (Health::Normal, true) => {
                    *state = Health::Warning;
                    Some(SlowResponseAlert::Degraded { endpoint: endpoint.clone(), latency, threshold })
                }
                (Health::Warning, false) => {
                    *state = Health::Normal;
                    Some(SlowResponseAlert::Recovered { endpoint: endpoint.clone(), latency, threshold })
                }
                _ => None,
            }
        };
        // Shard guard is released before calling out.
        if let Some(alert) = alert {
            self.notifier.notify(alert);
        }
    }

    /// Endpoints currently in warning.
    pub fn degraded_endpoints(&self) -> Vec<EndpointId> {
        let mut out: Vec<_> = self
            .states
            .iter()
            .filter(|e| *e.value() == Health::Warning)
            .map(|e| e.key().clone())
            .collect();
        out.sort();
        out
    }
}
