//! One-stop assembly of the engine from a [`TurnstileConfig`].

use crate::admission::{AdmissionCache, AdmissionEngine};
use crate::clock::{Clock, MonotonicClock};
use crate::config::{ConfigError, TurnstileConfig};
use crate::control::ControlPlane;
use crate::fingerprint::FingerprintBuilder;
use crate::flush::FlushScheduler;
use crate::metrics::MetricsAccumulator;
use crate::middleware::AdmissionLayer;
use crate::rule_cache::{RuleCache, RuleSource};
use crate::sink::MetricsSink;
use crate::slow_response::{LogNotifier, SlowResponseMonitor, SlowResponseNotifier};
use std::sync::Arc;
use tracing::info;

/// A configured engine plus factories for the pieces hosts wire in.
///
/// # Examples
/// ```
/// use std::sync::Arc;
/// use turnstile::{InMemoryRuleSource, RequestParts, Rule, Turnstile, TurnstileConfig};
///
/// let source = InMemoryRuleSource::new();
/// source.insert(Rule::builder("GET /search").ip_based(true).limit(2, 60).ban_for(300).build().unwrap());
/// let turnstile = Turnstile::new(TurnstileConfig::default(), Arc::new(source)).unwrap();
///
/// let req = RequestParts::new("GET /search", "/search").with_remote_addr("192.0.2.1");
/// assert!(turnstile.engine().decide(&req).is_admitted());
/// assert!(turnstile.engine().decide(&req).is_admitted());
/// assert!(!turnstile.engine().decide(&req).is_admitted());
/// ```
#[derive(Debug, Clone)]
pub struct Turnstile {
    config: TurnstileConfig,
    engine: Arc<AdmissionEngine>,
}

impl Turnstile {
    /// Wall-clock timing, slow-response alerts logged through `tracing`.
    pub fn new(config: TurnstileConfig, rules: Arc<dyn RuleSource>) -> Result<Self, ConfigError> {
        Self::with_parts(config, rules, Arc::new(MonotonicClock::default()), Arc::new(LogNotifier))
    }

    /// Full control over the clock and the alert destination.
    pub fn with_parts(
        config: TurnstileConfig,
        rules: Arc<dyn RuleSource>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn SlowResponseNotifier>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let rule_cache =
            RuleCache::new(rules, config.rule_cache_capacity, config.rule_cache_idle());
        let admissions = AdmissionCache::new(
            config.admission_cache_capacity,
            config.admission_cache_idle(),
            clock.clone(),
        );
        let monitor = SlowResponseMonitor::new(config.slow_response_threshold(), notifier);
        let engine = AdmissionEngine::new(rule_cache, admissions, clock)
            .with_fingerprints(FingerprintBuilder::new(config.client_ip_strategy))
            .with_metrics(MetricsAccumulator::new())
            .with_slow_response_monitor(monitor)
            .with_admin_prefix(config.admin_path_prefix.clone());

        info!(
            target: "turnstile",
            admin_path_prefix = %config.admin_path_prefix,
            admission_cache_capacity = config.admission_cache_capacity,
            client_ip_strategy = ?config.client_ip_strategy,
            "turnstile initialised"
        );
        Ok(Self { config, engine: Arc::new(engine) })
    }

    pub fn config(&self) -> &TurnstileConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<AdmissionEngine> {
        &self.engine
    }

    /// Tower layer enforcing admission on wrapped services.
    pub fn layer(&self) -> AdmissionLayer {
        AdmissionLayer::new(self.engine.clone())
    }

    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane::new(self.engine.clone())
    }

    /// Scheduler draining this engine's metrics into `sink` at the configured interval.
    pub fn flush_scheduler<S>(&self, sink: S) -> FlushScheduler<S>
    where
        S: MetricsSink + Sync,
        S::Future: Send,
    {
        FlushScheduler::new(self.engine.metrics().clone(), sink)
            .with_interval(self.config.flush_interval())
    }
}
