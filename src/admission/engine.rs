//! The per-request admission pipeline.

use super::cache::AdmissionCache;
use super::{RetryAfter, Verdict};
use crate::clock::Clock;
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::metrics::MetricsAccumulator;
use crate::request::RequestContext;
use crate::rule::EndpointId;
use crate::rule_cache::RuleCache;
use crate::slow_response::{LogNotifier, SlowResponseMonitor};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Path prefix of the engine's own administrative surface unless configured otherwise.
pub const DEFAULT_ADMIN_PREFIX: &str = "/turnstile";

/// Outcome of [`AdmissionEngine::check`].
///
/// `endpoint` is set when the request belongs to a tracked endpoint; callers time
/// admitted requests against it and report back through
/// [`AdmissionEngine::record_completion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub endpoint: Option<EndpointId>,
    pub verdict: Verdict,
}

impl Admission {
    fn untracked() -> Self {
        Self { endpoint: None, verdict: Verdict::Admit }
    }

    pub fn is_admitted(&self) -> bool {
        self.verdict.is_admitted()
    }
}

/// Decides whether each request may proceed.
///
/// Lookup order: endpoint identity, administrative path exemption, rule (absent or
/// not active admits), fingerprint, then atomic evaluation in the admission cache.
/// The hot path is synchronous and never awaits.
#[derive(Debug, Clone)]
pub struct AdmissionEngine {
    rules: RuleCache,
    admissions: AdmissionCache,
    fingerprints: FingerprintBuilder,
    metrics: MetricsAccumulator,
    slow_responses: SlowResponseMonitor,
    clock: Arc<dyn Clock>,
    admin_prefix: String,
}

impl AdmissionEngine {
    /// `clock` must be the same clock `admissions` was built with.
    pub fn new(rules: RuleCache, admissions: AdmissionCache, clock: Arc<dyn Clock>) -> Self {
        Self {
            rules,
            admissions,
            fingerprints: FingerprintBuilder::default(),
            metrics: MetricsAccumulator::new(),
            slow_responses: SlowResponseMonitor::new(None, Arc::new(LogNotifier)),
            clock,
            admin_prefix: DEFAULT_ADMIN_PREFIX.to_string(),
        }
    }

    pub fn with_fingerprints(mut self, fingerprints: FingerprintBuilder) -> Self {
        self.fingerprints = fingerprints;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsAccumulator) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_slow_response_monitor(mut self, monitor: SlowResponseMonitor) -> Self {
        self.slow_responses = monitor;
        self
    }

    /// Requests under this path prefix are never limited.
    ///
    /// An empty prefix disables the exemption. So does `/`, which
    /// [`TurnstileConfig::validate`](crate::TurnstileConfig::validate) refuses.
    pub fn with_admin_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.admin_prefix = prefix.into().trim_end_matches('/').to_string();
        self
    }

    pub fn rules(&self) -> &RuleCache {
        &self.rules
    }

    pub fn admissions(&self) -> &AdmissionCache {
        &self.admissions
    }

    pub fn metrics(&self) -> &MetricsAccumulator {
        &self.metrics
    }

    pub fn slow_responses(&self) -> &SlowResponseMonitor {
        &self.slow_responses
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }

    /// The verdict for `request`.
    pub fn decide<R: RequestContext + ?Sized>(&self, request: &R) -> Verdict {
        self.check(request).verdict
    }

    /// The verdict for `request`, together with the endpoint it was tracked under.
    ///
    /// A rejection is counted against the endpoint in the metrics accumulator.
    pub fn check<R: RequestContext + ?Sized>(&self, request: &R) -> Admission {
        let Some(endpoint) = self.tracked_endpoint(request) else {
            return Admission::untracked();
        };
        let verdict = self.evaluate(&endpoint, request);
        if !verdict.is_admitted() {
            self.metrics.record_rejection(&endpoint);
        }
        Admission { endpoint: Some(endpoint), verdict }
    }

    /// Report the latency of an admitted request.
    pub fn record_completion(&self, endpoint: &EndpointId, latency: Duration) {
        self.metrics.record_latency(endpoint, latency);
        self.slow_responses.observe(endpoint, latency);
    }

    /// Fingerprint `request` would be admitted under, if its endpoint has an active rule.
    pub fn fingerprint<R: RequestContext + ?Sized>(&self, request: &R) -> Option<Fingerprint> {
        let endpoint = self.tracked_endpoint(request)?;
        let rule = self.rules.get_or_load(&endpoint).ok().flatten().filter(|r| r.is_active())?;
        Some(self.fingerprints.build(&endpoint, &rule, request))
    }

    /// Live ban on `fingerprint`, if any.
    pub fn ban_status(&self, fingerprint: &Fingerprint) -> Option<RetryAfter> {
        self.admissions.ban_status(fingerprint, self.clock.now_millis())
    }

    /// Clear the ban and history of one fingerprint.
    pub fn reset_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        self.admissions.reset(fingerprint)
    }

    /// Clear every ban and history.
    pub fn reset_all_bans(&self) {
        self.admissions.reset_all();
    }

    fn tracked_endpoint<R: RequestContext + ?Sized>(&self, request: &R) -> Option<EndpointId> {
        let endpoint = request.endpoint()?;
        if self.is_admin_path(request.path()) {
            return None;
        }
        Some(endpoint)
    }

    fn is_admin_path(&self, path: &str) -> bool {
        if self.admin_prefix.is_empty() {
            return false;
        }
        match path.strip_prefix(self.admin_prefix.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('/'),
            None => false,
        }
    }

    fn evaluate<R: RequestContext + ?Sized>(&self, endpoint: &EndpointId, request: &R) -> Verdict {
        let rule = match self.rules.get_or_load(endpoint) {
            Ok(Some(rule)) if rule.is_active() => rule,
            Ok(_) => return Verdict::Admit,
            Err(e) => {
                warn!(
                    target: "turnstile::admission",
                    endpoint = %endpoint,
                    error = %e,
                    "rule source unavailable, admitting request"
                );
                return Verdict::Admit;
            }
        };

        let fingerprint = self.fingerprints.build(endpoint, &rule, request);
        let verdict = self.admissions.evaluate(&fingerprint, &rule, self.clock.now_millis());
        debug!(
            target: "turnstile::admission",
            endpoint = %endpoint,
            fingerprint = %fingerprint,
            admitted = verdict.is_admitted(),
            "admission decided"
        );
        verdict
    }
}
