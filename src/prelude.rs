//! Convenient re-exports for wiring Turnstile into a service.
pub use crate::{
    admission::{RejectCause, Rejection, RetryAfter, Verdict},
    middleware::{AdmissionLayer, AdmissionService},
    request::{RequestContext, RequestParts},
    rule::{EndpointId, Rule, RuleStatus},
    rule_cache::{InMemoryRuleSource, RuleSource, RuleSourceError},
    sink::{LogSink, MemorySink, MetricsSink, NullSink},
    AdmissionError, Turnstile, TurnstileConfig,
};
