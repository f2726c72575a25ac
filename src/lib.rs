#![forbid(unsafe_code)]

//! # Turnstile
//!
//! Per-endpoint request admission control: sliding-window limits keyed by a fingerprint
//! of the caller and selected request inputs, with temporary or permanent bans once a
//! caller exceeds its limit.
//!
//! ## Features
//!
//! - **Rules** per endpoint, cached and live-replaceable
//! - **Fingerprints** over client address, parameters, headers and payload fields
//! - **Atomic per-fingerprint evaluation** without a global lock
//! - **Tower middleware** that short-circuits with a retry-after hint
//! - **Metrics** accumulated per endpoint and flushed to pluggable sinks
//! - **Slow-response alerts** with a live-tunable threshold
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use turnstile::{InMemoryRuleSource, RequestParts, Rule, Turnstile, TurnstileConfig, Verdict};
//!
//! let rules = InMemoryRuleSource::new();
//! rules.insert(
//!     Rule::builder("POST /login")
//!         .ip_based(true)
//!         .body_field("username")
//!         .limit(5, 60)
//!         .ban_for(900)
//!         .build()
//!         .unwrap(),
//! );
//! let turnstile = Turnstile::new(TurnstileConfig::default(), Arc::new(rules)).unwrap();
//!
//! let req = RequestParts::new("POST /login", "/login").with_remote_addr("198.51.100.7");
//! match turnstile.engine().decide(&req) {
//!     Verdict::Admit => { /* handle the request */ }
//!     Verdict::Reject(r) => println!("429, Retry-After: {}", r.retry_after_header()),
//! }
//! ```

pub mod admission;
pub mod clock;
pub mod config;
pub mod control;
pub mod dynamic;
pub mod error;
pub mod fingerprint;
pub mod flush;
pub mod metrics;
pub mod middleware;
pub mod prelude;
pub mod request;
pub mod rule;
pub mod rule_cache;
pub mod sink;
pub mod slow_response;
mod turnstile;

// Re-exports
pub use admission::{
    Admission, AdmissionCache, AdmissionEngine, BanExpiry, RejectCause, Rejection, RetryAfter,
    Verdict,
};
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{ConfigError, TurnstileConfig};
pub use control::{CommandResult, ControlCommand, ControlError, ControlPlane, EngineSnapshot};
pub use dynamic::DynamicConfig;
pub use error::AdmissionError;
pub use fingerprint::{ClientIpStrategy, Fingerprint, FingerprintBuilder};
pub use flush::{FlushError, FlushHandle, FlushScheduler};
pub use metrics::{EndpointMetric, MetricsAccumulator, MetricsBatch};
pub use middleware::{AdmissionLayer, AdmissionService};
pub use request::{RequestContext, RequestParts};
pub use rule::{EndpointId, Rule, RuleBuilder, RuleError, RuleStatus};
pub use rule_cache::{InMemoryRuleSource, RuleCache, RuleSource, RuleSourceError};
pub use sink::{LogSink, MemorySink, MetricsSink, NullSink};
pub use slow_response::{
    LogNotifier, RecordingNotifier, SlowResponseAlert, SlowResponseMonitor, SlowResponseNotifier,
};
pub use turnstile::Turnstile;
