mod common;

use common::{capture_logs, client, harness};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use turnstile::{EndpointId, Rule, RuleSource, RuleSourceError, TurnstileConfig};

/// Source that can be switched between failing and serving one strict rule.
#[derive(Debug, Default)]
struct FlakySource {
    down: AtomicBool,
}

impl RuleSource for FlakySource {
    fn load_rule(&self, endpoint: &EndpointId) -> Result<Option<Rule>, RuleSourceError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(RuleSourceError::unavailable("connection refused"));
        }
        Ok(Some(Rule::builder(endpoint.clone()).ip_based(true).limit(1, 60).ban_for(60).build().unwrap()))
    }
}

#[test]
fn unavailable_source_admits_and_warns() {
    let source = Arc::new(FlakySource::default());
    source.down.store(true, Ordering::SeqCst);
    let h = harness(TurnstileConfig::default(), source.clone());
    let req = client("GET /report", "10.1.1.1");

    let logs = capture_logs(tracing::Level::WARN, || {
        for _ in 0..3 {
            assert!(h.turnstile.engine().decide(&req).is_admitted());
        }
    });
    assert!(logs.contains("rule source unavailable"), "logs: {logs}");
    assert!(logs.contains("turnstile::admission"));
    assert!(logs.contains("connection refused"));

    // failures are not cached: once the source recovers the rule applies
    source.down.store(false, Ordering::SeqCst);
    assert!(h.turnstile.engine().decide(&req).is_admitted());
    assert!(!h.turnstile.engine().decide(&req).is_admitted());
}

#[test]
fn ban_issue_is_logged_at_info() {
    let h = harness(TurnstileConfig::default(), Arc::new(FlakySource::default()));
    let req = client("GET /report", "10.1.1.2");
    let logs = capture_logs(tracing::Level::INFO, || {
        h.turnstile.engine().decide(&req);
        h.turnstile.engine().decide(&req);
    });
    assert!(logs.contains("ban issued"), "logs: {logs}");
}
