mod common;

use common::{client, harness_with_rules};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use turnstile::{RejectCause, RequestParts, RetryAfter, Rule, RuleStatus, Verdict};

fn login_rule() -> Rule {
    Rule::builder("POST /login").ip_based(true).limit(3, 10).ban_for(60).build().unwrap()
}

#[test]
fn three_per_ten_seconds_then_sixty_second_ban() {
    let h = harness_with_rules([login_rule()]);
    let engine = h.turnstile.engine();
    let req = client("POST /login", "203.0.113.5");

    let mut verdicts = Vec::new();
    for t in [0, 2, 4, 6] {
        h.clock.set_millis(t * 1_000);
        verdicts.push(engine.decide(&req));
    }
    assert!(verdicts[..3].iter().all(Verdict::is_admitted));
    assert_eq!(verdicts[3].rejection().unwrap().retry_after, RetryAfter::Seconds(60));

    h.clock.set_millis(30_000);
    let mid = engine.decide(&req);
    assert_eq!(mid.rejection().map(|r| r.cause), Some(RejectCause::Banned));
    assert_eq!(mid.rejection().unwrap().retry_after, RetryAfter::Seconds(36));

    // ban issued at t=6 lifts at t=66
    h.clock.set_millis(65_999);
    assert!(!engine.decide(&req).is_admitted());
    h.clock.set_millis(66_000);
    assert!(engine.decide(&req).is_admitted());
}

#[test]
fn evenly_spaced_calls_are_never_limited() {
    let h = harness_with_rules([login_rule()]);
    let req = client("POST /login", "203.0.113.5");
    // three calls per window, at exactly the limit forever
    for i in 0..60u64 {
        h.clock.set_millis(i * 3_400);
        assert!(h.turnstile.engine().decide(&req).is_admitted(), "call {i} rejected");
    }
}

#[test]
fn callers_are_isolated_by_fingerprint() {
    let rule = Rule::builder("POST /transfer")
        .body_field("account")
        .limit(1, 60)
        .ban_for(60)
        .build()
        .unwrap();
    let h = harness_with_rules([rule]);
    let engine = h.turnstile.engine();
    let account = |id: &str| RequestParts::new("POST /transfer", "/transfer").with_body(json!({ "account": id }));

    assert!(engine.decide(&account("a-1")).is_admitted());
    assert!(!engine.decide(&account("a-1")).is_admitted());
    assert!(engine.decide(&account("a-2")).is_admitted());
}

#[test]
fn permanent_ban_survives_time_until_reset() {
    let rule = Rule::builder("POST /login").ip_based(true).limit(1, 10).permanent_ban().build().unwrap();
    let h = harness_with_rules([rule]);
    let engine = h.turnstile.engine();
    let req = client("POST /login", "198.51.100.1");

    engine.decide(&req);
    let banned = engine.decide(&req);
    let rejection = banned.rejection().unwrap();
    assert_eq!(rejection.retry_after, RetryAfter::Unbounded);
    assert_eq!(rejection.retry_after_header(), i32::MAX.to_string());

    h.clock.advance(Duration::from_secs(365 * 24 * 3_600));
    assert!(!engine.decide(&req).is_admitted());

    let fp = engine.fingerprint(&req).unwrap();
    assert!(engine.reset_fingerprint(&fp));
    assert!(engine.decide(&req).is_admitted());
}

#[test]
fn inactive_and_missing_rules_admit_everything() {
    let inactive = Rule::builder("GET /feed")
        .status(RuleStatus::Inactive)
        .ip_based(true)
        .limit(1, 60)
        .ban_for(60)
        .build()
        .unwrap();
    let h = harness_with_rules([inactive]);
    for _ in 0..10 {
        assert!(h.turnstile.engine().decide(&client("GET /feed", "1.1.1.1")).is_admitted());
        assert!(h.turnstile.engine().decide(&client("GET /other", "1.1.1.1")).is_admitted());
    }
}

#[test]
fn rule_update_applies_to_next_request() {
    let h = harness_with_rules([login_rule()]);
    let engine = h.turnstile.engine();
    let req = client("POST /login", "203.0.113.5");
    assert!(engine.decide(&req).is_admitted());

    let stricter = Rule::builder("POST /login").ip_based(true).limit(1, 10).ban_for(5).build().unwrap();
    engine.rules().put(stricter).unwrap();
    let verdict = engine.decide(&req);
    assert_eq!(verdict.rejection().unwrap().retry_after, RetryAfter::Seconds(5));
}

#[test]
fn concurrent_callers_trigger_exactly_one_ban() {
    let rule = Rule::builder("POST /login").ip_based(true).limit(10, 60).ban_for(60).build().unwrap();
    let h = harness_with_rules([rule]);
    let engine = h.turnstile.engine().clone();
    let admitted = AtomicUsize::new(0);
    let issued = AtomicUsize::new(0);

    std::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|| {
                let req = client("POST /login", "192.0.2.44");
                for _ in 0..25 {
                    match engine.decide(&req) {
                        Verdict::Admit => {
                            admitted.fetch_add(1, Ordering::SeqCst);
                        }
                        Verdict::Reject(r) if r.cause == RejectCause::BanIssued => {
                            issued.fetch_add(1, Ordering::SeqCst);
                        }
                        Verdict::Reject(_) => {}
                    }
                }
            });
        }
    });

    assert_eq!(admitted.load(Ordering::SeqCst), 10);
    assert_eq!(issued.load(Ordering::SeqCst), 1);
    let rejections = engine.metrics().snapshot(&"POST /login".into()).unwrap().rejections;
    assert_eq!(rejections, 190);
}
