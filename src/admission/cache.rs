//! The admission cache: access windows and bans keyed by fingerprint.
//!
//! Each fingerprint owns one slot holding both its [`AccessHistory`] and its optional
//! [`BanExpiry`] behind a `Mutex`. Evaluation locks only that slot, so the check-then-act
//! sequence is atomic for one fingerprint while different fingerprints never contend.
//!
//! Slots live in a bounded [`moka`] cache. Idle slots are evicted after the configured idle
//! time or the rule's window, whichever is longer, so a history is never dropped while it
//! still counts. A banned slot is kept at least until its ban expires and a permanently
//! banned slot is never idle-evicted. Capacity pressure can still evict any slot; under
//! that pressure a fingerprint may briefly start over from `Unseen`.

use super::ban::BanExpiry;
use super::window::AccessHistory;
use super::{RejectCause, Rejection, RetryAfter, Verdict};
use crate::clock::Clock;
use crate::fingerprint::Fingerprint;
use crate::rule::Rule;
use moka::sync::Cache;
use moka::Expiry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info};

// Encoding of `Slot::ban_hint`, read by the eviction policy without taking the slot lock.
const NO_BAN: u64 = 0;
const PERMANENT_BAN: u64 = u64::MAX;

#[derive(Debug, Default)]
struct SlotState {
    history: AccessHistory,
    ban: Option<BanExpiry>,
}

#[derive(Debug, Default)]
struct Slot {
    state: Mutex<SlotState>,
    ban_hint: AtomicU64,
    // Window of the last rule evaluated against this slot, in milliseconds.
    window_ms: AtomicU64,
}

impl Slot {
    fn with_window(window_ms: u64) -> Self {
        Self { window_ms: AtomicU64::new(window_ms), ..Self::default() }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_ban(&self, state: &mut SlotState, ban: Option<BanExpiry>) {
        state.ban = ban;
        let hint = match ban {
            None => NO_BAN,
            Some(BanExpiry::Permanent) => PERMANENT_BAN,
            Some(BanExpiry::At(expiry)) => expiry.clamp(1, PERMANENT_BAN - 1),
        };
        self.ban_hint.store(hint, Ordering::Release);
    }
}

/// Per-entry expiry: idle time, stretched to cover the access window and live bans.
struct SlotExpiry {
    idle: Duration,
    clock: Arc<dyn Clock>,
}

impl SlotExpiry {
    fn time_to_live(&self, slot: &Slot) -> Option<Duration> {
        let tracking = self.idle.max(Duration::from_millis(slot.window_ms.load(Ordering::Acquire)));
        match slot.ban_hint.load(Ordering::Acquire) {
            NO_BAN => Some(tracking),
            PERMANENT_BAN => None,
            expiry => {
                let remaining = expiry.saturating_sub(self.clock.now_millis());
                Some(tracking.max(Duration::from_millis(remaining)))
            }
        }
    }
}

impl Expiry<Fingerprint, Arc<Slot>> for SlotExpiry {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &Arc<Slot>,
        _created_at: Instant,
    ) -> Option<Duration> {
        self.time_to_live(value)
    }

    fn expire_after_read(
        &self,
        _key: &Fingerprint,
        value: &Arc<Slot>,
        _read_at: Instant,
        _duration_until_expiry: Option<Duration>,
        _last_modified_at: Instant,
    ) -> Option<Duration> {
        self.time_to_live(value)
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &Arc<Slot>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        self.time_to_live(value)
    }
}

/// Concurrent store of access windows and bans.
///
/// Clones share the same underlying cache.
#[derive(Clone)]
pub struct AdmissionCache {
    slots: Cache<Fingerprint, Arc<Slot>>,
}

impl std::fmt::Debug for AdmissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionCache").field("entries", &self.slots.entry_count()).finish()
    }
}

impl AdmissionCache {
    /// Cache holding at most `capacity` fingerprints, evicting unbanned ones after `idle`.
    ///
    /// `clock` must be the clock evaluations are timed with; it is used to keep banned
    /// slots alive until their expiry.
    pub fn new(capacity: u64, idle: Duration, clock: Arc<dyn Clock>) -> Self {
        let slots = Cache::builder()
            .max_capacity(capacity)
            .expire_after(SlotExpiry { idle, clock })
            .build();
        Self { slots }
    }

    /// Decide on one access to `fingerprint` at `now` (clock milliseconds) under `rule`.
    ///
    /// 1. A live ban rejects without recording the access.
    /// 2. Otherwise the access is appended to the window.
    /// 3. If the window now holds more than `request_limit_count` accesses, a ban is
    ///    installed, the history is discarded, and the access is rejected.
    ///
    /// The whole sequence runs under the fingerprint's lock.
    pub fn evaluate(&self, fingerprint: &Fingerprint, rule: &Rule, now: u64) -> Verdict {
        let window = u64::try_from(rule.window().as_millis()).unwrap_or(u64::MAX);
        let slot = self.slots.get_with(fingerprint.clone(), || Arc::new(Slot::with_window(window)));
        if slot.window_ms.swap(window, Ordering::AcqRel) != window {
            // The rule changed; re-insert so the new window sets the slot's lifetime.
            self.slots.insert(fingerprint.clone(), slot.clone());
        }
        let mut state = slot.lock();

        if let Some(ban) = state.ban {
            if ban.is_live(now) {
                return Verdict::Reject(Rejection {
                    retry_after: ban.retry_after(now),
                    cause: RejectCause::Banned,
                });
            }
            debug!(target: "turnstile::admission", fingerprint = %fingerprint, "ban expired");
            slot.set_ban(&mut state, None);
        }

        let count = state.history.record(now, window);
        if count <= rule.request_limit_count as usize {
            return Verdict::Admit;
        }

        let ban = BanExpiry::issued_at(now, rule);
        state.history.clear();
        slot.set_ban(&mut state, Some(ban));
        // Re-insert so the eviction policy picks up the ban's lifetime.
        self.slots.insert(fingerprint.clone(), slot.clone());
        info!(
            target: "turnstile::admission",
            endpoint = %rule.endpoint,
            fingerprint = %fingerprint,
            count,
            limit = rule.request_limit_count,
            permanent = ban.is_permanent(),
            "ban issued"
        );
        Verdict::Reject(Rejection { retry_after: ban.retry_after(now), cause: RejectCause::BanIssued })
    }

    /// Current ban for `fingerprint` at `now`, if one is live. Expired bans are cleared.
    pub fn ban_status(&self, fingerprint: &Fingerprint, now: u64) -> Option<RetryAfter> {
        let slot = self.slots.get(fingerprint)?;
        let mut state = slot.lock();
        match state.ban {
            Some(ban) if ban.is_live(now) => Some(ban.retry_after(now)),
            Some(_) => {
                slot.set_ban(&mut state, None);
                None
            }
            None => None,
        }
    }

    /// Accesses currently counted for `fingerprint` in a window of `window` ending at `now`.
    pub fn recent_accesses(&self, fingerprint: &Fingerprint, window: Duration, now: u64) -> usize {
        let window = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self.slots.get(fingerprint).map_or(0, |slot| slot.lock().history.count_within(now, window))
    }

    /// Install a ban directly, discarding the access history.
    pub fn install_ban(&self, fingerprint: &Fingerprint, ban: BanExpiry) {
        let slot = self.slots.get_with(fingerprint.clone(), || Arc::new(Slot::default()));
        let mut state = slot.lock();
        state.history.clear();
        slot.set_ban(&mut state, Some(ban));
        self.slots.insert(fingerprint.clone(), slot.clone());
    }

    /// Forget everything about `fingerprint`. Returns whether anything was tracked.
    pub fn reset(&self, fingerprint: &Fingerprint) -> bool {
        self.slots.remove(fingerprint).is_some()
    }

    /// Forget every fingerprint.
    pub fn reset_all(&self) {
        self.slots.invalidate_all();
    }

    /// Approximate number of tracked fingerprints.
    pub fn entry_count(&self) -> u64 {
        self.slots.run_pending_tasks();
        self.slots.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn rule(limit: u32, window: u32, ban: u32) -> Rule {
        Rule::builder("e").ip_based(true).limit(limit, window).ban_for(ban).build().unwrap()
    }

    fn cache() -> AdmissionCache {
        AdmissionCache::new(1_000, Duration::from_secs(3_600), Arc::new(ManualClock::new()))
    }

    fn fp(s: &str) -> Fingerprint {
        Fingerprint::from_hex(s)
    }

    #[test]
    fn limit_plus_one_is_rejected() {
        let cache = cache();
        let rule = rule(3, 10, 60);
        let f = fp("a");
        for t in [0, 2_000, 4_000] {
            assert_eq!(cache.evaluate(&f, &rule, t), Verdict::Admit);
        }
        let v = cache.evaluate(&f, &rule, 6_000);
        assert_eq!(
            v,
            Verdict::Reject(Rejection {
                retry_after: RetryAfter::Seconds(60),
                cause: RejectCause::BanIssued
            })
        );
    }

    #[test]
    fn spaced_accesses_are_never_rejected() {
        let cache = cache();
        let rule = rule(2, 10, 60);
        let f = fp("a");
        for i in 0..20u64 {
            assert!(cache.evaluate(&f, &rule, i * 10_001).is_admitted());
        }
    }

    #[test]
    fn ban_holds_until_expiry_then_lifts() {
        let cache = cache();
        let rule = rule(1, 10, 30);
        let f = fp("a");
        assert!(cache.evaluate(&f, &rule, 0).is_admitted());
        assert!(!cache.evaluate(&f, &rule, 1_000).is_admitted());

        let v = cache.evaluate(&f, &rule, 20_000);
        assert_eq!(
            v.rejection().map(|r| (r.retry_after, r.cause)),
            Some((RetryAfter::Seconds(11), RejectCause::Banned))
        );
        assert_eq!(cache.ban_status(&f, 30_999), Some(RetryAfter::Seconds(1)));
        assert!(cache.evaluate(&f, &rule, 31_000).is_admitted());
        assert_eq!(cache.ban_status(&f, 31_000), None);
    }

    #[test]
    fn rejected_accesses_do_not_extend_the_ban() {
        let cache = cache();
        let rule = rule(1, 10, 30);
        let f = fp("a");
        cache.evaluate(&f, &rule, 0);
        cache.evaluate(&f, &rule, 1_000);
        for t in (2_000..31_000).step_by(1_000) {
            assert!(!cache.evaluate(&f, &rule, t).is_admitted());
        }
        assert!(cache.evaluate(&f, &rule, 31_000).is_admitted());
    }

    #[test]
    fn history_restarts_after_ban() {
        let cache = cache();
        let rule = rule(2, 100, 5);
        let f = fp("a");
        cache.evaluate(&f, &rule, 0);
        cache.evaluate(&f, &rule, 1);
        assert!(!cache.evaluate(&f, &rule, 2).is_admitted());
        // the pre-ban accesses were discarded, so two more fit in the window
        assert!(cache.evaluate(&f, &rule, 5_002).is_admitted());
        assert!(cache.evaluate(&f, &rule, 5_003).is_admitted());
        assert!(!cache.evaluate(&f, &rule, 5_004).is_admitted());
    }

    #[test]
    fn permanent_ban_needs_reset() {
        let cache = cache();
        let rule = Rule::builder("e").ip_based(true).limit(1, 10).permanent_ban().build().unwrap();
        let f = fp("a");
        cache.evaluate(&f, &rule, 0);
        let v = cache.evaluate(&f, &rule, 1);
        assert_eq!(v.rejection().unwrap().retry_after, RetryAfter::Unbounded);
        assert!(!cache.evaluate(&f, &rule, u64::MAX / 2).is_admitted());

        assert!(cache.reset(&f));
        assert!(cache.evaluate(&f, &rule, u64::MAX / 2).is_admitted());
    }

    #[test]
    fn fingerprints_are_independent() {
        let cache = cache();
        let rule = rule(1, 10, 30);
        cache.evaluate(&fp("a"), &rule, 0);
        assert!(!cache.evaluate(&fp("a"), &rule, 1).is_admitted());
        assert!(cache.evaluate(&fp("b"), &rule, 1).is_admitted());
    }

    #[test]
    fn install_ban_and_reset_all() {
        let cache = cache();
        let rule = rule(5, 10, 30);
        cache.install_ban(&fp("a"), BanExpiry::At(10_000));
        assert!(!cache.evaluate(&fp("a"), &rule, 0).is_admitted());
        cache.reset_all();
        assert!(cache.evaluate(&fp("a"), &rule, 0).is_admitted());
        assert_eq!(cache.recent_accesses(&fp("a"), Duration::from_secs(10), 0), 1);
    }

    #[test]
    fn concurrent_boundary_bans_exactly_once() {
        let cache = cache();
        let rule = rule(5, 60, 60);
        let f = fp("hot");
        for t in 0..5 {
            assert!(cache.evaluate(&f, &rule, t).is_admitted());
        }

        let issued = std::sync::atomic::AtomicUsize::new(0);
        let admitted = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|s| {
            for _ in 0..16 {
                s.spawn(|| match cache.evaluate(&f, &rule, 10) {
                    Verdict::Admit => {
                        admitted.fetch_add(1, Ordering::SeqCst);
                    }
                    Verdict::Reject(r) if r.cause == RejectCause::BanIssued => {
                        issued.fetch_add(1, Ordering::SeqCst);
                    }
                    Verdict::Reject(_) => {}
                });
            }
        });
        assert_eq!(issued.load(Ordering::SeqCst), 1);
        assert_eq!(admitted.load(Ordering::SeqCst), 0);
    }

    fn short_idle_cache() -> AdmissionCache {
        AdmissionCache::new(1_000, Duration::from_millis(50), Arc::new(ManualClock::new()))
    }

    fn pause(ms: u64) {
        std::thread::sleep(Duration::from_millis(ms));
    }

    #[test]
    fn history_outlives_idle_timeout_within_window() {
        let cache = short_idle_cache();
        let rule = rule(1, 60, 60);
        let f = fp("a");
        let mut admitted = 0;
        for t in 0..5u64 {
            if cache.evaluate(&f, &rule, t * 1_000).is_admitted() {
                admitted += 1;
            }
            pause(150);
        }
        assert_eq!(admitted, 1);
    }

    #[test]
    fn temporary_ban_outlives_idle_timeout() {
        let cache = short_idle_cache();
        let rule = rule(1, 1, 60);
        let f = fp("a");
        cache.evaluate(&f, &rule, 0);
        assert!(!cache.evaluate(&f, &rule, 1).is_admitted());

        pause(150);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.ban_status(&f, 2_000), Some(RetryAfter::Seconds(59)));
    }

    #[test]
    fn permanent_ban_is_never_idle_evicted() {
        let cache = short_idle_cache();
        let rule = Rule::builder("e").ip_based(true).limit(1, 1).permanent_ban().build().unwrap();
        let f = fp("a");
        cache.evaluate(&f, &rule, 0);
        cache.evaluate(&f, &rule, 1);

        pause(150);
        assert_eq!(cache.entry_count(), 1);
        assert_eq!(cache.ban_status(&f, 10_000), Some(RetryAfter::Unbounded));
    }

    #[test]
    fn unbanned_slot_is_evicted_once_window_passes() {
        let cache = short_idle_cache();
        let f = fp("a");
        assert!(cache.evaluate(&f, &rule(5, 1, 60), 0).is_admitted());

        pause(1_500);
        assert_eq!(cache.entry_count(), 0);
    }
}
