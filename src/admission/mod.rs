//! Admission control.
//!
//! - [`window`]: the per-fingerprint sliding window of access instants.
//! - [`ban`]: ban expiry bookkeeping.
//! - [`cache`]: the keyed store combining both, with atomic per-fingerprint evaluation.
//! - [`engine`]: the per-request pipeline (rule lookup, fingerprint, evaluate).
//!
//! # State machine
//!
//! Each fingerprint moves through `Unseen → Tracking → Banned → (expired) → Unseen`. The
//! transition out of `Banned` is lazy: it is observed the next time the fingerprint is
//! evaluated, there is no background sweep.

use std::time::Duration;

pub mod ban;
pub mod cache;
pub mod engine;
pub mod window;

pub use ban::BanExpiry;
pub use cache::AdmissionCache;
pub use engine::{Admission, AdmissionEngine};
pub use window::AccessHistory;

/// How long a rejected caller should wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryAfter {
    /// Retry after this many seconds (rounded up).
    Seconds(u64),
    /// Permanently banned; retrying will not help absent an administrative reset.
    Unbounded,
}

impl RetryAfter {
    /// Value for a `Retry-After` header.
    ///
    /// Permanent bans render as `i32::MAX` seconds, which clients treat as "don't bother".
    pub fn header_value(&self) -> String {
        match self {
            RetryAfter::Seconds(secs) => secs.to_string(),
            RetryAfter::Unbounded => i32::MAX.to_string(),
        }
    }

    /// Wait as a duration; `None` when unbounded.
    pub fn as_duration(&self) -> Option<Duration> {
        match self {
            RetryAfter::Seconds(secs) => Some(Duration::from_secs(*secs)),
            RetryAfter::Unbounded => None,
        }
    }
}

/// Why a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectCause {
    /// This evaluation pushed the window over the limit and installed the ban.
    BanIssued,
    /// An existing, still-live ban applied.
    Banned,
}

/// Details of a rejected request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub retry_after: RetryAfter,
    pub cause: RejectCause,
}

impl Rejection {
    pub fn retry_after_header(&self) -> String {
        self.retry_after.header_value()
    }
}

/// The decision for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the request through.
    Admit,
    /// Short-circuit with "too many requests".
    Reject(Rejection),
}

impl Verdict {
    /// Helper to check if admitted.
    pub fn is_admitted(&self) -> bool {
        matches!(self, Verdict::Admit)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Verdict::Reject(rejection) => Some(rejection),
            Verdict::Admit => None,
        }
    }
}
