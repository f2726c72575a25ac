//! Ban expiry bookkeeping.

use super::RetryAfter;
use crate::rule::Rule;

/// When a ban ends.
///
/// Permanent bans use an explicit sentinel rather than "now plus a very long time", so no
/// arithmetic on the expiry can overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BanExpiry {
    /// Ban lifts once the clock reaches this instant (milliseconds).
    At(u64),
    /// Never lifts on its own.
    Permanent,
}

impl BanExpiry {
    /// The ban `rule` imposes when issued at `now`.
    pub fn issued_at(now: u64, rule: &Rule) -> Self {
        match rule.ban_duration() {
            Some(ban) => {
                let millis = u64::try_from(ban.as_millis()).unwrap_or(u64::MAX);
                BanExpiry::At(now.saturating_add(millis))
            }
            None => BanExpiry::Permanent,
        }
    }

    /// Still in force at `now`? A ban is over once `now >= expiry`.
    pub fn is_live(&self, now: u64) -> bool {
        match self {
            BanExpiry::At(expiry) => now < *expiry,
            BanExpiry::Permanent => true,
        }
    }

    /// Retry hint at `now`, rounded up to whole seconds.
    pub fn retry_after(&self, now: u64) -> RetryAfter {
        match self {
            BanExpiry::At(expiry) => {
                let remaining = expiry.saturating_sub(now);
                RetryAfter::Seconds(remaining.div_ceil(1_000))
            }
            BanExpiry::Permanent => RetryAfter::Unbounded,
        }
    }

    pub fn is_permanent(&self) -> bool {
        matches!(self, BanExpiry::Permanent)
    }
}
