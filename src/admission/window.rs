//! Sliding window of access instants for a single fingerprint.

use std::collections::VecDeque;

/// Time-ordered access instants (clock milliseconds).
///
/// Entries that have fallen out of the window are trimmed on every access, so a history
/// never holds more than `request_limit_count + 1` instants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessHistory {
    instants: VecDeque<u64>,
}

impl AccessHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired instants, append `now`, and return the number of accesses in the window.
    ///
    /// An instant counts when it lies strictly after `now - window_millis`; an access exactly
    /// one window old has left the window.
    pub fn record(&mut self, now: u64, window_millis: u64) -> usize {
        self.trim(now, window_millis);
        self.instants.push_back(now);
        self.instants.len()
    }

    /// Accesses within the window ending at `now`, without recording one.
    pub fn count_within(&self, now: u64, window_millis: u64) -> usize {
        match now.checked_sub(window_millis) {
            Some(cutoff) => self.instants.iter().filter(|&&t| t > cutoff).count(),
            None => self.instants.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.instants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instants.is_empty()
    }

    pub fn clear(&mut self) {
        self.instants.clear();
    }

    fn trim(&mut self, now: u64, window_millis: u64) {
        let Some(cutoff) = now.checked_sub(window_millis) else {
            return;
        };
        while self.instants.front().is_some_and(|&t| t <= cutoff) {
            self.instants.pop_front();
        }
    }
}
