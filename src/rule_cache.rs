//! Read-through, invalidate-on-write cache of admission rules.
//!
//! Lookups go to an in-process [`moka`] cache first and fall back to a [`RuleSource`] on a
//! miss. Administrative writes (`put` / `invalidate`) land in the cache before they return,
//! so the very next lookup observes them.

use crate::rule::{EndpointId, Rule, RuleError};
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;
use tracing::{debug, warn};

/// Error returned by a [`RuleSource`] that cannot answer.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleSourceError {
    /// The backing store could not be reached or failed mid-query.
    #[error("rule source unavailable: {reason}")]
    Unavailable { reason: String },
}

impl RuleSourceError {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable { reason: reason.into() }
    }
}

/// External store of rules, consulted on cache miss.
///
/// Called synchronously on the request path, so implementations should be fast or
/// themselves cached.
pub trait RuleSource: Send + Sync + std::fmt::Debug {
    fn load_rule(&self, endpoint: &EndpointId) -> Result<Option<Rule>, RuleSourceError>;
}

/// Simple in-memory rule source.
#[derive(Default, Clone, Debug)]
pub struct InMemoryRuleSource {
    rules: Arc<RwLock<HashMap<EndpointId, Rule>>>,
}

impl InMemoryRuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `rule`, replacing any previous rule for the same endpoint.
    pub fn insert(&self, rule: Rule) {
        let mut guard = self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.insert(rule.endpoint.clone(), rule);
    }

    pub fn remove(&self, endpoint: &EndpointId) -> Option<Rule> {
        let mut guard = self.rules.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.remove(endpoint)
    }
}

impl FromIterator<Rule> for InMemoryRuleSource {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        let source = Self::new();
        for rule in iter {
            source.insert(rule);
        }
        source
    }
}

impl RuleSource for InMemoryRuleSource {
    fn load_rule(&self, endpoint: &EndpointId) -> Result<Option<Rule>, RuleSourceError> {
        let guard = self.rules.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(guard.get(endpoint).cloned())
    }
}

#[derive(Clone, Debug)]
enum CachedRule {
    Present(Arc<Rule>),
    // The source answered "no rule"; kept so unconfigured endpoints don't hit the source per request.
    Missing,
}

impl CachedRule {
    fn into_rule(self) -> Option<Arc<Rule>> {
        match self {
            CachedRule::Present(rule) => Some(rule),
            CachedRule::Missing => None,
        }
    }
}

/// Rule cache keyed by endpoint identity.
///
/// Clones share the same cache and source.
#[derive(Clone)]
pub struct RuleCache {
    cache: Cache<EndpointId, CachedRule>,
    source: Arc<dyn RuleSource>,
    // Bumped by every administrative write. A source load only caches its result if no
    // write happened while it was in flight.
    epoch: Arc<RwLock<u64>>,
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("entries", &self.cache.entry_count())
            .field("source", &self.source)
            .finish()
    }
}

impl RuleCache {
    /// Build a cache holding at most `capacity` endpoints, each dropped after `idle` without lookups.
    pub fn new(source: Arc<dyn RuleSource>, capacity: u64, idle: Duration) -> Self {
        let cache = Cache::builder().max_capacity(capacity).time_to_idle(idle).build();
        Self { cache, source, epoch: Arc::new(RwLock::new(0)) }
    }

    fn read_epoch(&self) -> RwLockReadGuard<'_, u64> {
        self.epoch.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_epoch(&self) -> RwLockWriteGuard<'_, u64> {
        let mut epoch = self.epoch.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        *epoch = epoch.wrapping_add(1);
        epoch
    }

    /// Cached rule for `endpoint`, without consulting the source.
    pub fn get(&self, endpoint: &EndpointId) -> Option<Arc<Rule>> {
        self.cache.get(endpoint).and_then(CachedRule::into_rule)
    }

    /// Cached rule for `endpoint`, loading it from the source on a miss.
    ///
    /// Source errors are returned and not cached. A rule from the source that fails
    /// validation is logged and treated as absent.
    pub fn get_or_load(&self, endpoint: &EndpointId) -> Result<Option<Arc<Rule>>, RuleSourceError> {
        if let Some(cached) = self.cache.get(endpoint) {
            return Ok(cached.into_rule());
        }

        let seen = *self.read_epoch();
        let loaded = match self.source.load_rule(endpoint)? {
            Some(rule) => match rule.validate() {
                Ok(()) => CachedRule::Present(Arc::new(rule)),
                Err(e) => {
                    warn!(target: "turnstile::rule_cache", endpoint = %endpoint, error = %e, "rejecting malformed rule from source");
                    CachedRule::Missing
                }
            },
            None => CachedRule::Missing,
        };
        debug!(target: "turnstile::rule_cache", endpoint = %endpoint, present = matches!(loaded, CachedRule::Present(_)), "rule loaded");

        let epoch = self.read_epoch();
        if *epoch != seen {
            // A write landed while loading.
            debug!(target: "turnstile::rule_cache", endpoint = %endpoint, "rule changed during load, not caching");
            return Ok(loaded.into_rule());
        }
        let entry = self.cache.entry(endpoint.clone()).or_insert_with(|| loaded);
        drop(epoch);
        Ok(entry.into_value().into_rule())
    }

    /// Validate and install `rule`, replacing whatever is cached for its endpoint.
    pub fn put(&self, rule: Rule) -> Result<(), RuleError> {
        rule.validate()?;
        debug!(target: "turnstile::rule_cache", endpoint = %rule.endpoint, status = %rule.status, "rule replaced");
        let _epoch = self.write_epoch();
        self.cache.insert(rule.endpoint.clone(), CachedRule::Present(Arc::new(rule)));
        Ok(())
    }

    /// Drop the cached rule so the next lookup reloads it from the source.
    ///
    /// Loads already in flight when this is called do not repopulate the cache.
    pub fn invalidate(&self, endpoint: &EndpointId) {
        let _epoch = self.write_epoch();
        self.cache.invalidate(endpoint);
    }

    pub fn invalidate_all(&self) {
        let _epoch = self.write_epoch();
        self.cache.invalidate_all();
    }

    /// Approximate number of cached endpoints (includes known-missing ones).
    pub fn entry_count(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }
}
