//! Admission rules: the per-endpoint limit configuration consumed by the engine.
//!
//! A [`Rule`] is an immutable value. Administrators replace rules wholesale through
//! [`RuleCache::put`](crate::rule_cache::RuleCache::put) or the control plane; the engine only
//! ever reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Stable identifier for one logical route + handler in the host application.
///
/// Cheap to clone; used as a key by the rule cache and the metrics accumulator.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(Arc<str>);

impl EndpointId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for EndpointId {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

/// Whether a rule is enforced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    /// Endpoint known but nobody configured a limit yet.
    #[default]
    NotConfigured,
    /// Limit is enforced.
    Active,
    /// Limit configured but switched off.
    Inactive,
}

impl RuleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleStatus::NotConfigured => "not_configured",
            RuleStatus::Active => "active",
            RuleStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuleStatus {
    type Err = RuleError;

    /// Case-insensitive; accepts `not_configured`, `active`, `inactive`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(RuleError::UnknownStatus { value: String::new() });
        }
        [RuleStatus::NotConfigured, RuleStatus::Active, RuleStatus::Inactive]
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RuleError::UnknownStatus { value: s.to_string() })
    }
}

/// Errors produced when validating a rule.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RuleError {
    /// `request_limit_count` must be > 0 for an active rule.
    #[error("rule for '{endpoint}': request_limit_count must be > 0")]
    ZeroRequestLimit { endpoint: EndpointId },
    /// `time_limit_seconds` must be > 0 for an active rule.
    #[error("rule for '{endpoint}': time_limit_seconds must be > 0")]
    ZeroTimeLimit { endpoint: EndpointId },
    /// `ban_time_seconds` must be > 0 unless the ban is permanent.
    #[error("rule for '{endpoint}': ban_time_seconds must be > 0 unless permanent_ban is set")]
    ZeroBanTime { endpoint: EndpointId },
    /// An active rule needs at least one input to fingerprint on.
    #[error("rule for '{endpoint}': enable ip_based or at least one parameter, header or body field")]
    NoFingerprintInputs { endpoint: EndpointId },
    /// Status string did not name a known status.
    #[error("unknown rule status '{value}'")]
    UnknownStatus { value: String },
}

/// Admission rule for a single endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub endpoint: EndpointId,
    #[serde(default)]
    pub status: RuleStatus,
    #[serde(default)]
    pub ip_based: bool,
    #[serde(default)]
    pub permanent_ban: bool,
    #[serde(default)]
    pub request_limit_count: u32,
    #[serde(default)]
    pub time_limit_seconds: u32,
    #[serde(default)]
    pub ban_time_seconds: u32,
    /// Query/path parameter names included in the fingerprint.
    #[serde(default)]
    pub parameters: BTreeSet<String>,
    /// Header names included in the fingerprint.
    #[serde(default)]
    pub headers: BTreeSet<String>,
    /// Structured-payload field names included in the fingerprint.
    #[serde(default)]
    pub body_fields: BTreeSet<String>,
}

impl Rule {
    /// Start building an active rule for `endpoint`.
    ///
    /// # Examples
    /// ```
    /// use turnstile::Rule;
    /// let rule = Rule::builder("GET /orders")
    ///     .ip_based(true)
    ///     .limit(3, 10)
    ///     .ban_for(60)
    ///     .build()
    ///     .unwrap();
    /// assert!(rule.is_active());
    /// ```
    pub fn builder(endpoint: impl Into<EndpointId>) -> RuleBuilder {
        RuleBuilder::new(endpoint.into())
    }

    /// A placeholder rule for an endpoint nobody configured.
    pub fn not_configured(endpoint: impl Into<EndpointId>) -> Self {
        Self {
            endpoint: endpoint.into(),
            status: RuleStatus::NotConfigured,
            ip_based: false,
            permanent_ban: false,
            request_limit_count: 0,
            time_limit_seconds: 0,
            ban_time_seconds: 0,
            parameters: BTreeSet::new(),
            headers: BTreeSet::new(),
            body_fields: BTreeSet::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == RuleStatus::Active
    }

    /// Trailing window over which accesses are counted.
    pub fn window(&self) -> Duration {
        Duration::from_secs(u64::from(self.time_limit_seconds))
    }

    /// Ban length; `None` for permanent bans.
    pub fn ban_duration(&self) -> Option<Duration> {
        if self.permanent_ban {
            None
        } else {
            Some(Duration::from_secs(u64::from(self.ban_time_seconds)))
        }
    }

    /// Check the invariants of an active rule. Inactive and unconfigured rules always pass.
    pub fn validate(&self) -> Result<(), RuleError> {
        if !self.is_active() {
            return Ok(());
        }
        let endpoint = self.endpoint.clone();
        if self.request_limit_count == 0 {
            return Err(RuleError::ZeroRequestLimit { endpoint });
        }
        if self.time_limit_seconds == 0 {
            return Err(RuleError::ZeroTimeLimit { endpoint });
        }
        if self.ban_time_seconds == 0 && !self.permanent_ban {
            return Err(RuleError::ZeroBanTime { endpoint });
        }
        if !self.ip_based
            && self.parameters.is_empty()
            && self.headers.is_empty()
            && self.body_fields.is_empty()
        {
            return Err(RuleError::NoFingerprintInputs { endpoint });
        }
        Ok(())
    }
}

/// Builder for [`Rule`]; `build` validates.
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    fn new(endpoint: EndpointId) -> Self {
        let mut rule = Rule::not_configured(endpoint);
        rule.status = RuleStatus::Active;
        Self { rule }
    }

    pub fn status(mut self, status: RuleStatus) -> Self {
        self.rule.status = status;
        self
    }

    pub fn ip_based(mut self, enabled: bool) -> Self {
        self.rule.ip_based = enabled;
        self
    }

    /// Allow `count` accesses per `window_secs` seconds.
    pub fn limit(mut self, count: u32, window_secs: u32) -> Self {
        self.rule.request_limit_count = count;
        self.rule.time_limit_seconds = window_secs;
        self
    }

    pub fn ban_for(mut self, secs: u32) -> Self {
        self.rule.ban_time_seconds = secs;
        self.rule.permanent_ban = false;
        self
    }

    pub fn permanent_ban(mut self) -> Self {
        self.rule.permanent_ban = true;
        self
    }

    pub fn parameter(mut self, name: impl Into<String>) -> Self {
        self.rule.parameters.insert(name.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>) -> Self {
        self.rule.headers.insert(name.into());
        self
    }

    pub fn body_field(mut self, name: impl Into<String>) -> Self {
        self.rule.body_fields.insert(name.into());
        self
    }

    pub fn build(self) -> Result<Rule, RuleError> {
        self.rule.validate()?;
        Ok(self.rule)
    }
}
