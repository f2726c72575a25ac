//! Administrative control plane.
//!
//! Transport-agnostic: hosts decode a [`ControlCommand`] from whatever carries it (an HTTP
//! route under the admin prefix, a message queue, a CLI) and hand it to
//! [`ControlPlane::execute`]. Every command is audited through `tracing`.

use crate::admission::AdmissionEngine;
use crate::fingerprint::Fingerprint;
use crate::rule::{EndpointId, Rule, RuleError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::info;

/// Administrative command.
///
/// JSON form is internally tagged, e.g. `{"cmd":"reset_fingerprint","fingerprint":"ab12.."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum ControlCommand {
    /// Validate and install a rule; effective for the next request.
    PutRule { rule: Rule },
    /// Forget the cached rule so it is reloaded from the source.
    InvalidateRule { endpoint: EndpointId },
    /// Clear the ban and history of one fingerprint.
    ResetFingerprint { fingerprint: Fingerprint },
    ResetAllBans,
    /// `None` disables slow-response alerts.
    SetSlowResponseThreshold { threshold_ms: Option<u64> },
    Snapshot,
}

impl ControlCommand {
    pub fn label(&self) -> &'static str {
        match self {
            ControlCommand::PutRule { .. } => "put_rule",
            ControlCommand::InvalidateRule { .. } => "invalidate_rule",
            ControlCommand::ResetFingerprint { .. } => "reset_fingerprint",
            ControlCommand::ResetAllBans => "reset_all_bans",
            ControlCommand::SetSlowResponseThreshold { .. } => "set_slow_response_threshold",
            ControlCommand::Snapshot => "snapshot",
        }
    }
}

/// Point-in-time view of the engine's state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub rule_cache_entries: u64,
    pub admission_cache_entries: u64,
    pub pending_metric_endpoints: usize,
    pub slow_response_threshold_ms: Option<u64>,
    pub degraded_endpoints: Vec<EndpointId>,
}

/// Successful outcome of a command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandResult {
    Ack,
    /// `existed` is false when the fingerprint was not tracked.
    Reset { existed: bool },
    Snapshot(EngineSnapshot),
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("invalid rule: {0}")]
    InvalidRule(#[from] RuleError),
    #[error("malformed command: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode result: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Executes [`ControlCommand`]s against an engine.
#[derive(Clone, Debug)]
pub struct ControlPlane {
    engine: Arc<AdmissionEngine>,
}

impl ControlPlane {
    pub fn new(engine: Arc<AdmissionEngine>) -> Self {
        Self { engine }
    }

    pub fn execute(&self, command: ControlCommand) -> Result<CommandResult, ControlError> {
        let label = command.label();
        let outcome = self.apply(command);
        match &outcome {
            Ok(_) => info!(target: "turnstile::audit", command = label, status = "ok", "audit"),
            Err(e) => {
                info!(target: "turnstile::audit", command = label, status = "error", error = %e, "audit")
            }
        }
        outcome
    }

    /// Decode a JSON command, execute it, and encode the result as JSON.
    pub fn execute_json(&self, raw: &str) -> Result<String, ControlError> {
        let command: ControlCommand = serde_json::from_str(raw).map_err(ControlError::Decode)?;
        let result = self.execute(command)?;
        serde_json::to_string(&result).map_err(ControlError::Encode)
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        let slow = self.engine.slow_responses();
        EngineSnapshot {
            rule_cache_entries: self.engine.rules().entry_count(),
            admission_cache_entries: self.engine.admissions().entry_count(),
            pending_metric_endpoints: self.engine.metrics().pending_endpoints(),
            slow_response_threshold_ms: slow
                .threshold()
                .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
            degraded_endpoints: slow.degraded_endpoints(),
        }
    }

    fn apply(&self, command: ControlCommand) -> Result<CommandResult, ControlError> {
        match command {
            ControlCommand::PutRule { rule } => {
                self.engine.rules().put(rule)?;
                Ok(CommandResult::Ack)
            }
            ControlCommand::InvalidateRule { endpoint } => {
                self.engine.rules().invalidate(&endpoint);
                Ok(CommandResult::Ack)
            }
            ControlCommand::ResetFingerprint { fingerprint } => {
                let existed = self.engine.reset_fingerprint(&fingerprint);
                Ok(CommandResult::Reset { existed })
            }
            ControlCommand::ResetAllBans => {
                self.engine.reset_all_bans();
                Ok(CommandResult::Ack)
            }
            ControlCommand::SetSlowResponseThreshold { threshold_ms } => {
                self.engine.slow_responses().set_threshold(threshold_ms.map(Duration::from_millis));
                Ok(CommandResult::Ack)
            }
            ControlCommand::Snapshot => Ok(CommandResult::Snapshot(self.snapshot())),
        }
    }
}

impl tower_service::Service<ControlCommand> for ControlPlane {
    type Response = CommandResult;
    type Error = ControlError;
    type Future = Pin<Box<dyn Future<Output = Result<CommandResult, ControlError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, command: ControlCommand) -> Self::Future {
        let outcome = self.execute(command);
        Box::pin(async move { outcome })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionCache;
    use crate::clock::ManualClock;
    use crate::request::RequestParts;
    use crate::rule_cache::{InMemoryRuleSource, RuleCache};

    fn plane() -> ControlPlane {
        let clock = Arc::new(ManualClock::new());
        let rules = RuleCache::new(Arc::new(InMemoryRuleSource::new()), 10, Duration::from_secs(60));
        let admissions = AdmissionCache::new(10, Duration::from_secs(60), clock.clone());
        ControlPlane::new(Arc::new(AdmissionEngine::new(rules, admissions, clock)))
    }

    #[test]
    fn put_rule_takes_effect_immediately() {
        let plane = plane();
        let req = RequestParts::new("e", "/e").with_remote_addr("1.1.1.1");
        assert!(plane.engine.decide(&req).is_admitted());
        assert!(plane.engine.decide(&req).is_admitted());

        let rule = Rule::builder("e").ip_based(true).limit(1, 60).ban_for(60).build().unwrap();
        assert_eq!(plane.execute(ControlCommand::PutRule { rule }).unwrap(), CommandResult::Ack);
        assert!(plane.engine.decide(&req).is_admitted());
        assert!(!plane.engine.decide(&req).is_admitted());
    }

    #[test]
    fn invalid_rule_is_refused() {
        let plane = plane();
        let mut rule = Rule::builder("e").ip_based(true).limit(1, 60).ban_for(60).build().unwrap();
        rule.request_limit_count = 0;
        let err = plane.execute(ControlCommand::PutRule { rule }).unwrap_err();
        assert!(matches!(err, ControlError::InvalidRule(RuleError::ZeroRequestLimit { .. })));
    }

    #[test]
    fn json_round_trip() {
        let plane = plane();
        let out = plane.execute_json(r#"{"cmd":"set_slow_response_threshold","threshold_ms":250}"#).unwrap();
        assert_eq!(out, r#"{"result":"ack"}"#);

        let out = plane.execute_json(r#"{"cmd":"reset_fingerprint","fingerprint":"abc"}"#).unwrap();
        assert_eq!(out, r#"{"result":"reset","existed":false}"#);

        let snapshot: serde_json::Value =
            serde_json::from_str(&plane.execute_json(r#"{"cmd":"snapshot"}"#).unwrap()).unwrap();
        assert_eq!(snapshot["result"], "snapshot");
        assert_eq!(snapshot["slow_response_threshold_ms"], 250);

        assert!(matches!(plane.execute_json(r#"{"cmd":"reboot"}"#), Err(ControlError::Decode(_))));
    }
}
