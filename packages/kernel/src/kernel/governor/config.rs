//! Governor configuration: a single versioned JSON document under
//! `kernel_settings['governor_config']`.
//!
//! Reads fall back to the built-in defaults when the document is missing or
//! malformed. Writes are patch-style: validated, merged field-by-field over
//! the defaults, then persisted with `updated_at`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::ratelimit::RateLimitRule;
use crate::kernel::store::KernelStore;

pub const GOVERNOR_CONFIG_KEY: &str = "governor_config";

/// The one goal every fresh deployment admits.
pub const REPORT_GOAL: &str = "generate-roast-report";

const DEFAULT_BUCKET: RateLimitRule = RateLimitRule {
    capacity: 10.0,
    refill_per_sec: 10.0 / 3600.0,
};

/// Session-quality thresholds for report-generating goals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportGate {
    pub min_telemetry_points: i64,
    pub min_duration_sec: f64,
    pub require_bt_or_et: bool,
    pub quarantine_on_missing_signals: bool,
    pub quarantine_on_silence_close: bool,
}

impl Default for ReportGate {
    fn default() -> Self {
        Self {
            min_telemetry_points: 60,
            min_duration_sec: 120.0,
            require_bt_or_et: true,
            quarantine_on_missing_signals: true,
            quarantine_on_silence_close: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyConfig {
    pub allowed_goals: Vec<String>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            allowed_goals: vec![REPORT_GOAL.to_string()],
        }
    }
}

/// Operator-chosen autonomy band for machine commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AutonomyLevel {
    L1,
    L2,
    L3,
    L4,
    L5,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAutonomyConfig {
    pub autonomy_level: AutonomyLevel,
    pub require_approval_for_all: bool,
    /// Recent failure rate above which commands are blocked, in `[0, 1]`.
    pub command_failure_threshold: f64,
    pub max_commands_per_session: i64,
    pub evaluation_window_minutes: i64,
}

impl Default for CommandAutonomyConfig {
    fn default() -> Self {
        Self {
            autonomy_level: AutonomyLevel::L3,
            require_approval_for_all: false,
            command_failure_threshold: 0.5,
            max_commands_per_session: 10,
            evaluation_window_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernorConfig {
    pub rate_limits: BTreeMap<String, RateLimitRule>,
    pub gates: BTreeMap<String, ReportGate>,
    pub policy: PolicyConfig,
    pub command_autonomy: CommandAutonomyConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for GovernorConfig {
    fn default() -> Self {
        Self {
            rate_limits: BTreeMap::from([(REPORT_GOAL.to_string(), DEFAULT_BUCKET)]),
            gates: BTreeMap::from([(REPORT_GOAL.to_string(), ReportGate::default())]),
            policy: PolicyConfig::default(),
            command_autonomy: CommandAutonomyConfig::default(),
            updated_at: None,
        }
    }
}

impl GovernorConfig {
    pub fn is_goal_allowed(&self, goal: &str) -> bool {
        self.policy.allowed_goals.iter().any(|g| g == goal)
    }

    /// Gate thresholds for a goal, if the goal is gated at all.
    pub fn gate_for(&self, goal: &str) -> Option<&ReportGate> {
        self.gates.get(goal)
    }

    /// Bucket rule for a goal; ungated goals fall back to the default bucket.
    pub fn rate_rule_for(&self, goal: &str) -> RateLimitRule {
        self.rate_limits.get(goal).copied().unwrap_or(DEFAULT_BUCKET)
    }
}

// ── Patch documents (PUT /governor/config) ──────────────────────────
//
// Unknown fields are rejected outright; absent fields keep their defaults.

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitPatch {
    pub capacity: Option<f64>,
    pub refill_per_sec: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GatePatch {
    pub min_telemetry_points: Option<i64>,
    pub min_duration_sec: Option<f64>,
    pub require_bt_or_et: Option<bool>,
    pub quarantine_on_missing_signals: Option<bool>,
    pub quarantine_on_silence_close: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PolicyPatch {
    pub allowed_goals: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CommandAutonomyPatch {
    pub autonomy_level: Option<AutonomyLevel>,
    pub require_approval_for_all: Option<bool>,
    pub command_failure_threshold: Option<f64>,
    pub max_commands_per_session: Option<i64>,
    pub evaluation_window_minutes: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GovernorConfigPatch {
    pub rate_limits: Option<BTreeMap<String, RateLimitPatch>>,
    pub gates: Option<BTreeMap<String, GatePatch>>,
    pub policy: Option<PolicyPatch>,
    pub command_autonomy: Option<CommandAutonomyPatch>,
}

impl GovernorConfigPatch {
    /// Merge this patch over the built-in defaults, validating as we go.
    pub fn apply(self, now: DateTime<Utc>) -> KernelResult<GovernorConfig> {
        let mut config = GovernorConfig::default();

        if let Some(limits) = self.rate_limits {
            for (goal, patch) in limits {
                let mut rule = config.rate_rule_for(&goal);
                if let Some(capacity) = patch.capacity {
                    rule.capacity = capacity;
                }
                if let Some(refill) = patch.refill_per_sec {
                    rule.refill_per_sec = refill;
                }
                if rule.capacity <= 0.0 {
                    return Err(KernelError::validation(format!(
                        "rateLimits.{goal}.capacity must be positive"
                    )));
                }
                if rule.refill_per_sec < 0.0 {
                    return Err(KernelError::validation(format!(
                        "rateLimits.{goal}.refillPerSec must not be negative"
                    )));
                }
                config.rate_limits.insert(goal, rule);
            }
        }

        if let Some(gates) = self.gates {
            for (goal, patch) in gates {
                let mut gate = config.gates.get(&goal).cloned().unwrap_or_default();
                if let Some(points) = patch.min_telemetry_points {
                    gate.min_telemetry_points = points;
                }
                if let Some(duration) = patch.min_duration_sec {
                    gate.min_duration_sec = duration;
                }
                if let Some(flag) = patch.require_bt_or_et {
                    gate.require_bt_or_et = flag;
                }
                if let Some(flag) = patch.quarantine_on_missing_signals {
                    gate.quarantine_on_missing_signals = flag;
                }
                if let Some(flag) = patch.quarantine_on_silence_close {
                    gate.quarantine_on_silence_close = flag;
                }
                if gate.min_telemetry_points < 0 || gate.min_duration_sec < 0.0 {
                    return Err(KernelError::validation(format!(
                        "gates.{goal} thresholds must not be negative"
                    )));
                }
                config.gates.insert(goal, gate);
            }
        }

        if let Some(policy) = self.policy {
            if let Some(goals) = policy.allowed_goals {
                if goals.iter().any(|g| g.trim().is_empty()) {
                    return Err(KernelError::validation(
                        "policy.allowedGoals must not contain empty goals",
                    ));
                }
                config.policy.allowed_goals = goals;
            }
        }

        if let Some(autonomy) = self.command_autonomy {
            let target = &mut config.command_autonomy;
            if let Some(level) = autonomy.autonomy_level {
                target.autonomy_level = level;
            }
            if let Some(flag) = autonomy.require_approval_for_all {
                target.require_approval_for_all = flag;
            }
            if let Some(threshold) = autonomy.command_failure_threshold {
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(KernelError::validation(
                        "commandAutonomy.commandFailureThreshold must be within [0, 1]",
                    ));
                }
                target.command_failure_threshold = threshold;
            }
            if let Some(max) = autonomy.max_commands_per_session {
                if max < 0 {
                    return Err(KernelError::validation(
                        "commandAutonomy.maxCommandsPerSession must not be negative",
                    ));
                }
                target.max_commands_per_session = max;
            }
            if let Some(window) = autonomy.evaluation_window_minutes {
                if window <= 0 {
                    return Err(KernelError::validation(
                        "commandAutonomy.evaluationWindowMinutes must be positive",
                    ));
                }
                target.evaluation_window_minutes = window;
            }
        }

        config.updated_at = Some(now);
        Ok(config)
    }
}

// ── Store access ─────────────────────────────────────────────────────

#[derive(Clone)]
pub struct GovernorConfigStore {
    store: KernelStore,
}

impl GovernorConfigStore {
    pub fn new(store: KernelStore) -> Self {
        Self { store }
    }

    /// Current config; defaults when the document is missing or unreadable.
    pub async fn get(&self) -> KernelResult<GovernorConfig> {
        match self.store.get_setting(GOVERNOR_CONFIG_KEY).await? {
            None => Ok(GovernorConfig::default()),
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(config) => Ok(config),
                Err(error) => {
                    warn!(%error, "governor config document is malformed, using defaults");
                    Ok(GovernorConfig::default())
                }
            },
        }
    }

    /// Validate, merge over defaults, persist, and return the stored config.
    pub async fn set(
        &self,
        patch: GovernorConfigPatch,
        now: DateTime<Utc>,
    ) -> KernelResult<GovernorConfig> {
        let config = patch.apply(now)?;
        let raw = serde_json::to_string(&config)?;
        self.store.put_setting(GOVERNOR_CONFIG_KEY, &raw, now).await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows_report_goal_with_default_bucket() {
        let config = GovernorConfig::default();
        assert!(config.is_goal_allowed(REPORT_GOAL));
        let rule = config.rate_rule_for(REPORT_GOAL);
        assert_eq!(rule.capacity, 10.0);
        assert!((rule.refill_per_sec - 10.0 / 3600.0).abs() < f64::EPSILON);
    }

    #[test]
    fn patch_merges_per_field_over_defaults() {
        let patch: GovernorConfigPatch = serde_json::from_value(serde_json::json!({
            "gates": { "generate-roast-report": { "minTelemetryPoints": 10 } },
            "policy": { "allowedGoals": ["generate-roast-report", "replay-session"] }
        }))
        .unwrap();
        let config = patch.apply(Utc::now()).unwrap();
        let gate = config.gate_for(REPORT_GOAL).unwrap();
        assert_eq!(gate.min_telemetry_points, 10);
        // untouched fields keep their defaults
        assert_eq!(gate.min_duration_sec, ReportGate::default().min_duration_sec);
        assert_eq!(config.policy.allowed_goals.len(), 2);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let result: Result<GovernorConfigPatch, _> = serde_json::from_value(serde_json::json!({
            "surprise": true
        }));
        assert!(result.is_err());
    }

    #[test]
    fn out_of_range_failure_threshold_is_rejected() {
        let patch: GovernorConfigPatch = serde_json::from_value(serde_json::json!({
            "commandAutonomy": { "commandFailureThreshold": 1.5 }
        }))
        .unwrap();
        assert!(patch.apply(Utc::now()).is_err());
    }
}
