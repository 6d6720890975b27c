//! The decision engine.
//!
//! `evaluate_admission` is pure: given a goal, the submitted signals, and a
//! config snapshot it always produces the same outcome, so gate behavior is
//! unit-testable without a store. Rate limiting is layered on top by
//! [`super::Governor`]. `evaluate_command` applies the autonomy ladder to
//! command proposals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::kernel::actor::ActorKind;
use crate::kernel::governor::config::{AutonomyLevel, GovernorConfig};
use crate::kernel::missions::model::MissionSignals;

/// `decidedBy` stamp for machine decisions.
pub const GOVERNOR_DECIDER: &str = "KERNEL_GOVERNOR";
/// `decidedBy` stamp for operator decisions (approve, retry-now).
pub const HUMAN_DECIDER: &str = "HUMAN";

/// Session close reason that marks a suspicious end of telemetry.
pub const SILENCE_CLOSE: &str = "SILENCE_CLOSE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GovernanceAction {
    Allow,
    Quarantine,
    Block,
    RetryLater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Low,
    Med,
    High,
}

/// Closed set of reason codes; clients and tests switch on these, never on
/// message strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReasonCode {
    GoalNotAllowed,
    MissingSignals,
    LowTelemetryPoints,
    ShortSession,
    NoTempChannels,
    SilenceClose,
    RateLimited,
    HumanApproval,
    ManualRetryNow,
    AutonomyLevelTooLow,
    AgentCommandsNotAllowed,
    ManualCommandAllowed,
    ApprovalRequired,
    HighFailureRate,
    SessionCommandLimit,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::GoalNotAllowed => "GOAL_NOT_ALLOWED",
            ReasonCode::MissingSignals => "MISSING_SIGNALS",
            ReasonCode::LowTelemetryPoints => "LOW_TELEMETRY_POINTS",
            ReasonCode::ShortSession => "SHORT_SESSION",
            ReasonCode::NoTempChannels => "NO_TEMP_CHANNELS",
            ReasonCode::SilenceClose => "SILENCE_CLOSE",
            ReasonCode::RateLimited => "RATE_LIMITED",
            ReasonCode::HumanApproval => "HUMAN_APPROVAL",
            ReasonCode::ManualRetryNow => "MANUAL_RETRY_NOW",
            ReasonCode::AutonomyLevelTooLow => "AUTONOMY_LEVEL_TOO_LOW",
            ReasonCode::AgentCommandsNotAllowed => "AGENT_COMMANDS_NOT_ALLOWED",
            ReasonCode::ManualCommandAllowed => "MANUAL_COMMAND_ALLOWED",
            ReasonCode::ApprovalRequired => "APPROVAL_REQUIRED",
            ReasonCode::HighFailureRate => "HIGH_FAILURE_RATE",
            ReasonCode::SessionCommandLimit => "SESSION_COMMAND_LIMIT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GovernanceReason {
    pub code: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl GovernanceReason {
    pub fn code(code: ReasonCode) -> Self {
        Self {
            code,
            details: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernanceDecision {
    pub action: GovernanceAction,
    pub confidence: Confidence,
    pub reasons: Vec<GovernanceReason>,
    pub decided_at: DateTime<Utc>,
    pub decided_by: String,
}

impl GovernanceDecision {
    pub fn has_reason(&self, code: ReasonCode) -> bool {
        self.reasons.iter().any(|r| r.code == code)
    }
}

/// Outcome of the pure admission steps (policy + gate), before rate limiting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionOutcome {
    pub action: GovernanceAction,
    pub confidence: Confidence,
    pub reasons: Vec<GovernanceReason>,
}

impl AdmissionOutcome {
    pub fn into_decision(self, now: DateTime<Utc>) -> GovernanceDecision {
        GovernanceDecision {
            action: self.action,
            confidence: self.confidence,
            reasons: self.reasons,
            decided_at: now,
            decided_by: GOVERNOR_DECIDER.to_string(),
        }
    }
}

/// Policy and goal-gate evaluation. Deterministic for identical inputs.
pub fn evaluate_admission(
    goal: &str,
    signals: Option<&MissionSignals>,
    config: &GovernorConfig,
) -> AdmissionOutcome {
    if !config.is_goal_allowed(goal) {
        return AdmissionOutcome {
            action: GovernanceAction::Block,
            confidence: Confidence::Low,
            reasons: vec![GovernanceReason {
                code: ReasonCode::GoalNotAllowed,
                details: Some(json!({ "goal": goal })),
            }],
        };
    }

    let Some(gate) = config.gate_for(goal) else {
        // Ungated goals are admitted as-is; no evidence, no confidence.
        return AdmissionOutcome {
            action: GovernanceAction::Allow,
            confidence: Confidence::Low,
            reasons: Vec::new(),
        };
    };

    let session = signals.and_then(|s| s.session.as_ref());
    let all_absent = session.is_none()
        || session.is_some_and(|s| {
            s.telemetry_points.is_none()
                && s.duration_sec.is_none()
                && s.has_bt.is_none()
                && s.has_et.is_none()
                && s.close_reason.is_none()
        });

    let mut reasons = Vec::new();
    let mut points = 0_i64;
    let mut duration = 0.0_f64;
    let mut has_bt = false;
    let mut has_et = false;

    if all_absent {
        if gate.quarantine_on_missing_signals {
            reasons.push(GovernanceReason::code(ReasonCode::MissingSignals));
        }
    } else if let Some(session) = session {
        points = session.telemetry_points.unwrap_or(0);
        duration = session.duration_sec.unwrap_or(0.0);
        has_bt = session.has_bt.unwrap_or(false);
        has_et = session.has_et.unwrap_or(false);

        if points < gate.min_telemetry_points {
            reasons.push(GovernanceReason {
                code: ReasonCode::LowTelemetryPoints,
                details: Some(json!({
                    "telemetryPoints": points,
                    "minTelemetryPoints": gate.min_telemetry_points,
                })),
            });
        }
        if duration < gate.min_duration_sec {
            reasons.push(GovernanceReason {
                code: ReasonCode::ShortSession,
                details: Some(json!({
                    "durationSec": duration,
                    "minDurationSec": gate.min_duration_sec,
                })),
            });
        }
        if gate.require_bt_or_et && !has_bt && !has_et {
            reasons.push(GovernanceReason::code(ReasonCode::NoTempChannels));
        }
        if session.close_reason.as_deref() == Some(SILENCE_CLOSE)
            && gate.quarantine_on_silence_close
        {
            // A strong session (well past both thresholds) is trusted despite
            // the silent close.
            let strong = points >= gate.min_telemetry_points * 2
                && duration >= gate.min_duration_sec * 2.0;
            if !strong {
                reasons.push(GovernanceReason::code(ReasonCode::SilenceClose));
            }
        }
    }

    if !reasons.is_empty() {
        return AdmissionOutcome {
            action: GovernanceAction::Quarantine,
            confidence: Confidence::Low,
            reasons,
        };
    }

    let confidence = if points >= 300 && duration >= 360.0 && has_bt {
        Confidence::High
    } else if !all_absent && (has_bt || has_et) {
        Confidence::Med
    } else {
        Confidence::Low
    };

    AdmissionOutcome {
        action: GovernanceAction::Allow,
        confidence,
        reasons: Vec::new(),
    }
}

/// Recent command activity fed into the autonomy checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandStats {
    pub commands_in_session: i64,
    /// Failed fraction of recently executed commands, in `[0, 1]`.
    pub recent_failure_rate: f64,
}

/// Autonomy-ladder evaluation for a command proposal. `proposer_kind` is the
/// kind of the actor that proposed the command.
pub fn evaluate_command(
    proposer_kind: ActorKind,
    stats: &CommandStats,
    config: &GovernorConfig,
    now: DateTime<Utc>,
) -> GovernanceDecision {
    let autonomy = &config.command_autonomy;

    let block = |reason: GovernanceReason| GovernanceDecision {
        action: GovernanceAction::Block,
        confidence: Confidence::Low,
        reasons: vec![reason],
        decided_at: now,
        decided_by: GOVERNOR_DECIDER.to_string(),
    };

    let mut reasons = Vec::new();
    match autonomy.autonomy_level {
        AutonomyLevel::L1 => {
            return block(GovernanceReason::code(ReasonCode::AutonomyLevelTooLow));
        }
        AutonomyLevel::L2 => {
            if proposer_kind == ActorKind::Agent {
                return block(GovernanceReason::code(ReasonCode::AgentCommandsNotAllowed));
            }
            reasons.push(GovernanceReason::code(ReasonCode::ManualCommandAllowed));
        }
        // L4/L5 behave as L3 until graduated autonomy ships.
        AutonomyLevel::L3 | AutonomyLevel::L4 | AutonomyLevel::L5 => {
            reasons.push(GovernanceReason::code(ReasonCode::ApprovalRequired));
        }
    }
    if autonomy.require_approval_for_all
        && !reasons.iter().any(|r| r.code == ReasonCode::ApprovalRequired)
    {
        reasons.push(GovernanceReason::code(ReasonCode::ApprovalRequired));
    }

    if stats.recent_failure_rate > autonomy.command_failure_threshold {
        return block(GovernanceReason {
            code: ReasonCode::HighFailureRate,
            details: Some(json!({
                "recentFailureRate": stats.recent_failure_rate,
                "commandFailureThreshold": autonomy.command_failure_threshold,
            })),
        });
    }
    if stats.commands_in_session >= autonomy.max_commands_per_session {
        return block(GovernanceReason {
            code: ReasonCode::SessionCommandLimit,
            details: Some(json!({
                "commandsInSession": stats.commands_in_session,
                "maxCommandsPerSession": autonomy.max_commands_per_session,
            })),
        });
    }

    GovernanceDecision {
        action: GovernanceAction::Allow,
        confidence: Confidence::Med,
        reasons,
        decided_at: now,
        decided_by: GOVERNOR_DECIDER.to_string(),
    }
}
