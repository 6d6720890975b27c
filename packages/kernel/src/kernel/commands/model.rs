//! Command proposal records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::common::time::from_millis;
use crate::kernel::actor::Actor;
use crate::kernel::error::KernelError;
use crate::kernel::governor::engine::GovernanceDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    PendingApproval,
    Approved,
    Rejected,
    Executing,
    Completed,
    Failed,
    Aborted,
    Expired,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 8] = [
        ProposalStatus::PendingApproval,
        ProposalStatus::Approved,
        ProposalStatus::Rejected,
        ProposalStatus::Executing,
        ProposalStatus::Completed,
        ProposalStatus::Failed,
        ProposalStatus::Aborted,
        ProposalStatus::Expired,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::PendingApproval => "PENDING_APPROVAL",
            ProposalStatus::Approved => "APPROVED",
            ProposalStatus::Rejected => "REJECTED",
            ProposalStatus::Executing => "EXECUTING",
            ProposalStatus::Completed => "COMPLETED",
            ProposalStatus::Failed => "FAILED",
            ProposalStatus::Aborted => "ABORTED",
            ProposalStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| KernelError::validation(format!("unknown proposal status '{s}'")))
    }
}

/// Safety envelope a command must stay inside.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ramp_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forbidden_states: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_interval_seconds: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_daily_count: Option<i64>,
}

/// The control action being proposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSpec {
    pub command_type: String,
    pub machine_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<CommandConstraints>,
}

/// Audit-trail action names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalAction {
    Proposed,
    Approved,
    Rejected,
    ExecutionStarted,
    Completed,
    Failed,
    Aborted,
    Expired,
}

/// One entry in a proposal's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub actor: Actor,
    pub action: ProposalAction,
    pub at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandProposal {
    pub proposal_id: String,
    pub command: CommandSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub proposed_by: Actor,
    pub status: ProposalStatus,
    pub approval_timeout_seconds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceDecision>,
    pub audit_trail: Vec<AuditEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommandProposal {
    /// Instant after which a pending proposal counts as expired.
    pub fn approval_deadline(&self) -> DateTime<Utc> {
        self.created_at + chrono::Duration::seconds(self.approval_timeout_seconds)
    }
}

/// Outcome of an abort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AbortStatus {
    Accepted,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AbortOutcome {
    pub status: AbortStatus,
    pub message: String,
}

// ── Persisted row shape ──────────────────────────────────────────────

#[derive(Debug, sqlx::FromRow)]
pub struct ProposalRow {
    pub proposal_id: String,
    pub command: String,
    pub reasoning: Option<String>,
    pub proposed_by: String,
    pub status: String,
    pub approval_timeout_seconds: i64,
    pub governance: Option<String>,
    pub audit_trail: String,
    pub result: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl TryFrom<ProposalRow> for CommandProposal {
    type Error = KernelError;

    fn try_from(row: ProposalRow) -> Result<Self, Self::Error> {
        Ok(CommandProposal {
            proposal_id: row.proposal_id,
            command: serde_json::from_str(&row.command)?,
            reasoning: row.reasoning,
            proposed_by: serde_json::from_str(&row.proposed_by)?,
            status: row.status.parse()?,
            approval_timeout_seconds: row.approval_timeout_seconds,
            governance: row
                .governance
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            audit_trail: serde_json::from_str(&row.audit_trail)?,
            result: row
                .result
                .map(|raw| serde_json::from_str(&raw))
                .transpose()?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for status in ProposalStatus::ALL {
            assert_eq!(status.as_str().parse::<ProposalStatus>().unwrap(), status);
        }
    }

    #[test]
    fn deadline_is_created_plus_timeout() {
        let now = Utc::now();
        let proposal = CommandProposal {
            proposal_id: "CP-1".into(),
            command: CommandSpec {
                command_type: "SET_HEATER".into(),
                machine_id: "mach-1".into(),
                target_value: Some(70.0),
                target_unit: Some("percent".into()),
                constraints: None,
            },
            reasoning: None,
            proposed_by: Actor::system("test"),
            status: ProposalStatus::PendingApproval,
            approval_timeout_seconds: 300,
            governance: None,
            audit_trail: Vec::new(),
            result: None,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(proposal.approval_deadline(), now + chrono::Duration::seconds(300));
    }
}
