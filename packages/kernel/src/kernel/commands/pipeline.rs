//! Command approval pipeline.
//!
//! State machine per proposal:
//!
//! ```text
//! PENDING_APPROVAL ──► APPROVED ──► EXECUTING ──► COMPLETED | FAILED | ABORTED
//!        │
//!        ├──► REJECTED   (operator or governor)
//!        └──► EXPIRED    (approval window elapsed; applied lazily)
//! ```
//!
//! Every transition is a conditional UPDATE on the expected pre-state and
//! appends to the audit trail. Dispatch to the actual machine goes through
//! the [`CommandDispatcher`] seam; the kernel only tracks execution status.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{info, warn};

use crate::common::id;
use crate::common::time::to_millis;
use crate::kernel::actor::Actor;
use crate::kernel::commands::model::{
    AbortOutcome, AbortStatus, AuditEvent, CommandProposal, CommandSpec, ProposalAction,
    ProposalRow, ProposalStatus,
};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::governor::engine::{
    evaluate_command, CommandStats, GovernanceAction, GovernanceDecision,
};
use crate::kernel::governor::GovernorConfigStore;

pub const DEFAULT_APPROVAL_TIMEOUT_SECONDS: i64 = 300;

const PROPOSAL_COLUMNS: &str = "proposal_id, command, reasoning, proposed_by, status, \
     approval_timeout_seconds, governance, audit_trail, result, created_at, updated_at";

/// Bridge to whatever actually drives the machine. Implementations must be
/// prepared for the kernel to call `abort` for a command they already
/// finished.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, proposal: &CommandProposal) -> anyhow::Result<()>;
    async fn abort(&self, proposal: &CommandProposal) -> anyhow::Result<()>;
}

/// Default dispatcher: acknowledges and logs. The real machine bridge lives
/// outside the kernel.
pub struct LoggingDispatcher;

#[async_trait]
impl CommandDispatcher for LoggingDispatcher {
    async fn dispatch(&self, proposal: &CommandProposal) -> anyhow::Result<()> {
        info!(
            proposal_id = %proposal.proposal_id,
            command_type = %proposal.command.command_type,
            machine_id = %proposal.command.machine_id,
            "dispatching command"
        );
        Ok(())
    }

    async fn abort(&self, proposal: &CommandProposal) -> anyhow::Result<()> {
        info!(proposal_id = %proposal.proposal_id, "aborting command");
        Ok(())
    }
}

#[derive(Clone)]
pub struct CommandPipeline {
    pool: SqlitePool,
    config_store: GovernorConfigStore,
    dispatcher: Arc<dyn CommandDispatcher>,
}

impl CommandPipeline {
    pub fn new(
        pool: SqlitePool,
        config_store: GovernorConfigStore,
        dispatcher: Arc<dyn CommandDispatcher>,
    ) -> Self {
        Self {
            pool,
            config_store,
            dispatcher,
        }
    }

    // ── intake ───────────────────────────────────────────────────────

    pub async fn propose(
        &self,
        command: CommandSpec,
        reasoning: Option<String>,
        proposed_by: Actor,
        approval_timeout_seconds: Option<i64>,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandProposal> {
        if command.command_type.trim().is_empty() {
            return Err(KernelError::validation("command.commandType is required"));
        }
        if command.machine_id.trim().is_empty() {
            return Err(KernelError::validation("command.machineId is required"));
        }

        let proposal = CommandProposal {
            proposal_id: id::proposal_id(now),
            command,
            reasoning,
            status: ProposalStatus::PendingApproval,
            approval_timeout_seconds: approval_timeout_seconds
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_APPROVAL_TIMEOUT_SECONDS),
            governance: None,
            audit_trail: vec![AuditEvent {
                actor: proposed_by.clone(),
                action: ProposalAction::Proposed,
                at: now,
                reason: None,
            }],
            result: None,
            proposed_by,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO command_proposals (
                proposal_id, command, machine_id, reasoning, proposed_by, status,
                approval_timeout_seconds, audit_trail, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&proposal.proposal_id)
        .bind(serde_json::to_string(&proposal.command)?)
        .bind(&proposal.command.machine_id)
        .bind(&proposal.reasoning)
        .bind(serde_json::to_string(&proposal.proposed_by)?)
        .bind(proposal.status.as_str())
        .bind(proposal.approval_timeout_seconds)
        .bind(serde_json::to_string(&proposal.audit_trail)?)
        .bind(to_millis(proposal.created_at))
        .bind(to_millis(proposal.updated_at))
        .execute(&self.pool)
        .await?;

        Ok(proposal)
    }

    // ── reads ────────────────────────────────────────────────────────

    pub async fn get(
        &self,
        proposal_id: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<Option<CommandProposal>> {
        self.expire_due(now).await?;
        self.fetch(proposal_id).await
    }

    /// Recent proposals, optionally restricted to one status. Pending
    /// proposals past their deadline flip to EXPIRED before filtering.
    pub async fn list(
        &self,
        status: Option<ProposalStatus>,
        now: DateTime<Utc>,
    ) -> KernelResult<Vec<CommandProposal>> {
        self.expire_due(now).await?;

        let rows: Vec<ProposalRow> = match status {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM command_proposals \
                     WHERE status = ? ORDER BY created_at DESC LIMIT 100"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {PROPOSAL_COLUMNS} FROM command_proposals \
                     ORDER BY created_at DESC LIMIT 100"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.into_iter().map(CommandProposal::try_from).collect()
    }

    // ── operator transitions ─────────────────────────────────────────

    /// Operator approval: safety bounds first, then the governor. A BLOCK
    /// verdict lands the proposal in REJECTED with the decision recorded.
    pub async fn approve(
        &self,
        proposal_id: &str,
        approver: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandProposal> {
        self.expire_due(now).await?;
        let proposal = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;
        if proposal.status != ProposalStatus::PendingApproval {
            return Err(KernelError::invalid_state("Proposal is not pending approval"));
        }

        if let (Some(target), Some(constraints)) = (
            proposal.command.target_value,
            proposal.command.constraints.as_ref(),
        ) {
            if let (Some(min), Some(max)) = (constraints.min_value, constraints.max_value) {
                if target < min || target > max {
                    return Err(KernelError::validation(format!(
                        "targetValue {target} outside safety constraints [{min}, {max}]"
                    )));
                }
            }
        }

        let config = self.config_store.get().await?;
        let stats = self.command_stats(&proposal, config.command_autonomy.evaluation_window_minutes, now).await?;
        let decision = evaluate_command(proposal.proposed_by.kind, &stats, &config, now);

        if decision.action == GovernanceAction::Block {
            let codes = decision
                .reasons
                .iter()
                .map(|r| r.code.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            warn!(proposal_id, reasons = %codes, "governor blocked command approval");
            self.transition(
                &proposal,
                ProposalStatus::Rejected,
                AuditEvent {
                    actor: approver.clone(),
                    action: ProposalAction::Rejected,
                    at: now,
                    reason: Some(format!("governor: {codes}")),
                },
                Some(&decision),
                None,
                now,
            )
            .await?;
        } else {
            self.transition(
                &proposal,
                ProposalStatus::Approved,
                AuditEvent {
                    actor: approver.clone(),
                    action: ProposalAction::Approved,
                    at: now,
                    reason: None,
                },
                Some(&decision),
                None,
                now,
            )
            .await?;
        }

        self.fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))
    }

    pub async fn reject(
        &self,
        proposal_id: &str,
        actor: &Actor,
        reason: String,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandProposal> {
        self.expire_due(now).await?;
        let proposal = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;
        if proposal.status != ProposalStatus::PendingApproval {
            return Err(KernelError::invalid_state("Proposal is not pending approval"));
        }

        self.transition(
            &proposal,
            ProposalStatus::Rejected,
            AuditEvent {
                actor: actor.clone(),
                action: ProposalAction::Rejected,
                at: now,
                reason: Some(reason),
            },
            None,
            None,
            now,
        )
        .await?;
        self.fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))
    }

    // ── execution ────────────────────────────────────────────────────

    /// APPROVED → EXECUTING, handing the command to the dispatcher. A
    /// dispatch failure immediately records FAILED.
    pub async fn execute(
        &self,
        proposal_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandProposal> {
        let proposal = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;
        if proposal.status != ProposalStatus::Approved {
            return Err(KernelError::invalid_state("Proposal is not approved"));
        }

        self.transition(
            &proposal,
            ProposalStatus::Executing,
            AuditEvent {
                actor: actor.clone(),
                action: ProposalAction::ExecutionStarted,
                at: now,
                reason: None,
            },
            None,
            None,
            now,
        )
        .await?;
        let executing = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;

        if let Err(error) = self.dispatcher.dispatch(&executing).await {
            warn!(proposal_id, %error, "command dispatch failed");
            self.transition(
                &executing,
                ProposalStatus::Failed,
                AuditEvent {
                    actor: Actor::system("kernel"),
                    action: ProposalAction::Failed,
                    at: now,
                    reason: Some(error.to_string()),
                },
                None,
                None,
                now,
            )
            .await?;
            return self
                .fetch(proposal_id)
                .await?
                .ok_or(KernelError::NotFound("Proposal"));
        }

        Ok(executing)
    }

    /// Execution status report from the machine bridge:
    /// EXECUTING → COMPLETED | FAILED.
    pub async fn record_result(
        &self,
        proposal_id: &str,
        success: bool,
        detail: Option<serde_json::Value>,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandProposal> {
        let proposal = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;
        if proposal.status != ProposalStatus::Executing {
            return Err(KernelError::invalid_state("Proposal is not executing"));
        }

        let (status, action) = if success {
            (ProposalStatus::Completed, ProposalAction::Completed)
        } else {
            (ProposalStatus::Failed, ProposalAction::Failed)
        };
        self.transition(
            &proposal,
            status,
            AuditEvent {
                actor: actor.clone(),
                action,
                at: now,
                reason: None,
            },
            None,
            detail.as_ref(),
            now,
        )
        .await?;
        self.fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))
    }

    /// Abort an EXECUTING command. Returns ACCEPTED when the abort was
    /// dispatched and recorded, FAILED otherwise.
    pub async fn abort(
        &self,
        proposal_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<AbortOutcome> {
        let proposal = self
            .fetch(proposal_id)
            .await?
            .ok_or(KernelError::NotFound("Proposal"))?;
        if proposal.status != ProposalStatus::Executing {
            return Ok(AbortOutcome {
                status: AbortStatus::Failed,
                message: "Proposal is not executing".to_string(),
            });
        }

        if let Err(error) = self.dispatcher.abort(&proposal).await {
            return Ok(AbortOutcome {
                status: AbortStatus::Failed,
                message: error.to_string(),
            });
        }

        self.transition(
            &proposal,
            ProposalStatus::Aborted,
            AuditEvent {
                actor: actor.clone(),
                action: ProposalAction::Aborted,
                at: now,
                reason: None,
            },
            None,
            None,
            now,
        )
        .await?;
        Ok(AbortOutcome {
            status: AbortStatus::Accepted,
            message: "abort dispatched".to_string(),
        })
    }

    // ── internals ────────────────────────────────────────────────────

    async fn fetch(&self, proposal_id: &str) -> KernelResult<Option<CommandProposal>> {
        let row: Option<ProposalRow> = sqlx::query_as(&format!(
            "SELECT {PROPOSAL_COLUMNS} FROM command_proposals WHERE proposal_id = ? LIMIT 1"
        ))
        .bind(proposal_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(CommandProposal::try_from).transpose()
    }

    /// Flip every pending proposal past its deadline to EXPIRED, appending
    /// the audit event in the same statement.
    async fn expire_due(&self, now: DateTime<Utc>) -> KernelResult<()> {
        let event = AuditEvent {
            actor: Actor::system("kernel"),
            action: ProposalAction::Expired,
            at: now,
            reason: Some("approval window elapsed".to_string()),
        };
        sqlx::query(
            "UPDATE command_proposals \
             SET status = 'EXPIRED', \
                 audit_trail = json_insert(audit_trail, '$[#]', json(?)), \
                 updated_at = ? \
             WHERE status = 'PENDING_APPROVAL' \
               AND (created_at + approval_timeout_seconds * 1000) <= ?",
        )
        .bind(serde_json::to_string(&event)?)
        .bind(to_millis(now))
        .bind(to_millis(now))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Conditional single-row transition with the audit event appended.
    async fn transition(
        &self,
        proposal: &CommandProposal,
        to: ProposalStatus,
        event: AuditEvent,
        governance: Option<&GovernanceDecision>,
        result: Option<&serde_json::Value>,
        now: DateTime<Utc>,
    ) -> KernelResult<()> {
        let mut trail = proposal.audit_trail.clone();
        trail.push(event);

        let updated = sqlx::query(
            "UPDATE command_proposals \
             SET status = ?, audit_trail = ?, \
                 governance = COALESCE(?, governance), \
                 result = COALESCE(?, result), \
                 updated_at = ? \
             WHERE proposal_id = ? AND status = ?",
        )
        .bind(to.as_str())
        .bind(serde_json::to_string(&trail)?)
        .bind(opt_json(governance)?)
        .bind(opt_json(result)?)
        .bind(to_millis(now))
        .bind(&proposal.proposal_id)
        .bind(proposal.status.as_str())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(KernelError::invalid_state(format!(
                "Proposal is no longer {}",
                proposal.status
            )));
        }
        Ok(())
    }

    /// Recent command activity for this proposal's machine, fed into the
    /// governor's failure-rate and session-limit checks.
    async fn command_stats(
        &self,
        proposal: &CommandProposal,
        window_minutes: i64,
        now: DateTime<Utc>,
    ) -> KernelResult<CommandStats> {
        let window_start = to_millis(now - Duration::minutes(window_minutes));

        let commands_in_session: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM command_proposals \
             WHERE machine_id = ? AND created_at >= ? AND proposal_id <> ?",
        )
        .bind(&proposal.command.machine_id)
        .bind(window_start)
        .bind(&proposal.proposal_id)
        .fetch_one(&self.pool)
        .await?;

        let (failed, finished): (i64, i64) = sqlx::query_as(
            "SELECT \
                 COALESCE(SUM(CASE WHEN status = 'FAILED' THEN 1 ELSE 0 END), 0), \
                 COALESCE(SUM(CASE WHEN status IN ('COMPLETED', 'FAILED') THEN 1 ELSE 0 END), 0) \
             FROM command_proposals \
             WHERE machine_id = ? AND created_at >= ?",
        )
        .bind(&proposal.command.machine_id)
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;

        let recent_failure_rate = if finished > 0 {
            failed as f64 / finished as f64
        } else {
            0.0
        };
        Ok(CommandStats {
            commands_in_session,
            recent_failure_rate,
        })
    }
}

fn opt_json<T: Serialize>(value: Option<&T>) -> Result<Option<String>, serde_json::Error> {
    value.map(serde_json::to_string).transpose()
}
