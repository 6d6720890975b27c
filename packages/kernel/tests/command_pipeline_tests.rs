//! Command approval pipeline: state machine, safety checks, governor gating,
//! lazy expiry, abort semantics.

mod common;

use chrono::{Duration, Utc};
use common::*;
use kernel_core::kernel::commands::model::{
    AbortStatus, CommandConstraints, CommandSpec, ProposalStatus,
};
use kernel_core::kernel::error::KernelError;
use kernel_core::kernel::governor::engine::ReasonCode;
use kernel_core::kernel::governor::GovernorConfigPatch;

fn heater_command(target: f64) -> CommandSpec {
    CommandSpec {
        command_type: "SET_HEATER".to_string(),
        machine_id: "mach-1".to_string(),
        target_value: Some(target),
        target_unit: Some("percent".to_string()),
        constraints: Some(CommandConstraints {
            min_value: Some(0.0),
            max_value: Some(100.0),
            ..Default::default()
        }),
    }
}

#[tokio::test]
async fn full_lifecycle_propose_approve_execute_complete() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let proposal = commands
        .propose(
            heater_command(70.0),
            Some("drop in bean temp".to_string()),
            operator.clone(),
            None,
            now,
        )
        .await
        .unwrap();
    assert_eq!(proposal.status, ProposalStatus::PendingApproval);
    assert_eq!(proposal.approval_timeout_seconds, 300);
    assert_eq!(proposal.audit_trail.len(), 1);

    // default autonomy is L3: approval required, human approval satisfies it
    let approved = commands
        .approve(&proposal.proposal_id, &operator, now)
        .await
        .unwrap();
    assert_eq!(approved.status, ProposalStatus::Approved);
    let governance = approved.governance.as_ref().unwrap();
    assert!(governance.has_reason(ReasonCode::ApprovalRequired));

    let executing = commands
        .execute(&proposal.proposal_id, &system(), now)
        .await
        .unwrap();
    assert_eq!(executing.status, ProposalStatus::Executing);

    let completed = commands
        .record_result(
            &proposal.proposal_id,
            true,
            Some(serde_json::json!({ "settledValue": 70.0 })),
            &system(),
            now,
        )
        .await
        .unwrap();
    assert_eq!(completed.status, ProposalStatus::Completed);
    assert_eq!(completed.result.as_ref().unwrap()["settledValue"], 70.0);
    // PROPOSED, APPROVED, EXECUTION_STARTED, COMPLETED
    assert_eq!(completed.audit_trail.len(), 4);
}

#[tokio::test]
async fn reject_ends_the_pipeline() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let proposal = commands
        .propose(heater_command(50.0), None, operator.clone(), None, now)
        .await
        .unwrap();
    let rejected = commands
        .reject(
            &proposal.proposal_id,
            &operator,
            "not during first crack".to_string(),
            now,
        )
        .await
        .unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert_eq!(
        rejected.audit_trail.last().unwrap().reason.as_deref(),
        Some("not during first crack")
    );

    // no way back
    let approve = commands.approve(&proposal.proposal_id, &operator, now).await;
    assert!(matches!(approve, Err(KernelError::InvalidState(_))));
}

#[tokio::test]
async fn pending_proposals_expire_lazily() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let t0 = Utc::now();
    let operator = user("op", None);

    let proposal = commands
        .propose(heater_command(50.0), None, operator.clone(), Some(60), t0)
        .await
        .unwrap();

    // within the window the proposal is still pending
    let fresh = commands
        .get(&proposal.proposal_id, t0 + Duration::seconds(30))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fresh.status, ProposalStatus::PendingApproval);

    // observed after the deadline it flips to EXPIRED with an audit entry
    let expired = commands
        .get(&proposal.proposal_id, t0 + Duration::seconds(61))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(expired.status, ProposalStatus::Expired);
    assert_eq!(expired.audit_trail.len(), 2);

    let approve = commands
        .approve(&proposal.proposal_id, &operator, t0 + Duration::seconds(62))
        .await;
    assert!(matches!(approve, Err(KernelError::InvalidState(_))));
}

#[tokio::test]
async fn safety_bounds_are_checked_at_approval() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let proposal = commands
        .propose(heater_command(150.0), None, operator.clone(), None, now)
        .await
        .unwrap();
    let result = commands.approve(&proposal.proposal_id, &operator, now).await;
    assert!(matches!(result, Err(KernelError::Validation(_))));

    // still pending: the operator can fix the config and retry, or reject
    let unchanged = commands
        .get(&proposal.proposal_id, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.status, ProposalStatus::PendingApproval);
}

#[tokio::test]
async fn governor_block_turns_approval_into_rejection() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();

    // L2: manual commands only — agent-proposed commands are blocked
    let patch: GovernorConfigPatch = serde_json::from_value(serde_json::json!({
        "commandAutonomy": { "autonomyLevel": "L2" }
    }))
    .unwrap();
    kernel
        .state
        .governor
        .config_store()
        .set(patch, now)
        .await
        .unwrap();

    let proposal = commands
        .propose(
            heater_command(40.0),
            None,
            agent("roast-pilot", None),
            None,
            now,
        )
        .await
        .unwrap();
    let rejected = commands
        .approve(&proposal.proposal_id, &user("op", None), now)
        .await
        .unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    let governance = rejected.governance.as_ref().unwrap();
    assert!(governance.has_reason(ReasonCode::AgentCommandsNotAllowed));
}

#[tokio::test]
async fn session_command_limit_blocks_approval() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let patch: GovernorConfigPatch = serde_json::from_value(serde_json::json!({
        "commandAutonomy": { "maxCommandsPerSession": 1 }
    }))
    .unwrap();
    kernel
        .state
        .governor
        .config_store()
        .set(patch, now)
        .await
        .unwrap();

    // two proposals against the same machine inside the window
    commands
        .propose(heater_command(40.0), None, operator.clone(), None, now)
        .await
        .unwrap();
    let second = commands
        .propose(heater_command(45.0), None, operator.clone(), None, now)
        .await
        .unwrap();

    let rejected = commands
        .approve(&second.proposal_id, &operator, now)
        .await
        .unwrap();
    assert_eq!(rejected.status, ProposalStatus::Rejected);
    assert!(rejected
        .governance
        .as_ref()
        .unwrap()
        .has_reason(ReasonCode::SessionCommandLimit));
}

#[tokio::test]
async fn abort_only_applies_to_executing_commands() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let proposal = commands
        .propose(heater_command(70.0), None, operator.clone(), None, now)
        .await
        .unwrap();

    // pending: abort is refused, state untouched
    let refused = commands
        .abort(&proposal.proposal_id, &operator, now)
        .await
        .unwrap();
    assert_eq!(refused.status, AbortStatus::Failed);

    commands
        .approve(&proposal.proposal_id, &operator, now)
        .await
        .unwrap();
    commands
        .execute(&proposal.proposal_id, &system(), now)
        .await
        .unwrap();

    let accepted = commands
        .abort(&proposal.proposal_id, &operator, now)
        .await
        .unwrap();
    assert_eq!(accepted.status, AbortStatus::Accepted);

    let aborted = commands
        .get(&proposal.proposal_id, now)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(aborted.status, ProposalStatus::Aborted);
}

#[tokio::test]
async fn listing_filters_by_status() {
    let kernel = test_kernel().await;
    let commands = &kernel.state.commands;
    let now = Utc::now();
    let operator = user("op", None);

    let first = commands
        .propose(heater_command(40.0), None, operator.clone(), None, now)
        .await
        .unwrap();
    commands
        .propose(heater_command(45.0), None, operator.clone(), None, now)
        .await
        .unwrap();
    commands
        .approve(&first.proposal_id, &operator, now)
        .await
        .unwrap();

    let pending = commands
        .list(Some(ProposalStatus::PendingApproval), now)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    let all = commands.list(None, now).await.unwrap();
    assert_eq!(all.len(), 2);
}
