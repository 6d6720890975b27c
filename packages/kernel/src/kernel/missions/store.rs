//! Mission store facade.
//!
//! Thin orchestration over [`MissionRepository`]: fills in the default lease
//! duration and backoff base, normalizes list-query shapes, and builds the
//! operator decision for approvals. Handlers talk to this type, never to the
//! repository directly.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::kernel::actor::{Actor, OrgScope};
use crate::kernel::error::KernelResult;
use crate::kernel::governor::engine::{
    Confidence, GovernanceAction, GovernanceDecision, GovernanceReason, ReasonCode, HUMAN_DECIDER,
};
use crate::kernel::governor::MissionEvaluation;
use crate::kernel::missions::model::{Mission, MissionError, MissionStatus};
use crate::kernel::missions::repo::{
    ClaimRequest, CreateMission, CreatedMission, FailRequest, MissionFilter, MissionMetrics,
    MissionRepository, DEFAULT_BACKOFF_MS, DEFAULT_LEASE_DURATION_MS,
};

pub const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 500;

/// Raw list-query shape as it arrives from the API.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    /// Comma-separated status names.
    pub status: Option<String>,
    pub goal: Option<String>,
    pub agent: Option<String>,
    pub session_id: Option<String>,
    pub subject_id: Option<String>,
    pub org_id: Option<String>,
    pub site_id: Option<String>,
    pub machine_id: Option<String>,
    pub limit: Option<i64>,
}

#[derive(Clone)]
pub struct MissionStore {
    repo: MissionRepository,
}

impl MissionStore {
    pub fn new(repo: MissionRepository) -> Self {
        Self { repo }
    }

    pub async fn create(
        &self,
        input: CreateMission,
        evaluation: &MissionEvaluation,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<CreatedMission> {
        self.repo.create(input, evaluation, actor, now).await
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> KernelResult<Option<Mission>> {
        self.repo.find_by_idempotency_key(key).await
    }

    pub async fn get(&self, mission_id: &str) -> KernelResult<Option<Mission>> {
        self.repo.get(mission_id).await
    }

    pub async fn claim(
        &self,
        agent_name: String,
        goals: Option<Vec<String>>,
        org: OrgScope,
        lease_duration_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> KernelResult<Option<Mission>> {
        let request = ClaimRequest {
            agent_name,
            goals,
            org,
            now,
            lease_duration_ms: lease_duration_ms
                .filter(|ms| *ms > 0)
                .unwrap_or(DEFAULT_LEASE_DURATION_MS),
        };
        self.repo.claim_next(&request).await
    }

    pub async fn heartbeat(
        &self,
        mission_id: &str,
        lease_id: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        self.repo.heartbeat(mission_id, lease_id, now).await
    }

    pub async fn complete(
        &self,
        mission_id: &str,
        result_meta: Option<serde_json::Value>,
        lease_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        self.repo.complete(mission_id, result_meta, lease_id, now).await
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn fail(
        &self,
        mission_id: &str,
        error: MissionError,
        retryable: bool,
        lease_id: Option<String>,
        backoff_ms: Option<i64>,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let request = FailRequest {
            mission_id: mission_id.to_string(),
            error,
            retryable,
            lease_id,
            now,
            backoff_ms: backoff_ms.filter(|ms| *ms > 0).unwrap_or(DEFAULT_BACKOFF_MS),
        };
        self.repo.fail(&request).await
    }

    /// Operator approval of a quarantined mission.
    pub async fn approve(
        &self,
        mission_id: &str,
        actor: &Actor,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let mut details = json!({ "approvedBy": actor.id });
        if let Some(note) = note {
            details["note"] = json!(note);
        }
        let decision = GovernanceDecision {
            action: GovernanceAction::Allow,
            confidence: Confidence::Med,
            reasons: vec![GovernanceReason {
                code: ReasonCode::HumanApproval,
                details: Some(details),
            }],
            decided_at: now,
            decided_by: HUMAN_DECIDER.to_string(),
        };
        self.repo.approve(mission_id, &decision, now).await
    }

    pub async fn cancel(&self, mission_id: &str, now: DateTime<Utc>) -> KernelResult<Mission> {
        self.repo.cancel(mission_id, now).await
    }

    pub async fn retry_now(
        &self,
        mission_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        self.repo.retry_now(mission_id, actor, now).await
    }

    /// List with API-shaped filters: comma-separated statuses and the
    /// `sessionId` convenience filter (subject id or `params.sessionId`).
    pub async fn list(&self, query: ListQuery, org: OrgScope) -> KernelResult<Vec<Mission>> {
        let statuses = match &query.status {
            None => Vec::new(),
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| s.parse::<MissionStatus>())
                .collect::<KernelResult<Vec<_>>>()?,
        };

        let filter = MissionFilter {
            statuses,
            goal: query.goal,
            claimed_by: query.agent,
            subject_id: query.subject_id,
            session_id: query.session_id,
            org_id: query.org_id,
            site_id: query.site_id,
            machine_id: query.machine_id,
            org,
            limit: query
                .limit
                .filter(|n| *n > 0)
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .min(MAX_LIST_LIMIT),
        };
        self.repo.list(&filter).await
    }

    pub async fn metrics(&self) -> KernelResult<MissionMetrics> {
        self.repo.metrics().await
    }
}
