//! Transactional mission state machine.
//!
//! Every transition is a single conditional UPDATE that re-asserts the
//! expected pre-state; a concurrent mutator that lost the race observes
//! `rows_affected == 0` and gets a typed conflict. No transition ever relies
//! on in-process locking.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::common::id;
use crate::common::time::to_millis;
use crate::kernel::actor::{Actor, OrgScope};
use crate::kernel::error::{KernelError, KernelResult};
use crate::kernel::governor::engine::{
    GovernanceDecision, GovernanceReason, ReasonCode, HUMAN_DECIDER,
};
use crate::kernel::governor::MissionEvaluation;
use crate::kernel::missions::model::{
    Mission, MissionContext, MissionError, MissionRow, MissionSignals, MissionStatus,
};
use crate::kernel::store::is_unique_violation;

/// Lease issued to a claim when the caller does not choose one.
pub const DEFAULT_LEASE_DURATION_MS: i64 = 30_000;
/// Base for exponential retry backoff.
pub const DEFAULT_BACKOFF_MS: i64 = 2_000;
/// Attempt bound applied when the submitter does not supply one.
pub const DEFAULT_MAX_ATTEMPTS: i64 = 5;

const MISSION_COLUMNS: &str = "mission_id, idempotency_key, goal, params, context, subject_id, \
     status, attempts, max_attempts, next_retry_at, claimed_by, claimed_at, lease_id, \
     lease_expires_at, last_heartbeat_at, result_meta, last_error, governance, signals, \
     created_by, created_at, updated_at, completed_at, failed_at";

/// Claim eligibility: PENDING, due RETRY, or RUNNING with an expired lease.
/// Reclaiming counts as a fresh attempt, so an orphan on its final attempt is
/// not handed out again (`attempts <= max_attempts` must hold at all times).
/// `?` binds are (now_ms, now_ms).
const CLAIMABLE_PREDICATE: &str = "(status = 'PENDING' \
     OR (status = 'RETRY' AND (next_retry_at IS NULL OR next_retry_at <= ?)) \
     OR (status = 'RUNNING' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ? \
         AND attempts < max_attempts))";

/// Normalized mission submission, after governance has decided the intake
/// status.
#[derive(Debug, Clone, Default)]
pub struct CreateMission {
    pub mission_id: Option<String>,
    pub idempotency_key: Option<String>,
    pub goal: String,
    pub params: serde_json::Value,
    pub context: MissionContext,
    pub subject_id: Option<String>,
    pub max_attempts: Option<i64>,
    pub signals: Option<MissionSignals>,
}

#[derive(Debug, Clone)]
pub struct CreatedMission {
    pub mission: Mission,
    /// False when the idempotency key matched an existing mission.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub agent_name: String,
    pub goals: Option<Vec<String>>,
    pub org: OrgScope,
    pub now: DateTime<Utc>,
    pub lease_duration_ms: i64,
}

#[derive(Debug, Clone)]
pub struct FailRequest {
    pub mission_id: String,
    pub error: MissionError,
    pub retryable: bool,
    pub lease_id: Option<String>,
    pub now: DateTime<Utc>,
    pub backoff_ms: i64,
}

#[derive(Debug, Clone, Default)]
pub struct MissionFilter {
    pub statuses: Vec<MissionStatus>,
    pub goal: Option<String>,
    pub claimed_by: Option<String>,
    pub subject_id: Option<String>,
    /// Matches `subject_id` or `params.sessionId`.
    pub session_id: Option<String>,
    pub org_id: Option<String>,
    pub site_id: Option<String>,
    pub machine_id: Option<String>,
    pub org: OrgScope,
    pub limit: i64,
}

/// Status counts plus the governance-derived counters.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionMetrics {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub quarantined: i64,
    pub blocked: i64,
    /// Missions whose governance reasons include RATE_LIMITED.
    pub rate_limited: i64,
    /// Missions whose latest decision was made by a human.
    pub approved_total: i64,
}

#[derive(Clone)]
pub struct MissionRepository {
    pool: SqlitePool,
}

impl MissionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── intake ───────────────────────────────────────────────────────

    /// Create a mission with the status governance assigned, deduplicating on
    /// the idempotency key. The unique constraint is the backstop for races
    /// past the fast-path lookup.
    pub async fn create(
        &self,
        input: CreateMission,
        evaluation: &MissionEvaluation,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<CreatedMission> {
        if let Some(key) = input.idempotency_key.as_deref() {
            if let Some(existing) = self.find_by_idempotency_key(key).await? {
                return Ok(CreatedMission {
                    mission: existing,
                    created: false,
                });
            }
        }

        let mission_id = input
            .mission_id
            .clone()
            .unwrap_or_else(|| id::mission_id(now));
        let idempotency_key = input
            .idempotency_key
            .clone()
            .unwrap_or_else(|| mission_id.clone());
        let max_attempts = input
            .max_attempts
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_ATTEMPTS);

        let mut mission = Mission::builder()
            .mission_id(mission_id)
            .idempotency_key(idempotency_key)
            .goal(input.goal)
            .params(input.params)
            .context(input.context)
            .status(evaluation.status)
            .max_attempts(max_attempts)
            .governance(evaluation.decision.clone())
            .created_by(actor.clone())
            .created_at(now)
            .updated_at(now)
            .build();
        mission.subject_id = input.subject_id;
        mission.signals = input.signals;
        mission.next_retry_at = evaluation.next_retry_at;

        match self.insert(&mission).await {
            Ok(()) => Ok(CreatedMission {
                mission,
                created: true,
            }),
            Err(KernelError::DuplicateIdempotency) => {
                match self
                    .find_by_idempotency_key(&mission.idempotency_key)
                    .await?
                {
                    Some(existing) => Ok(CreatedMission {
                        mission: existing,
                        created: false,
                    }),
                    // The collision was on the caller-proposed mission id.
                    None => Err(KernelError::validation(format!(
                        "missionId '{}' already exists",
                        mission.mission_id
                    ))),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn insert(&self, mission: &Mission) -> KernelResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO missions (
                mission_id, idempotency_key, goal, params, context,
                org_id, site_id, machine_id, subject_id,
                status, attempts, max_attempts, next_retry_at,
                result_meta, last_error, governance, signals, created_by,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&mission.mission_id)
        .bind(&mission.idempotency_key)
        .bind(&mission.goal)
        .bind(serde_json::to_string(&mission.params)?)
        .bind(serde_json::to_string(&mission.context)?)
        .bind(&mission.context.org_id)
        .bind(&mission.context.site_id)
        .bind(&mission.context.machine_id)
        .bind(&mission.subject_id)
        .bind(mission.status.as_str())
        .bind(mission.attempts)
        .bind(mission.max_attempts)
        .bind(mission.next_retry_at.map(to_millis))
        .bind(opt_json(&mission.result_meta)?)
        .bind(opt_json(&mission.last_error)?)
        .bind(opt_json(&mission.governance)?)
        .bind(opt_json(&mission.signals)?)
        .bind(opt_json(&mission.created_by)?)
        .bind(to_millis(mission.created_at))
        .bind(to_millis(mission.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(KernelError::DuplicateIdempotency),
            Err(err) => Err(err.into()),
        }
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> KernelResult<Option<Mission>> {
        let row = sqlx::query_as::<_, MissionRow>(&format!(
            "SELECT {MISSION_COLUMNS} FROM missions WHERE idempotency_key = ? LIMIT 1"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Mission::try_from).transpose()
    }

    pub async fn get(&self, mission_id: &str) -> KernelResult<Option<Mission>> {
        let row = fetch_row(&self.pool, mission_id).await?;
        row.map(Mission::try_from).transpose()
    }

    // ── claim ────────────────────────────────────────────────────────

    /// Atomically hand one eligible mission to a worker and issue a fresh
    /// lease. Returns `None` when nothing is claimable or the row was won by
    /// a concurrent claimer.
    pub async fn claim_next(&self, request: &ClaimRequest) -> KernelResult<Option<Mission>> {
        let now_ms = to_millis(request.now);
        let mut tx = self.pool.begin().await?;

        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT mission_id FROM missions WHERE (status = 'PENDING' \
             OR (status = 'RETRY' AND (next_retry_at IS NULL OR next_retry_at <= ",
        );
        query.push_bind(now_ms);
        query.push(
            ")) OR (status = 'RUNNING' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ",
        );
        query.push_bind(now_ms);
        query.push(" AND attempts < max_attempts))");

        if let Some(goals) = request.goals.as_ref().filter(|g| !g.is_empty()) {
            query.push(" AND goal IN (");
            let mut separated = query.separated(", ");
            for goal in goals {
                separated.push_bind(goal);
            }
            separated.push_unseparated(")");
        }
        push_org_scope(&mut query, &request.org);

        query.push(
            " ORDER BY CASE status WHEN 'PENDING' THEN 0 WHEN 'RETRY' THEN 1 ELSE 2 END ASC, \
             COALESCE(next_retry_at, created_at) ASC, created_at ASC \
             LIMIT 1",
        );

        let candidate: Option<(String,)> =
            query.build_query_as().fetch_optional(&mut *tx).await?;
        let Some((mission_id,)) = candidate else {
            return Ok(None);
        };

        let lease_id = id::lease_id();
        let updated = sqlx::query(&format!(
            "UPDATE missions SET \
                 status = 'RUNNING', claimed_by = ?, claimed_at = ?, lease_id = ?, \
                 lease_expires_at = ?, last_heartbeat_at = ?, attempts = attempts + 1, \
                 next_retry_at = NULL, updated_at = ? \
             WHERE mission_id = ? AND {CLAIMABLE_PREDICATE}"
        ))
        .bind(&request.agent_name)
        .bind(now_ms)
        .bind(&lease_id)
        .bind(now_ms + request.lease_duration_ms)
        .bind(now_ms)
        .bind(now_ms)
        .bind(&mission_id)
        .bind(now_ms)
        .bind(now_ms)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Lost the race; the caller may retry the selection.
            return Ok(None);
        }

        let row = fetch_row(&mut *tx, &mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Ok(Some(Mission::try_from(row)?))
    }

    // ── worker-side transitions ──────────────────────────────────────

    /// Extend a RUNNING mission's lease by its original duration. The lease
    /// id must match; stale workers are rejected rather than silently
    /// refreshed.
    pub async fn heartbeat(
        &self,
        mission_id: &str,
        lease_id: &str,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        let mission = Mission::try_from(row)?;

        if mission.status != MissionStatus::Running {
            return Err(KernelError::invalid_state("Mission is not running"));
        }
        if mission.lease_id.as_deref() != Some(lease_id) {
            return Err(KernelError::LeaseMismatch);
        }

        let duration_ms = mission.lease_duration_ms(DEFAULT_LEASE_DURATION_MS);
        let now_ms = to_millis(now);
        let updated = sqlx::query(
            "UPDATE missions SET lease_expires_at = ?, last_heartbeat_at = ?, updated_at = ? \
             WHERE mission_id = ? AND status = 'RUNNING' AND lease_id = ?",
        )
        .bind(now_ms + duration_ms)
        .bind(now_ms)
        .bind(now_ms)
        .bind(mission_id)
        .bind(lease_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(KernelError::invalid_state("Mission is not running"));
        }

        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    /// RUNNING → DONE, clearing the lease.
    pub async fn complete(
        &self,
        mission_id: &str,
        result_meta: Option<serde_json::Value>,
        lease_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let now_ms = to_millis(now);

        let mut query = QueryBuilder::<Sqlite>::new(
            "UPDATE missions SET status = 'DONE', result_meta = ",
        );
        query.push_bind(opt_json(&result_meta)?);
        query.push(", completed_at = ");
        query.push_bind(now_ms);
        query.push(
            ", claimed_by = NULL, claimed_at = NULL, lease_id = NULL, \
             lease_expires_at = NULL, last_heartbeat_at = NULL, next_retry_at = NULL, \
             updated_at = ",
        );
        query.push_bind(now_ms);
        query.push(" WHERE status = 'RUNNING' AND mission_id = ");
        query.push_bind(mission_id);
        if let Some(lease) = lease_id {
            query.push(" AND lease_id = ");
            query.push_bind(lease);
        }

        let updated = query.build().execute(&mut *tx).await?;
        if updated.rows_affected() == 0 {
            return Err(running_conflict(&mut tx, mission_id, lease_id).await?);
        }

        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    /// RUNNING → RETRY (exponential backoff) or FAILED once attempts are
    /// exhausted or the failure is not retryable. The attempt itself was
    /// counted at claim time.
    pub async fn fail(&self, request: &FailRequest) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let row = fetch_row(&mut *tx, &request.mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        let mission = Mission::try_from(row)?;

        if mission.status != MissionStatus::Running {
            return Err(KernelError::invalid_state("Mission is not running"));
        }
        if let Some(lease) = request.lease_id.as_deref() {
            if mission.lease_id.as_deref() != Some(lease) {
                return Err(KernelError::LeaseMismatch);
            }
        }

        let now_ms = to_millis(request.now);
        let attempts = mission.attempts.max(1);
        let retry = request.retryable && attempts < mission.max_attempts;
        let error_json = serde_json::to_string(&request.error)?;

        let updated = if retry {
            let shift = (attempts - 1).clamp(0, 30) as u32;
            let delay_ms = request.backoff_ms.saturating_mul(1_i64 << shift);
            sqlx::query(
                "UPDATE missions SET status = 'RETRY', next_retry_at = ?, last_error = ?, \
                     claimed_by = NULL, claimed_at = NULL, lease_id = NULL, \
                     lease_expires_at = NULL, last_heartbeat_at = NULL, updated_at = ? \
                 WHERE mission_id = ? AND status = 'RUNNING'",
            )
            .bind(now_ms + delay_ms)
            .bind(&error_json)
            .bind(now_ms)
            .bind(&request.mission_id)
            .execute(&mut *tx)
            .await?
        } else {
            sqlx::query(
                "UPDATE missions SET status = 'FAILED', failed_at = ?, last_error = ?, \
                     claimed_by = NULL, claimed_at = NULL, lease_id = NULL, \
                     lease_expires_at = NULL, last_heartbeat_at = NULL, \
                     next_retry_at = NULL, updated_at = ? \
                 WHERE mission_id = ? AND status = 'RUNNING'",
            )
            .bind(now_ms)
            .bind(&error_json)
            .bind(now_ms)
            .bind(&request.mission_id)
            .execute(&mut *tx)
            .await?
        };
        if updated.rows_affected() == 0 {
            return Err(KernelError::invalid_state("Mission is not running"));
        }

        let row = fetch_row(&mut *tx, &request.mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    // ── operator transitions ─────────────────────────────────────────

    /// QUARANTINED → PENDING with the operator's decision recorded.
    pub async fn approve(
        &self,
        mission_id: &str,
        decision: &GovernanceDecision,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let now_ms = to_millis(now);
        let updated = sqlx::query(
            "UPDATE missions SET status = 'PENDING', governance = ?, next_retry_at = NULL, \
                 claimed_by = NULL, claimed_at = NULL, lease_id = NULL, \
                 lease_expires_at = NULL, last_heartbeat_at = NULL, updated_at = ? \
             WHERE mission_id = ? AND status = 'QUARANTINED'",
        )
        .bind(serde_json::to_string(decision)?)
        .bind(now_ms)
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(match fetch_row(&mut *tx, mission_id).await? {
                None => KernelError::NotFound("Mission"),
                Some(_) => KernelError::invalid_state("Mission is not quarantined"),
            });
        }

        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    /// Any non-terminal status → CANCELED.
    pub async fn cancel(&self, mission_id: &str, now: DateTime<Utc>) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let now_ms = to_millis(now);
        let updated = sqlx::query(
            "UPDATE missions SET status = 'CANCELED', next_retry_at = NULL, \
                 claimed_by = NULL, claimed_at = NULL, lease_id = NULL, \
                 lease_expires_at = NULL, last_heartbeat_at = NULL, updated_at = ? \
             WHERE mission_id = ? \
               AND status IN ('PENDING', 'RUNNING', 'RETRY', 'QUARANTINED')",
        )
        .bind(now_ms)
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(match fetch_row(&mut *tx, mission_id).await? {
                None => KernelError::NotFound("Mission"),
                Some(_) => KernelError::invalid_state("Mission is already terminal"),
            });
        }

        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    /// RETRY → immediately claimable, with a MANUAL_RETRY_NOW reason stamped
    /// onto the governance record.
    pub async fn retry_now(
        &self,
        mission_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> KernelResult<Mission> {
        let mut tx = self.pool.begin().await?;
        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        let mission = Mission::try_from(row)?;
        if mission.status != MissionStatus::Retry {
            return Err(KernelError::invalid_state("Mission is not in retry state"));
        }

        let mut decision = mission.governance.clone().unwrap_or(GovernanceDecision {
            action: crate::kernel::governor::engine::GovernanceAction::Allow,
            confidence: crate::kernel::governor::engine::Confidence::Low,
            reasons: Vec::new(),
            decided_at: now,
            decided_by: HUMAN_DECIDER.to_string(),
        });
        decision.reasons.push(GovernanceReason {
            code: ReasonCode::ManualRetryNow,
            details: Some(json!({ "actor": actor.id })),
        });
        decision.decided_at = now;
        decision.decided_by = HUMAN_DECIDER.to_string();

        let now_ms = to_millis(now);
        let updated = sqlx::query(
            "UPDATE missions SET next_retry_at = ?, governance = ?, updated_at = ? \
             WHERE mission_id = ? AND status = 'RETRY'",
        )
        .bind(now_ms)
        .bind(serde_json::to_string(&decision)?)
        .bind(now_ms)
        .bind(mission_id)
        .execute(&mut *tx)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(KernelError::invalid_state("Mission is not in retry state"));
        }

        let row = fetch_row(&mut *tx, mission_id)
            .await?
            .ok_or(KernelError::NotFound("Mission"))?;
        tx.commit().await?;
        Mission::try_from(row)
    }

    // ── queries ──────────────────────────────────────────────────────

    pub async fn list(&self, filter: &MissionFilter) -> KernelResult<Vec<Mission>> {
        let mut query = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {MISSION_COLUMNS} FROM missions WHERE 1 = 1"
        ));

        if !filter.statuses.is_empty() {
            query.push(" AND status IN (");
            let mut separated = query.separated(", ");
            for status in &filter.statuses {
                separated.push_bind(status.as_str());
            }
            separated.push_unseparated(")");
        }
        if let Some(goal) = &filter.goal {
            query.push(" AND goal = ");
            query.push_bind(goal);
        }
        if let Some(agent) = &filter.claimed_by {
            query.push(" AND claimed_by = ");
            query.push_bind(agent);
        }
        if let Some(subject) = &filter.subject_id {
            query.push(" AND subject_id = ");
            query.push_bind(subject);
        }
        if let Some(session) = &filter.session_id {
            query.push(" AND (subject_id = ");
            query.push_bind(session);
            query.push(" OR json_extract(params, '$.sessionId') = ");
            query.push_bind(session);
            query.push(")");
        }
        if let Some(org) = &filter.org_id {
            query.push(" AND org_id = ");
            query.push_bind(org);
        }
        if let Some(site) = &filter.site_id {
            query.push(" AND site_id = ");
            query.push_bind(site);
        }
        if let Some(machine) = &filter.machine_id {
            query.push(" AND machine_id = ");
            query.push_bind(machine);
        }
        push_org_scope(&mut query, &filter.org);

        query.push(" ORDER BY created_at DESC, mission_id DESC LIMIT ");
        query.push_bind(filter.limit.max(1));

        let rows: Vec<MissionRow> = query.build_query_as().fetch_all(&self.pool).await?;
        rows.into_iter().map(Mission::try_from).collect()
    }

    pub async fn metrics(&self) -> KernelResult<MissionMetrics> {
        let counts: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM missions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut by_status: BTreeMap<String, i64> = MissionStatus::ALL
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        let mut total = 0;
        for (status, count) in counts {
            total += count;
            by_status.insert(status, count);
        }

        let rate_limited: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM missions \
             WHERE governance IS NOT NULL AND EXISTS ( \
                 SELECT 1 FROM json_each(missions.governance, '$.reasons') AS reason \
                 WHERE json_extract(reason.value, '$.code') = 'RATE_LIMITED')",
        )
        .fetch_one(&self.pool)
        .await?;

        let approved_total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM missions \
             WHERE json_extract(governance, '$.decidedBy') = 'HUMAN'",
        )
        .fetch_one(&self.pool)
        .await?;

        let quarantined = by_status
            .get(MissionStatus::Quarantined.as_str())
            .copied()
            .unwrap_or(0);
        let blocked = by_status
            .get(MissionStatus::Blocked.as_str())
            .copied()
            .unwrap_or(0);

        Ok(MissionMetrics {
            total,
            by_status,
            quarantined,
            blocked,
            rate_limited,
            approved_total,
        })
    }
}

// ── helpers ──────────────────────────────────────────────────────────

fn opt_json<T: Serialize>(value: &Option<T>) -> Result<Option<String>, serde_json::Error> {
    value.as_ref().map(serde_json::to_string).transpose()
}

fn push_org_scope(query: &mut QueryBuilder<'_, Sqlite>, scope: &OrgScope) {
    match scope {
        OrgScope::Any => {}
        OrgScope::Exact(Some(org)) => {
            query.push(" AND org_id = ");
            query.push_bind(org.clone());
        }
        OrgScope::Exact(None) => {
            query.push(" AND org_id IS NULL");
        }
    }
}

async fn fetch_row<'e>(
    executor: impl sqlx::SqliteExecutor<'e>,
    mission_id: &str,
) -> KernelResult<Option<MissionRow>> {
    let row = sqlx::query_as::<_, MissionRow>(&format!(
        "SELECT {MISSION_COLUMNS} FROM missions WHERE mission_id = ? LIMIT 1"
    ))
    .bind(mission_id)
    .fetch_optional(executor)
    .await?;
    Ok(row)
}

/// Why did a RUNNING-guarded update touch zero rows?
async fn running_conflict(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    mission_id: &str,
    lease_id: Option<&str>,
) -> KernelResult<KernelError> {
    let Some(row) = fetch_row(&mut **tx, mission_id).await? else {
        return Ok(KernelError::NotFound("Mission"));
    };
    let mission = Mission::try_from(row)?;
    if mission.status != MissionStatus::Running {
        return Ok(KernelError::invalid_state("Mission is not running"));
    }
    if lease_id.is_some() && mission.lease_id.as_deref() != lease_id {
        return Ok(KernelError::LeaseMismatch);
    }
    Ok(KernelError::invalid_state("Mission is not running"))
}
