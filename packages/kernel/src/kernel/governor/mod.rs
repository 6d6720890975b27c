//! Admission policy: versioned config, the pure decision engine, and the
//! store-backed `Governor` service that ties them to rate limiting.

pub mod config;
pub mod engine;

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::kernel::error::KernelResult;
use crate::kernel::missions::model::{MissionContext, MissionSignals, MissionStatus};
use crate::kernel::ratelimit::RateLimiter;

pub use config::{
    AutonomyLevel, CommandAutonomyConfig, GovernorConfig, GovernorConfigPatch,
    GovernorConfigStore, PolicyConfig, ReportGate, REPORT_GOAL,
};
pub use engine::{
    evaluate_admission, evaluate_command, AdmissionOutcome, CommandStats, Confidence,
    GovernanceAction, GovernanceDecision, GovernanceReason, ReasonCode, GOVERNOR_DECIDER,
    HUMAN_DECIDER,
};

/// Result of admitting a mission: the decision to record plus the initial
/// status it implies.
#[derive(Debug, Clone)]
pub struct MissionEvaluation {
    pub decision: GovernanceDecision,
    pub status: MissionStatus,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Admission service: policy + gates (pure) followed by the rate-limit take
/// (store-backed).
#[derive(Clone)]
pub struct Governor {
    config_store: GovernorConfigStore,
    limiter: RateLimiter,
}

impl Governor {
    pub fn new(config_store: GovernorConfigStore, limiter: RateLimiter) -> Self {
        Self {
            config_store,
            limiter,
        }
    }

    pub fn config_store(&self) -> &GovernorConfigStore {
        &self.config_store
    }

    /// Full admission for a mission submission: policy, goal gate, then one
    /// token from the `(org/site/machine, goal)` bucket.
    pub async fn evaluate_mission(
        &self,
        goal: &str,
        context: &MissionContext,
        signals: Option<&MissionSignals>,
        now: DateTime<Utc>,
    ) -> KernelResult<MissionEvaluation> {
        let config = self.config_store.get().await?;
        let admission = evaluate_admission(goal, signals, &config);

        match admission.action {
            GovernanceAction::Block => Ok(MissionEvaluation {
                decision: admission.into_decision(now),
                status: MissionStatus::Blocked,
                next_retry_at: None,
            }),
            GovernanceAction::Quarantine => Ok(MissionEvaluation {
                decision: admission.into_decision(now),
                status: MissionStatus::Quarantined,
                next_retry_at: None,
            }),
            _ => {
                let scope_key = RateLimiter::scope_key(
                    context.org_id.as_deref(),
                    context.site_id.as_deref(),
                    context.machine_id.as_deref(),
                );
                let rule = config.rate_rule_for(goal);
                let taken = self.limiter.take(&scope_key, goal, &rule, now).await?;

                if taken.allowed {
                    return Ok(MissionEvaluation {
                        decision: admission.into_decision(now),
                        status: MissionStatus::Pending,
                        next_retry_at: None,
                    });
                }

                let mut details = json!({ "scopeKey": scope_key });
                if let Some(retry_at) = taken.next_retry_at {
                    details["nextRetryAt"] = json!(retry_at);
                }
                let decision = GovernanceDecision {
                    action: GovernanceAction::RetryLater,
                    confidence: admission.confidence,
                    reasons: vec![GovernanceReason {
                        code: ReasonCode::RateLimited,
                        details: Some(details),
                    }],
                    decided_at: now,
                    decided_by: GOVERNOR_DECIDER.to_string(),
                };
                Ok(MissionEvaluation {
                    decision,
                    status: MissionStatus::Retry,
                    next_retry_at: taken.next_retry_at,
                })
            }
        }
    }

    /// Policy dry-run: the pure admission steps only, no token consumed.
    pub async fn check_policy(
        &self,
        goal: &str,
        signals: Option<&MissionSignals>,
    ) -> KernelResult<AdmissionOutcome> {
        let config = self.config_store.get().await?;
        Ok(evaluate_admission(goal, signals, &config))
    }
}
