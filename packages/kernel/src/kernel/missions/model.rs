//! Mission record types and their persisted row shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::common::time::{from_millis, opt_from_millis};
use crate::kernel::actor::Actor;
use crate::kernel::error::KernelError;
use crate::kernel::governor::engine::GovernanceDecision;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionStatus {
    Pending,
    Running,
    Retry,
    Done,
    Failed,
    Quarantined,
    Blocked,
    Canceled,
}

impl MissionStatus {
    pub const ALL: [MissionStatus; 8] = [
        MissionStatus::Pending,
        MissionStatus::Running,
        MissionStatus::Retry,
        MissionStatus::Done,
        MissionStatus::Failed,
        MissionStatus::Quarantined,
        MissionStatus::Blocked,
        MissionStatus::Canceled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Pending => "PENDING",
            MissionStatus::Running => "RUNNING",
            MissionStatus::Retry => "RETRY",
            MissionStatus::Done => "DONE",
            MissionStatus::Failed => "FAILED",
            MissionStatus::Quarantined => "QUARANTINED",
            MissionStatus::Blocked => "BLOCKED",
            MissionStatus::Canceled => "CANCELED",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MissionStatus::Done
                | MissionStatus::Failed
                | MissionStatus::Canceled
                | MissionStatus::Blocked
        )
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionStatus {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| KernelError::validation(format!("unknown mission status '{s}'")))
    }
}

/// Structured metadata identifying where the work belongs. Extra fields are
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Evidence about the roast session backing a mission, as submitted by the
/// client. All fields optional; the gates decide what absence means.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSignals {
    #[serde(
        default,
        rename = "telemetryPoints",
        skip_serializing_if = "Option::is_none"
    )]
    pub telemetry_points: Option<i64>,
    #[serde(default, rename = "durationSec", skip_serializing_if = "Option::is_none")]
    pub duration_sec: Option<f64>,
    #[serde(default, rename = "hasBT", skip_serializing_if = "Option::is_none")]
    pub has_bt: Option<bool>,
    #[serde(default, rename = "hasET", skip_serializing_if = "Option::is_none")]
    pub has_et: Option<bool>,
    #[serde(default, rename = "closeReason", skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MissionSignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionSignals>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Structured failure recorded on FAILED/RETRY.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// A durable unit of scheduled work.
///
/// Lease fields are all set while RUNNING and all null otherwise; status and
/// lease/retry fields only ever change through [`super::repo`] transactions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "camelCase")]
#[builder(field_defaults(setter(into)))]
pub struct Mission {
    pub mission_id: String,
    pub idempotency_key: String,
    pub goal: String,
    #[builder(default = serde_json::Value::Object(Default::default()))]
    pub params: serde_json::Value,
    #[builder(default)]
    pub context: MissionContext,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<String>,

    pub status: MissionStatus,
    #[builder(default = 0)]
    pub attempts: i64,
    #[builder(default = 5)]
    pub max_attempts: i64,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_retry_at: Option<DateTime<Utc>>,

    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_id: Option<String>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_expires_at: Option<DateTime<Utc>>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat_at: Option<DateTime<Utc>>,

    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_meta: Option<serde_json::Value>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<MissionError>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance: Option<GovernanceDecision>,
    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signals: Option<MissionSignals>,

    #[builder(default, setter(strip_option))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Actor>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
}

impl Mission {
    /// Lease duration this mission was claimed with, reconstructed from the
    /// lease window. Falls back to the default when the fields are absent.
    pub fn lease_duration_ms(&self, fallback_ms: i64) -> i64 {
        match (self.claimed_at, self.lease_expires_at) {
            (Some(claimed), Some(expires)) => {
                let ms = (expires - claimed).num_milliseconds();
                if ms > 0 {
                    ms
                } else {
                    fallback_ms
                }
            }
            _ => fallback_ms,
        }
    }
}

// ── Persisted row shape ──────────────────────────────────────────────

/// Raw `missions` row. JSON documents stay TEXT and timestamps stay INTEGER
/// millis here; conversion to the domain shape happens in `TryFrom`.
#[derive(Debug, sqlx::FromRow)]
pub struct MissionRow {
    pub mission_id: String,
    pub idempotency_key: String,
    pub goal: String,
    pub params: String,
    pub context: String,
    pub subject_id: Option<String>,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: Option<i64>,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<i64>,
    pub lease_id: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
    pub result_meta: Option<String>,
    pub last_error: Option<String>,
    pub governance: Option<String>,
    pub signals: Option<String>,
    pub created_by: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
    pub failed_at: Option<i64>,
}

fn parse_opt<T: serde::de::DeserializeOwned>(
    raw: Option<String>,
) -> Result<Option<T>, serde_json::Error> {
    raw.map(|s| serde_json::from_str(&s)).transpose()
}

impl TryFrom<MissionRow> for Mission {
    type Error = KernelError;

    fn try_from(row: MissionRow) -> Result<Self, Self::Error> {
        Ok(Mission {
            mission_id: row.mission_id,
            idempotency_key: row.idempotency_key,
            goal: row.goal,
            params: serde_json::from_str(&row.params)?,
            context: serde_json::from_str(&row.context)?,
            subject_id: row.subject_id,
            status: row.status.parse()?,
            attempts: row.attempts,
            max_attempts: row.max_attempts,
            next_retry_at: opt_from_millis(row.next_retry_at),
            claimed_by: row.claimed_by,
            claimed_at: opt_from_millis(row.claimed_at),
            lease_id: row.lease_id,
            lease_expires_at: opt_from_millis(row.lease_expires_at),
            last_heartbeat_at: opt_from_millis(row.last_heartbeat_at),
            result_meta: parse_opt(row.result_meta)?,
            last_error: parse_opt(row.last_error)?,
            governance: parse_opt(row.governance)?,
            signals: parse_opt(row.signals)?,
            created_by: parse_opt(row.created_by)?,
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
            completed_at: opt_from_millis(row.completed_at),
            failed_at: opt_from_millis(row.failed_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in MissionStatus::ALL {
            assert_eq!(status.as_str().parse::<MissionStatus>().unwrap(), status);
        }
        assert!("SLEEPING".parse::<MissionStatus>().is_err());
    }

    #[test]
    fn terminal_statuses_match_spec() {
        assert!(MissionStatus::Done.is_terminal());
        assert!(MissionStatus::Blocked.is_terminal());
        assert!(!MissionStatus::Quarantined.is_terminal());
        assert!(!MissionStatus::Retry.is_terminal());
    }

    #[test]
    fn session_signals_use_wire_field_names() {
        let json = serde_json::json!({
            "telemetryPoints": 120,
            "durationSec": 200.0,
            "hasBT": true,
            "closeReason": "NORMAL"
        });
        let signals: SessionSignals = serde_json::from_value(json).unwrap();
        assert_eq!(signals.telemetry_points, Some(120));
        assert_eq!(signals.has_bt, Some(true));
        assert_eq!(signals.has_et, None);
    }

    #[test]
    fn mission_serializes_camel_case() {
        let now = Utc::now();
        let mission = Mission::builder()
            .mission_id("M-1")
            .idempotency_key("M-1")
            .goal("generate-roast-report")
            .status(MissionStatus::Pending)
            .created_at(now)
            .updated_at(now)
            .build();
        let value = serde_json::to_value(&mission).unwrap();
        assert_eq!(value["missionId"], "M-1");
        assert_eq!(value["status"], "PENDING");
        assert!(value.get("leaseId").is_none());
    }
}
