//! In-memory execution traces.
//!
//! Agents post breadcrumbs about mission execution; operators read them back
//! when debugging. Process lifetime only, rebuilt empty on restart, and not
//! part of any durability invariant.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const TRACE_CAPACITY: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub mission_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct TraceStore {
    events: Arc<RwLock<VecDeque<TraceEvent>>>,
}

impl TraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one event, evicting the oldest past capacity.
    pub async fn record(&self, event: TraceEvent) {
        let mut events = self.events.write().await;
        if events.len() >= TRACE_CAPACITY {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Most recent events, newest first.
    pub async fn recent(&self, limit: usize) -> Vec<TraceEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// All events for one mission, oldest first.
    pub async fn for_mission(&self, mission_id: &str) -> Vec<TraceEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.mission_id == mission_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_filters_by_mission() {
        let store = TraceStore::new();
        let now = Utc::now();
        for (mission, label) in [("M-1", "claimed"), ("M-2", "claimed"), ("M-1", "done")] {
            store
                .record(TraceEvent {
                    mission_id: mission.to_string(),
                    agent: Some("w1".to_string()),
                    label: label.to_string(),
                    data: None,
                    at: now,
                })
                .await;
        }

        let m1 = store.for_mission("M-1").await;
        assert_eq!(m1.len(), 2);
        assert_eq!(m1[0].label, "claimed");
        assert_eq!(store.recent(10).await.len(), 3);
    }
}
