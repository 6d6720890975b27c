//! In-process registries of agents and tools.
//!
//! Plain maps with process lifetime: agents re-register on startup and
//! nothing here participates in the mission invariants.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRegistration {
    pub name: String,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolRegistration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params_schema: Option<serde_json::Value>,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct Registry {
    agents: Arc<RwLock<HashMap<String, AgentRegistration>>>,
    tools: Arc<RwLock<HashMap<String, ToolRegistration>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert by name; the latest registration wins.
    pub async fn register_agent(&self, registration: AgentRegistration) -> AgentRegistration {
        let mut agents = self.agents.write().await;
        agents.insert(registration.name.clone(), registration.clone());
        registration
    }

    pub async fn list_agents(&self) -> Vec<AgentRegistration> {
        let agents = self.agents.read().await;
        let mut list: Vec<_> = agents.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn register_tool(&self, registration: ToolRegistration) -> ToolRegistration {
        let mut tools = self.tools.write().await;
        tools.insert(registration.name.clone(), registration.clone());
        registration
    }

    pub async fn list_tools(&self) -> Vec<ToolRegistration> {
        let tools = self.tools.read().await;
        let mut list: Vec<_> = tools.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn latest_agent_registration_wins() {
        let registry = Registry::new();
        let now = Utc::now();
        registry
            .register_agent(AgentRegistration {
                name: "w1".into(),
                goals: vec!["generate-roast-report".into()],
                version: Some("1.0".into()),
                org_id: None,
                registered_at: now,
            })
            .await;
        registry
            .register_agent(AgentRegistration {
                name: "w1".into(),
                goals: vec![],
                version: Some("1.1".into()),
                org_id: None,
                registered_at: now,
            })
            .await;

        let agents = registry.list_agents().await;
        assert_eq!(agents.len(), 1);
        assert_eq!(agents[0].version.as_deref(), Some("1.1"));
    }
}
