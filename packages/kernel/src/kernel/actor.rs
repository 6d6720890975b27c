//! Identified principals issuing requests against the plane.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActorKind {
    User,
    Agent,
    System,
}

/// An identified principal. SYSTEM actors bypass org scoping; USER and AGENT
/// actors only see missions belonging to their own org.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub kind: ActorKind,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Actor {
    pub fn system(id: impl Into<String>) -> Self {
        Self {
            kind: ActorKind::System,
            id: id.into(),
            org_id: None,
            display: None,
        }
    }

    pub fn is_system(&self) -> bool {
        self.kind == ActorKind::System
    }

    /// Whether this actor may observe or mutate a mission in the given org.
    /// Non-SYSTEM actors must match the mission's org exactly (including the
    /// absent-org case).
    pub fn can_access_org(&self, org: Option<&str>) -> bool {
        self.is_system() || self.org_id.as_deref() == org
    }
}

/// Org restriction applied to queries on behalf of an actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrgScope {
    /// SYSTEM actors: no restriction.
    Any,
    /// Non-SYSTEM actors: rows must match this org exactly (None matches
    /// missions that carry no org).
    Exact(Option<String>),
}

impl Default for OrgScope {
    fn default() -> Self {
        Self::Any
    }
}

impl OrgScope {
    pub fn for_actor(actor: &Actor) -> Self {
        if actor.is_system() {
            Self::Any
        } else {
            Self::Exact(actor.org_id.clone())
        }
    }
}
