//! Agent registry state

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::{AgentAvailability, AgentCard, Capability};

/// Everything the mesh knows about one agent
///
/// Created on registration, mutated only by heartbeat/status updates and the
/// liveness sweep, removed on deregistration or eviction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentDescriptor {
    pub agent_id: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub status: AgentAvailability,
    pub last_heartbeat: DateTime<Utc>,
    pub protocol_version: String,
}

impl AgentDescriptor {
    pub fn from_card(card: AgentCard) -> Self {
        Self {
            agent_id: card.agent_id,
            display_name: card.display_name,
            capabilities: card.capabilities,
            status: AgentAvailability::Active,
            last_heartbeat: Utc::now(),
            protocol_version: card.protocol_version,
        }
    }

    /// Whether capability resolution may select this agent
    pub fn is_available(&self) -> bool {
        self.status != AgentAvailability::Unreachable
    }

    /// Check if the agent declares a capability (case-insensitive)
    pub fn has_capability(&self, capability: &str) -> bool {
        let capability_lower = capability.to_lowercase();
        self.capabilities
            .iter()
            .any(|c| c.name.to_lowercase() == capability_lower)
    }

    /// Age of the last heartbeat relative to `now`
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_heartbeat)
    }
}

/// Pure lookup state; owned and mutated only by the discovery service
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentDescriptor>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a descriptor; returns true when the agent is new
    pub fn insert(&mut self, descriptor: AgentDescriptor) -> bool {
        self.agents
            .insert(descriptor.agent_id.clone(), descriptor)
            .is_none()
    }

    pub fn remove(&mut self, agent_id: &str) -> Option<AgentDescriptor> {
        self.agents.remove(agent_id)
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.agents.get(agent_id)
    }

    pub fn get_mut(&mut self, agent_id: &str) -> Option<&mut AgentDescriptor> {
        self.agents.get_mut(agent_id)
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AgentDescriptor> {
        self.agents.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut AgentDescriptor> {
        self.agents.values_mut()
    }

    /// Agents that declare a capability and are not unreachable
    pub fn available_with_capability(&self, capability: &str) -> Vec<&AgentDescriptor> {
        self.agents
            .values()
            .filter(|agent| agent.is_available() && agent.has_capability(capability))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Capability;

    fn descriptor(agent_id: &str, capability: &str) -> AgentDescriptor {
        AgentDescriptor::from_card(AgentCard::new(agent_id, agent_id).with_capability(
            Capability::new(capability, "test capability", "result"),
        ))
    }

    #[test]
    fn test_capability_matching_case_insensitive() {
        let agent = descriptor("frontdesk", "register_patient");

        assert!(agent.has_capability("register_patient"));
        assert!(agent.has_capability("REGISTER_PATIENT"));
        assert!(!agent.has_capability("enqueue"));
    }

    #[test]
    fn test_insert_reports_new_vs_replace() {
        let mut registry = AgentRegistry::new();

        assert!(registry.insert(descriptor("queue", "enqueue")));
        assert!(!registry.insert(descriptor("queue", "enqueue")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unreachable_excluded_from_available() {
        let mut registry = AgentRegistry::new();
        registry.insert(descriptor("a", "enqueue"));
        registry.insert(descriptor("b", "enqueue"));

        registry.get_mut("a").unwrap().status = AgentAvailability::Unreachable;

        let available = registry.available_with_capability("enqueue");
        assert_eq!(available.len(), 1);
        assert_eq!(available[0].agent_id, "b");
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut registry = AgentRegistry::new();
        registry.insert(descriptor("a", "x"));

        assert!(registry.remove("a").is_some());
        assert!(registry.remove("a").is_none());
    }
}
