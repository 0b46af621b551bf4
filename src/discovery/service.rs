//! Discovery service
//!
//! Owns the agent registry and processes registration, deregistration,
//! heartbeats, and capability searches. A periodic sweep marks silent agents
//! unreachable after the liveness window and evicts them after the grace
//! window. An empty capability search is normal, reportable data - never an
//! error - so discovery can never block workflow progress indefinitely.

use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DiscoverySection;
use crate::error::{MeshError, MeshResult};
use crate::protocol::{AgentAvailability, AgentCard, Heartbeat, SUPPORTED_PROTOCOL_VERSIONS};

use super::registry::{AgentDescriptor, AgentRegistry};

/// Result of one registry sweep
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepOutcome {
    pub marked_unreachable: Vec<String>,
    pub evicted: Vec<String>,
}

/// Sole owner of the agent registry
pub struct DiscoveryService {
    registry: RwLock<AgentRegistry>,
    config: DiscoverySection,
}

impl DiscoveryService {
    pub fn new(config: DiscoverySection) -> Arc<Self> {
        Arc::new(Self {
            registry: RwLock::new(AgentRegistry::new()),
            config,
        })
    }

    /// Add or replace an agent descriptor keyed by agent id
    ///
    /// Fails with a validation error when the card declares no capabilities
    /// or an unsupported protocol version.
    pub fn register(&self, card: AgentCard) -> MeshResult<()> {
        if card.capabilities.is_empty() {
            return Err(MeshError::validation(format!(
                "agent {} must declare at least one capability",
                card.agent_id
            )));
        }
        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&card.protocol_version.as_str()) {
            return Err(MeshError::validation(format!(
                "agent {} uses unsupported protocol version {}",
                card.agent_id, card.protocol_version
            )));
        }

        let descriptor = AgentDescriptor::from_card(card);
        let agent_id = descriptor.agent_id.clone();

        let mut registry = self.registry.write().unwrap();
        if registry.insert(descriptor) {
            info!(agent_id = %agent_id, "Registered new agent");
        } else {
            debug!(agent_id = %agent_id, "Replaced agent registration");
        }
        Ok(())
    }

    /// Remove an agent; idempotent
    pub fn deregister(&self, agent_id: &str) {
        let mut registry = self.registry.write().unwrap();
        if registry.remove(agent_id).is_some() {
            info!(agent_id = %agent_id, "Deregistered agent");
        }
    }

    /// Refresh an agent's heartbeat and status
    ///
    /// A fresh heartbeat makes a previously unreachable agent selectable
    /// again.
    pub fn heartbeat(&self, agent_id: &str, status: AgentAvailability) -> MeshResult<()> {
        let mut registry = self.registry.write().unwrap();
        let descriptor = registry
            .get_mut(agent_id)
            .ok_or_else(|| MeshError::not_registered(agent_id))?;

        descriptor.last_heartbeat = Utc::now();
        descriptor.status = status;
        debug!(agent_id = %agent_id, status = ?status, "Heartbeat");
        Ok(())
    }

    /// Apply a heartbeat message
    pub fn apply_heartbeat(&self, heartbeat: &Heartbeat) -> MeshResult<()> {
        self.heartbeat(&heartbeat.agent_id, heartbeat.status)
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        let registry = self.registry.read().unwrap();
        registry.get(agent_id).cloned()
    }

    /// Agents able to serve a capability, most idle first
    ///
    /// ACTIVE ranks before BUSY; within a band the most recent heartbeat wins
    /// to spread load toward agents known to be alive. Unreachable agents are
    /// excluded until they re-register or heartbeat again. An empty list
    /// means the capability is currently unavailable.
    pub fn find_by_capability(&self, capability: &str) -> Vec<AgentDescriptor> {
        let registry = self.registry.read().unwrap();
        let mut candidates: Vec<AgentDescriptor> = registry
            .available_with_capability(capability)
            .into_iter()
            .cloned()
            .collect();

        candidates.sort_by(|a, b| {
            status_rank(a.status)
                .cmp(&status_rank(b.status))
                .then(b.last_heartbeat.cmp(&a.last_heartbeat))
                .then(a.agent_id.cmp(&b.agent_id))
        });

        candidates
    }

    /// Most idle agent for a capability, if any
    pub fn resolve_capability(&self, capability: &str) -> Option<AgentDescriptor> {
        let best = self.find_by_capability(capability).into_iter().next();
        match &best {
            Some(agent) => info!(
                agent_id = %agent.agent_id,
                capability = %capability,
                status = ?agent.status,
                "Resolved capability"
            ),
            None => debug!(capability = %capability, "No capable agent"),
        }
        best
    }

    /// Mark silent agents unreachable and evict long-dead ones
    pub fn sweep(&self) -> SweepOutcome {
        self.sweep_at(Utc::now())
    }

    /// Sweep against an explicit clock; used by the periodic sweeper and tests
    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepOutcome {
        let liveness =
            chrono::Duration::from_std(self.config.liveness_window()).unwrap_or_else(|_| {
                chrono::Duration::seconds(15)
            });
        let grace = chrono::Duration::from_std(self.config.grace_window())
            .unwrap_or_else(|_| chrono::Duration::seconds(60));

        let mut outcome = SweepOutcome::default();
        let mut registry = self.registry.write().unwrap();

        for agent in registry.iter_mut() {
            let age = agent.heartbeat_age(now);
            if age > grace && agent.status == AgentAvailability::Unreachable {
                outcome.evicted.push(agent.agent_id.clone());
            } else if age > liveness && agent.status != AgentAvailability::Unreachable {
                agent.status = AgentAvailability::Unreachable;
                outcome.marked_unreachable.push(agent.agent_id.clone());
            }
        }

        for agent_id in &outcome.evicted {
            registry.remove(agent_id);
        }

        if !outcome.marked_unreachable.is_empty() {
            warn!(
                agents = ?outcome.marked_unreachable,
                "Marked agents unreachable after heartbeat silence"
            );
        }
        if !outcome.evicted.is_empty() {
            info!(agents = ?outcome.evicted, "Evicted agents past grace window");
        }

        outcome
    }

    /// Run the sweep on an independent periodic timer
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let service = Arc::clone(self);
        let interval = service.config.sweep_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // First tick completes immediately; skip it so the first real
            // sweep happens one interval after startup
            timer.tick().await;
            loop {
                timer.tick().await;
                service.sweep();
            }
        })
    }

    pub fn agent_count(&self) -> usize {
        let registry = self.registry.read().unwrap();
        registry.len()
    }

    /// Shift an agent's heartbeat into the past (for liveness tests only)
    #[doc(hidden)]
    pub fn backdate_heartbeat(&self, agent_id: &str, age: chrono::Duration) {
        let mut registry = self.registry.write().unwrap();
        if let Some(agent) = registry.get_mut(agent_id) {
            agent.last_heartbeat = Utc::now() - age;
        }
    }
}

fn status_rank(status: AgentAvailability) -> u8 {
    match status {
        AgentAvailability::Active => 0,
        AgentAvailability::Busy => 1,
        AgentAvailability::Unreachable => 2,
    }
}
