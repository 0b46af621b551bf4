//! Test support: fault injection and fixtures
//!
//! Compiled into the library so integration tests and downstream consumers
//! can exercise timeout, retry, and duplicate-response paths without a real
//! network.

pub mod mocks;

use std::sync::Arc;

use crate::config::{MeshConfig, TaskSection};
use crate::discovery::DiscoveryService;
use crate::error::MeshResult;
use crate::protocol::{AgentCard, Capability};
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};

pub use mocks::{FixedHandler, FlakyTransport, RecordingHandler};

/// Task settings tuned for fast test runs (100ms attempts, 10ms backoff)
pub fn fast_task_config() -> TaskSection {
    TaskSection {
        default_timeout_ms: 100,
        max_retries: 3,
        backoff_base_ms: 10,
        backoff_cap_ms: 50,
        inbound_cache_size: 64,
    }
}

/// Mesh settings tuned for fast test runs
pub fn fast_mesh_config() -> MeshConfig {
    let mut config = MeshConfig::default();
    config.tasks = fast_task_config();
    config.workflow.overall_ceiling_secs = 10;
    config.agents.heartbeat_interval_secs = 1;
    config
}

/// Register a bare agent with the given capabilities and start its engine
pub fn spawn_test_agent(
    bus: &MeshBus,
    transport: Arc<dyn MeshTransport>,
    discovery: &Arc<DiscoveryService>,
    agent_id: &str,
    capabilities: &[&str],
    handler: Arc<dyn TaskHandler>,
) -> MeshResult<Arc<TaskEngine>> {
    let mut card = AgentCard::new(agent_id, agent_id);
    for capability in capabilities {
        card = card.with_capability(Capability::new(*capability, "test capability", "result"));
    }
    discovery.register(card)?;

    let engine = TaskEngine::new(agent_id, transport, fast_task_config());
    engine.on_task_received(handler);
    let mailbox = bus.attach(agent_id);
    engine.start(mailbox);
    Ok(engine)
}
