//! ops-mesh - Agent coordination layer for hospital operations
//!
//! This crate implements the coordination mesh connecting the hospital's
//! operational agents (front desk, queue, appointment, notification,
//! orchestrator):
//! - Discovery service with capability search and heartbeat-based liveness
//! - Task protocol with correlation ids, timeouts, and bounded retry
//! - Workflow orchestration over dependent multi-agent steps
//! - Priority queue admission with wait-time estimation
//!
//! # Quick Start
//!
//! ```rust
//! use ops_mesh::config::MeshConfig;
//! use ops_mesh::discovery::DiscoveryService;
//! use ops_mesh::protocol::{AgentCard, Capability};
//!
//! let config = MeshConfig::default();
//! let discovery = DiscoveryService::new(config.discovery.clone());
//!
//! let card = AgentCard::new("frontdesk", "Front Desk")
//!     .with_capability(Capability::new(
//!         "register_patient",
//!         "Register a new patient",
//!         "patient_id, patient_name",
//!     ));
//!
//! discovery.register(card).unwrap();
//! assert_eq!(discovery.find_by_capability("register_patient").len(), 1);
//! ```

pub mod agents;
pub mod config;
pub mod discovery;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod queue;
pub mod store;
pub mod tasks;
pub mod testing;
pub mod workflow;

pub use config::MeshConfig;
pub use discovery::{AgentDescriptor, DiscoveryService, SweepOutcome};
pub use error::{MeshError, MeshResult};
pub use protocol::*;
pub use queue::{QueueEntry, QueueManager, QueuePriority, QueueStatus, QueueType};
pub use tasks::{CapabilityHandlers, MeshBus, MeshTransport, TaskEngine, TaskHandler};
pub use workflow::{
    StepState, WorkflowDefinition, WorkflowOrchestrator, WorkflowSnapshot, WorkflowStatus,
    WorkflowStep,
};
