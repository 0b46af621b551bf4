//! The hospital's operational agents and mesh assembly
//!
//! Each agent owns a task engine attached to the bus, registers its card with
//! discovery, and heartbeats on a timer. `build_mesh` wires the full set -
//! front desk, queue, appointment, notification, and the orchestrator - and
//! is the only place the pieces are coupled together; everything is
//! constructed explicitly and passed by handle, never reached through
//! ambient globals.

pub mod appointment;
pub mod frontdesk;
pub mod notification;
pub mod queue_agent;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::MeshConfig;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::payload::capability;
use crate::protocol::{
    AgentAvailability, AgentCard, Capability, TaskRequest, WorkflowStartRequest,
    WorkflowStatusQuery,
};
use crate::queue::QueueManager;
use crate::store::InMemoryStore;
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};
use crate::workflow::WorkflowOrchestrator;

pub use appointment::AppointmentAgent;
pub use frontdesk::FrontDeskAgent;
pub use notification::{Notification, NotificationAgent, NotificationLog};
pub use queue_agent::QueueAgent;

/// A running agent: its engine plus the tasks that keep it alive
pub struct AgentHandle {
    pub agent_id: String,
    pub engine: Arc<TaskEngine>,
    tasks: Vec<JoinHandle<()>>,
}

impl AgentHandle {
    pub(crate) fn new(agent_id: &str, engine: Arc<TaskEngine>, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            engine,
            tasks,
        }
    }

    /// Stop the agent's inbox and heartbeat loops
    pub fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Periodic heartbeat to discovery; stops once the agent is deregistered
pub(crate) fn spawn_heartbeat(
    discovery: Arc<DiscoveryService>,
    agent_id: String,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await;
        loop {
            timer.tick().await;
            if let Err(e) = discovery.heartbeat(&agent_id, AgentAvailability::Active) {
                warn!(agent_id = %agent_id, error = %e, "Heartbeat rejected; stopping");
                break;
            }
        }
    })
}

/// The orchestrator's identity on the mesh
pub struct OrchestratorAgent;

impl OrchestratorAgent {
    pub const AGENT_ID: &'static str = "orchestrator";

    pub fn card() -> AgentCard {
        AgentCard::new(Self::AGENT_ID, "Workflow Orchestrator")
            .with_capability(
                Capability::new(
                    capability::START_WORKFLOW,
                    "Start a stock workflow by type",
                    "workflow_id",
                )
                .with_parameter("workflow_type", "string", true)
                .with_parameter("initial_payload", "object", false),
            )
            .with_capability(
                Capability::new(
                    capability::WORKFLOW_STATUS,
                    "Snapshot a workflow instance",
                    "overall_status, step_states",
                )
                .with_parameter("workflow_id", "string", true),
            )
    }
}

struct OrchestratorHandler {
    orchestrator: Arc<WorkflowOrchestrator>,
}

#[async_trait]
impl TaskHandler for OrchestratorHandler {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match request.capability_name.as_str() {
            capability::START_WORKFLOW => {
                let start: WorkflowStartRequest = request.parameters.decode()?;
                let workflow_id = self.orchestrator.start_from_request(start)?;
                Ok(json!({ "workflow_id": workflow_id }))
            }
            capability::WORKFLOW_STATUS => {
                let query: WorkflowStatusQuery = request.parameters.decode()?;
                let snapshot = self.orchestrator.get_status(query.workflow_id)?;
                serde_json::to_value(&snapshot)
                    .map_err(|e| MeshError::internal(format!("snapshot serialization: {e}")))
            }
            other => Err(MeshError::validation(format!(
                "orchestrator cannot handle capability {other}"
            ))),
        }
    }
}

/// A fully wired mesh: shared resources, the agents, and the sweeper
pub struct Mesh {
    pub discovery: Arc<DiscoveryService>,
    pub bus: Arc<MeshBus>,
    pub queue: Arc<QueueManager>,
    pub store: Arc<InMemoryStore>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub notifications: Arc<NotificationLog>,
    handles: Vec<AgentHandle>,
    sweeper: JoinHandle<()>,
}

/// Wire the five agents over the in-process bus
pub fn build_mesh(config: MeshConfig) -> MeshResult<Mesh> {
    let bus = Arc::new(MeshBus::new());
    let transport: Arc<dyn MeshTransport> = bus.clone();
    build_mesh_with_transport(config, bus, transport)
}

/// Wire the mesh over an explicit transport (fault injection in tests)
pub fn build_mesh_with_transport(
    config: MeshConfig,
    bus: Arc<MeshBus>,
    transport: Arc<dyn MeshTransport>,
) -> MeshResult<Mesh> {
    let discovery = DiscoveryService::new(config.discovery.clone());
    let queue = Arc::new(QueueManager::new(config.queue.clone()));
    let store = Arc::new(InMemoryStore::new());

    let frontdesk = FrontDeskAgent::spawn(
        &bus,
        transport.clone(),
        &discovery,
        store.clone(),
        &config,
    )?;
    let queue_agent = QueueAgent::spawn(
        &bus,
        transport.clone(),
        &discovery,
        queue.clone(),
        &config,
    )?;
    let appointment = AppointmentAgent::spawn(
        &bus,
        transport.clone(),
        &discovery,
        store.clone(),
        &config,
    )?;
    let (notification, notifications) =
        NotificationAgent::spawn(&bus, transport.clone(), &discovery, &config)?;

    let engine = TaskEngine::new(
        OrchestratorAgent::AGENT_ID,
        transport,
        config.tasks.clone(),
    );
    let orchestrator =
        WorkflowOrchestrator::new(discovery.clone(), engine.clone(), config.workflow.clone());
    discovery.register(OrchestratorAgent::card())?;
    engine.on_task_received(Arc::new(OrchestratorHandler {
        orchestrator: orchestrator.clone(),
    }));
    let mailbox = bus.attach(OrchestratorAgent::AGENT_ID);
    let mut tasks = engine.start(mailbox);
    tasks.push(spawn_heartbeat(
        discovery.clone(),
        OrchestratorAgent::AGENT_ID.to_string(),
        config.agents.heartbeat_interval(),
    ));
    let orchestrator_handle = AgentHandle::new(OrchestratorAgent::AGENT_ID, engine, tasks);

    let sweeper = discovery.spawn_sweeper();

    info!("Mesh assembled with 5 agents");

    Ok(Mesh {
        discovery,
        bus,
        queue,
        store,
        orchestrator,
        notifications,
        handles: vec![
            frontdesk,
            queue_agent,
            appointment,
            notification,
            orchestrator_handle,
        ],
        sweeper,
    })
}

impl Mesh {
    /// Deregister every agent and stop all background loops
    pub fn shutdown(self) {
        self.sweeper.abort();
        for handle in &self.handles {
            self.discovery.deregister(&handle.agent_id);
            self.bus.detach(&handle.agent_id);
            handle.abort();
        }
        info!("Mesh shut down");
    }
}
