//! Queue agent: admission and patient calling over the shared queue manager

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::MeshConfig;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::payload::{capability, CallNextParams, EnqueueParams};
use crate::protocol::{AgentCard, Capability, TaskRequest};
use crate::queue::{QueueEntry, QueueManager};
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};

use super::{spawn_heartbeat, AgentHandle};

/// Mutates the queue manager on behalf of the rest of the mesh
pub struct QueueAgent;

impl QueueAgent {
    pub const AGENT_ID: &'static str = "queue";

    pub fn card() -> AgentCard {
        AgentCard::new(Self::AGENT_ID, "Queue Agent")
            .with_capability(
                Capability::new(
                    capability::ENQUEUE,
                    "Admit a patient to a queue",
                    "entry_id, ticket_number, estimated_wait_secs",
                )
                .with_parameter("patient_name", "string", true)
                .with_parameter("queue_type", "string", false)
                .with_parameter("priority", "string", false)
                .with_parameter("reason", "string", false),
            )
            .with_capability(
                Capability::new(
                    capability::CALL_NEXT,
                    "Call the next waiting patient in a lane",
                    "entry_id, ticket_number, patient_name",
                )
                .with_parameter("queue_type", "string", true),
            )
    }

    pub fn spawn(
        bus: &MeshBus,
        transport: Arc<dyn MeshTransport>,
        discovery: &Arc<DiscoveryService>,
        queue: Arc<QueueManager>,
        config: &MeshConfig,
    ) -> MeshResult<AgentHandle> {
        discovery.register(Self::card())?;

        let engine = TaskEngine::new(Self::AGENT_ID, transport, config.tasks.clone());
        engine.on_task_received(Arc::new(QueueHandler { queue }));

        let mailbox = bus.attach(Self::AGENT_ID);
        let mut tasks = engine.start(mailbox);
        tasks.push(spawn_heartbeat(
            discovery.clone(),
            Self::AGENT_ID.to_string(),
            config.agents.heartbeat_interval(),
        ));

        Ok(AgentHandle::new(Self::AGENT_ID, engine, tasks))
    }
}

struct QueueHandler {
    queue: Arc<QueueManager>,
}

#[async_trait]
impl TaskHandler for QueueHandler {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match request.capability_name.as_str() {
            capability::ENQUEUE => {
                let params: EnqueueParams = request.parameters.decode()?;
                let admitted = match params.ticket_number {
                    Some(ticket) => {
                        let mut entry = QueueEntry::new(ticket, params.queue_type, params.priority);
                        entry.patient_name = Some(params.patient_name);
                        entry.reason = params.reason;
                        self.queue.enqueue(entry)?
                    }
                    None => self.queue.create_entry(
                        params.queue_type,
                        params.priority,
                        Some(params.patient_name),
                        params.reason,
                    ),
                };

                Ok(json!({
                    "entry_id": admitted.entry_id,
                    "ticket_number": admitted.ticket_number,
                    "queue_type": admitted.queue_type,
                    "priority": admitted.priority,
                    "estimated_wait_secs": admitted.estimated_wait.as_secs(),
                }))
            }
            capability::CALL_NEXT => {
                let params: CallNextParams = request.parameters.decode()?;
                let called = self.queue.call_next(params.queue_type)?;

                Ok(json!({
                    "entry_id": called.entry_id,
                    "ticket_number": called.ticket_number,
                    "patient_name": called.patient_name,
                    "status": called.status,
                }))
            }
            other => Err(MeshError::validation(format!(
                "queue agent cannot handle capability {other}"
            ))),
        }
    }
}
