//! Notification agent
//!
//! Delivery here means appending to the in-memory log; a production port
//! would push to displays or SMS behind the same capability.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use crate::config::MeshConfig;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::payload::{capability, NotifyParams};
use crate::protocol::{AgentCard, Capability, TaskRequest};
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};

use super::{spawn_heartbeat, AgentHandle};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Notification {
    pub recipient: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
}

/// Record of everything the notification agent delivered
#[derive(Default)]
pub struct NotificationLog {
    sent: Mutex<Vec<Notification>>,
}

impl NotificationLog {
    pub fn record(&self, recipient: String, message: String) {
        let mut sent = self.sent.lock().unwrap();
        sent.push(Notification {
            recipient,
            message,
            sent_at: Utc::now(),
        });
    }

    pub fn delivered(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }
}

/// Delivers updates to patients and staff displays
pub struct NotificationAgent;

impl NotificationAgent {
    pub const AGENT_ID: &'static str = "notification";

    pub fn card() -> AgentCard {
        AgentCard::new(Self::AGENT_ID, "Notification Agent").with_capability(
            Capability::new(
                capability::NOTIFY,
                "Deliver an update to a patient or display",
                "delivered, recipient",
            )
            .with_parameter("recipient", "string", false)
            .with_parameter("message", "string", false),
        )
    }

    pub fn spawn(
        bus: &MeshBus,
        transport: Arc<dyn MeshTransport>,
        discovery: &Arc<DiscoveryService>,
        config: &MeshConfig,
    ) -> MeshResult<(AgentHandle, Arc<NotificationLog>)> {
        discovery.register(Self::card())?;

        let log = Arc::new(NotificationLog::default());
        let engine = TaskEngine::new(Self::AGENT_ID, transport, config.tasks.clone());
        engine.on_task_received(Arc::new(NotificationHandler { log: log.clone() }));

        let mailbox = bus.attach(Self::AGENT_ID);
        let mut tasks = engine.start(mailbox);
        tasks.push(spawn_heartbeat(
            discovery.clone(),
            Self::AGENT_ID.to_string(),
            config.agents.heartbeat_interval(),
        ));

        Ok((AgentHandle::new(Self::AGENT_ID, engine, tasks), log))
    }
}

struct NotificationHandler {
    log: Arc<NotificationLog>,
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match request.capability_name.as_str() {
            capability::NOTIFY => {
                let params: NotifyParams = request.parameters.decode()?;

                let recipient = params
                    .recipient
                    .or(params.patient_name)
                    .unwrap_or_else(|| "waiting-room display".to_string());
                let message = params.message.unwrap_or_else(|| match &params.ticket_number {
                    Some(ticket) => format!("Ticket {ticket} has been created"),
                    None => "You have an update from the front desk".to_string(),
                });

                info!(recipient = %recipient, "Delivered notification");
                self.log.record(recipient.clone(), message);

                Ok(json!({ "delivered": true, "recipient": recipient }))
            }
            other => Err(MeshError::validation(format!(
                "notification agent cannot handle capability {other}"
            ))),
        }
    }
}
