//! Transport seam and the in-process message bus
//!
//! The protocol is transport-agnostic: the engine only needs something that
//! can deliver a request to a recipient and a response back to the sender.
//! `MeshBus` is the reference in-process implementation; HTTP or pub/sub
//! ports would implement the same trait.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{MeshError, MeshResult};
use crate::protocol::{TaskRequest, TaskResponse};

const MAILBOX_CAPACITY: usize = 64;

/// Delivers protocol messages between agents
#[async_trait]
pub trait MeshTransport: Send + Sync {
    /// Deliver a task request to its recipient agent
    async fn deliver_request(&self, request: TaskRequest) -> MeshResult<()>;

    /// Deliver a task response to the agent that sent the original request
    async fn deliver_response(&self, recipient_id: &str, response: TaskResponse) -> MeshResult<()>;
}

/// Receiving side of one agent's bus attachment
pub struct AgentMailbox {
    pub requests: mpsc::Receiver<TaskRequest>,
    pub responses: mpsc::Receiver<TaskResponse>,
}

struct Endpoint {
    requests: mpsc::Sender<TaskRequest>,
    responses: mpsc::Sender<TaskResponse>,
}

/// In-process bus routing messages between attached agents
#[derive(Default)]
pub struct MeshBus {
    endpoints: Mutex<HashMap<String, Endpoint>>,
}

impl MeshBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an agent, replacing any previous attachment for the same id
    pub fn attach(&self, agent_id: &str) -> AgentMailbox {
        let (request_tx, request_rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (response_tx, response_rx) = mpsc::channel(MAILBOX_CAPACITY);

        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.insert(
            agent_id.to_string(),
            Endpoint {
                requests: request_tx,
                responses: response_tx,
            },
        );

        AgentMailbox {
            requests: request_rx,
            responses: response_rx,
        }
    }

    /// Detach an agent; later deliveries to it fail as transport errors
    pub fn detach(&self, agent_id: &str) {
        let mut endpoints = self.endpoints.lock().unwrap();
        endpoints.remove(agent_id);
    }
}

#[async_trait]
impl MeshTransport for MeshBus {
    async fn deliver_request(&self, request: TaskRequest) -> MeshResult<()> {
        let sender = {
            let endpoints = self.endpoints.lock().unwrap();
            endpoints
                .get(&request.recipient_id)
                .map(|e| e.requests.clone())
        };

        match sender {
            Some(tx) => {
                let recipient = request.recipient_id.clone();
                tx.send(request).await.map_err(|_| {
                    MeshError::transport(format!("mailbox closed for agent {recipient}"))
                })
            }
            None => {
                debug!(recipient = %request.recipient_id, "No endpoint for recipient");
                Err(MeshError::transport(format!(
                    "no endpoint for agent {}",
                    request.recipient_id
                )))
            }
        }
    }

    async fn deliver_response(&self, recipient_id: &str, response: TaskResponse) -> MeshResult<()> {
        let sender = {
            let endpoints = self.endpoints.lock().unwrap();
            endpoints.get(recipient_id).map(|e| e.responses.clone())
        };

        match sender {
            Some(tx) => tx.send(response).await.map_err(|_| {
                MeshError::transport(format!("mailbox closed for agent {recipient_id}"))
            }),
            None => Err(MeshError::transport(format!(
                "no endpoint for agent {recipient_id}"
            ))),
        }
    }
}
