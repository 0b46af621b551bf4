//! Wire message shapes for agent coordination
//!
//! These structures are transport-agnostic: they serialize to JSON and can
//! ride over HTTP, pub/sub, or the in-process bus. The task request/response
//! pair carries the correlation id that the task engine resolves exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

use crate::protocol::payload::TaskParams;

/// Protocol version published in agent cards
pub const PROTOCOL_VERSION: &str = "1.0";

/// Versions the discovery service accepts at registration
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["1.0"];

/// Well-known failure reason tags carried in `error_detail`
pub mod reason {
    pub const EXHAUSTED_RETRIES: &str = "exhausted_retries";
    pub const NO_CAPABLE_AGENT: &str = "no_capable_agent";
    pub const NO_HANDLER: &str = "no_handler";
    pub const ABANDONED: &str = "abandoned";
}

/// One named, typed parameter in a capability declaration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
}

/// A named, schema-described operation an agent can perform
///
/// Immutable once declared; published as part of the agent card.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Capability {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<CapabilityParameter>,
    /// Short description of the result shape
    pub result_schema: String,
}

impl Capability {
    pub fn new<S: Into<String>>(name: S, description: S, result_schema: S) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            result_schema: result_schema.into(),
        }
    }

    /// Builder method to declare a parameter
    pub fn with_parameter(mut self, name: &str, type_name: &str, required: bool) -> Self {
        self.parameters.push(CapabilityParameter {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required,
        });
        self
    }
}

/// Agent card published on registration
///
/// # Examples
/// ```
/// use ops_mesh::protocol::{AgentCard, Capability};
///
/// let card = AgentCard::new("queue", "Queue Agent")
///     .with_capability(
///         Capability::new("enqueue", "Admit a patient to a queue", "ticket_number, entry_id")
///             .with_parameter("patient_name", "string", true)
///             .with_parameter("priority", "string", false),
///     );
///
/// assert_eq!(card.protocol_version, "1.0");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentCard {
    pub agent_id: String,
    pub display_name: String,
    pub capabilities: Vec<Capability>,
    pub protocol_version: String,
}

impl AgentCard {
    pub fn new<S: Into<String>>(agent_id: S, display_name: S) -> Self {
        Self {
            agent_id: agent_id.into(),
            display_name: display_name.into(),
            capabilities: Vec::new(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Builder method to declare a capability
    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Builder method to override the protocol version
    pub fn with_protocol_version<S: Into<String>>(mut self, version: S) -> Self {
        self.protocol_version = version.into();
        self
    }
}

/// Agent availability as tracked by discovery
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentAvailability {
    Active,
    Busy,
    Unreachable,
}

/// Heartbeat message sent by agents to the discovery service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Heartbeat {
    pub agent_id: String,
    pub status: AgentAvailability,
    pub timestamp: DateTime<Utc>,
}

impl Heartbeat {
    pub fn new<S: Into<String>>(agent_id: S, status: AgentAvailability) -> Self {
        Self {
            agent_id: agent_id.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Task request dispatched from one agent to another
///
/// `task_id` is the correlation key; retried attempts reuse it so a late
/// response from an earlier attempt can still resolve the call. Immutable
/// after creation except `retry_count`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskRequest {
    /// UUID v4 correlation id
    pub task_id: Uuid,
    pub sender_id: String,
    pub recipient_id: String,
    pub capability_name: String,
    pub parameters: TaskParams,
    pub created_at: DateTime<Utc>,
    /// First-attempt deadline (created_at + timeout)
    pub deadline: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl TaskRequest {
    pub fn new(
        sender_id: &str,
        recipient_id: &str,
        capability_name: &str,
        parameters: TaskParams,
        timeout: Duration,
        max_retries: u32,
    ) -> Self {
        let created_at = Utc::now();
        let deadline = created_at
            + chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(300));

        Self {
            task_id: Uuid::new_v4(),
            sender_id: sender_id.to_string(),
            recipient_id: recipient_id.to_string(),
            capability_name: capability_name.to_string(),
            parameters,
            created_at,
            deadline,
            retry_count: 0,
            max_retries,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }
}

/// Terminal status of one task attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskOutcome {
    Success,
    Failure,
    Error,
}

/// Task response correlated to an outstanding request by `task_id`
///
/// Duplicate or late responses for an already-resolved id are discarded by
/// the receiving engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskResponse {
    pub task_id: Uuid,
    pub status: TaskOutcome,
    #[serde(default)]
    pub result: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    pub completed_at: DateTime<Utc>,
}

impl TaskResponse {
    pub fn success(task_id: Uuid, result: Value) -> Self {
        Self {
            task_id,
            status: TaskOutcome::Success,
            result,
            error_detail: None,
            completed_at: Utc::now(),
        }
    }

    pub fn failure<S: Into<String>>(task_id: Uuid, detail: S) -> Self {
        Self {
            task_id,
            status: TaskOutcome::Failure,
            result: Value::Null,
            error_detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn error<S: Into<String>>(task_id: Uuid, detail: S) -> Self {
        Self {
            task_id,
            status: TaskOutcome::Error,
            result: Value::Null,
            error_detail: Some(detail.into()),
            completed_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskOutcome::Success
    }
}

fn default_payload() -> Value {
    Value::Object(Default::default())
}

/// External trigger that starts a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStartRequest {
    pub workflow_type: String,
    #[serde(default = "default_payload")]
    pub initial_payload: Value,
}

/// Reply to a workflow start request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStartReply {
    pub workflow_id: Uuid,
}

/// Observability query for one workflow instance
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStatusQuery {
    pub workflow_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload::{CallNextParams, TaskParams};
    use crate::queue::QueueType;
    use serde_json::json;

    #[test]
    fn test_agent_card_builder() {
        let card = AgentCard::new("frontdesk", "Front Desk")
            .with_capability(
                Capability::new("register_patient", "Register a patient", "patient_id")
                    .with_parameter("first_name", "string", true)
                    .with_parameter("phone", "string", false),
            );

        assert_eq!(card.agent_id, "frontdesk");
        assert_eq!(card.protocol_version, PROTOCOL_VERSION);
        assert_eq!(card.capabilities.len(), 1);
        assert_eq!(card.capabilities[0].parameters.len(), 2);
        assert!(card.capabilities[0].parameters[0].required);
        assert!(!card.capabilities[0].parameters[1].required);
    }

    #[test]
    fn test_agent_card_serialization_roundtrip() {
        let card = AgentCard::new("queue", "Queue Agent").with_capability(Capability::new(
            "enqueue",
            "Admit a patient",
            "ticket_number",
        ));

        let json = serde_json::to_string(&card).unwrap();
        let parsed: AgentCard = serde_json::from_str(&json).unwrap();

        assert_eq!(card, parsed);
        // Parameter type field serializes as "type"
        assert!(!json.contains("type_name"));
    }

    #[test]
    fn test_availability_wire_format() {
        let json = serde_json::to_string(&AgentAvailability::Unreachable).unwrap();
        assert_eq!(json, "\"UNREACHABLE\"");

        let parsed: AgentAvailability = serde_json::from_str("\"BUSY\"").unwrap();
        assert_eq!(parsed, AgentAvailability::Busy);
    }

    #[test]
    fn test_task_request_deadline() {
        let request = TaskRequest::new(
            "orchestrator",
            "queue",
            "call_next",
            TaskParams::CallNext(CallNextParams {
                queue_type: QueueType::WalkIn,
            }),
            Duration::from_secs(5),
            3,
        );

        let window = request.deadline - request.created_at;
        assert_eq!(window.num_seconds(), 5);
        assert_eq!(request.retry_count, 0);
        assert!(request.can_retry());
    }

    #[test]
    fn test_task_request_retry_exhaustion() {
        let mut request = TaskRequest::new(
            "orchestrator",
            "queue",
            "call_next",
            TaskParams::Dynamic(json!({})),
            Duration::from_secs(1),
            2,
        );

        request.retry_count = 2;
        assert!(!request.can_retry());
    }

    #[test]
    fn test_task_response_constructors() {
        let task_id = Uuid::new_v4();

        let ok = TaskResponse::success(task_id, json!({"ticket_number": "C-0001"}));
        assert!(ok.is_success());
        assert!(ok.error_detail.is_none());

        let failed = TaskResponse::failure(task_id, reason::EXHAUSTED_RETRIES);
        assert_eq!(failed.status, TaskOutcome::Failure);
        assert_eq!(failed.error_detail.as_deref(), Some("exhausted_retries"));
        assert!(!failed.is_success());
    }

    #[test]
    fn test_task_outcome_wire_format() {
        let response = TaskResponse::failure(Uuid::new_v4(), "no_capable_agent");
        let json = serde_json::to_string(&response).unwrap();

        assert!(json.contains("\"FAILURE\""));
        assert!(json.contains("no_capable_agent"));
    }

    #[test]
    fn test_task_request_serialization_roundtrip() {
        let request = TaskRequest::new(
            "frontdesk",
            "queue",
            "enqueue",
            TaskParams::Dynamic(json!({"patient_name": "Ada Lovelace"})),
            Duration::from_secs(3),
            3,
        );

        let json = serde_json::to_string(&request).unwrap();
        let parsed: TaskRequest = serde_json::from_str(&json).unwrap();

        assert_eq!(request, parsed);
    }

    #[test]
    fn test_workflow_start_request_default_payload() {
        let parsed: WorkflowStartRequest =
            serde_json::from_str(r#"{"workflow_type": "patient_registration"}"#).unwrap();

        assert_eq!(parsed.workflow_type, "patient_registration");
        assert!(parsed.initial_payload.is_object());
    }
}
