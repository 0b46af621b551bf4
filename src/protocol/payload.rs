//! Typed capability payloads
//!
//! Task parameters are a closed set of known shapes per capability, with a
//! `Dynamic` escape hatch for genuinely open-ended capabilities (for example
//! an LLM behind `generate_response`). Workflow steps forward the merged
//! workflow payload as `Dynamic`; handlers decode it into the concrete
//! parameter struct they need, ignoring unrelated fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MeshError, MeshResult};
use crate::queue::{QueuePriority, QueueType};

/// Well-known capability names
pub mod capability {
    pub const REGISTER_PATIENT: &str = "register_patient";
    pub const PATIENT_CHECKIN: &str = "patient_checkin";
    pub const SCHEDULE_APPOINTMENT: &str = "schedule_appointment";
    pub const VERIFY_APPOINTMENT: &str = "verify_appointment";
    pub const ENQUEUE: &str = "enqueue";
    pub const CALL_NEXT: &str = "call_next";
    pub const NOTIFY: &str = "notify";
    pub const START_WORKFLOW: &str = "start_workflow";
    pub const WORKFLOW_STATUS: &str = "workflow_status";
    pub const GENERATE_RESPONSE: &str = "generate_response";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisterPatientParams {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PatientCheckinParams {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub confirmation_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleAppointmentParams {
    pub patient_id: uuid::Uuid,
    pub provider_name: String,
    pub scheduled_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerifyAppointmentParams {
    pub confirmation_code: String,
}

fn default_queue_type() -> QueueType {
    QueueType::WalkIn
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnqueueParams {
    pub patient_name: String,
    #[serde(default = "default_queue_type")]
    pub queue_type: QueueType,
    #[serde(default)]
    pub priority: QueuePriority,
    #[serde(default)]
    pub reason: Option<String>,
    /// Caller-supplied ticket; the queue manager issues one when absent
    #[serde(default)]
    pub ticket_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CallNextParams {
    pub queue_type: QueueType,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotifyParams {
    #[serde(default)]
    pub recipient: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub ticket_number: Option<String>,
    #[serde(default)]
    pub patient_name: Option<String>,
}

/// Parameters carried by a task request
///
/// The `kind` tag mirrors the capability name for the typed variants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "params", rename_all = "snake_case")]
pub enum TaskParams {
    RegisterPatient(RegisterPatientParams),
    PatientCheckin(PatientCheckinParams),
    ScheduleAppointment(ScheduleAppointmentParams),
    VerifyAppointment(VerifyAppointmentParams),
    Enqueue(EnqueueParams),
    CallNext(CallNextParams),
    Notify(NotifyParams),
    Dynamic(Value),
}

impl TaskParams {
    /// Capability this payload was built for, when statically known
    pub fn capability_name(&self) -> Option<&'static str> {
        match self {
            TaskParams::RegisterPatient(_) => Some(capability::REGISTER_PATIENT),
            TaskParams::PatientCheckin(_) => Some(capability::PATIENT_CHECKIN),
            TaskParams::ScheduleAppointment(_) => Some(capability::SCHEDULE_APPOINTMENT),
            TaskParams::VerifyAppointment(_) => Some(capability::VERIFY_APPOINTMENT),
            TaskParams::Enqueue(_) => Some(capability::ENQUEUE),
            TaskParams::CallNext(_) => Some(capability::CALL_NEXT),
            TaskParams::Notify(_) => Some(capability::NOTIFY),
            TaskParams::Dynamic(_) => None,
        }
    }

    /// Decode into a concrete parameter struct
    ///
    /// Accepts either the matching typed variant or a `Dynamic` value with the
    /// same field shape; unknown fields are ignored.
    pub fn decode<T: DeserializeOwned>(&self) -> MeshResult<T> {
        let value = self.to_value()?;
        serde_json::from_value(value)
            .map_err(|e| MeshError::validation(format!("invalid task parameters: {e}")))
    }

    fn to_value(&self) -> MeshResult<Value> {
        let result = match self {
            TaskParams::Dynamic(value) => return Ok(value.clone()),
            TaskParams::RegisterPatient(p) => serde_json::to_value(p),
            TaskParams::PatientCheckin(p) => serde_json::to_value(p),
            TaskParams::ScheduleAppointment(p) => serde_json::to_value(p),
            TaskParams::VerifyAppointment(p) => serde_json::to_value(p),
            TaskParams::Enqueue(p) => serde_json::to_value(p),
            TaskParams::CallNext(p) => serde_json::to_value(p),
            TaskParams::Notify(p) => serde_json::to_value(p),
        };
        result.map_err(|e| MeshError::internal(format!("parameter serialization failed: {e}")))
    }
}
