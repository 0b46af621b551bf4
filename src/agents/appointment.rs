//! Appointment agent: scheduling and check-in verification

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::MeshConfig;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::payload::{capability, ScheduleAppointmentParams, VerifyAppointmentParams};
use crate::protocol::{AgentCard, Capability, TaskRequest};
use crate::store::{AppointmentStatus, RecordStore};
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};

use super::{spawn_heartbeat, AgentHandle};

/// Schedules appointments and verifies confirmation codes at check-in
pub struct AppointmentAgent;

impl AppointmentAgent {
    pub const AGENT_ID: &'static str = "appointment";

    pub fn card() -> AgentCard {
        AgentCard::new(Self::AGENT_ID, "Appointment Agent")
            .with_capability(
                Capability::new(
                    capability::SCHEDULE_APPOINTMENT,
                    "Schedule an appointment for a registered patient",
                    "appointment_id, confirmation_code",
                )
                .with_parameter("patient_id", "string", true)
                .with_parameter("provider_name", "string", true)
                .with_parameter("scheduled_at", "string", true),
            )
            .with_capability(
                Capability::new(
                    capability::VERIFY_APPOINTMENT,
                    "Verify an appointment by confirmation code",
                    "verified, appointment_id, provider_name",
                )
                .with_parameter("confirmation_code", "string", true),
            )
    }

    pub fn spawn(
        bus: &MeshBus,
        transport: Arc<dyn MeshTransport>,
        discovery: &Arc<DiscoveryService>,
        store: Arc<dyn RecordStore>,
        config: &MeshConfig,
    ) -> MeshResult<AgentHandle> {
        discovery.register(Self::card())?;

        let engine = TaskEngine::new(Self::AGENT_ID, transport, config.tasks.clone());
        engine.on_task_received(Arc::new(AppointmentHandler { store }));

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

struct AppointmentHandler {
    store: Arc<dyn RecordStore>,
}

#[async_trait]
impl TaskHandler for AppointmentHandler {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match request.capability_name.as_str() {
            capability::SCHEDULE_APPOINTMENT => {
                let params: ScheduleAppointmentParams = request.parameters.decode()?;
                let appointment = self
                    .store
                    .create_appointment(params.patient_id, &params.provider_name, params.scheduled_at)
                    .await?;

                info!(
                    appointment_id = %appointment.id,
                    confirmation_code = %appointment.confirmation_code,
                    "Scheduled appointment"
                );
                Ok(json!({
                    "appointment_id": appointment.id,
                    "confirmation_code": appointment.confirmation_code,
                    "provider_name": appointment.provider_name,
                    "scheduled_at": appointment.scheduled_at,
                }))
            }
            capability::VERIFY_APPOINTMENT => {
                let params: VerifyAppointmentParams = request.parameters.decode()?;
                let appointment = self
                    .store
                    .get_appointment_by_code(&params.confirmation_code)
                    .await?
                    .ok_or_else(|| {
                        MeshError::validation(format!(
                            "no appointment for confirmation code {}",
                            params.confirmation_code
                        ))
                    })?;

                let updated = self
                    .store
                    .update_appointment_status(appointment.id, AppointmentStatus::CheckedIn)
                    .await?;

                info!(appointment_id = %updated.id, "Verified appointment");
                Ok(json!({
                    "verified": true,
                    "appointment_id": updated.id,
                    "provider_name": updated.provider_name,
                    "scheduled_at": updated.scheduled_at,
                }))
            }
            other => Err(MeshError::validation(format!(
                "appointment agent cannot handle capability {other}"
            ))),
        }
    }
}
