//! Front desk agent: patient registration and check-in

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::info;

use crate::config::MeshConfig;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::payload::{capability, PatientCheckinParams, RegisterPatientParams};
use crate::protocol::{AgentCard, Capability, TaskRequest};
use crate::store::{NewPatient, Patient, RecordStore};
use crate::tasks::{MeshBus, MeshTransport, TaskEngine, TaskHandler};

use super::{spawn_heartbeat, AgentHandle};

/// Registers walk-ins and checks in arriving patients
pub struct FrontDeskAgent;

impl FrontDeskAgent {
    pub const AGENT_ID: &'static str = "frontdesk";

    pub fn card() -> AgentCard {
        AgentCard::new(Self::AGENT_ID, "Front Desk")
            .with_capability(
                Capability::new(
                    capability::REGISTER_PATIENT,
                    "Register a new or returning patient",
                    "patient_id, patient_name",
                )
                .with_parameter("first_name", "string", true)
                .with_parameter("last_name", "string", true)
                .with_parameter("phone", "string", false),
            )
            .with_capability(
                Capability::new(
                    capability::PATIENT_CHECKIN,
                    "Check in an arriving patient",
                    "patient_id, patient_name, confirmation_code",
                )
                .with_parameter("first_name", "string", true)
                .with_parameter("last_name", "string", true)
                .with_parameter("confirmation_code", "string", false),
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
        engine.on_task_received(Arc::new(FrontDeskHandler { store }));

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

struct FrontDeskHandler {
    store: Arc<dyn RecordStore>,
}

impl FrontDeskHandler {
    /// Returning patients keep their record; new ones get created
    async fn find_or_create(
        &self,
        first_name: &str,
        last_name: &str,
        phone: Option<String>,
    ) -> MeshResult<Patient> {
        if let Some(existing) = self.store.find_patient_by_name(first_name, last_name).await? {
            return Ok(existing);
        }
        self.store
            .create_patient(NewPatient {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                phone,
            })
            .await
    }
}

#[async_trait]
impl TaskHandler for FrontDeskHandler {
    async fn handle(&self, request: &TaskRequest) -> MeshResult<Value> {
        match request.capability_name.as_str() {
            capability::REGISTER_PATIENT => {
                let params: RegisterPatientParams = request.parameters.decode()?;
                let patient = self
                    .find_or_create(&params.first_name, &params.last_name, params.phone)
                    .await?;

                info!(patient_id = %patient.id, "Registered patient");
                Ok(json!({
                    "patient_id": patient.id,
                    "patient_name": patient.full_name(),
                    "registered": true,
                }))
            }
            capability::PATIENT_CHECKIN => {
                let params: PatientCheckinParams = request.parameters.decode()?;
                let patient = self
                    .find_or_create(&params.first_name, &params.last_name, None)
                    .await?;

                info!(patient_id = %patient.id, "Checked in patient");
                Ok(json!({
                    "patient_id": patient.id,
                    "patient_name": patient.full_name(),
                    "checked_in": true,
                    "confirmation_code": params.confirmation_code,
                }))
            }
            other => Err(MeshError::validation(format!(
                "front desk cannot handle capability {other}"
            ))),
        }
    }
}
