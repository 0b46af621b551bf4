//! Standard hospital flow templates
//!
//! These are the stock workflows external triggers start by `workflow_type`.
//! Steps bind by capability and resolve their agent through discovery, so a
//! replacement agent picks up the work without touching the template.

use once_cell::sync::Lazy;
use std::time::Duration;

use crate::protocol::payload::capability;

use super::definition::{WorkflowDefinition, WorkflowStep};

/// Patient registration: register at the front desk, then admit to a queue.
pub fn patient_registration() -> WorkflowDefinition {
    WorkflowDefinition::new("patient_registration")
        .with_step(
            WorkflowStep::new("register_patient", capability::REGISTER_PATIENT)
                .with_timeout(Duration::from_secs(300)),
        )
        .with_step(
            WorkflowStep::new("enqueue", capability::ENQUEUE)
                .after("register_patient")
                .with_timeout(Duration::from_secs(120)),
        )
}

/// Appointment check-in: check in, verify the appointment, admit, notify.
pub fn appointment_checkin() -> WorkflowDefinition {
    WorkflowDefinition::new("appointment_checkin")
        .with_step(
            WorkflowStep::new("patient_checkin", capability::PATIENT_CHECKIN)
                .with_timeout(Duration::from_secs(300)),
        )
        .with_step(
            WorkflowStep::new("verify_appointment", capability::VERIFY_APPOINTMENT)
                .after("patient_checkin")
                .with_timeout(Duration::from_secs(180)),
        )
        .with_step(
            WorkflowStep::new("enqueue", capability::ENQUEUE)
                .after("verify_appointment")
                .with_timeout(Duration::from_secs(120)),
        )
        .with_step(
            WorkflowStep::new("notify", capability::NOTIFY)
                .after("enqueue")
                .with_timeout(Duration::from_secs(60))
                .optional(),
        )
}

/// Walk-in registration: register, admit, notify.
pub fn walkin_registration() -> WorkflowDefinition {
    WorkflowDefinition::new("walkin_registration")
        .with_step(
            WorkflowStep::new("register_patient", capability::REGISTER_PATIENT)
                .with_timeout(Duration::from_secs(300)),
        )
        .with_step(
            WorkflowStep::new("enqueue", capability::ENQUEUE)
                .after("register_patient")
                .with_timeout(Duration::from_secs(120)),
        )
        .with_step(
            WorkflowStep::new("notify", capability::NOTIFY)
                .after("enqueue")
                .with_timeout(Duration::from_secs(60))
                .optional(),
        )
}

static STANDARD_WORKFLOWS: Lazy<Vec<WorkflowDefinition>> = Lazy::new(|| {
    vec![
        patient_registration(),
        appointment_checkin(),
        walkin_registration(),
    ]
});

/// Look up a stock workflow by type
pub fn standard_definition(workflow_type: &str) -> Option<WorkflowDefinition> {
    STANDARD_WORKFLOWS
        .iter()
        .find(|d| d.workflow_type == workflow_type)
        .cloned()
}
