//! Record store boundary
//!
//! The relational store for patients and appointments is an external
//! collaborator; agents consume it through this trait as a write-through
//! boundary. The in-memory implementation backs tests and the demo mesh.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

use crate::error::{MeshError, MeshResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Patient {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Patient {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewPatient {
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    CheckedIn,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub provider_name: String,
    pub scheduled_at: DateTime<Utc>,
    /// Human-readable code in ABCD-1234 form, quoted at check-in
    pub confirmation_code: String,
    pub status: AppointmentStatus,
}

/// Derive a confirmation code from an appointment id ("ABCD-1234")
pub fn confirmation_code_for(id: Uuid) -> String {
    let bytes = id.as_bytes();
    let letters: String = bytes[..4]
        .iter()
        .map(|b| char::from(b'A' + (b % 26)))
        .collect();
    let digits: String = bytes[4..8].iter().map(|b| char::from(b'0' + (b % 10))).collect();
    format!("{letters}-{digits}")
}

/// Create/read/update boundary over patient and appointment records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_patient(&self, new: NewPatient) -> MeshResult<Patient>;
    async fn get_patient(&self, id: Uuid) -> MeshResult<Option<Patient>>;
    async fn find_patient_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> MeshResult<Option<Patient>>;
    async fn create_appointment(
        &self,
        patient_id: Uuid,
        provider_name: &str,
        scheduled_at: DateTime<Utc>,
    ) -> MeshResult<Appointment>;
    async fn get_appointment_by_code(&self, code: &str) -> MeshResult<Option<Appointment>>;
    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> MeshResult<Appointment>;
}

/// In-memory reference implementation
#[derive(Default)]
pub struct InMemoryStore {
    patients: RwLock<HashMap<Uuid, Patient>>,
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn create_patient(&self, new: NewPatient) -> MeshResult<Patient> {
        let patient = Patient {
            id: Uuid::new_v4(),
            first_name: new.first_name,
            last_name: new.last_name,
            phone: new.phone,
            created_at: Utc::now(),
        };
        let mut patients = self.patients.write().unwrap();
        patients.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn get_patient(&self, id: Uuid) -> MeshResult<Option<Patient>> {
        let patients = self.patients.read().unwrap();
        Ok(patients.get(&id).cloned())
    }

    async fn find_patient_by_name(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> MeshResult<Option<Patient>> {
        let patients = self.patients.read().unwrap();
        Ok(patients
            .values()
            .find(|p| {
                p.first_name.eq_ignore_ascii_case(first_name)
                    && p.last_name.eq_ignore_ascii_case(last_name)
            })
            .cloned())
    }

    async fn create_appointment(
        &self,
        patient_id: Uuid,
        provider_name: &str,
        scheduled_at: DateTime<Utc>,
    ) -> MeshResult<Appointment> {
        {
            let patients = self.patients.read().unwrap();
            if !patients.contains_key(&patient_id) {
                return Err(MeshError::store(format!("unknown patient {patient_id}")));
            }
        }

        let id = Uuid::new_v4();
        let appointment = Appointment {
            id,
            patient_id,
            provider_name: provider_name.to_string(),
            scheduled_at,
            confirmation_code: confirmation_code_for(id),
            status: AppointmentStatus::Scheduled,
        };
        let mut appointments = self.appointments.write().unwrap();
        appointments.insert(id, appointment.clone());
        Ok(appointment)
    }

    async fn get_appointment_by_code(&self, code: &str) -> MeshResult<Option<Appointment>> {
        let appointments = self.appointments.read().unwrap();
        Ok(appointments
            .values()
            .find(|a| a.confirmation_code.eq_ignore_ascii_case(code))
            .cloned())
    }

    async fn update_appointment_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> MeshResult<Appointment> {
        let mut appointments = self.appointments.write().unwrap();
        let appointment = appointments
            .get_mut(&id)
            .ok_or_else(|| MeshError::store(format!("unknown appointment {id}")))?;
        appointment.status = status;
        Ok(appointment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patient_roundtrip() {
        let store = InMemoryStore::new();

        let patient = store
            .create_patient(NewPatient {
                first_name: "Ada".to_string(),
                last_name: "Lovelace".to_string(),
                phone: None,
            })
            .await
            .unwrap();

        let found = store.get_patient(patient.id).await.unwrap().unwrap();
        assert_eq!(found.full_name(), "Ada Lovelace");

        let by_name = store
            .find_patient_by_name("ada", "LOVELACE")
            .await
            .unwrap();
        assert_eq!(by_name.unwrap().id, patient.id);
    }

    #[tokio::test]
    async fn test_appointment_lifecycle() {
        let store = InMemoryStore::new();
        let patient = store
            .create_patient(NewPatient {
                first_name: "Grace".to_string(),
                last_name: "Hopper".to_string(),
                phone: None,
            })
            .await
            .unwrap();

        let appointment = store
            .create_appointment(patient.id, "Dr. Nakamura", Utc::now())
            .await
            .unwrap();
        assert_eq!(appointment.status, AppointmentStatus::Scheduled);

        let found = store
            .get_appointment_by_code(&appointment.confirmation_code)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, appointment.id);

        let updated = store
            .update_appointment_status(appointment.id, AppointmentStatus::CheckedIn)
            .await
            .unwrap();
        assert_eq!(updated.status, AppointmentStatus::CheckedIn);
    }

    #[tokio::test]
    async fn test_appointment_requires_known_patient() {
        let store = InMemoryStore::new();
        let err = store
            .create_appointment(Uuid::new_v4(), "Dr. Nakamura", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, MeshError::Store { .. }));
    }

    #[test]
    fn test_confirmation_code_shape() {
        let code = confirmation_code_for(Uuid::new_v4());
        let (letters, digits) = code.split_once('-').unwrap();

        assert_eq!(letters.len(), 4);
        assert!(letters.chars().all(|c| c.is_ascii_uppercase()));
        assert_eq!(digits.len(), 4);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
