//! Queue entry model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Priority bands, ordered LOW < MEDIUM < HIGH < URGENT
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueuePriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Medium
    }
}

/// Service lanes; each queue type is one independent service channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueType {
    WalkIn,
    Appointment,
    Emergency,
}

impl fmt::Display for QueueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueueType::WalkIn => "walk_in",
            QueueType::Appointment => "appointment",
            QueueType::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Entry lifecycle states
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Waiting,
    Called,
    InProgress,
    Completed,
    Cancelled,
}

impl QueueStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Cancelled)
    }
}

/// Format a ticket number from a sequence counter ("C-0042")
pub fn format_ticket(seq: u32) -> String {
    format!("C-{seq:04}")
}

/// One admitted patient in a queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEntry {
    pub entry_id: Uuid,
    /// Unique human-readable ticket
    pub ticket_number: String,
    #[serde(default)]
    pub patient_name: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    pub priority: QueuePriority,
    pub queue_type: QueueType,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Recomputed whenever the ordered waiting set changes
    pub estimated_wait: Duration,
    #[serde(default)]
    pub actual_wait: Option<Duration>,
}

impl QueueEntry {
    pub fn new<S: Into<String>>(ticket_number: S, queue_type: QueueType, priority: QueuePriority) -> Self {
        Self {
            entry_id: Uuid::new_v4(),
            ticket_number: ticket_number.into(),
            patient_name: None,
            reason: None,
            priority,
            queue_type,
            status: QueueStatus::Waiting,
            created_at: Utc::now(),
            called_at: None,
            started_at: None,
            completed_at: None,
            estimated_wait: Duration::ZERO,
            actual_wait: None,
        }
    }

    /// Builder method to attach the patient name
    pub fn with_patient_name<S: Into<String>>(mut self, name: S) -> Self {
        self.patient_name = Some(name.into());
        self
    }

    /// Builder method to attach a visit reason
    pub fn with_reason<S: Into<String>>(mut self, reason: S) -> Self {
        self.reason = Some(reason.into());
        self
    }
}
