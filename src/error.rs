//! Error types for the ops-mesh coordination layer
//!
//! Component-local errors (discovery, queue) are returned synchronously to the
//! direct caller. Cross-agent failures travel as FAILURE/ERROR task responses;
//! only the workflow orchestrator decides whether they are terminal for a
//! whole workflow instance. Error details that cross agent boundaries are
//! sanitized so patient identifiers never leak into mesh traffic.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::messages::TaskOutcome;

/// Main error type for mesh operations
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Validation failed: {message}")]
    Validation { message: String },

    #[error("Agent not registered: {agent_id}")]
    NotRegistered { agent_id: String },

    #[error("No capable agent for capability: {capability}")]
    NoCapableAgent { capability: String },

    #[error("Duplicate ticket: {ticket_number}")]
    DuplicateTicket { ticket_number: String },

    #[error("Invalid queue transition: {message}")]
    InvalidTransition { message: String },

    #[error("Queue is empty: {queue_type}")]
    EmptyQueue { queue_type: String },

    #[error("Unknown task id: {task_id}")]
    UnknownTask { task_id: Uuid },

    #[error("Workflow not found: {workflow_id}")]
    WorkflowNotFound { workflow_id: Uuid },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl MeshError {
    /// Create validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create not-registered error
    pub fn not_registered<S: Into<String>>(agent_id: S) -> Self {
        Self::NotRegistered {
            agent_id: agent_id.into(),
        }
    }

    /// Create no-capable-agent error
    pub fn no_capable_agent<S: Into<String>>(capability: S) -> Self {
        Self::NoCapableAgent {
            capability: capability.into(),
        }
    }

    /// Create duplicate-ticket error
    pub fn duplicate_ticket<S: Into<String>>(ticket_number: S) -> Self {
        Self::DuplicateTicket {
            ticket_number: ticket_number.into(),
        }
    }

    /// Create invalid-transition error
    pub fn invalid_transition<S: Into<String>>(message: S) -> Self {
        Self::InvalidTransition {
            message: message.into(),
        }
    }

    /// Create store error
    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Create transport error
    pub fn transport<S: Into<String>>(message: S) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Create internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Outcome a handler error maps to when it becomes a task response.
    ///
    /// Domain failures (queue invariants, validation, missing capability) are
    /// FAILURE; infrastructure faults are ERROR.
    pub fn outcome(&self) -> TaskOutcome {
        match self {
            MeshError::Validation { .. }
            | MeshError::NotRegistered { .. }
            | MeshError::NoCapableAgent { .. }
            | MeshError::DuplicateTicket { .. }
            | MeshError::InvalidTransition { .. }
            | MeshError::EmptyQueue { .. }
            | MeshError::UnknownTask { .. }
            | MeshError::WorkflowNotFound { .. } => TaskOutcome::Failure,
            MeshError::Store { .. }
            | MeshError::Transport { .. }
            | MeshError::Internal { .. }
            | MeshError::Config(_) => TaskOutcome::Error,
        }
    }
}

static PHONE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\+?\(?\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}").expect("valid phone pattern")
});

static MRN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bmrn[-:= ]?[a-z0-9][a-z0-9-]*").expect("valid mrn pattern"));

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|token|key|secret)[=:]\s*\S+").expect("valid secret pattern")
});

/// Sanitize error details before they leave the local agent in a task response.
///
/// Redacts phone numbers, medical record numbers, and credential-looking
/// key/value pairs, then truncates to 500 characters.
pub fn sanitize_error_detail(message: &str) -> String {
    let mut sanitized = message.to_string();

    sanitized = PHONE_PATTERN.replace_all(&sanitized, "[phone]").to_string();
    sanitized = MRN_PATTERN.replace_all(&sanitized, "MRN-***").to_string();
    sanitized = SECRET_PATTERN
        .replace_all(&sanitized, "${1}=***")
        .to_string();

    if sanitized.len() > 500 {
        let truncate_suffix = "...[truncated]";
        let max_content_len = 500 - truncate_suffix.len();
        sanitized = format!("{}{}", &sanitized[..max_content_len], truncate_suffix);
    }

    sanitized
}

/// Result type for mesh operations
pub type MeshResult<T> = Result<T, MeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_constructor() {
        let error = MeshError::validation("capabilities must not be empty");
        assert!(matches!(error, MeshError::Validation { .. }));
        assert_eq!(
            error.to_string(),
            "Validation failed: capabilities must not be empty"
        );
    }

    #[test]
    fn test_not_registered_constructor() {
        let error = MeshError::not_registered("ghost-agent");
        assert!(matches!(error, MeshError::NotRegistered { .. }));
        assert_eq!(error.to_string(), "Agent not registered: ghost-agent");
    }

    #[test]
    fn test_duplicate_ticket_constructor() {
        let error = MeshError::duplicate_ticket("C-0042");
        assert_eq!(error.to_string(), "Duplicate ticket: C-0042");
    }

    #[test]
    fn test_domain_errors_map_to_failure() {
        assert_eq!(
            MeshError::duplicate_ticket("C-0001").outcome(),
            TaskOutcome::Failure
        );
        assert_eq!(
            MeshError::invalid_transition("completed -> waiting").outcome(),
            TaskOutcome::Failure
        );
        assert_eq!(
            MeshError::validation("bad parameters").outcome(),
            TaskOutcome::Failure
        );
    }

    #[test]
    fn test_infrastructure_errors_map_to_error() {
        assert_eq!(
            MeshError::transport("mailbox closed").outcome(),
            TaskOutcome::Error
        );
        assert_eq!(
            MeshError::internal("unexpected state").outcome(),
            TaskOutcome::Error
        );
        assert_eq!(
            MeshError::store("write failed").outcome(),
            TaskOutcome::Error
        );
    }

    #[test]
    fn test_phone_number_redaction() {
        let sanitized =
            sanitize_error_detail("could not notify patient at 555-867-5309 about ticket C-0007");

        assert!(!sanitized.contains("555-867-5309"));
        assert!(sanitized.contains("[phone]"));
        assert!(sanitized.contains("C-0007"));
    }

    #[test]
    fn test_phone_formats_redacted() {
        for message in [
            "call (555) 123 4567",
            "call +15551234567",
            "call 555.123.4567",
        ] {
            let sanitized = sanitize_error_detail(message);
            assert!(
                sanitized.contains("[phone]"),
                "expected redaction in {message:?}, got {sanitized:?}"
            );
        }
    }

    #[test]
    fn test_timestamps_not_redacted_as_phones() {
        let sanitized = sanitize_error_detail("appointment lookup failed at 2024-01-01T12:00:00Z");
        assert!(sanitized.contains("2024-01-01T12:00:00Z"));
    }

    #[test]
    fn test_mrn_redaction() {
        let sanitized = sanitize_error_detail("patient MRN-48213 has no active appointment");

        assert!(!sanitized.contains("48213"));
        assert!(sanitized.contains("MRN-***"));
    }

    #[test]
    fn test_secret_redaction() {
        let sanitized = sanitize_error_detail("store auth failed: password=hunter2 token=abc456");

        assert!(!sanitized.contains("hunter2"));
        assert!(!sanitized.contains("abc456"));
        assert!(sanitized.contains("password=***"));
        assert!(sanitized.contains("token=***"));
    }

    #[test]
    fn test_long_message_truncation() {
        let long_message = "x".repeat(600);
        let sanitized = sanitize_error_detail(&long_message);

        assert!(sanitized.len() <= 500);
        assert!(sanitized.ends_with("...[truncated]"));
    }

    #[test]
    fn test_exactly_500_chars_untouched() {
        let message = "x".repeat(500);
        let sanitized = sanitize_error_detail(&message);
        assert_eq!(sanitized.len(), 500);
        assert!(!sanitized.contains("truncated"));
    }

    #[test]
    fn test_empty_message() {
        assert_eq!(sanitize_error_detail(""), "");
    }
}
