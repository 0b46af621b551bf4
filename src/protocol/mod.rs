//! Protocol message types for the ops-mesh coordination layer
//!
//! Defines the transport-agnostic message shapes exchanged between agents:
//! agent cards, task requests/responses, heartbeats, and workflow triggers,
//! plus the typed capability payloads they carry.

pub mod messages;
pub mod payload;

pub use messages::*;
pub use payload::*;
