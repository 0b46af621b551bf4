//! Agent discovery: registration, capability search, and liveness
//!
//! The registry is pure lookup state owned exclusively by the discovery
//! service; callers interact only through request/response operations.

pub mod registry;
pub mod service;

pub use registry::{AgentDescriptor, AgentRegistry};
pub use service::{DiscoveryService, SweepOutcome};
