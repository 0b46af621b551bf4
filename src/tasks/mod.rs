//! Task protocol: transport seam, in-process bus, and the per-agent engine
//!
//! `send_task` hands a request to the transport and returns immediately with
//! the correlation id; `await_response` suspends the calling step until the
//! id resolves or retries are exhausted. Resolution is delivered exactly once
//! per task id - duplicates and late responses are dropped.

pub mod bus;
pub mod engine;

pub use bus::{AgentMailbox, MeshBus, MeshTransport};
pub use engine::{CapabilityHandlers, TaskEngine, TaskHandler};
