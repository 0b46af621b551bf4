//! Priority queue admission for patient flow
//!
//! The queue manager is the canonical shared resource most workflows touch:
//! agents mutate it through task calls, never through direct structural
//! access. All mutations are serialized behind one lock.

pub mod entry;
pub mod manager;

pub use entry::{format_ticket, QueueEntry, QueuePriority, QueueStatus, QueueType};
pub use manager::{QueueManager, QueuePosition, QueueStatistics};
