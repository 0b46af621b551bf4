//! Queue manager: priority-ordered admission and wait estimation
//!
//! The waiting set is ordered by a composite key (priority descending, then
//! creation time ascending - strict FIFO within a priority band). All
//! operations are linearized behind one mutex so no caller can observe an
//! inconsistent intermediate state.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::QueueSection;
use crate::error::{MeshError, MeshResult};

use super::entry::{format_ticket, QueueEntry, QueuePriority, QueueStatus, QueueType};

/// Position report for one ticket
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct QueuePosition {
    pub ticket_number: String,
    /// 1-based rank among waiting entries of the same type; None once the
    /// entry left the waiting set
    pub position: Option<usize>,
    pub estimated_wait: Duration,
    pub status: QueueStatus,
}

/// Read-only counters for observability
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct QueueStatistics {
    pub waiting: usize,
    pub called: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub walk_ins_waiting: usize,
    pub appointments_waiting: usize,
    pub emergencies_waiting: usize,
    pub average_actual_wait: Option<Duration>,
}

#[derive(Debug, Default)]
struct ServiceStat {
    recent: VecDeque<Duration>,
}

#[derive(Debug, Default)]
struct QueueState {
    entries: HashMap<Uuid, QueueEntry>,
    tickets: HashSet<String>,
    next_ticket: u32,
    stats: HashMap<QueueType, ServiceStat>,
}

/// Sole owner of the queue's ordered state
pub struct QueueManager {
    state: Mutex<QueueState>,
    config: QueueSection,
}

impl QueueManager {
    pub fn new(config: QueueSection) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            config,
        }
    }

    /// Issue a ticket and admit a new waiting entry in one step
    pub fn create_entry(
        &self,
        queue_type: QueueType,
        priority: QueuePriority,
        patient_name: Option<String>,
        reason: Option<String>,
    ) -> QueueEntry {
        let mut state = self.state.lock().unwrap();

        let ticket = Self::next_free_ticket(&mut state);
        let mut entry = QueueEntry::new(ticket, queue_type, priority);
        entry.patient_name = patient_name;
        entry.reason = reason;

        state.tickets.insert(entry.ticket_number.clone());
        state.entries.insert(entry.entry_id, entry.clone());
        self.recompute_waits(&mut state, queue_type);

        info!(
            ticket = %entry.ticket_number,
            queue_type = %queue_type,
            priority = ?priority,
            "Admitted queue entry"
        );

        state.entries[&entry.entry_id].clone()
    }

    /// Admit a caller-built entry
    pub fn enqueue(&self, entry: QueueEntry) -> MeshResult<QueueEntry> {
        let mut state = self.state.lock().unwrap();

        if state.tickets.contains(&entry.ticket_number) {
            return Err(MeshError::duplicate_ticket(&entry.ticket_number));
        }
        if entry.status != QueueStatus::Waiting {
            return Err(MeshError::invalid_transition(format!(
                "cannot enqueue entry in state {:?}",
                entry.status
            )));
        }

        let entry_id = entry.entry_id;
        let queue_type = entry.queue_type;
        state.tickets.insert(entry.ticket_number.clone());
        state.entries.insert(entry_id, entry);
        self.recompute_waits(&mut state, queue_type);

        let admitted = state.entries[&entry_id].clone();
        info!(
            ticket = %admitted.ticket_number,
            queue_type = %queue_type,
            "Admitted queue entry"
        );
        Ok(admitted)
    }

    /// Pop the highest-priority, oldest-in-band waiting entry of a type
    pub fn call_next(&self, queue_type: QueueType) -> MeshResult<QueueEntry> {
        let mut state = self.state.lock().unwrap();

        let next_id = Self::ranked_waiting(&state, queue_type)
            .into_iter()
            .next()
            .ok_or_else(|| MeshError::EmptyQueue {
                queue_type: queue_type.to_string(),
            })?;

        let entry = state
            .entries
            .get_mut(&next_id)
            .expect("ranked id present in entries");
        entry.status = QueueStatus::Called;
        entry.called_at = Some(Utc::now());
        let called = entry.clone();

        self.recompute_waits(&mut state, queue_type);

        info!(ticket = %called.ticket_number, queue_type = %queue_type, "Called next patient");
        Ok(called)
    }

    /// Transition WAITING or CALLED -> IN_PROGRESS
    ///
    /// At most one entry may be in progress per queue type; the queue type is
    /// the service channel.
    pub fn start_service(&self, entry_id: Uuid) -> MeshResult<QueueEntry> {
        let mut state = self.state.lock().unwrap();

        let queue_type = {
            let entry = Self::entry(&state, entry_id)?;
            if !matches!(entry.status, QueueStatus::Waiting | QueueStatus::Called) {
                return Err(MeshError::invalid_transition(format!(
                    "cannot start service from {:?}",
                    entry.status
                )));
            }
            entry.queue_type
        };

        let channel_busy = state.entries.values().any(|e| {
            e.queue_type == queue_type && e.status == QueueStatus::InProgress
        });
        if channel_busy {
            return Err(MeshError::invalid_transition(format!(
                "service channel busy for {queue_type}"
            )));
        }

        let now = Utc::now();
        let entry = state.entries.get_mut(&entry_id).expect("checked above");
        entry.status = QueueStatus::InProgress;
        entry.started_at = Some(now);
        entry.actual_wait = (now - entry.created_at).to_std().ok();
        let started = entry.clone();

        self.recompute_waits(&mut state, queue_type);
        Ok(started)
    }

    /// Transition IN_PROGRESS -> COMPLETED and record the service duration
    pub fn complete_service(&self, entry_id: Uuid) -> MeshResult<QueueEntry> {
        let mut state = self.state.lock().unwrap();

        {
            let entry = Self::entry(&state, entry_id)?;
            if entry.status != QueueStatus::InProgress {
                return Err(MeshError::invalid_transition(format!(
                    "cannot complete service from {:?}",
                    entry.status
                )));
            }
        }

        let now = Utc::now();
        let entry = state.entries.get_mut(&entry_id).expect("checked above");
        entry.status = QueueStatus::Completed;
        entry.completed_at = Some(now);
        let queue_type = entry.queue_type;
        let service_duration = entry
            .started_at
            .and_then(|started| (now - started).to_std().ok());
        let completed = entry.clone();

        if let Some(duration) = service_duration {
            let stat = state.stats.entry(queue_type).or_default();
            stat.recent.push_back(duration);
            while stat.recent.len() > self.config.service_window {
                stat.recent.pop_front();
            }
        }

        // Averages shifted; refresh estimates for this lane
        self.recompute_waits(&mut state, queue_type);
        Ok(completed)
    }

    /// Transition any non-terminal state -> CANCELLED
    pub fn cancel(&self, entry_id: Uuid) -> MeshResult<QueueEntry> {
        let mut state = self.state.lock().unwrap();

        {
            let entry = Self::entry(&state, entry_id)?;
            if entry.status.is_terminal() {
                return Err(MeshError::invalid_transition(format!(
                    "cannot cancel entry in terminal state {:?}",
                    entry.status
                )));
            }
        }

        let entry = state.entries.get_mut(&entry_id).expect("checked above");
        entry.status = QueueStatus::Cancelled;
        let queue_type = entry.queue_type;
        let cancelled = entry.clone();

        self.recompute_waits(&mut state, queue_type);

        debug!(ticket = %cancelled.ticket_number, "Cancelled queue entry");
        Ok(cancelled)
    }

    pub fn get(&self, entry_id: Uuid) -> Option<QueueEntry> {
        let state = self.state.lock().unwrap();
        state.entries.get(&entry_id).cloned()
    }

    pub fn get_by_ticket(&self, ticket_number: &str) -> Option<QueueEntry> {
        let state = self.state.lock().unwrap();
        state
            .entries
            .values()
            .find(|e| e.ticket_number == ticket_number)
            .cloned()
    }

    /// Ordered waiting entries of one type
    pub fn waiting(&self, queue_type: QueueType) -> Vec<QueueEntry> {
        let state = self.state.lock().unwrap();
        Self::ranked_waiting(&state, queue_type)
            .into_iter()
            .map(|id| state.entries[&id].clone())
            .collect()
    }

    /// Position and wait estimate for one ticket
    pub fn position(&self, ticket_number: &str) -> MeshResult<QueuePosition> {
        let state = self.state.lock().unwrap();
        let entry = state
            .entries
            .values()
            .find(|e| e.ticket_number == ticket_number)
            .ok_or_else(|| MeshError::validation(format!("unknown ticket {ticket_number}")))?;

        let position = if entry.status == QueueStatus::Waiting {
            Self::ranked_waiting(&state, entry.queue_type)
                .iter()
                .position(|id| *id == entry.entry_id)
                .map(|rank| rank + 1)
        } else {
            None
        };

        Ok(QueuePosition {
            ticket_number: entry.ticket_number.clone(),
            position,
            estimated_wait: entry.estimated_wait,
            status: entry.status,
        })
    }

    /// Counters snapshot; never mutates
    pub fn statistics(&self) -> QueueStatistics {
        let state = self.state.lock().unwrap();
        let mut stats = QueueStatistics::default();
        let mut wait_sum = Duration::ZERO;
        let mut wait_count = 0u32;

        for entry in state.entries.values() {
            match entry.status {
                QueueStatus::Waiting => {
                    stats.waiting += 1;
                    match entry.queue_type {
                        QueueType::WalkIn => stats.walk_ins_waiting += 1,
                        QueueType::Appointment => stats.appointments_waiting += 1,
                        QueueType::Emergency => stats.emergencies_waiting += 1,
                    }
                }
                QueueStatus::Called => stats.called += 1,
                QueueStatus::InProgress => stats.in_progress += 1,
                QueueStatus::Completed => stats.completed += 1,
                QueueStatus::Cancelled => stats.cancelled += 1,
            }
            if let Some(wait) = entry.actual_wait {
                wait_sum += wait;
                wait_count += 1;
            }
        }

        if wait_count > 0 {
            stats.average_actual_wait = Some(wait_sum / wait_count);
        }
        stats
    }

    fn entry(state: &QueueState, entry_id: Uuid) -> MeshResult<&QueueEntry> {
        state
            .entries
            .get(&entry_id)
            .ok_or_else(|| MeshError::validation(format!("unknown queue entry {entry_id}")))
    }

    fn next_free_ticket(state: &mut QueueState) -> String {
        loop {
            state.next_ticket += 1;
            let ticket = format_ticket(state.next_ticket);
            if !state.tickets.contains(&ticket) {
                return ticket;
            }
        }
    }

    /// Waiting entry ids of one type, ordered by the composite key
    fn ranked_waiting(state: &QueueState, queue_type: QueueType) -> Vec<Uuid> {
        let mut waiting: Vec<&QueueEntry> = state
            .entries
            .values()
            .filter(|e| e.queue_type == queue_type && e.status == QueueStatus::Waiting)
            .collect();

        waiting.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.created_at.cmp(&b.created_at))
                .then(a.ticket_number.cmp(&b.ticket_number))
        });

        waiting.into_iter().map(|e| e.entry_id).collect()
    }

    fn average_service(&self, state: &QueueState, queue_type: QueueType) -> Duration {
        match state.stats.get(&queue_type) {
            Some(stat) if !stat.recent.is_empty() => {
                let total: Duration = stat.recent.iter().sum();
                total / stat.recent.len() as u32
            }
            _ => {
                let minutes = match queue_type {
                    QueueType::Appointment => self.config.appointment_service_mins,
                    QueueType::WalkIn => self.config.walkin_service_mins,
                    QueueType::Emergency => self.config.emergency_service_mins,
                };
                Duration::from_secs(minutes * 60)
            }
        }
    }

    fn recompute_waits(&self, state: &mut QueueState, queue_type: QueueType) {
        let average = self.average_service(state, queue_type);
        let floor = self.config.min_wait_floor();
        let ranked = Self::ranked_waiting(state, queue_type);

        for (ahead, entry_id) in ranked.into_iter().enumerate() {
            let estimate = average * ahead as u32;
            let entry = state.entries.get_mut(&entry_id).expect("ranked id present");
            entry.estimated_wait = estimate.max(floor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> QueueManager {
        QueueManager::new(QueueSection::default())
    }

    #[test]
    fn test_tickets_are_sequential_and_unique() {
        let queue = manager();

        let a = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let b = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);

        assert_eq!(a.ticket_number, "C-0001");
        assert_eq!(b.ticket_number, "C-0002");
    }

    #[test]
    fn test_duplicate_ticket_rejected() {
        let queue = manager();

        let entry = QueueEntry::new("C-9999", QueueType::WalkIn, QueuePriority::Medium);
        queue.enqueue(entry).unwrap();

        let dup = QueueEntry::new("C-9999", QueueType::WalkIn, QueuePriority::High);
        let err = queue.enqueue(dup).unwrap_err();
        assert!(matches!(err, MeshError::DuplicateTicket { .. }));
    }

    #[test]
    fn test_call_next_empty_queue() {
        let queue = manager();

        let err = queue.call_next(QueueType::Emergency).unwrap_err();
        assert!(matches!(err, MeshError::EmptyQueue { .. }));
    }

    #[test]
    fn test_call_next_priority_then_fifo() {
        let queue = manager();

        let low = queue.create_entry(QueueType::WalkIn, QueuePriority::Low, None, None);
        let urgent = queue.create_entry(QueueType::WalkIn, QueuePriority::Urgent, None, None);
        let medium_first = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let medium_second = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);

        assert_eq!(queue.call_next(QueueType::WalkIn).unwrap().entry_id, urgent.entry_id);
        assert_eq!(
            queue.call_next(QueueType::WalkIn).unwrap().entry_id,
            medium_first.entry_id
        );
        assert_eq!(
            queue.call_next(QueueType::WalkIn).unwrap().entry_id,
            medium_second.entry_id
        );
        assert_eq!(queue.call_next(QueueType::WalkIn).unwrap().entry_id, low.entry_id);
    }

    #[test]
    fn test_queue_types_are_independent_lanes() {
        let queue = manager();

        queue.create_entry(QueueType::Appointment, QueuePriority::Medium, None, None);

        let err = queue.call_next(QueueType::WalkIn).unwrap_err();
        assert!(matches!(err, MeshError::EmptyQueue { .. }));
        assert!(queue.call_next(QueueType::Appointment).is_ok());
    }

    #[test]
    fn test_service_lifecycle() {
        let queue = manager();

        let entry = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let called = queue.call_next(QueueType::WalkIn).unwrap();
        assert_eq!(called.status, QueueStatus::Called);

        let started = queue.start_service(entry.entry_id).unwrap();
        assert_eq!(started.status, QueueStatus::InProgress);
        assert!(started.actual_wait.is_some());

        let completed = queue.complete_service(entry.entry_id).unwrap();
        assert_eq!(completed.status, QueueStatus::Completed);
        assert!(completed.completed_at.is_some());
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let queue = manager();
        let entry = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);

        // Cannot complete before starting
        let err = queue.complete_service(entry.entry_id).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTransition { .. }));

        queue.start_service(entry.entry_id).unwrap();
        queue.complete_service(entry.entry_id).unwrap();

        // Terminal entries cannot be cancelled
        let err = queue.cancel(entry.entry_id).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTransition { .. }));
    }

    #[test]
    fn test_one_in_progress_per_channel() {
        let queue = manager();

        let first = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let second = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let other_lane = queue.create_entry(QueueType::Emergency, QueuePriority::Urgent, None, None);

        queue.start_service(first.entry_id).unwrap();

        let err = queue.start_service(second.entry_id).unwrap_err();
        assert!(matches!(err, MeshError::InvalidTransition { .. }));
        assert!(err.to_string().contains("channel busy"));

        // Another lane is a separate channel
        assert!(queue.start_service(other_lane.entry_id).is_ok());

        // Channel frees up on completion
        queue.complete_service(first.entry_id).unwrap();
        assert!(queue.start_service(second.entry_id).is_ok());
    }

    #[test]
    fn test_cancel_non_terminal() {
        let queue = manager();
        let entry = queue.create_entry(QueueType::WalkIn, QueuePriority::Low, None, None);

        let cancelled = queue.cancel(entry.entry_id).unwrap();
        assert_eq!(cancelled.status, QueueStatus::Cancelled);
    }

    #[test]
    fn test_wait_estimates_use_seeded_average() {
        let queue = manager();

        let first = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let second = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        let third = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);

        // Head of the lane gets the floor; the rest accumulate the 20-minute
        // walk-in seed per entry ahead
        let first = queue.get(first.entry_id).unwrap();
        let second = queue.get(second.entry_id).unwrap();
        let third = queue.get(third.entry_id).unwrap();
        assert_eq!(first.estimated_wait, Duration::from_secs(5 * 60));
        assert_eq!(second.estimated_wait, Duration::from_secs(20 * 60));
        assert_eq!(third.estimated_wait, Duration::from_secs(40 * 60));
    }

    #[test]
    fn test_wait_estimates_recomputed_on_departure() {
        let queue = manager();

        queue.create_entry(QueueType::WalkIn, QueuePriority::Urgent, None, None);
        let behind = queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);

        assert_eq!(
            queue.get(behind.entry_id).unwrap().estimated_wait,
            Duration::from_secs(20 * 60)
        );

        queue.call_next(QueueType::WalkIn).unwrap();

        // Now at the head; clamped to the floor
        assert_eq!(
            queue.get(behind.entry_id).unwrap().estimated_wait,
            Duration::from_secs(5 * 60)
        );
    }

    #[test]
    fn test_position_report() {
        let queue = manager();

        queue.create_entry(QueueType::WalkIn, QueuePriority::Urgent, None, None);
        let entry = queue.create_entry(QueueType::WalkIn, QueuePriority::Low, None, None);

        let position = queue.position(&entry.ticket_number).unwrap();
        assert_eq!(position.position, Some(2));
        assert_eq!(position.status, QueueStatus::Waiting);

        assert!(queue.position("C-4242").is_err());
    }

    #[test]
    fn test_statistics_snapshot() {
        let queue = manager();

        queue.create_entry(QueueType::WalkIn, QueuePriority::Medium, None, None);
        queue.create_entry(QueueType::Emergency, QueuePriority::Urgent, None, None);
        let served = queue.create_entry(QueueType::Appointment, QueuePriority::High, None, None);
        queue.start_service(served.entry_id).unwrap();
        queue.complete_service(served.entry_id).unwrap();

        let stats = queue.statistics();
        assert_eq!(stats.waiting, 2);
        assert_eq!(stats.walk_ins_waiting, 1);
        assert_eq!(stats.emergencies_waiting, 1);
        assert_eq!(stats.appointments_waiting, 0);
        assert_eq!(stats.completed, 1);
        assert!(stats.average_actual_wait.is_some());
    }
}
