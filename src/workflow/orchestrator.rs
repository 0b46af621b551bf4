//! Workflow orchestrator
//!
//! Drives a workflow instance through its step graph: resolves each eligible
//! step's agent through discovery, dispatches it through the task engine,
//! merges results into the shared payload, and decides whether a failure is
//! terminal for the whole instance or just one branch. Steps with no
//! dependency relation execute concurrently; an instance-wide ceiling abandons
//! anything still running when it expires.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::WorkflowSection;
use crate::discovery::DiscoveryService;
use crate::error::{MeshError, MeshResult};
use crate::protocol::{reason, TaskParams, WorkflowStartRequest};
use crate::tasks::TaskEngine;

use super::definition::{TargetSelector, WorkflowDefinition, WorkflowStep};
use super::templates;

/// Lifecycle of one step inside an instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// Lifecycle of a whole instance
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    PartiallyCompleted,
}

/// Read-only view of an instance
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct WorkflowSnapshot {
    pub workflow_id: Uuid,
    pub workflow_type: String,
    pub overall_status: WorkflowStatus,
    pub step_states: HashMap<String, StepState>,
    pub step_errors: HashMap<String, String>,
    pub payload: Value,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct WorkflowInstance {
    workflow_type: String,
    step_states: HashMap<String, StepState>,
    step_errors: HashMap<String, String>,
    payload: Value,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    overall_status: WorkflowStatus,
}

enum StepOutcome {
    Completed(Value),
    Failed(String),
}

/// Sequences multi-agent workflows on top of discovery and the task engine
pub struct WorkflowOrchestrator {
    discovery: Arc<DiscoveryService>,
    engine: Arc<TaskEngine>,
    instances: Mutex<HashMap<Uuid, WorkflowInstance>>,
    config: WorkflowSection,
}

impl WorkflowOrchestrator {
    pub fn new(
        discovery: Arc<DiscoveryService>,
        engine: Arc<TaskEngine>,
        config: WorkflowSection,
    ) -> Arc<Self> {
        Arc::new(Self {
            discovery,
            engine,
            instances: Mutex::new(HashMap::new()),
            config,
        })
    }

    pub fn engine(&self) -> &Arc<TaskEngine> {
        &self.engine
    }

    /// Create an instance and start driving it; returns immediately with the
    /// workflow id. Steps with no dependencies are scheduled right away.
    pub fn start_workflow(
        self: &Arc<Self>,
        definition: WorkflowDefinition,
        initial_payload: Value,
    ) -> MeshResult<Uuid> {
        definition.validate()?;
        let payload = match initial_payload {
            Value::Null => Value::Object(Default::default()),
            value @ Value::Object(_) => value,
            _ => {
                return Err(MeshError::validation(
                    "workflow initial payload must be an object",
                ))
            }
        };

        let workflow_id = Uuid::new_v4();
        let step_states = definition
            .steps
            .iter()
            .map(|s| (s.step_id.clone(), StepState::Pending))
            .collect();

        let instance = WorkflowInstance {
            workflow_type: definition.workflow_type.clone(),
            step_states,
            step_errors: HashMap::new(),
            payload: payload.clone(),
            started_at: Utc::now(),
            finished_at: None,
            overall_status: WorkflowStatus::Running,
        };
        self.instances.lock().unwrap().insert(workflow_id, instance);

        info!(
            workflow_id = %workflow_id,
            workflow_type = %definition.workflow_type,
            steps = definition.steps.len(),
            "Starting workflow"
        );

        let orchestrator = Arc::clone(self);
        let definition = Arc::new(definition);
        tokio::spawn(async move {
            orchestrator.drive(workflow_id, definition, payload).await;
        });

        Ok(workflow_id)
    }

    /// Start a stock workflow from an external trigger
    pub fn start_from_request(self: &Arc<Self>, request: WorkflowStartRequest) -> MeshResult<Uuid> {
        let definition = templates::standard_definition(&request.workflow_type).ok_or_else(|| {
            MeshError::validation(format!("unknown workflow type {}", request.workflow_type))
        })?;
        self.start_workflow(definition, request.initial_payload)
    }

    /// Read-only snapshot of step states and overall status; never mutates
    pub fn get_status(&self, workflow_id: Uuid) -> MeshResult<WorkflowSnapshot> {
        let instances = self.instances.lock().unwrap();
        let instance = instances
            .get(&workflow_id)
            .ok_or(MeshError::WorkflowNotFound { workflow_id })?;

        Ok(WorkflowSnapshot {
            workflow_id,
            workflow_type: instance.workflow_type.clone(),
            overall_status: instance.overall_status,
            step_states: instance.step_states.clone(),
            step_errors: instance.step_errors.clone(),
            payload: instance.payload.clone(),
            started_at: instance.started_at,
            finished_at: instance.finished_at,
        })
    }

    /// Poll until the instance leaves RUNNING or the limit elapses; returns
    /// the latest snapshot either way
    pub async fn wait_until_terminal(
        &self,
        workflow_id: Uuid,
        limit: Duration,
    ) -> MeshResult<WorkflowSnapshot> {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let snapshot = self.get_status(workflow_id)?;
            if snapshot.overall_status != WorkflowStatus::Running
                || tokio::time::Instant::now() >= deadline
            {
                return Ok(snapshot);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn drive(
        self: Arc<Self>,
        workflow_id: Uuid,
        definition: Arc<WorkflowDefinition>,
        payload: Value,
    ) {
        let ceiling = self.config.overall_ceiling();
        if tokio::time::timeout(ceiling, self.run_steps(workflow_id, &definition, payload))
            .await
            .is_err()
        {
            warn!(
                workflow_id = %workflow_id,
                ceiling_secs = ceiling.as_secs(),
                "Workflow exceeded overall ceiling; abandoning unresolved steps"
            );
        }
        self.finalize(workflow_id, &definition);
    }

    async fn run_steps(
        &self,
        workflow_id: Uuid,
        definition: &Arc<WorkflowDefinition>,
        mut payload: Value,
    ) {
        let (done_tx, mut done_rx) =
            mpsc::channel::<(String, StepOutcome)>(definition.steps.len().max(1));
        let mut running = 0usize;

        loop {
            for step in self.schedule_eligible(workflow_id, definition) {
                running += 1;
                let discovery = Arc::clone(&self.discovery);
                let engine = Arc::clone(&self.engine);
                let step_payload = payload.clone();
                let tx = done_tx.clone();
                tokio::spawn(async move {
                    let outcome = execute_step(discovery, engine, &step, step_payload).await;
                    // The driver may already be gone after a ceiling abort
                    let _ = tx.send((step.step_id, outcome)).await;
                });
            }

            if running == 0 {
                break;
            }

            let Some((step_id, outcome)) = done_rx.recv().await else {
                break;
            };
            running -= 1;

            match outcome {
                StepOutcome::Completed(result) => {
                    debug!(workflow_id = %workflow_id, step_id = %step_id, "Step completed");
                    merge_result(&mut payload, &step_id, result);
                    self.record_step(workflow_id, &step_id, StepState::Completed, None);
                }
                StepOutcome::Failed(detail) => {
                    let required = definition
                        .step(&step_id)
                        .map(|s| s.required)
                        .unwrap_or(true);
                    if required {
                        warn!(
                            workflow_id = %workflow_id,
                            step_id = %step_id,
                            detail = %detail,
                            "Required step failed"
                        );
                    } else {
                        debug!(
                            workflow_id = %workflow_id,
                            step_id = %step_id,
                            detail = %detail,
                            "Optional step failed"
                        );
                    }
                    self.record_step(workflow_id, &step_id, StepState::Failed, Some(detail));
                }
            }
        }

        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.get_mut(&workflow_id) {
            instance.payload = payload;
        }
    }

    /// Launch newly-eligible steps and skip newly-unsatisfiable ones
    ///
    /// A step is eligible once every dependency is COMPLETED, or - for
    /// optional dependencies - FAILED or SKIPPED. A required dependency that
    /// failed or was skipped makes the step unsatisfiable; the skip cascades
    /// through the fixpoint loop.
    fn schedule_eligible(
        &self,
        workflow_id: Uuid,
        definition: &WorkflowDefinition,
    ) -> Vec<WorkflowStep> {
        let mut instances = self.instances.lock().unwrap();
        let Some(instance) = instances.get_mut(&workflow_id) else {
            return Vec::new();
        };

        let mut launches = Vec::new();
        loop {
            let mut changed = false;
            for step in &definition.steps {
                if instance.step_states.get(&step.step_id) != Some(&StepState::Pending) {
                    continue;
                }

                let mut satisfiable = true;
                let mut ready = true;
                for dep_id in &step.depends_on {
                    let dep_state = instance
                        .step_states
                        .get(dep_id)
                        .copied()
                        .unwrap_or(StepState::Failed);
                    let dep_required = definition.step(dep_id).map(|s| s.required).unwrap_or(true);
                    match dep_state {
                        StepState::Completed => {}
                        StepState::Failed | StepState::Skipped if !dep_required => {}
                        StepState::Failed | StepState::Skipped => {
                            satisfiable = false;
                            ready = false;
                        }
                        StepState::Pending | StepState::Running => {
                            ready = false;
                        }
                    }
                }

                if !satisfiable {
                    debug!(
                        workflow_id = %workflow_id,
                        step_id = %step.step_id,
                        "Skipping step after required dependency failure"
                    );
                    instance
                        .step_states
                        .insert(step.step_id.clone(), StepState::Skipped);
                    changed = true;
                } else if ready {
                    instance
                        .step_states
                        .insert(step.step_id.clone(), StepState::Running);
                    launches.push(step.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
        launches
    }

    fn record_step(
        &self,
        workflow_id: Uuid,
        step_id: &str,
        state: StepState,
        detail: Option<String>,
    ) {
        let mut instances = self.instances.lock().unwrap();
        if let Some(instance) = instances.get_mut(&workflow_id) {
            instance.step_states.insert(step_id.to_string(), state);
            if let Some(detail) = detail {
                instance.step_errors.insert(step_id.to_string(), detail);
            }
        }
    }

    /// Settle the instance into a terminal status
    ///
    /// COMPLETED only when every required step completed; PARTIALLY_COMPLETED
    /// when only optional work was lost; FAILED otherwise. Terminal instances
    /// are never mutated again.
    fn finalize(&self, workflow_id: Uuid, definition: &WorkflowDefinition) {
        let mut instances = self.instances.lock().unwrap();
        let Some(instance) = instances.get_mut(&workflow_id) else {
            return;
        };
        if instance.overall_status != WorkflowStatus::Running {
            return;
        }

        // Normalize leftovers from a ceiling abort: pending steps are
        // skipped, unresolved running steps are abandoned
        for step in &definition.steps {
            let state = instance
                .step_states
                .get(&step.step_id)
                .copied()
                .unwrap_or(StepState::Skipped);
            match state {
                StepState::Pending => {
                    instance
                        .step_states
                        .insert(step.step_id.clone(), StepState::Skipped);
                }
                StepState::Running => {
                    instance
                        .step_states
                        .insert(step.step_id.clone(), StepState::Failed);
                    instance
                        .step_errors
                        .insert(step.step_id.clone(), reason::ABANDONED.to_string());
                }
                _ => {}
            }
        }

        let mut required_incomplete = false;
        let mut any_nonsuccess = false;
        for step in &definition.steps {
            let state = instance
                .step_states
                .get(&step.step_id)
                .copied()
                .unwrap_or(StepState::Skipped);
            if state != StepState::Completed {
                any_nonsuccess = true;
                if step.required {
                    required_incomplete = true;
                }
            }
        }

        instance.overall_status = if required_incomplete {
            WorkflowStatus::Failed
        } else if any_nonsuccess {
            WorkflowStatus::PartiallyCompleted
        } else {
            WorkflowStatus::Completed
        };
        instance.finished_at = Some(Utc::now());

        info!(
            workflow_id = %workflow_id,
            workflow_type = %instance.workflow_type,
            status = ?instance.overall_status,
            "Workflow finished"
        );
    }
}

/// Resolve the target agent, dispatch the task, and await its resolution
async fn execute_step(
    discovery: Arc<DiscoveryService>,
    engine: Arc<TaskEngine>,
    step: &WorkflowStep,
    payload: Value,
) -> StepOutcome {
    let target = match &step.target {
        TargetSelector::Agent(agent_id) => discovery
            .get(agent_id)
            .filter(|d| d.is_available())
            .map(|d| d.agent_id),
        TargetSelector::Capability => discovery
            .resolve_capability(&step.capability_name)
            .map(|d| d.agent_id),
    };
    let Some(recipient) = target else {
        return StepOutcome::Failed(reason::NO_CAPABLE_AGENT.to_string());
    };

    let task_id = match engine
        .send_task(
            &recipient,
            &step.capability_name,
            TaskParams::Dynamic(payload),
            step.timeout,
        )
        .await
    {
        Ok(task_id) => task_id,
        Err(e) => return StepOutcome::Failed(e.to_string()),
    };

    match engine.await_response(task_id).await {
        Ok(response) if response.is_success() => StepOutcome::Completed(response.result),
        Ok(response) => StepOutcome::Failed(
            response
                .error_detail
                .unwrap_or_else(|| "task failed".to_string()),
        ),
        Err(e) => StepOutcome::Failed(e.to_string()),
    }
}

/// Merge a step result into the shared workflow payload
///
/// Object results merge shallowly, key by key; scalar results land under the
/// step id.
fn merge_result(payload: &mut Value, step_id: &str, result: Value) {
    let Some(map) = payload.as_object_mut() else {
        return;
    };
    match result {
        Value::Object(result_map) => {
            for (key, value) in result_map {
                map.insert(key, value);
            }
        }
        Value::Null => {}
        other => {
            map.insert(step_id.to_string(), other);
        }
    }
}
