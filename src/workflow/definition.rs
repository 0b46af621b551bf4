//! Workflow definitions

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::{MeshError, MeshResult};

/// How a step picks its executing agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TargetSelector {
    /// Pin to an explicit agent id
    Agent(String),
    /// Resolve through discovery by the step's capability
    Capability,
}

fn default_target() -> TargetSelector {
    TargetSelector::Capability
}

fn default_step_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_required() -> bool {
    true
}

/// One capability invocation inside a workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowStep {
    pub step_id: String,
    pub capability_name: String,
    #[serde(default = "default_target")]
    pub target: TargetSelector,
    /// Step ids that must settle before this step becomes eligible
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default = "default_step_timeout")]
    pub timeout: Duration,
    /// Required steps abort the workflow on failure; optional steps do not
    #[serde(default = "default_required")]
    pub required: bool,
}

impl WorkflowStep {
    pub fn new<S: Into<String>>(step_id: S, capability_name: S) -> Self {
        Self {
            step_id: step_id.into(),
            capability_name: capability_name.into(),
            target: default_target(),
            depends_on: Vec::new(),
            timeout: default_step_timeout(),
            required: true,
        }
    }

    /// Builder method to add a dependency
    pub fn after<S: Into<String>>(mut self, step_id: S) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Builder method to set the per-step timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Builder method to pin the step to one agent
    pub fn targeting_agent<S: Into<String>>(mut self, agent_id: S) -> Self {
        self.target = TargetSelector::Agent(agent_id.into());
        self
    }

    /// Builder method to mark the step optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// An ordered, dependency-constrained set of capability invocations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowDefinition {
    pub workflow_type: String,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn new<S: Into<String>>(workflow_type: S) -> Self {
        Self {
            workflow_type: workflow_type.into(),
            steps: Vec::new(),
        }
    }

    /// Builder method to append a step
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Check structural soundness: at least one step, unique ids, known
    /// dependencies, and no dependency cycles
    pub fn validate(&self) -> MeshResult<()> {
        if self.steps.is_empty() {
            return Err(MeshError::validation(format!(
                "workflow {} has no steps",
                self.workflow_type
            )));
        }

        let mut ids = HashSet::new();
        for step in &self.steps {
            if !ids.insert(step.step_id.as_str()) {
                return Err(MeshError::validation(format!(
                    "duplicate step id {}",
                    step.step_id
                )));
            }
        }

        for step in &self.steps {
            for dep in &step.depends_on {
                if !ids.contains(dep.as_str()) {
                    return Err(MeshError::validation(format!(
                        "step {} depends on unknown step {}",
                        step.step_id, dep
                    )));
                }
                if dep == &step.step_id {
                    return Err(MeshError::validation(format!(
                        "step {} depends on itself",
                        step.step_id
                    )));
                }
            }
        }

        // Kahn's algorithm; anything left unprocessed sits on a cycle
        let mut in_degree: HashMap<&str, usize> = self
            .steps
            .iter()
            .map(|s| (s.step_id.as_str(), s.depends_on.len()))
            .collect();
        let mut queue: Vec<&str> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut processed = 0;

        while let Some(id) = queue.pop() {
            processed += 1;
            for step in &self.steps {
                if step.depends_on.iter().any(|d| d == id) {
                    let degree = in_degree
                        .get_mut(step.step_id.as_str())
                        .expect("step id present");
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push(step.step_id.as_str());
                    }
                }
            }
        }

        if processed != self.steps.len() {
            return Err(MeshError::validation(format!(
                "workflow {} has a dependency cycle",
                self.workflow_type
            )));
        }

        Ok(())
    }
}
