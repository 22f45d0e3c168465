//! Execution outcomes
//!
//! The workflow engine runs the pipeline; this module only models how step
//! outcomes combine into a pipeline status. Stages run strictly in order and
//! run-order groups run in ascending order inside a stage. A failed step
//! halts its stage and every stage after it. A rejected approval is terminal
//! too, but is reported as [`PipelineStatus::Rejected`] so it can be told
//! apart from a technical failure.

use super::ExecutionError;
use crate::deferred::{Deferred, DeferredError, ExecutionVariables};
use crate::output::schema::{ActionDefinition, ActionKind, PipelineDefinition};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    Failed { reason: String },
    Approved,
    Rejected { reason: String },
    Pending,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepOutcome::Succeeded => f.write_str("succeeded"),
            StepOutcome::Failed { .. } => f.write_str("failed"),
            StepOutcome::Approved => f.write_str("approved"),
            StepOutcome::Rejected { .. } => f.write_str("rejected"),
            StepOutcome::Pending => f.write_str("pending"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStatus {
    Succeeded,
    InProgress {
        stage: String,
    },
    AwaitingApproval {
        stage: String,
        step: String,
    },
    Failed {
        stage: String,
        step: String,
        reason: String,
    },
    Rejected {
        stage: String,
        step: String,
        reason: String,
    },
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PipelineStatus::Succeeded | PipelineStatus::Failed { .. } | PipelineStatus::Rejected { .. }
        )
    }
}

pub struct PipelineExecution<'a> {
    definition: &'a PipelineDefinition,
    outcomes: HashMap<(String, String), StepOutcome>,
    variables: ExecutionVariables,
}

impl<'a> PipelineExecution<'a> {
    pub fn new(definition: &'a PipelineDefinition) -> Self {
        Self {
            definition,
            outcomes: HashMap::new(),
            variables: ExecutionVariables::new(),
        }
    }

    pub fn record(
        &mut self,
        stage: &str,
        step: &str,
        outcome: StepOutcome,
    ) -> Result<(), ExecutionError> {
        let action = self
            .definition
            .stage(stage)
            .and_then(|s| s.action(step))
            .ok_or_else(|| ExecutionError::UnknownStep {
                stage: stage.to_string(),
                step: step.to_string(),
            })?;

        let is_approval = action.kind == ActionKind::Approval;
        let applies = match outcome {
            StepOutcome::Approved | StepOutcome::Rejected { .. } => is_approval,
            StepOutcome::Succeeded => !is_approval,
            StepOutcome::Failed { .. } | StepOutcome::Pending => true,
        };
        if !applies {
            return Err(ExecutionError::InvalidOutcome {
                step: step.to_string(),
                kind: format!("{:?}", action.kind),
                outcome: outcome.to_string(),
            });
        }

        debug!(stage, step, %outcome, "Recorded step outcome");
        self.outcomes
            .insert((stage.to_string(), step.to_string()), outcome);
        Ok(())
    }

    /// Records a variable a step produced, e.g. the source step's `CommitId`.
    pub fn set_variable(
        &mut self,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.variables.set(namespace, name, value);
    }

    pub fn resolve(&self, value: &Deferred) -> Result<String, DeferredError> {
        value.resolve(&self.variables)
    }

    fn outcome(&self, stage: &str, action: &ActionDefinition) -> Option<&StepOutcome> {
        self.outcomes
            .get(&(stage.to_string(), action.name.clone()))
    }

    pub fn status(&self) -> PipelineStatus {
        for stage in &self.definition.stages {
            for (_, group) in stage.run_groups() {
                let mut waiting_on: Option<&ActionDefinition> = None;
                for action in group {
                    match self.outcome(&stage.name, action) {
                        Some(StepOutcome::Failed { reason }) => {
                            warn!(stage = %stage.name, step = %action.name, "Step failed");
                            return PipelineStatus::Failed {
                                stage: stage.name.clone(),
                                step: action.name.clone(),
                                reason: reason.clone(),
                            };
                        }
                        Some(StepOutcome::Rejected { reason }) => {
                            return PipelineStatus::Rejected {
                                stage: stage.name.clone(),
                                step: action.name.clone(),
                                reason: reason.clone(),
                            };
                        }
                        None | Some(StepOutcome::Pending) => {
                            waiting_on.get_or_insert(action);
                        }
                        Some(StepOutcome::Succeeded | StepOutcome::Approved) => {}
                    }
                }

                if let Some(action) = waiting_on {
                    return if action.kind == ActionKind::Approval {
                        PipelineStatus::AwaitingApproval {
                            stage: stage.name.clone(),
                            step: action.name.clone(),
                        }
                    } else {
                        PipelineStatus::InProgress {
                            stage: stage.name.clone(),
                        }
                    };
                }
            }
        }
        PipelineStatus::Succeeded
    }
}
