//! Pipeline composition and execution outcomes

pub mod composer;
pub mod execution;
pub mod permissions;

pub use composer::{DeployStageProps, MigrationSettings, RailsPipeline, RailsPipelineProps};
pub use execution::{PipelineExecution, PipelineStatus, StepOutcome};
pub use permissions::{DeployPermissionStrategy, NamespacedCapabilities, StageMeta};

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("Pipeline has no deploy stages")]
    NoStages,

    #[error("Stage name '{0}' is reserved or used more than once")]
    DuplicateStage(String),

    #[error("Container '{0}' is declared more than once")]
    DuplicateContainer(String),

    #[error("Context override key '{key}' is produced by both '{first}' and '{second}'")]
    DuplicateOverrideKey {
        key: String,
        first: String,
        second: String,
    },

    #[error("Containers '{first}' and '{second}' both pass their image tag as {variable}")]
    DuplicateTagVariable {
        variable: String,
        first: String,
        second: String,
    },

    #[error("Artifact '{name}' is bound to both {first} and {second}")]
    ConflictingSource {
        name: String,
        first: String,
        second: String,
    },

    #[error("Container '{container}' reads artifact '{artifact}' which no source produces")]
    UnknownArtifact { container: String, artifact: String },

    #[error("Migration references unknown container '{0}'")]
    UnknownContainer(String),

    #[error("Stage '{0}' is followed by another stage but no approval topic is configured")]
    MissingApprovalTopic(String),

    #[error("Action name '{action}' appears twice in stage '{stage}'")]
    DuplicateAction { stage: String, action: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("Unknown step '{step}' in stage '{stage}'")]
    UnknownStep { stage: String, step: String },

    #[error("Outcome {outcome} does not apply to {kind} step '{step}'")]
    InvalidOutcome {
        step: String,
        kind: String,
        outcome: String,
    },
}
