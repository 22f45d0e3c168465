//! Documents produced by composition

pub mod buildspec;
pub mod schema;

pub use buildspec::{BuildSpec, PhaseName};
pub use schema::{
    ActionConfiguration, ActionDefinition, ActionKind, PipelineDefinition, StageDefinition,
};
