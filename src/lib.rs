//! dec-pipelines - deployment pipeline composition for DEC services
//!
//! Describes, without provisioning anything, the continuous deployment
//! pipeline of a containerized application:
//!
//! ```text
//! Source -> Build -> Test (deploy | migrate -> smoke tests -> approval) -> Production
//! ```
//!
//! and derives the least-privilege permissions each step needs from the
//! naming convention that every resource of a deployment starts with its
//! [`Namespace`].
//!
//! # Example
//!
//! ```
//! use dec_pipelines::{AwsEnv, DeployStageProps, Namespace, RailsPipeline, RailsPipelineProps};
//! use dec_pipelines::source::{OAuthTokenRef, SourceBinding};
//!
//! let token = OAuthTokenRef::new("/all/github/ndlib-git");
//! let app = SourceBinding::github("AppCode", "ndlib", "marble-app", "main", token.clone());
//! let infra = SourceBinding::github("InfraCode", "ndlib", "marble-blueprints", "main", token);
//!
//! let props = RailsPipelineProps::new(
//!     "marble-pipeline",
//!     Namespace::new("marble").unwrap(),
//!     AwsEnv::new("123456789012", "us-east-1"),
//!     app,
//!     infra,
//! )
//! .with_stage(DeployStageProps::new(
//!     "Production",
//!     "prod",
//!     Namespace::new("marble-prod").unwrap(),
//!     "marble-prod-service",
//!     "/all/marble-prod",
//! ));
//!
//! let definition = RailsPipeline::new(props).compose().unwrap();
//! assert!(definition.is_deployable());
//! ```
//!
//! # Project Structure
//!
//! - [`policy`]: namespaced and global permission statements
//! - [`source`], [`steps`]: the individual pipeline steps
//! - [`pipeline`]: stage layout, permission strategies and execution outcomes
//! - [`validation`]: rules every composed pipeline must satisfy
//! - [`config`], [`cli`]: YAML descriptions and the command-line front end

pub mod annotations;
pub mod cli;
pub mod config;
pub mod deferred;
pub mod fs;
pub mod namespace;
pub mod output;
pub mod pipeline;
pub mod policy;
pub mod source;
pub mod steps;
pub mod util;
pub mod validation;

pub use annotations::{Annotation, AnnotationLevel};
pub use config::{ConfigError, Context, PipelineConfig};
pub use deferred::{Deferred, DeferredError, ExecutionVariables};
pub use namespace::{Namespace, NamespaceError};
pub use output::{PipelineDefinition, StageDefinition};
pub use pipeline::{
    ComposeError, DeployPermissionStrategy, DeployStageProps, PipelineExecution, PipelineStatus,
    RailsPipeline, RailsPipelineProps, StageMeta, StepOutcome,
};
pub use policy::{AwsEnv, Capability, GlobalAction, PolicyDocument, PolicyStatement};
pub use util::{init_from_env, init_logging, LoggingConfig};
pub use validation::Validator;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_name() {
        assert_eq!(NAME, "dec-pipelines");
    }
}
