//! Step builders
//!
//! Each builder turns a set of typed properties into one
//! [`ActionDefinition`]: a build-spec (when the step runs on the build
//! runner), the artifacts it reads and writes, and the permission statements
//! its role needs. Builders never decide where a step runs; the pipeline
//! composer supplies the run-order.

pub mod approval;
pub mod container_build;
pub mod deploy;
pub mod migration;
pub mod smoke_test;

pub use approval::{ManualApproval, ManualApprovalProps};
pub use container_build::{ContainerBuild, ContainerBuildProps, EcrRepository};
pub use deploy::{CdkDeploy, CdkDeployProps, DeployOutput};
pub use migration::{RailsMigration, RailsMigrationProps};
pub use smoke_test::{SmokeTest, SmokeTestProps};

use crate::output::buildspec::BuildSpec;
use crate::output::schema::{ActionDefinition, ActionKind};
use crate::policy::{AwsEnv, PolicyStatement};

pub const SOURCE_RUN_ORDER: u32 = 1;
pub const BUILD_RUN_ORDER: u32 = 1;
pub const DEPLOY_RUN_ORDER: u32 = 1;
/// Same as [`DEPLOY_RUN_ORDER`]: migration runs alongside the deploy.
pub const MIGRATE_RUN_ORDER: u32 = 1;
pub const SMOKE_TEST_RUN_ORDER: u32 = 98;
pub const APPROVAL_RUN_ORDER: u32 = 99;

/// Secret holding the external registry credentials as `username` and
/// `password` fields.
pub const DOCKERHUB_CREDENTIALS_SECRET: &str = "/all/dockerhub/credentials";

pub trait StepBuilder {
    fn name(&self) -> &str;

    fn kind(&self) -> ActionKind;

    fn to_action(&self, run_order: u32) -> ActionDefinition;
}

/// Adds the Docker Hub credential variables to a build-spec.
pub(crate) fn with_dockerhub_credentials(mut spec: BuildSpec) -> BuildSpec {
    spec.env.secrets_manager.insert(
        "DOCKERHUB_USERNAME".to_string(),
        format!("{}:username", DOCKERHUB_CREDENTIALS_SECRET),
    );
    spec.env.secrets_manager.insert(
        "DOCKERHUB_PASSWORD".to_string(),
        format!("{}:password", DOCKERHUB_CREDENTIALS_SECRET),
    );
    spec
}

pub(crate) fn dockerhub_login() -> String {
    "echo $DOCKERHUB_PASSWORD | docker login --username $DOCKERHUB_USERNAME --password-stdin"
        .to_string()
}

pub(crate) fn ecr_login(env: &AwsEnv) -> String {
    format!(
        "aws ecr get-login-password --region {} | docker login --username AWS --password-stdin {}",
        env.region,
        env.registry_host()
    )
}

pub(crate) fn dockerhub_secret_statement(env: &AwsEnv) -> PolicyStatement {
    PolicyStatement::allow(
        ["secretsmanager:GetSecretValue"],
        [env.secret_arn(DOCKERHUB_CREDENTIALS_SECRET)],
    )
}

/// Environment variable name derived from a container name:
/// `rails` becomes `RAILS_ECR_TAG`.
pub fn tag_env_var_name(container_name: &str) -> String {
    let stem: String = container_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("{}_ECR_TAG", stem)
}
