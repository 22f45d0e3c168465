//! Pipeline configuration
//!
//! A pipeline is described in a YAML file and turned into
//! [`RailsPipelineProps`] for the composer. A handful of values can be
//! overridden from the environment so one file serves several accounts.
//!
//! # Environment Variables
//!
//! - `DEC_NAMESPACE_PREFIX`: replaces the pipeline namespace. Stage namespaces
//!   that were not set explicitly follow it.
//! - `DEC_AWS_ACCOUNT`: replaces `aws.account`
//! - `DEC_AWS_REGION`: replaces `aws.region`
//!
//! # Example
//!
//! ```yaml
//! name: marble-pipeline
//! namespace: marble
//! aws:
//!   account: "123456789012"
//!   region: us-east-1
//! context:
//!   owner: wse
//!   contact: web-and-software-engineering@nd.edu
//! sources:
//!   app: { name: AppCode, owner: ndlib, repo: marble-app, branch: main }
//!   infra: { name: InfraCode, owner: ndlib, repo: marble-blueprints, branch: main }
//! containers:
//!   - { name: rails, repository: marble-rails }
//! approval_topic_arn: arn:aws:sns:us-east-1:123456789012:approvals
//! stages:
//!   - { name: Test, env: test }
//!   - { name: Production, env: prod }
//! ```

use crate::fs::{FileSystem, RealFileSystem};
use crate::namespace::{Namespace, NamespaceError};
use crate::output::schema::VpcPlacement;
use crate::pipeline::{
    DeployPermissionStrategy, DeployStageProps, MigrationSettings, NamespacedCapabilities,
    RailsPipelineProps,
};
use crate::policy::{AwsEnv, Capability, GlobalAction};
use crate::source::{OAuthTokenRef, SourceBinding, SourceTrigger};
use crate::steps::{ContainerBuildProps, EcrRepository};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

const DEFAULT_OAUTH_TOKEN_PATH: &str = "/all/github/ndlib-git";

/// Context keys every stage's deploy must carry.
pub const REQUIRED_CONTEXT: &[&str] = &["owner", "contact"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required context key '{0}'")]
    MissingContext(String),

    #[error(transparent)]
    Namespace(#[from] NamespaceError),

    #[error("Failed to parse {path}: {message}")]
    Parse { path: String, message: String },

    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Unknown capability '{0}'")]
    UnknownCapability(String),

    #[error("Unknown global action '{0}'")]
    UnknownGlobalAction(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Insertion-ordered deploy context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(IndexMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn require(&self, key: &str) -> Result<&str, ConfigError> {
        self.get(key)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| ConfigError::MissingContext(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub name: String,
    pub owner: String,
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default = "default_oauth_token_path")]
    pub oauth_token_path: String,
    #[serde(default)]
    pub oauth_token_field: Option<String>,
    #[serde(default)]
    pub trigger: SourceTrigger,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_oauth_token_path() -> String {
    DEFAULT_OAUTH_TOKEN_PATH.to_string()
}

impl SourceConfig {
    pub fn to_binding(&self) -> SourceBinding {
        let mut token = OAuthTokenRef::new(self.oauth_token_path.clone());
        if let Some(field) = &self.oauth_token_field {
            token = token.with_field(field.clone());
        }
        SourceBinding::github(
            self.name.clone(),
            self.owner.clone(),
            self.repo.clone(),
            self.branch.clone(),
            token,
        )
        .with_trigger(self.trigger)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sources {
    pub app: SourceConfig,
    /// Defaults to the application source.
    #[serde(default)]
    pub infra: Option<SourceConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    pub name: String,
    pub repository: String,
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub context_dir: Option<String>,
    #[serde(default)]
    pub build_args: IndexMap<String, String>,
    #[serde(default)]
    pub name_override_key: Option<String>,
    #[serde(default)]
    pub tag_override_key: Option<String>,
    /// Builds from the infrastructure source instead of the application.
    #[serde(default)]
    pub from_infra: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationConfig {
    pub container: String,
    pub vpc: VpcPlacement,
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

/// A capability by name, optionally with its scoping argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityConfig {
    Name(String),
    Scoped { name: String, argument: String },
}

impl CapabilityConfig {
    pub fn to_capability(&self) -> Result<Capability, ConfigError> {
        let (name, argument) = match self {
            CapabilityConfig::Name(name) => (name.as_str(), None),
            CapabilityConfig::Scoped { name, argument } => (name.as_str(), Some(argument.as_str())),
        };
        Capability::from_name(name, argument)
            .ok_or_else(|| ConfigError::UnknownCapability(name.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    /// Value passed as the `env` context key.
    pub env: String,
    /// Defaults to `<namespace>-<env>`.
    #[serde(default)]
    pub namespace: Option<String>,
    /// Defaults to `<stage namespace>-service`.
    #[serde(default)]
    pub stack: Option<String>,
    /// Defaults to `/all/<stage namespace>`.
    #[serde(default)]
    pub config_path: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub context: Context,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub capabilities: Vec<CapabilityConfig>,
    #[serde(default)]
    pub global_actions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    pub namespace: String,
    pub aws: AwsEnv,
    #[serde(default)]
    pub artifact_bucket: Option<String>,
    #[serde(default)]
    pub context: Context,
    pub sources: Sources,
    #[serde(default)]
    pub containers: Vec<ContainerConfig>,
    #[serde(default)]
    pub infra_directory: Option<String>,
    #[serde(default)]
    pub app_build_commands: Vec<String>,
    #[serde(default)]
    pub post_deploy_commands: Vec<String>,
    #[serde(default)]
    pub migration: Option<MigrationConfig>,
    #[serde(default)]
    pub smoke_tests: Option<String>,
    #[serde(default)]
    pub approval_topic_arn: Option<String>,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn from_yaml_str(yaml: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    /// Reads, parses, applies environment overrides and validates.
    pub fn load(fs: &dyn FileSystem, path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let yaml = fs.read_to_string(path).map_err(|e| ConfigError::Io {
            path: origin.clone(),
            message: format!("{:#}", e),
        })?;
        let mut config = Self::from_yaml_str(&yaml, &origin)?;
        config.apply_env_overrides();
        config.validate()?;
        debug!(path = %origin, name = %config.name, stages = config.stages.len(), "Loaded pipeline config");
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        Self::load(&RealFileSystem, path)
    }

    pub fn apply_env_overrides(&mut self) {
        if let Some(prefix) = non_empty_var("DEC_NAMESPACE_PREFIX") {
            self.namespace = prefix;
        }
        if let Some(account) = non_empty_var("DEC_AWS_ACCOUNT") {
            self.aws.account = account;
        }
        if let Some(region) = non_empty_var("DEC_AWS_REGION") {
            self.aws.region = region;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Namespace::new(self.namespace.clone())?;
        for stage in &self.stages {
            self.stage_namespace(stage)?;
        }

        if self.name.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "Pipeline name must not be empty".to_string(),
            ));
        }
        if self.aws.account.len() != 12 || !self.aws.account.chars().all(|c| c.is_ascii_digit()) {
            return Err(ConfigError::ValidationFailed(format!(
                "Invalid AWS account: {}. Expected 12 digits",
                self.aws.account
            )));
        }
        if self.aws.region.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "AWS region must not be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "At least one stage is required".to_string(),
            ));
        }
        for key in REQUIRED_CONTEXT {
            self.context.require(key)?;
        }
        for stage in &self.stages {
            for capability in &stage.capabilities {
                capability.to_capability()?;
            }
            for name in &stage.global_actions {
                parse_global_action(name)?;
            }
        }
        Ok(())
    }

    fn stage_namespace(&self, stage: &StageConfig) -> Result<Namespace, ConfigError> {
        let value = stage
            .namespace
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.namespace, stage.env));
        Ok(Namespace::new(value)?)
    }

    pub fn aws_env(&self) -> AwsEnv {
        self.aws.clone()
    }

    pub fn into_pipeline_props(self) -> Result<RailsPipelineProps, ConfigError> {
        self.validate()?;
        let env = self.aws_env();
        let namespace = Namespace::new(self.namespace.clone())?;

        let app = self.sources.app.to_binding();
        let infra = self
            .sources
            .infra
            .as_ref()
            .map(SourceConfig::to_binding)
            .unwrap_or_else(|| app.clone());

        let mut props = RailsPipelineProps::new(
            self.name.clone(),
            namespace,
            env.clone(),
            app.clone(),
            infra.clone(),
        );
        props.artifact_bucket = self.artifact_bucket.clone();
        props.app_build_commands = self.app_build_commands.clone();
        props.post_deploy_commands = self.post_deploy_commands.clone();
        props.smoke_test_collection = self.smoke_tests.clone();
        props.approval_topic_arn = self.approval_topic_arn.clone();
        if let Some(directory) = &self.infra_directory {
            props.infra_directory = directory.clone();
        }

        for container in &self.containers {
            let source = if container.from_infra { infra.clone() } else { app.clone() };
            let mut build = ContainerBuildProps::new(
                source,
                EcrRepository::new(container.repository.clone()),
                container.name.clone(),
                env.clone(),
            );
            if let Some(dockerfile) = &container.dockerfile {
                build = build.with_dockerfile(dockerfile.clone());
            }
            if let Some(dir) = &container.context_dir {
                build = build.with_context_dir(dir.clone());
            }
            for (key, value) in &container.build_args {
                build = build.with_build_arg(key.clone(), value.clone());
            }
            if let Some(key) = &container.name_override_key {
                build.name_override_key = key.clone();
            }
            if let Some(key) = &container.tag_override_key {
                build.tag_override_key = key.clone();
            }
            props = props.with_container(build);
        }

        if let Some(migration) = &self.migration {
            props = props.with_migration(MigrationSettings {
                container: migration.container.clone(),
                vpc: migration.vpc.clone(),
                entry_point: migration.entry_point.clone(),
                extra_env: migration.env.clone(),
            });
        }

        for stage in &self.stages {
            props = props.with_stage(self.stage_props(stage, &env)?);
        }
        Ok(props)
    }

    fn stage_props(&self, stage: &StageConfig, env: &AwsEnv) -> Result<DeployStageProps, ConfigError> {
        let namespace = self.stage_namespace(stage)?;
        let stack = stage
            .stack
            .clone()
            .unwrap_or_else(|| format!("{}-service", namespace));
        let config_path = stage
            .config_path
            .clone()
            .unwrap_or_else(|| format!("/all/{}", namespace));

        let mut props = DeployStageProps::new(
            stage.name.clone(),
            stage.env.clone(),
            namespace,
            stack,
            config_path,
        );
        if let Some(hostname) = &stage.hostname {
            props = props.with_hostname(hostname.clone());
        }
        for key in REQUIRED_CONTEXT {
            props = props.with_context(*key, self.context.require(key)?);
        }
        for (key, value) in self.context.iter().chain(stage.context.iter()) {
            props = props.with_context(key, value);
        }
        for stack in &stage.depends_on {
            props = props.depends_on(stack.clone());
        }

        if !stage.capabilities.is_empty() || !stage.global_actions.is_empty() {
            let capabilities = stage
                .capabilities
                .iter()
                .map(CapabilityConfig::to_capability)
                .collect::<Result<Vec<_>, _>>()?;
            let globals = stage
                .global_actions
                .iter()
                .map(|name| parse_global_action(name))
                .collect::<Result<Vec<_>, _>>()?;
            let strategy: Arc<dyn DeployPermissionStrategy> = Arc::new(
                NamespacedCapabilities::new(env.clone())
                    .with_capabilities(capabilities)
                    .with_global(globals),
            );
            props = props.with_permissions(strategy);
        }
        Ok(props)
    }
}

fn parse_global_action(name: &str) -> Result<GlobalAction, ConfigError> {
    GlobalAction::from_name(name).ok_or_else(|| ConfigError::UnknownGlobalAction(name.to_string()))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

impl fmt::Display for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline Configuration:")?;
        writeln!(f, "  Name: {}", self.name)?;
        writeln!(f, "  Namespace: {}", self.namespace)?;
        writeln!(f, "  Account: {} ({})", self.aws.account, self.aws.region)?;
        writeln!(f, "  Containers: {}", self.containers.len())?;
        let stages: Vec<&str> = self.stages.iter().map(|s| s.name.as_str()).collect();
        writeln!(f, "  Stages: {}", stages.join(", "))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use serial_test::serial;

    struct EnvGuard {
        key: String,
        old_value: Option<String>,
    }

    impl EnvGuard {
        fn set(key: &str, value: &str) -> Self {
            let old_value = env::var(key).ok();
            env::set_var(key, value);
            Self {
                key: key.to_string(),
                old_value,
            }
        }

        fn unset(key: &str) -> Self {
            let old_value = env::var(key).ok();
            env::remove_var(key);
            Self {
                key: key.to_string(),
                old_value,
            }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            match &self.old_value {
                Some(v) => env::set_var(&self.key, v),
                None => env::remove_var(&self.key),
            }
        }
    }

    const YAML: &str = r#"
name: marble-pipeline
namespace: marble
aws:
  account: "123456789012"
  region: us-east-1
context:
  owner: wse
  contact: wse@nd.edu
sources:
  app: { name: AppCode, owner: ndlib, repo: marble-app }
  infra: { name: InfraCode, owner: ndlib, repo: marble-blueprints, trigger: poll }
containers:
  - name: rails
    repository: marble-rails
    build_args: { RAILS_ENV: production }
migration:
  container: rails
  vpc: { vpc_id: vpc-1, subnet_ids: [subnet-a], security_group_ids: [sg-db] }
smoke_tests: deploy/cdk/test/newman/smoke.json
approval_topic_arn: arn:aws:sns:us-east-1:123456789012:approvals
stages:
  - name: Test
    env: test
    hostname: marble-test.library.nd.edu
    context: { domainStackName: libraries-domain }
    capabilities: [s3, ecs, { name: route53-record-set, argument: Z123 }]
    global_actions: [autoscaling]
  - name: Production
    env: prod
    stack: marble-prod-webapp
"#;

    fn parsed() -> PipelineConfig {
        PipelineConfig::from_yaml_str(YAML, "pipeline.yml").unwrap()
    }

    #[test]
    fn test_parse() {
        let config = parsed();
        assert_eq!(config.name, "marble-pipeline");
        assert_eq!(config.sources.app.branch, "main");
        assert_eq!(config.sources.app.oauth_token_path, DEFAULT_OAUTH_TOKEN_PATH);
        assert_eq!(
            config.sources.infra.as_ref().unwrap().trigger,
            SourceTrigger::Poll
        );
        assert_eq!(config.stages[0].capabilities.len(), 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_context_require() {
        let mut context = Context::new();
        context.set("owner", "wse");
        context.set("contact", "");
        assert_eq!(context.require("owner").unwrap(), "wse");
        assert!(matches!(
            context.require("contact"),
            Err(ConfigError::MissingContext(key)) if key == "contact"
        ));
        assert!(context.require("nope").is_err());
    }

    #[test]
    fn test_missing_owner_fails_validation() {
        let mut config = parsed();
        config.context = Context::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingContext(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = parsed();
        config.aws.account = "12345".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let mut config = parsed();
        config.namespace = "9lives".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Namespace(_))));

        let mut config = parsed();
        config.stages[0].global_actions.push("iam".to_string());
        assert!(matches!(config.validate(), Err(ConfigError::UnknownGlobalAction(_))));

        let mut config = parsed();
        config.stages[1]
            .capabilities
            .push(CapabilityConfig::Name("kinesis".to_string()));
        assert!(matches!(config.validate(), Err(ConfigError::UnknownCapability(_))));
    }

    #[test]
    fn test_parse_error_names_origin() {
        let err = PipelineConfig::from_yaml_str("name: [", "broken.yml").unwrap_err();
        assert!(err.to_string().contains("broken.yml"));
    }

    #[test]
    fn test_into_pipeline_props() {
        let props = parsed().into_pipeline_props().unwrap();
        assert_eq!(props.containers[0].build_args["RAILS_ENV"], "production");
        assert_eq!(props.stages.len(), 2);

        let test = &props.stages[0];
        assert_eq!(test.namespace.as_str(), "marble-test");
        assert_eq!(test.target_stack, "marble-test-service");
        assert_eq!(test.config_path, "/all/marble-test");
        let keys: Vec<&str> = test.additional_context.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["owner", "contact", "domainStackName"]);
        assert_eq!(test.permissions.len(), 1);

        let production = &props.stages[1];
        assert_eq!(production.target_stack, "marble-prod-webapp");
        assert!(production.permissions.is_empty());
    }

    #[test]
    fn test_infra_defaults_to_app_source() {
        let mut config = parsed();
        config.sources.infra = None;
        let props = config.into_pipeline_props().unwrap();
        assert_eq!(props.app_source, props.infra_source);
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        let _guards = vec![
            EnvGuard::set("DEC_NAMESPACE_PREFIX", "marble2"),
            EnvGuard::set("DEC_AWS_ACCOUNT", "210987654321"),
            EnvGuard::unset("DEC_AWS_REGION"),
        ];
        let mut config = parsed();
        config.apply_env_overrides();

        assert_eq!(config.namespace, "marble2");
        assert_eq!(config.aws.account, "210987654321");
        assert_eq!(config.aws.region, "us-east-1");
        let props = config.into_pipeline_props().unwrap();
        assert_eq!(props.stages[0].namespace.as_str(), "marble2-test");
    }

    #[test]
    #[serial]
    fn test_load_from_file_system() {
        let _guards = vec![
            EnvGuard::unset("DEC_NAMESPACE_PREFIX"),
            EnvGuard::unset("DEC_AWS_ACCOUNT"),
            EnvGuard::unset("DEC_AWS_REGION"),
        ];
        let fs = MockFileSystem::new();
        fs.add_file("pipeline.yml", YAML);

        let config = PipelineConfig::load(&fs, Path::new("/mock/pipeline.yml")).unwrap();
        assert_eq!(config.namespace, "marble");

        let missing = PipelineConfig::load(&fs, Path::new("/mock/missing.yml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_config_display() {
        let display = format!("{}", parsed());
        assert!(display.contains("Pipeline Configuration:"));
        assert!(display.contains("Stages: Test, Production"));
    }
}
