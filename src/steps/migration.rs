//! One-shot database migration
//!
//! Runs a previously built application image once, inside the database's
//! network, with connection settings read from the parameter store.
//!
//! The step is placed at the same run-order as the deploy step, so both run
//! at the same time. This is only safe when the application reports itself
//! unhealthy until its schema is migrated, which keeps the new tasks out of
//! service until the migration finishes. Nothing here can verify that: the
//! application containers must honor it.

use super::{ecr_login, ContainerBuild, StepBuilder};
use crate::annotations::Annotation;
use crate::deferred::Deferred;
use crate::fs::FileSystem;
use crate::output::buildspec::{BuildSpec, PhaseName};
use crate::output::schema::{
    ActionConfiguration, ActionDefinition, ActionKind, BuildConfiguration, BuildProject,
    EnvironmentVariable, VpcPlacement,
};
use crate::policy::{global, AwsEnv, GlobalAction, PolicyStatement};
use crate::source::Artifact;
use crate::steps::EcrRepository;
use indexmap::IndexMap;
use std::path::Path;

pub const DEFAULT_ENTRY_POINT: &str = "./docker/migrate.sh";
pub const DEFAULT_RAILS_ENV: &str = "production";

const PULL_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:DescribeImages",
    "ecr:GetDownloadUrlForLayer",
];

/// Where a container variable's value comes from.
enum Source {
    Plain(String),
    Parameter(&'static str),
}

#[derive(Debug, Clone)]
pub struct RailsMigrationProps {
    pub action_name: String,
    pub repository: EcrRepository,
    pub image_tag: Deferred,
    pub input: Artifact,
    /// Parameter store path holding `database/*` and `secrets/*`.
    pub config_path: String,
    pub vpc: VpcPlacement,
    pub rails_env: String,
    pub extra_env: IndexMap<String, String>,
    pub entry_point: Option<String>,
    pub env: AwsEnv,
}

impl RailsMigrationProps {
    /// Migration for the image produced by `build`.
    pub fn for_container(
        build: &ContainerBuild,
        config_path: impl Into<String>,
        vpc: VpcPlacement,
    ) -> Self {
        Self {
            action_name: "Migrate".to_string(),
            repository: build.repository().clone(),
            image_tag: build.image_tag(),
            input: build.source().artifact().clone(),
            config_path: config_path.into(),
            vpc,
            rails_env: DEFAULT_RAILS_ENV.to_string(),
            extra_env: IndexMap::new(),
            entry_point: None,
            env: build.props().env.clone(),
        }
    }

    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = Some(entry_point.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct RailsMigration {
    props: RailsMigrationProps,
}

impl RailsMigration {
    pub fn new(props: RailsMigrationProps) -> Self {
        Self { props }
    }

    pub fn props(&self) -> &RailsMigrationProps {
        &self.props
    }

    pub fn entry_point(&self) -> &str {
        self.props
            .entry_point
            .as_deref()
            .unwrap_or(DEFAULT_ENTRY_POINT)
    }

    fn config_path(&self) -> &str {
        self.props.config_path.trim_end_matches('/')
    }

    fn container_env(&self) -> Vec<(&'static str, Source)> {
        vec![
            ("RAILS_ENV", Source::Plain(self.props.rails_env.clone())),
            ("DB_HOST", Source::Parameter("database/host")),
            ("DB_PORT", Source::Parameter("database/port")),
            ("DB_NAME", Source::Parameter("database/database")),
            ("DB_USERNAME", Source::Parameter("database/username")),
            ("DB_PASSWORD", Source::Parameter("database/password")),
            ("SECRET_KEY_BASE", Source::Parameter("secrets/secret_key_base")),
            ("RAILS_LOG_TO_STDOUT", Source::Plain("true".to_string())),
        ]
    }

    /// Names passed into the container, in the order they are passed.
    pub fn container_env_names(&self) -> Vec<String> {
        self.container_env()
            .into_iter()
            .map(|(name, _)| name.to_string())
            .chain(self.props.extra_env.keys().cloned())
            .collect()
    }

    pub fn build_spec(&self) -> BuildSpec {
        let mut spec = BuildSpec::new();
        for (name, source) in self.container_env() {
            match source {
                Source::Plain(value) => {
                    spec.env.variables.insert(name.to_string(), value);
                }
                Source::Parameter(suffix) => {
                    spec.env.parameter_store.insert(
                        name.to_string(),
                        format!("{}/{}", self.config_path(), suffix),
                    );
                }
            }
        }
        for (key, value) in &self.props.extra_env {
            spec.env.variables.insert(key.clone(), value.clone());
        }

        let flags: Vec<String> = self
            .container_env_names()
            .iter()
            .map(|name| format!("-e {}", name))
            .collect();
        let run = format!(
            "docker run --rm {} {}:$IMAGE_TAG {}",
            flags.join(" "),
            self.props.repository.uri(&self.props.env),
            self.entry_point()
        );

        spec.command(PhaseName::PreBuild, ecr_login(&self.props.env))
            .command(PhaseName::Build, run)
    }

    pub fn policy(&self) -> Vec<PolicyStatement> {
        let env = &self.props.env;
        vec![
            PolicyStatement::allow(
                ["ssm:GetParameter", "ssm:GetParameters"],
                [env.parameter_arn(&format!("{}/*", self.config_path()))],
            ),
            PolicyStatement::allow(
                PULL_ACTIONS.iter().copied(),
                [self.props.repository.arn(env)],
            ),
            global::statement(&[GlobalAction::EcrAuth, GlobalAction::VpcNetworkInterfaces]),
        ]
    }

    /// Warns when a checkout is available and a relative entry point script
    /// is not in it. Images can ship scripts a checkout lacks, so this never
    /// blocks.
    pub fn check_entry_point(&self, fs: &dyn FileSystem, checkout: &Path) -> Option<Annotation> {
        let script = self.entry_point().split_whitespace().next()?;
        let relative = script.strip_prefix("./")?;
        let path = checkout.join(relative);
        if fs.is_file(&path) {
            return None;
        }
        Some(Annotation::warning(
            self.props.action_name.clone(),
            format!("Migration entry point not found at {}", path.display()),
        ))
    }
}

impl StepBuilder for RailsMigration {
    fn name(&self) -> &str {
        &self.props.action_name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Migrate
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        let props = &self.props;
        let mut vars = IndexMap::new();
        vars.insert(
            "IMAGE_TAG".to_string(),
            EnvironmentVariable::plaintext(props.image_tag.placeholder()),
        );

        ActionDefinition {
            name: props.action_name.clone(),
            kind: ActionKind::Migrate,
            run_order,
            input_artifacts: vec![props.input.name().to_string()],
            output_artifacts: vec![],
            variables_namespace: None,
            configuration: ActionConfiguration::CodeBuild(BuildConfiguration {
                project: BuildProject::new(
                    format!("{}-migrate", props.repository.name),
                    self.build_spec(),
                )
                .privileged()
                .with_vpc(props.vpc.clone()),
                environment_variables: vars,
                primary_source: Some(props.input.name().to_string()),
                deploy_target: None,
            }),
            policy: self.policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::source::{OAuthTokenRef, SourceBinding};
    use crate::steps::ContainerBuildProps;

    fn migration() -> RailsMigration {
        let source = SourceBinding::github(
            "AppCode",
            "ndlib",
            "marble-app",
            "main",
            OAuthTokenRef::new("/all/github/ndlib-git"),
        );
        let build = ContainerBuild::new(ContainerBuildProps::new(
            source,
            EcrRepository::new("marble-rails"),
            "rails",
            AwsEnv::new("123456789012", "us-east-1"),
        ));
        let vpc = VpcPlacement {
            vpc_id: "vpc-1".to_string(),
            subnet_ids: vec![],
            security_group_ids: vec!["sg-db".to_string()],
        };
        RailsMigration::new(RailsMigrationProps::for_container(&build, "/all/app-test/", vpc))
    }

    #[test]
    fn test_env_from_config_path() {
        let spec = migration().build_spec();
        let store = &spec.env.parameter_store;
        assert_eq!(store["DB_HOST"], "/all/app-test/database/host");
        assert_eq!(store["DB_NAME"], "/all/app-test/database/database");
        assert_eq!(store["SECRET_KEY_BASE"], "/all/app-test/secrets/secret_key_base");
        assert_eq!(spec.env.variables["RAILS_ENV"], "production");
    }

    #[test]
    fn test_run_command() {
        let spec = migration().build_spec();
        let run = &spec.phase_commands(PhaseName::Build)[0];
        assert!(run.starts_with("docker run --rm -e RAILS_ENV -e DB_HOST"));
        assert!(run.ends_with(
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/marble-rails:$IMAGE_TAG ./docker/migrate.sh"
        ));
        assert!(spec.phase_commands(PhaseName::PreBuild)[0].starts_with("aws ecr get-login-password"));
    }

    #[test]
    fn test_custom_entry_point_and_env() {
        let props = migration()
            .props()
            .clone()
            .with_entry_point("bin/rails db:migrate")
            .with_env("SOLR_URL", "http://solr");
        let migration = RailsMigration::new(props);
        assert_eq!(migration.container_env_names().last().unwrap(), "SOLR_URL");
        assert!(migration.build_spec().phase_commands(PhaseName::Build)[0]
            .ends_with(":$IMAGE_TAG bin/rails db:migrate"));
    }

    #[test]
    fn test_action_runs_in_vpc_with_deferred_tag() {
        let action = migration().to_action(1);
        let build = action.build().unwrap();
        assert_eq!(build.project.vpc.as_ref().unwrap().security_group_ids, vec!["sg-db"]);
        assert_eq!(
            build.environment_variables["IMAGE_TAG"].value,
            "rails-#{AppCode.CommitId}"
        );
    }

    #[test]
    fn test_policy_scoped_to_config_path() {
        let policy = migration().policy();
        assert_eq!(
            policy[0].resources,
            vec!["arn:aws:ssm:us-east-1:123456789012:parameter/all/app-test/*"]
        );
        assert!(policy[2].is_global());
        assert!(policy[2].has_action("ecr:GetAuthorizationToken"));
        assert!(policy[2].has_action("ec2:CreateNetworkInterface"));
    }

    #[test]
    fn test_entry_point_check() {
        let fs = MockFileSystem::new();
        let annotation = migration()
            .check_entry_point(&fs, Path::new("/mock"))
            .unwrap();
        assert!(!annotation.is_blocking());

        fs.add_file("docker/migrate.sh", "#!/bin/sh");
        assert!(migration()
            .check_entry_point(&fs, Path::new("/mock"))
            .is_none());
    }
}
