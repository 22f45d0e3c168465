//! Conditional container image build
//!
//! The image for a container is tagged `<containerName>-<commitId>`. Before
//! building, the step asks the registry whether that tag already exists and
//! skips the build and push when it does, so re-running a pipeline for the
//! same commit never rebuilds an image.

use super::{
    dockerhub_login, dockerhub_secret_statement, ecr_login, tag_env_var_name,
    with_dockerhub_credentials, StepBuilder,
};
use crate::annotations::Annotation;
use crate::deferred::Deferred;
use crate::fs::FileSystem;
use crate::output::buildspec::{BuildSpec, PhaseName};
use crate::output::schema::{
    ActionConfiguration, ActionDefinition, ActionKind, BuildConfiguration, BuildProject,
};
use crate::policy::{global, AwsEnv, GlobalAction, PolicyStatement};
use crate::source::SourceBinding;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";
pub const DEFAULT_NAME_OVERRIDE_KEY: &str = "ecrName";
pub const DEFAULT_TAG_OVERRIDE_KEY: &str = "ecrTag";

const PUSH_PULL_ACTIONS: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:BatchGetImage",
    "ecr:CompleteLayerUpload",
    "ecr:DescribeImages",
    "ecr:GetDownloadUrlForLayer",
    "ecr:InitiateLayerUpload",
    "ecr:PutImage",
    "ecr:UploadLayerPart",
];

/// Registry repository images are pushed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EcrRepository {
    pub name: String,
}

impl EcrRepository {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn uri(&self, env: &AwsEnv) -> String {
        format!("{}/{}", env.registry_host(), self.name)
    }

    pub fn arn(&self, env: &AwsEnv) -> String {
        env.repository_arn(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct ContainerBuildProps {
    pub source: SourceBinding,
    pub repository: EcrRepository,
    pub container_name: String,
    pub dockerfile: String,
    /// Directory inside the source the image is built from.
    pub context_dir: String,
    pub build_args: IndexMap<String, String>,
    pub name_override_key: String,
    pub tag_override_key: String,
    pub env: AwsEnv,
}

impl ContainerBuildProps {
    pub fn new(
        source: SourceBinding,
        repository: EcrRepository,
        container_name: impl Into<String>,
        env: AwsEnv,
    ) -> Self {
        Self {
            source,
            repository,
            container_name: container_name.into(),
            dockerfile: DEFAULT_DOCKERFILE.to_string(),
            context_dir: ".".to_string(),
            build_args: IndexMap::new(),
            name_override_key: DEFAULT_NAME_OVERRIDE_KEY.to_string(),
            tag_override_key: DEFAULT_TAG_OVERRIDE_KEY.to_string(),
            env,
        }
    }

    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    pub fn with_context_dir(mut self, dir: impl Into<String>) -> Self {
        self.context_dir = dir.into();
        self
    }

    pub fn with_build_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.build_args.insert(key.into(), value.into());
        self
    }

    pub fn with_override_keys(
        mut self,
        name_key: impl Into<String>,
        tag_key: impl Into<String>,
    ) -> Self {
        self.name_override_key = name_key.into();
        self.tag_override_key = tag_key.into();
        self
    }
}

#[derive(Debug, Clone)]
pub struct ContainerBuild {
    props: ContainerBuildProps,
    name: String,
}

impl ContainerBuild {
    pub fn new(props: ContainerBuildProps) -> Self {
        let name = format!("{}-build", props.container_name);
        debug!(container = %props.container_name, repository = %props.repository.name, "container build");
        Self { props, name }
    }

    pub fn props(&self) -> &ContainerBuildProps {
        &self.props
    }

    pub fn container_name(&self) -> &str {
        &self.props.container_name
    }

    pub fn repository(&self) -> &EcrRepository {
        &self.props.repository
    }

    pub fn source(&self) -> &SourceBinding {
        &self.props.source
    }

    /// `<containerName>-<commitId>`, known once the source step has run.
    pub fn image_tag(&self) -> Deferred {
        self.props
            .source
            .commit_id()
            .prefixed(format!("{}-", self.props.container_name))
    }

    /// The environment variable deploy steps read the tag from, with the
    /// deferred value it must be bound to.
    pub fn tag_env_var(&self) -> (String, Deferred) {
        (tag_env_var_name(&self.props.container_name), self.image_tag())
    }

    /// Context overrides for deploy steps, name first then tag.
    pub fn context_overrides(&self) -> Vec<(String, String)> {
        vec![
            (
                self.props.name_override_key.clone(),
                self.props.repository.name.clone(),
            ),
            (
                self.props.tag_override_key.clone(),
                format!("${}", tag_env_var_name(&self.props.container_name)),
            ),
        ]
    }

    fn image_ref(&self) -> String {
        format!("{}:$IMAGE_TAG", self.props.repository.uri(&self.props.env))
    }

    pub fn build_spec(&self) -> BuildSpec {
        let props = &self.props;
        let skip_unless_missing = |command: String| {
            format!("if [ \"$IMAGE_EXISTS\" = \"false\" ]; then {}; fi", command)
        };

        let mut docker_build = format!("docker build -f {}", props.dockerfile);
        for (key, value) in &props.build_args {
            docker_build.push_str(&format!(" --build-arg {}={}", key, value));
        }
        docker_build.push_str(&format!(" -t {} {}", self.image_ref(), props.context_dir));

        let mut spec = with_dockerhub_credentials(BuildSpec::new())
            .command(
                PhaseName::PreBuild,
                format!(
                    "export IMAGE_TAG={}-$CODEBUILD_RESOLVED_SOURCE_VERSION",
                    props.container_name
                ),
            )
            .command(PhaseName::PreBuild, ecr_login(&props.env))
            .command(
                PhaseName::PreBuild,
                format!(
                    "if aws ecr describe-images --repository-name {} --image-ids imageTag=$IMAGE_TAG > /dev/null 2>&1; then export IMAGE_EXISTS=true; else export IMAGE_EXISTS=false; fi",
                    props.repository.name
                ),
            )
            .command(PhaseName::PreBuild, skip_unless_missing(dockerhub_login()))
            .command(
                PhaseName::Build,
                format!(
                    "if [ \"$IMAGE_EXISTS\" = \"false\" ]; then {}; else echo \"Image $IMAGE_TAG already exists, skipping build\"; fi",
                    docker_build
                ),
            )
            .command(
                PhaseName::PostBuild,
                skip_unless_missing(format!("docker push {}", self.image_ref())),
            );
        spec.env.exported_variables.push("IMAGE_TAG".to_string());
        spec
    }

    pub fn policy(&self) -> Vec<PolicyStatement> {
        let env = &self.props.env;
        vec![
            PolicyStatement::allow(
                PUSH_PULL_ACTIONS.iter().copied(),
                [self.props.repository.arn(env)],
            ),
            dockerhub_secret_statement(env),
            global::statement(&[GlobalAction::EcrAuth]),
        ]
    }

    /// Error annotation when a checkout is available and the dockerfile is
    /// not in it.
    pub fn check_dockerfile(&self, fs: &dyn FileSystem, checkout: &Path) -> Option<Annotation> {
        let context = match self.props.context_dir.as_str() {
            "." | "" => checkout.to_path_buf(),
            dir => checkout.join(dir),
        };
        let path = context.join(&self.props.dockerfile);
        if fs.is_file(&path) {
            return None;
        }
        Some(Annotation::error(
            self.name.clone(),
            format!("Dockerfile not found at {}", path.display()),
        ))
    }
}

impl StepBuilder for ContainerBuild {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::ContainerBuild
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        let source = self.props.source.artifact().name().to_string();
        ActionDefinition {
            name: self.name.clone(),
            kind: ActionKind::ContainerBuild,
            run_order,
            input_artifacts: vec![source.clone()],
            output_artifacts: vec![],
            variables_namespace: Some(self.name.clone()),
            configuration: ActionConfiguration::CodeBuild(BuildConfiguration {
                project: BuildProject::new(self.name.clone(), self.build_spec()).privileged(),
                environment_variables: IndexMap::new(),
                primary_source: Some(source),
                deploy_target: None,
            }),
            policy: self.policy(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deferred::ExecutionVariables;
    use crate::fs::MockFileSystem;
    use crate::source::OAuthTokenRef;

    fn env() -> AwsEnv {
        AwsEnv::new("123456789012", "us-east-1")
    }

    fn rails() -> ContainerBuild {
        let source = SourceBinding::github(
            "AppCode",
            "ndlib",
            "marble-app",
            "main",
            OAuthTokenRef::new("/all/github/ndlib-git"),
        );
        ContainerBuild::new(
            ContainerBuildProps::new(source, EcrRepository::new("marble-rails"), "rails", env())
                .with_build_arg("RAILS_ENV", "production"),
        )
    }

    #[test]
    fn test_image_tag_resolves_to_container_and_commit() {
        let build = rails();
        let vars = ExecutionVariables::new().with("AppCode", "CommitId", "abc123");
        assert_eq!(build.image_tag().resolve(&vars).unwrap(), "rails-abc123");
        assert_eq!(build.image_tag().placeholder(), "rails-#{AppCode.CommitId}");
    }

    #[test]
    fn test_image_tag_stable_across_compositions() {
        assert_eq!(rails().image_tag(), rails().image_tag());
    }

    #[test]
    fn test_context_overrides() {
        assert_eq!(
            rails().context_overrides(),
            vec![
                ("ecrName".to_string(), "marble-rails".to_string()),
                ("ecrTag".to_string(), "$RAILS_ECR_TAG".to_string()),
            ]
        );
        let (name, value) = rails().tag_env_var();
        assert_eq!(name, "RAILS_ECR_TAG");
        assert_eq!(value, rails().image_tag());
    }

    #[test]
    fn test_existence_check_precedes_build_and_push() {
        let spec = rails().build_spec();
        let check = spec
            .position(|c| c.starts_with("if aws ecr describe-images --repository-name marble-rails"))
            .unwrap();
        let build = spec.position(|c| c.contains("docker build")).unwrap();
        let push = spec.position(|c| c.contains("docker push")).unwrap();
        assert!(check < build && build < push);

        let build_command = &spec.phase_commands(PhaseName::Build)[0];
        assert!(build_command.starts_with("if [ \"$IMAGE_EXISTS\" = \"false\" ]"));
        assert!(build_command.contains("--build-arg RAILS_ENV=production"));
        assert!(build_command
            .contains("-t 123456789012.dkr.ecr.us-east-1.amazonaws.com/marble-rails:$IMAGE_TAG ."));
        assert!(spec.phase_commands(PhaseName::PostBuild)[0].contains("IMAGE_EXISTS"));
        assert_eq!(spec.env.exported_variables, vec!["IMAGE_TAG"]);
    }

    #[test]
    fn test_tag_computed_from_resolved_source_version() {
        let spec = rails().build_spec();
        assert_eq!(
            spec.phase_commands(PhaseName::PreBuild)[0],
            "export IMAGE_TAG=rails-$CODEBUILD_RESOLVED_SOURCE_VERSION"
        );
    }

    #[test]
    fn test_action() {
        let action = rails().to_action(1);
        assert_eq!(action.name, "rails-build");
        assert_eq!(action.input_artifacts, vec!["AppCode"]);
        let build = action.build().unwrap();
        assert!(build.project.privileged);
        assert!(action.policy.iter().any(|s| s.is_global()
            && s.has_action("ecr:GetAuthorizationToken")));
        assert!(action
            .policy
            .iter()
            .filter(|s| !s.is_global())
            .all(|s| !s.is_wildcard()));
    }

    #[test]
    fn test_missing_dockerfile_is_blocking_annotation() {
        let fs = MockFileSystem::new();
        let annotation = rails()
            .check_dockerfile(&fs, Path::new("/mock"))
            .unwrap();
        assert!(annotation.is_blocking());
        assert_eq!(annotation.target, "rails-build");

        fs.add_file("Dockerfile", "FROM ruby:3.2");
        assert!(rails().check_dockerfile(&fs, Path::new("/mock")).is_none());
    }
}
