//! Infrastructure deploy step
//!
//! Runs the infrastructure tool against exactly one stack. The deploy command
//! shape is a compatibility contract with the tool:
//!
//! ```text
//! npm run cdk deploy -- <stack> --require-approval never --exclusively \
//!     -c "namespace=<ns>" -c "env=<env>" [-c "<key>=<value>" ...]
//! ```
//!
//! `--exclusively` keeps the tool from deploying stacks the target depends
//! on. Those stacks only show up in the step's permissions.
//!
//! Build-spec commands are plain text and the build runner only changes
//! directory when told to, so every phase that runs tool or application
//! commands starts with an explicit `cd`.

use super::{
    dockerhub_login, dockerhub_secret_statement, with_dockerhub_credentials, ContainerBuild,
    StepBuilder,
};
use crate::namespace::Namespace;
use crate::output::buildspec::{ArtifactFiles, BuildSpec, PhaseName};
use crate::output::schema::{
    ActionConfiguration, ActionDefinition, ActionKind, BuildConfiguration, BuildProject,
    DeployTarget, EnvironmentVariable,
};
use crate::policy::{global, AwsEnv, GlobalAction, PolicyStatement};
use crate::source::{Artifact, SourceBinding};
use indexmap::IndexMap;
use tracing::debug;

pub const DEFAULT_INFRA_DIRECTORY: &str = "deploy/cdk";
pub const BOOTSTRAP_STACK: &str = "CDKToolkit";
pub const STAGING_BUCKET_PATTERN: &str = "arn:aws:s3:::cdktoolkit-stagingbucket-*";
pub const NODE_RUNTIME_VERSION: &str = "18.x";

const CHANGE_SET_ACTIONS: &[&str] = &[
    "cloudformation:CreateChangeSet",
    "cloudformation:DeleteChangeSet",
    "cloudformation:DescribeChangeSet",
    "cloudformation:DescribeStackEvents",
    "cloudformation:DescribeStacks",
    "cloudformation:ExecuteChangeSet",
    "cloudformation:GetTemplate",
];

#[derive(Debug, Clone)]
pub struct DeployOutput {
    pub artifact: Artifact,
    pub files: Vec<String>,
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CdkDeployProps {
    pub action_name: String,
    pub target_stack: String,
    pub namespace: Namespace,
    pub context_env: String,
    pub additional_context: IndexMap<String, String>,
    /// Stacks the target reads from. Permissions only, never deployed.
    pub depends_on_stacks: Vec<String>,
    pub container_builds: Vec<ContainerBuild>,
    pub infra_source: SourceBinding,
    pub app_source: Option<SourceBinding>,
    pub infra_directory: String,
    pub app_build_commands: Vec<String>,
    pub post_deploy_commands: Vec<String>,
    pub output: Option<DeployOutput>,
    pub environment_variables: IndexMap<String, EnvironmentVariable>,
    pub env: AwsEnv,
}

impl CdkDeployProps {
    pub fn new(
        target_stack: impl Into<String>,
        namespace: Namespace,
        context_env: impl Into<String>,
        infra_source: SourceBinding,
        env: AwsEnv,
    ) -> Self {
        Self {
            action_name: "Deploy".to_string(),
            target_stack: target_stack.into(),
            namespace,
            context_env: context_env.into(),
            additional_context: IndexMap::new(),
            depends_on_stacks: Vec::new(),
            container_builds: Vec::new(),
            infra_source,
            app_source: None,
            infra_directory: DEFAULT_INFRA_DIRECTORY.to_string(),
            app_build_commands: Vec::new(),
            post_deploy_commands: Vec::new(),
            output: None,
            environment_variables: IndexMap::new(),
            env,
        }
    }

    pub fn with_action_name(mut self, name: impl Into<String>) -> Self {
        self.action_name = name.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_context.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, stack: impl Into<String>) -> Self {
        self.depends_on_stacks.push(stack.into());
        self
    }

    pub fn with_container_build(mut self, build: ContainerBuild) -> Self {
        self.container_builds.push(build);
        self
    }

    pub fn with_infra_directory(mut self, dir: impl Into<String>) -> Self {
        self.infra_directory = dir.into();
        self
    }

    pub fn with_app_source<I>(mut self, source: SourceBinding, commands: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.app_source = Some(source);
        self.app_build_commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn with_post_deploy(mut self, command: impl Into<String>) -> Self {
        self.post_deploy_commands.push(command.into());
        self
    }

    pub fn with_output(mut self, output: DeployOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_env_var(mut self, name: impl Into<String>, value: EnvironmentVariable) -> Self {
        self.environment_variables.insert(name.into(), value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct CdkDeploy {
    props: CdkDeployProps,
    extra_policy: Vec<PolicyStatement>,
}

impl CdkDeploy {
    pub fn new(props: CdkDeployProps) -> Self {
        debug!(stack = %props.target_stack, env = %props.context_env, "cdk deploy");
        Self {
            props,
            extra_policy: Vec::new(),
        }
    }

    pub fn props(&self) -> &CdkDeployProps {
        &self.props
    }

    pub fn target_stack(&self) -> &str {
        &self.props.target_stack
    }

    pub fn namespace(&self) -> &Namespace {
        &self.props.namespace
    }

    /// Grants additional statements to the deploy role.
    pub fn add_to_role_policy(&mut self, statement: PolicyStatement) {
        self.extra_policy.push(statement);
    }

    /// All `-c` overrides after `namespace` and `env`, in insertion order:
    /// additional context first, then each container build's overrides.
    pub fn context_overrides(&self) -> IndexMap<String, String> {
        let mut overrides = self.props.additional_context.clone();
        for build in &self.props.container_builds {
            for (key, value) in build.context_overrides() {
                overrides.insert(key, value);
            }
        }
        overrides
    }

    pub fn deploy_command(&self) -> String {
        let mut command = format!(
            "npm run cdk deploy -- {} --require-approval never --exclusively -c \"namespace={}\" -c \"env={}\"",
            self.props.target_stack, self.props.namespace, self.props.context_env
        );
        for (key, value) in self.context_overrides() {
            command.push_str(&format!(" -c \"{}={}\"", key, value));
        }
        command
    }

    fn infra_dir(&self) -> String {
        format!("$CODEBUILD_SRC_DIR/{}", self.props.infra_directory)
    }

    /// Secondary sources get their own directory variable. An application
    /// sharing the infrastructure artifact is checked out at the primary root.
    fn app_dir(&self) -> String {
        match &self.props.app_source {
            Some(source) if source.artifact() != self.props.infra_source.artifact() => {
                source.artifact().secondary_src_dir()
            }
            _ => "$CODEBUILD_SRC_DIR".to_string(),
        }
    }

    pub fn build_spec(&self) -> BuildSpec {
        let props = &self.props;
        let mut spec = with_dockerhub_credentials(BuildSpec::new())
            .runtime(PhaseName::Install, "nodejs", NODE_RUNTIME_VERSION)
            .command(PhaseName::Install, format!("cd {}", self.infra_dir()))
            .command(PhaseName::Install, "npm install")
            .command(PhaseName::PreBuild, dockerhub_login());

        if !props.app_build_commands.is_empty() {
            spec = spec
                .command(PhaseName::PreBuild, format!("cd {}", self.app_dir()))
                .commands(PhaseName::PreBuild, props.app_build_commands.iter().cloned());
        }

        spec = spec
            .command(PhaseName::Build, format!("cd {}", self.infra_dir()))
            .command(PhaseName::Build, self.deploy_command());

        if !props.post_deploy_commands.is_empty() {
            spec = spec.commands(PhaseName::PostBuild, props.post_deploy_commands.iter().cloned());
        }

        if let Some(output) = &props.output {
            spec.artifacts = Some(ArtifactFiles {
                files: output.files.clone(),
                base_directory: output.base_directory.clone(),
            });
        }
        spec
    }

    /// Environment variables of the action. Container tags are bound here to
    /// their deferred values, the build-spec only references the names.
    pub fn environment_variables(&self) -> IndexMap<String, EnvironmentVariable> {
        let mut vars = IndexMap::new();
        for build in &self.props.container_builds {
            let (name, tag) = build.tag_env_var();
            vars.insert(name, EnvironmentVariable::plaintext(tag.placeholder()));
        }
        for (name, value) in &self.props.environment_variables {
            vars.insert(name.clone(), value.clone());
        }
        vars
    }

    pub fn policy(&self) -> Vec<PolicyStatement> {
        let props = &self.props;
        let env = &props.env;

        let stacks = std::iter::once(&props.target_stack)
            .chain(props.depends_on_stacks.iter())
            .map(|stack| env.stack_arn(stack));

        let mut statements = vec![
            PolicyStatement::allow(CHANGE_SET_ACTIONS.iter().copied(), stacks),
            PolicyStatement::allow(
                ["cloudformation:DescribeStacks"],
                [env.stack_arn(BOOTSTRAP_STACK)],
            ),
            PolicyStatement::allow(
                [
                    "s3:GetBucketLocation",
                    "s3:GetObject",
                    "s3:ListBucket",
                    "s3:PutObject",
                ],
                [
                    STAGING_BUCKET_PATTERN.to_string(),
                    format!("{}/*", STAGING_BUCKET_PATTERN),
                ],
            ),
            global::statement(&[GlobalAction::Logs]),
            PolicyStatement::allow(
                [
                    "ssm:GetParameter",
                    "ssm:GetParameters",
                    "ssm:GetParametersByPath",
                ],
                [
                    env.parameter_arn(&format!("/all/{}/*", props.namespace)),
                    env.parameter_arn(&format!("/all/stacks/{}/*", props.target_stack)),
                ],
            ),
            dockerhub_secret_statement(env),
        ];
        statements.extend(self.extra_policy.iter().cloned());
        statements
    }
}

impl StepBuilder for CdkDeploy {
    fn name(&self) -> &str {
        &self.props.action_name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Deploy
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        let props = &self.props;
        let primary = props.infra_source.artifact().name().to_string();
        let mut inputs = vec![primary.clone()];
        if let Some(app) = &props.app_source {
            if app.artifact().name() != primary {
                inputs.push(app.artifact().name().to_string());
            }
        }

        ActionDefinition {
            name: props.action_name.clone(),
            kind: ActionKind::Deploy,
            run_order,
            input_artifacts: inputs,
            output_artifacts: props
                .output
                .iter()
                .map(|output| output.artifact.name().to_string())
                .collect(),
            variables_namespace: None,
            configuration: ActionConfiguration::CodeBuild(BuildConfiguration {
                project: BuildProject::new(
                    format!("{}-deploy", props.target_stack),
                    self.build_spec(),
                )
                .privileged(),
                environment_variables: self.environment_variables(),
                primary_source: Some(primary),
                deploy_target: Some(DeployTarget {
                    stack: props.target_stack.clone(),
                    depends_on: props.depends_on_stacks.clone(),
                }),
            }),
            policy: self.policy(),
        }
    }
}
