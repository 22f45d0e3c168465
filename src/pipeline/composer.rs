//! Rails application pipeline
//!
//! Lays steps out as `Source -> Build -> <deploy stages...>`. Every deploy
//! stage runs the deploy and the migration together at run-order 1, smoke
//! tests at 98 and, unless it is the last stage, a manual approval at 99.

use super::permissions::{DeployPermissionStrategy, StageMeta};
use super::ComposeError;
use crate::annotations::{Annotation, Annotations};
use crate::fs::{FileSystem, RealFileSystem};
use crate::namespace::Namespace;
use crate::output::schema::{PipelineDefinition, StageDefinition, VpcPlacement, DEFINITION_VERSION};
use crate::policy::AwsEnv;
use crate::source::{Artifact, SourceBinding};
use crate::steps::deploy::DEFAULT_INFRA_DIRECTORY;
use crate::steps::{
    tag_env_var_name, CdkDeploy, CdkDeployProps, ContainerBuild, ContainerBuildProps, ManualApproval,
    ManualApprovalProps, RailsMigration, RailsMigrationProps, SmokeTest, SmokeTestProps,
    StepBuilder, APPROVAL_RUN_ORDER, BUILD_RUN_ORDER, DEPLOY_RUN_ORDER, MIGRATE_RUN_ORDER,
    SMOKE_TEST_RUN_ORDER, SOURCE_RUN_ORDER,
};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub const SOURCE_STAGE: &str = "Source";
pub const BUILD_STAGE: &str = "Build";

/// Context keys every deploy command already sets.
const RESERVED_CONTEXT_KEYS: &[&str] = &["namespace", "env"];

#[derive(Debug, Clone)]
pub struct MigrationSettings {
    /// Name of the container build whose image runs the migration.
    pub container: String,
    pub vpc: VpcPlacement,
    pub entry_point: Option<String>,
    pub extra_env: IndexMap<String, String>,
}

pub struct DeployStageProps {
    pub stage_name: String,
    pub context_env: String,
    pub namespace: Namespace,
    pub target_stack: String,
    pub config_path: String,
    pub hostname: Option<String>,
    pub additional_context: IndexMap<String, String>,
    pub depends_on_stacks: Vec<String>,
    pub permissions: Vec<Arc<dyn DeployPermissionStrategy>>,
}

impl DeployStageProps {
    pub fn new(
        stage_name: impl Into<String>,
        context_env: impl Into<String>,
        namespace: Namespace,
        target_stack: impl Into<String>,
        config_path: impl Into<String>,
    ) -> Self {
        Self {
            stage_name: stage_name.into(),
            context_env: context_env.into(),
            namespace,
            target_stack: target_stack.into(),
            config_path: config_path.into(),
            hostname: None,
            additional_context: IndexMap::new(),
            depends_on_stacks: Vec::new(),
            permissions: Vec::new(),
        }
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
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

    pub fn with_permissions(mut self, strategy: Arc<dyn DeployPermissionStrategy>) -> Self {
        self.permissions.push(strategy);
        self
    }
}

impl fmt::Debug for DeployStageProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeployStageProps")
            .field("stage_name", &self.stage_name)
            .field("context_env", &self.context_env)
            .field("namespace", &self.namespace)
            .field("target_stack", &self.target_stack)
            .field("config_path", &self.config_path)
            .field("hostname", &self.hostname)
            .field("additional_context", &self.additional_context)
            .field("depends_on_stacks", &self.depends_on_stacks)
            .field("permissions", &self.permissions.len())
            .finish()
    }
}

#[derive(Debug)]
pub struct RailsPipelineProps {
    pub name: String,
    pub namespace: Namespace,
    pub env: AwsEnv,
    pub artifact_bucket: Option<String>,
    pub app_source: SourceBinding,
    pub infra_source: SourceBinding,
    pub containers: Vec<ContainerBuildProps>,
    pub infra_directory: String,
    pub app_build_commands: Vec<String>,
    pub post_deploy_commands: Vec<String>,
    pub migration: Option<MigrationSettings>,
    /// Newman collection, relative to the infrastructure source.
    pub smoke_test_collection: Option<String>,
    pub approval_topic_arn: Option<String>,
    pub stages: Vec<DeployStageProps>,
}

impl RailsPipelineProps {
    pub fn new(
        name: impl Into<String>,
        namespace: Namespace,
        env: AwsEnv,
        app_source: SourceBinding,
        infra_source: SourceBinding,
    ) -> Self {
        Self {
            name: name.into(),
            namespace,
            env,
            artifact_bucket: None,
            app_source,
            infra_source,
            containers: Vec::new(),
            infra_directory: DEFAULT_INFRA_DIRECTORY.to_string(),
            app_build_commands: Vec::new(),
            post_deploy_commands: Vec::new(),
            migration: None,
            smoke_test_collection: None,
            approval_topic_arn: None,
            stages: Vec::new(),
        }
    }

    pub fn with_container(mut self, container: ContainerBuildProps) -> Self {
        self.containers.push(container);
        self
    }

    pub fn with_stage(mut self, stage: DeployStageProps) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn with_migration(mut self, migration: MigrationSettings) -> Self {
        self.migration = Some(migration);
        self
    }

    pub fn with_smoke_tests(mut self, collection: impl Into<String>) -> Self {
        self.smoke_test_collection = Some(collection.into());
        self
    }

    pub fn with_approval_topic(mut self, topic_arn: impl Into<String>) -> Self {
        self.approval_topic_arn = Some(topic_arn.into());
        self
    }
}

pub struct RailsPipeline {
    props: RailsPipelineProps,
    fs: Arc<dyn FileSystem>,
    app_checkout: Option<PathBuf>,
    infra_checkout: Option<PathBuf>,
}

impl RailsPipeline {
    pub fn new(props: RailsPipelineProps) -> Self {
        Self {
            props,
            fs: Arc::new(RealFileSystem),
            app_checkout: None,
            infra_checkout: None,
        }
    }

    pub fn props(&self) -> &RailsPipelineProps {
        &self.props
    }

    pub fn with_file_system(mut self, fs: Arc<dyn FileSystem>) -> Self {
        self.fs = fs;
        self
    }

    /// Local checkout of the application, used to look for the dockerfiles
    /// and migration entry point of images built from it.
    pub fn with_app_checkout(mut self, path: impl Into<PathBuf>) -> Self {
        self.app_checkout = Some(path.into());
        self
    }

    /// Local checkout of the infrastructure code, used to look for the smoke
    /// test collection and the dockerfiles of images built from it.
    pub fn with_infra_checkout(mut self, path: impl Into<PathBuf>) -> Self {
        self.infra_checkout = Some(path.into());
        self
    }

    pub fn compose(&self) -> Result<PipelineDefinition, ComposeError> {
        let props = &self.props;
        self.validate()?;
        info!(
            pipeline = %props.name,
            stages = props.stages.len(),
            containers = props.containers.len(),
            "Composing pipeline"
        );

        let mut annotations = Annotations::new();
        let sources = self.sources()?;

        let builds: Vec<ContainerBuild> = props
            .containers
            .iter()
            .cloned()
            .map(ContainerBuild::new)
            .collect();
        for build in &builds {
            let artifact = build.source().artifact().name();
            if !sources.iter().any(|s| s.artifact().name() == artifact) {
                return Err(ComposeError::UnknownArtifact {
                    container: build.container_name().to_string(),
                    artifact: artifact.to_string(),
                });
            }
        }

        let migration = match &props.migration {
            Some(settings) => Some(self.migration(settings, &builds)?),
            None => None,
        };

        for build in &builds {
            if let Some(checkout) = self.checkout_for(build.source().artifact()) {
                annotations.extend(build.check_dockerfile(self.fs.as_ref(), checkout));
            }
        }
        if let Some(migration) = &migration {
            if let Some(checkout) = self.checkout_for(&migration.props().input) {
                annotations.extend(migration.check_entry_point(self.fs.as_ref(), checkout));
            }
        }
        if let Some(checkout) = &self.infra_checkout {
            let infra_dir = checkout.join(&props.infra_directory);
            if !self.fs.is_dir(&infra_dir) {
                annotations.add(Annotation::error(
                    "Deploy",
                    format!("Infrastructure directory not found at {}", infra_dir.display()),
                ));
            }
        }

        let mut stages = Vec::with_capacity(props.stages.len() + 2);

        let mut source_stage = StageDefinition::new(SOURCE_STAGE);
        source_stage
            .actions
            .extend(sources.iter().map(|s| s.to_action(SOURCE_RUN_ORDER)));
        stages.push(source_stage);

        if !builds.is_empty() {
            let mut build_stage = StageDefinition::new(BUILD_STAGE);
            build_stage
                .actions
                .extend(builds.iter().map(|b| b.to_action(BUILD_RUN_ORDER)));
            stages.push(build_stage);
        }

        for (index, stage_props) in props.stages.iter().enumerate() {
            let is_final = index + 1 == props.stages.len();
            stages.push(self.deploy_stage(
                stage_props,
                is_final,
                &builds,
                migration.as_ref(),
                &mut annotations,
            )?);
        }

        let definition = PipelineDefinition {
            version: DEFINITION_VERSION.to_string(),
            name: props.name.clone(),
            namespace: props.namespace.clone(),
            artifact_bucket: props
                .artifact_bucket
                .clone()
                .unwrap_or_else(|| format!("{}-artifacts", props.namespace)),
            restart_execution_on_update: true,
            stages,
            annotations: annotations.into_vec(),
        };

        info!(
            pipeline = %definition.name,
            actions = definition.actions().count(),
            deployable = definition.is_deployable(),
            "Pipeline composed"
        );
        Ok(definition)
    }

    fn deploy_stage(
        &self,
        stage_props: &DeployStageProps,
        is_final: bool,
        builds: &[ContainerBuild],
        migration: Option<&RailsMigration>,
        annotations: &mut Annotations,
    ) -> Result<StageDefinition, ComposeError> {
        let props = &self.props;
        let meta = StageMeta {
            stage_name: stage_props.stage_name.clone(),
            context_env: stage_props.context_env.clone(),
            namespace: stage_props.namespace.clone(),
            hostname: stage_props.hostname.clone(),
            is_final,
        };
        debug!(stage = %meta.stage_name, is_final, "Composing deploy stage");

        let mut deploy = CdkDeploy::new(self.deploy_props(stage_props, builds));
        let granted: Vec<_> = stage_props
            .permissions
            .iter()
            .flat_map(|strategy| strategy.statements(&deploy, &meta))
            .collect();
        for statement in granted {
            deploy.add_to_role_policy(statement);
        }

        let mut stage = StageDefinition::new(stage_props.stage_name.clone());
        stage.actions.push(deploy.to_action(DEPLOY_RUN_ORDER));

        if let Some(base) = migration {
            let stage_migration = RailsMigration::new(RailsMigrationProps {
                config_path: stage_props.config_path.clone(),
                ..base.props().clone()
            });
            stage.actions.push(stage_migration.to_action(MIGRATE_RUN_ORDER));
        }

        if let (Some(collection), Some(hostname)) =
            (&props.smoke_test_collection, &stage_props.hostname)
        {
            let smoke = SmokeTest::new(SmokeTestProps::new(
                props.infra_source.clone(),
                collection.clone(),
                hostname.clone(),
            ));
            if let Some(checkout) = &self.infra_checkout {
                annotations.extend(smoke.check_collection(self.fs.as_ref(), checkout));
            }
            stage.actions.push(smoke.to_action(SMOKE_TEST_RUN_ORDER));
        }

        if !is_final {
            let topic = props
                .approval_topic_arn
                .clone()
                .ok_or_else(|| ComposeError::MissingApprovalTopic(stage_props.stage_name.clone()))?;
            let mut approval_props = ManualApprovalProps::new(topic);
            if let Some(hostname) = &stage_props.hostname {
                approval_props = approval_props.with_review_hostname(hostname.clone());
            }
            stage
                .actions
                .push(ManualApproval::new(approval_props).to_action(APPROVAL_RUN_ORDER));
        }

        let mut seen = HashSet::new();
        for action in &stage.actions {
            if !seen.insert(action.name.as_str()) {
                return Err(ComposeError::DuplicateAction {
                    stage: stage.name.clone(),
                    action: action.name.clone(),
                });
            }
        }

        Ok(stage)
    }

    fn deploy_props(&self, stage: &DeployStageProps, builds: &[ContainerBuild]) -> CdkDeployProps {
        let props = &self.props;
        let mut deploy = CdkDeployProps::new(
            stage.target_stack.clone(),
            stage.namespace.clone(),
            stage.context_env.clone(),
            props.infra_source.clone(),
            props.env.clone(),
        )
        .with_infra_directory(props.infra_directory.clone());

        deploy.additional_context = stage.additional_context.clone();
        deploy.depends_on_stacks = stage.depends_on_stacks.clone();
        deploy.container_builds = builds.to_vec();
        deploy.post_deploy_commands = props.post_deploy_commands.clone();
        if !props.app_build_commands.is_empty() {
            deploy = deploy.with_app_source(
                props.app_source.clone(),
                props.app_build_commands.iter().cloned(),
            );
        }
        deploy
    }

    /// Migration template for the configured container. Each stage fills in
    /// its own config path.
    fn migration(
        &self,
        settings: &MigrationSettings,
        builds: &[ContainerBuild],
    ) -> Result<RailsMigration, ComposeError> {
        let build = builds
            .iter()
            .find(|b| b.container_name() == settings.container)
            .ok_or_else(|| ComposeError::UnknownContainer(settings.container.clone()))?;

        let mut props = RailsMigrationProps::for_container(build, String::new(), settings.vpc.clone());
        props.entry_point = settings.entry_point.clone();
        props.extra_env = settings.extra_env.clone();
        Ok(RailsMigration::new(props))
    }

    /// Local checkout holding `artifact`, if one was configured.
    fn checkout_for(&self, artifact: &Artifact) -> Option<&Path> {
        let app = (artifact == self.props.app_source.artifact())
            .then_some(self.app_checkout.as_deref())
            .flatten();
        let infra = (artifact == self.props.infra_source.artifact())
            .then_some(self.infra_checkout.as_deref())
            .flatten();
        app.or(infra)
    }

    /// Distinct source bindings, application first.
    fn sources(&self) -> Result<Vec<&SourceBinding>, ComposeError> {
        let app = &self.props.app_source;
        let infra = &self.props.infra_source;

        if app.artifact() != infra.artifact() {
            return Ok(vec![app, infra]);
        }
        if app == infra {
            return Ok(vec![app]);
        }
        Err(ComposeError::ConflictingSource {
            name: app.artifact().name().to_string(),
            first: format!("{}/{}@{}", app.owner(), app.repository(), app.branch()),
            second: format!("{}/{}@{}", infra.owner(), infra.repository(), infra.branch()),
        })
    }

    fn validate(&self) -> Result<(), ComposeError> {
        let props = &self.props;
        if props.stages.is_empty() {
            return Err(ComposeError::NoStages);
        }

        let mut stage_names: HashSet<&str> = [SOURCE_STAGE, BUILD_STAGE].into_iter().collect();
        for stage in &props.stages {
            if !stage_names.insert(stage.stage_name.as_str()) {
                return Err(ComposeError::DuplicateStage(stage.stage_name.clone()));
            }
        }

        let mut containers = HashSet::new();
        let mut tag_vars: HashMap<String, String> = HashMap::new();
        let mut override_owners: HashMap<String, String> = HashMap::new();
        for container in &props.containers {
            if !containers.insert(container.container_name.as_str()) {
                return Err(ComposeError::DuplicateContainer(
                    container.container_name.clone(),
                ));
            }
            let tag_var = tag_env_var_name(&container.container_name);
            if let Some(first) = tag_vars.insert(tag_var.clone(), container.container_name.clone()) {
                return Err(ComposeError::DuplicateTagVariable {
                    variable: tag_var,
                    first,
                    second: container.container_name.clone(),
                });
            }
            for key in [&container.name_override_key, &container.tag_override_key] {
                if let Some(first) =
                    override_owners.insert(key.clone(), container.container_name.clone())
                {
                    return Err(ComposeError::DuplicateOverrideKey {
                        key: key.clone(),
                        first,
                        second: container.container_name.clone(),
                    });
                }
            }
        }

        for stage in &props.stages {
            for key in stage.additional_context.keys() {
                let owner = if RESERVED_CONTEXT_KEYS.contains(&key.as_str()) {
                    Some("deploy command".to_string())
                } else {
                    override_owners.get(key).cloned()
                };
                if let Some(first) = owner {
                    return Err(ComposeError::DuplicateOverrideKey {
                        key: key.clone(),
                        first,
                        second: stage.stage_name.clone(),
                    });
                }
            }
        }

        if props.stages.len() > 1 && props.approval_topic_arn.is_none() {
            return Err(ComposeError::MissingApprovalTopic(
                props.stages[0].stage_name.clone(),
            ));
        }

        Ok(())
    }
}
