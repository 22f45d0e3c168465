//! Pipeline definition data structures
//!
//! This module defines the document a composition produces: the ordered
//! stages of a pipeline, the actions inside each stage with their run-orders,
//! the build projects behind build actions, and the permission statements
//! each action's role needs. It is handed to the provider as-is; nothing in
//! this crate executes it.

use crate::annotations::Annotation;
use crate::namespace::Namespace;
use crate::output::buildspec::BuildSpec;
use crate::policy::{PolicyDocument, PolicyStatement};
use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

pub const DEFINITION_VERSION: &str = "1.0";
pub const DEFAULT_BUILD_IMAGE: &str = "aws/codebuild/standard:7.0";
pub const DEFAULT_COMPUTE_TYPE: &str = "BUILD_GENERAL1_SMALL";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Source,
    ContainerBuild,
    Deploy,
    Migrate,
    SmokeTest,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvVarType {
    Plaintext,
    ParameterStore,
    SecretsManager,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentVariable {
    #[serde(rename = "type")]
    pub kind: EnvVarType,
    pub value: String,
}

impl EnvironmentVariable {
    pub fn plaintext(value: impl Into<String>) -> Self {
        Self {
            kind: EnvVarType::Plaintext,
            value: value.into(),
        }
    }

    pub fn parameter(path: impl Into<String>) -> Self {
        Self {
            kind: EnvVarType::ParameterStore,
            value: path.into(),
        }
    }

    pub fn secret(reference: impl Into<String>) -> Self {
        Self {
            kind: EnvVarType::SecretsManager,
            value: reference.into(),
        }
    }
}

/// Network placement for steps that must reach private resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VpcPlacement {
    pub vpc_id: String,
    #[serde(default)]
    pub subnet_ids: Vec<String>,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildProject {
    pub name: String,
    pub image: String,
    pub compute_type: String,
    pub privileged: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vpc: Option<VpcPlacement>,
    pub build_spec: BuildSpec,
}

impl BuildProject {
    pub fn new(name: impl Into<String>, build_spec: BuildSpec) -> Self {
        Self {
            name: name.into(),
            image: DEFAULT_BUILD_IMAGE.to_string(),
            compute_type: DEFAULT_COMPUTE_TYPE.to_string(),
            privileged: false,
            vpc: None,
            build_spec,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.privileged = true;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = image.into();
        self
    }

    pub fn with_vpc(mut self, vpc: VpcPlacement) -> Self {
        self.vpc = Some(vpc);
        self
    }
}

/// The stack a deploy action targets, and the stacks it may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployTarget {
    pub stack: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceConfiguration {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub oauth_token: String,
    pub trigger: crate::source::SourceTrigger,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildConfiguration {
    pub project: BuildProject,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub environment_variables: IndexMap<String, EnvironmentVariable>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub primary_source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploy_target: Option<DeployTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApprovalConfiguration {
    pub notification_arn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_entity_link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "provider")]
pub enum ActionConfiguration {
    GitHub(SourceConfiguration),
    CodeBuild(BuildConfiguration),
    Manual(ApprovalConfiguration),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionDefinition {
    pub name: String,
    pub kind: ActionKind,
    pub run_order: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub output_artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_namespace: Option<String>,
    pub configuration: ActionConfiguration,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<PolicyStatement>,
}

impl ActionDefinition {
    pub fn build(&self) -> Option<&BuildConfiguration> {
        match &self.configuration {
            ActionConfiguration::CodeBuild(build) => Some(build),
            _ => None,
        }
    }

    pub fn build_spec(&self) -> Option<&BuildSpec> {
        self.build().map(|build| &build.project.build_spec)
    }

    pub fn approval(&self) -> Option<&ApprovalConfiguration> {
        match &self.configuration {
            ActionConfiguration::Manual(approval) => Some(approval),
            _ => None,
        }
    }

    pub fn policy_document(&self) -> PolicyDocument {
        PolicyDocument::new(self.policy.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageDefinition {
    pub name: String,
    pub actions: Vec<ActionDefinition>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            actions: Vec::new(),
        }
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions.iter().find(|action| action.name == name)
    }

    pub fn actions_of(&self, kind: ActionKind) -> impl Iterator<Item = &ActionDefinition> {
        self.actions.iter().filter(move |action| action.kind == kind)
    }

    /// Actions grouped by run-order, lowest first. Actions sharing a
    /// run-order run concurrently.
    pub fn run_groups(&self) -> Vec<(u32, Vec<&ActionDefinition>)> {
        let mut orders: Vec<u32> = self.actions.iter().map(|a| a.run_order).collect();
        orders.sort_unstable();
        orders.dedup();
        orders
            .into_iter()
            .map(|order| {
                let group = self
                    .actions
                    .iter()
                    .filter(|action| action.run_order == order)
                    .collect();
                (order, group)
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PipelineDefinition {
    pub version: String,
    pub name: String,
    pub namespace: Namespace,
    pub artifact_bucket: String,
    pub restart_execution_on_update: bool,
    pub stages: Vec<StageDefinition>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl PipelineDefinition {
    pub fn stage(&self, name: &str) -> Option<&StageDefinition> {
        self.stages.iter().find(|stage| stage.name == name)
    }

    pub fn action(&self, name: &str) -> Option<&ActionDefinition> {
        self.actions().find(|action| action.name == name)
    }

    pub fn actions(&self) -> impl Iterator<Item = &ActionDefinition> {
        self.stages.iter().flat_map(|stage| stage.actions.iter())
    }

    /// False when any error annotation blocks deployment.
    pub fn is_deployable(&self) -> bool {
        !self.annotations.iter().any(Annotation::is_blocking)
    }

    pub fn blocking_annotations(&self) -> impl Iterator<Item = &Annotation> {
        self.annotations.iter().filter(|a| a.is_blocking())
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize pipeline definition to JSON")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize pipeline definition to YAML")
    }

    /// SHA-256 of the compact JSON form. Identical inputs compose to the same
    /// fingerprint.
    pub fn fingerprint(&self) -> Result<String> {
        let canonical = serde_json::to_string(self)
            .context("Failed to serialize pipeline definition for fingerprinting")?;
        Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
    }
}

fn kind_label(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::Source => "source",
        ActionKind::ContainerBuild => "container build",
        ActionKind::Deploy => "deploy",
        ActionKind::Migrate => "migrate",
        ActionKind::SmokeTest => "smoke test",
        ActionKind::Approval => "approval",
    }
}

impl fmt::Display for PipelineDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pipeline: {}", self.name)?;
        writeln!(f, "=========={}", "=".repeat(self.name.len()))?;
        writeln!(f, "Namespace:       {}", self.namespace)?;
        writeln!(f, "Artifact bucket: {}", self.artifact_bucket)?;
        writeln!(f)?;

        for (index, stage) in self.stages.iter().enumerate() {
            writeln!(f, "{}. {}", index + 1, stage.name)?;
            for (order, group) in stage.run_groups() {
                for action in group {
                    writeln!(
                        f,
                        "   [{:>2}] {} ({})",
                        order,
                        action.name,
                        kind_label(action.kind)
                    )?;
                    if let Some(target) = action.build().and_then(|b| b.deploy_target.as_ref()) {
                        writeln!(f, "        stack: {}", target.stack)?;
                    }
                }
            }
        }

        if !self.annotations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Annotations:")?;
            for annotation in &self.annotations {
                writeln!(f, "  {}", annotation)?;
            }
        }

        Ok(())
    }
}
