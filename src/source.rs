//! Version-control source bindings
//!
//! A [`SourceBinding`] ties one repository branch to one named artifact and
//! the step that fetches it. It is created once per pipeline and shared by
//! every step that needs the code.

use crate::deferred::Deferred;
use crate::output::schema::{
    ActionConfiguration, ActionDefinition, ActionKind, SourceConfiguration,
};
use crate::steps::StepBuilder;
use serde::{Deserialize, Serialize};

/// Named bundle of files passed between steps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact {
    name: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Directory where a build step finds this artifact when it is a
    /// secondary input.
    pub fn secondary_src_dir(&self) -> String {
        format!("$CODEBUILD_SRC_DIR_{}", self.name)
    }
}

/// Reference to a stored OAuth credential. Only the secret path is ever
/// recorded; the value is looked up by the provider at deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokenRef {
    pub secret_path: String,
    #[serde(default = "default_token_field")]
    pub json_field: String,
}

fn default_token_field() -> String {
    "oauth".to_string()
}

impl OAuthTokenRef {
    pub fn new(secret_path: impl Into<String>) -> Self {
        Self {
            secret_path: secret_path.into(),
            json_field: default_token_field(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.json_field = field.into();
        self
    }

    /// Dynamic reference resolved by the provider when the template deploys.
    pub fn dynamic_reference(&self) -> String {
        format!(
            "{{{{resolve:secretsmanager:{}:SecretString:{}}}}}",
            self.secret_path, self.json_field
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceTrigger {
    #[default]
    Webhook,
    Poll,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceBinding {
    step_name: String,
    owner: String,
    repository: String,
    branch: String,
    token: OAuthTokenRef,
    trigger: SourceTrigger,
    artifact: Artifact,
}

impl SourceBinding {
    /// Binds `owner/repository@branch`. The step name doubles as the artifact
    /// name and the variables namespace.
    pub fn github(
        step_name: impl Into<String>,
        owner: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
        token: OAuthTokenRef,
    ) -> Self {
        let step_name = step_name.into();
        Self {
            artifact: Artifact::new(step_name.clone()),
            step_name,
            owner: owner.into(),
            repository: repository.into(),
            branch: branch.into(),
            token,
            trigger: SourceTrigger::default(),
        }
    }

    pub fn with_trigger(mut self, trigger: SourceTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn token(&self) -> &OAuthTokenRef {
        &self.token
    }

    pub fn trigger(&self) -> SourceTrigger {
        self.trigger
    }

    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }

    pub fn variables_namespace(&self) -> &str {
        &self.step_name
    }

    /// Commit the execution fetched. Only known once the source step has run.
    pub fn commit_id(&self) -> Deferred {
        Deferred::variable(self.variables_namespace(), "CommitId")
    }

    pub fn commit_message(&self) -> Deferred {
        Deferred::variable(self.variables_namespace(), "CommitMessage")
    }
}

impl StepBuilder for SourceBinding {
    fn name(&self) -> &str {
        &self.step_name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::Source
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        ActionDefinition {
            name: self.step_name.clone(),
            kind: ActionKind::Source,
            run_order,
            input_artifacts: vec![],
            output_artifacts: vec![self.artifact.name().to_string()],
            variables_namespace: Some(self.variables_namespace().to_string()),
            configuration: ActionConfiguration::GitHub(SourceConfiguration {
                owner: self.owner.clone(),
                repo: self.repository.clone(),
                branch: self.branch.clone(),
                oauth_token: self.token.dynamic_reference(),
                trigger: self.trigger,
            }),
            policy: vec![],
        }
    }
}
