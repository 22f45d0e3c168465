//! Build-spec documents
//!
//! The build runner executes a build-spec as four textual phases. Commands
//! are plain strings, so nothing checks their sequencing until a build
//! actually runs; the step builders own that ordering and the tests pin it.

use anyhow::{Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const BUILD_SPEC_VERSION: &str = "0.2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PhaseName {
    Install,
    PreBuild,
    Build,
    PostBuild,
}

impl PhaseName {
    pub fn all() -> [PhaseName; 4] {
        [
            PhaseName::Install,
            PhaseName::PreBuild,
            PhaseName::Build,
            PhaseName::PostBuild,
        ]
    }
}

impl fmt::Display for PhaseName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PhaseName::Install => "install",
            PhaseName::PreBuild => "pre_build",
            PhaseName::Build => "build",
            PhaseName::PostBuild => "post_build",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Phase {
    #[serde(
        rename = "runtime-versions",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub runtime_versions: IndexMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Phases {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub install: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_build: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<Phase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_build: Option<Phase>,
}

impl Phases {
    pub fn get(&self, name: PhaseName) -> Option<&Phase> {
        match name {
            PhaseName::Install => self.install.as_ref(),
            PhaseName::PreBuild => self.pre_build.as_ref(),
            PhaseName::Build => self.build.as_ref(),
            PhaseName::PostBuild => self.post_build.as_ref(),
        }
    }

    fn slot(&mut self, name: PhaseName) -> &mut Option<Phase> {
        match name {
            PhaseName::Install => &mut self.install,
            PhaseName::PreBuild => &mut self.pre_build,
            PhaseName::Build => &mut self.build,
            PhaseName::PostBuild => &mut self.post_build,
        }
    }
}

/// Environment section: plain variables, store-backed variables and the
/// variables exported to later steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildSpecEnv {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub variables: IndexMap<String, String>,
    #[serde(
        rename = "parameter-store",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub parameter_store: IndexMap<String, String>,
    #[serde(
        rename = "secrets-manager",
        default,
        skip_serializing_if = "IndexMap::is_empty"
    )]
    pub secrets_manager: IndexMap<String, String>,
    #[serde(
        rename = "exported-variables",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub exported_variables: Vec<String>,
}

impl BuildSpecEnv {
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.parameter_store.is_empty()
            && self.secrets_manager.is_empty()
            && self.exported_variables.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactFiles {
    pub files: Vec<String>,
    #[serde(
        rename = "base-directory",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub base_directory: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    pub version: String,
    #[serde(default, skip_serializing_if = "BuildSpecEnv::is_empty")]
    pub env: BuildSpecEnv,
    pub phases: Phases,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<ArtifactFiles>,
}

impl Default for BuildSpec {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildSpec {
    pub fn new() -> Self {
        Self {
            version: BUILD_SPEC_VERSION.to_string(),
            env: BuildSpecEnv::default(),
            phases: Phases::default(),
            artifacts: None,
        }
    }

    pub fn phase_mut(&mut self, name: PhaseName) -> &mut Phase {
        self.phases.slot(name).get_or_insert_with(Phase::default)
    }

    pub fn command(mut self, phase: PhaseName, command: impl Into<String>) -> Self {
        self.phase_mut(phase).commands.push(command.into());
        self
    }

    pub fn commands<I>(mut self, phase: PhaseName, commands: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.phase_mut(phase)
            .commands
            .extend(commands.into_iter().map(Into::into));
        self
    }

    pub fn runtime(
        mut self,
        phase: PhaseName,
        runtime: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        self.phase_mut(phase)
            .runtime_versions
            .insert(runtime.into(), version.into());
        self
    }

    pub fn phase_commands(&self, name: PhaseName) -> &[String] {
        self.phases
            .get(name)
            .map(|phase| phase.commands.as_slice())
            .unwrap_or(&[])
    }

    /// Every command in execution order, tagged with its phase.
    pub fn all_commands(&self) -> Vec<(PhaseName, &str)> {
        PhaseName::all()
            .into_iter()
            .flat_map(|name| {
                self.phase_commands(name)
                    .iter()
                    .map(move |command| (name, command.as_str()))
            })
            .collect()
    }

    /// Position of the first command in execution order matching `predicate`.
    pub fn position<F>(&self, predicate: F) -> Option<usize>
    where
        F: Fn(&str) -> bool,
    {
        self.all_commands()
            .iter()
            .position(|(_, command)| predicate(command))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize build-spec to YAML")
    }

    pub fn validate(&self) -> Result<()> {
        if self.version != BUILD_SPEC_VERSION {
            anyhow::bail!(
                "Unsupported build-spec version '{}', expected {}",
                self.version,
                BUILD_SPEC_VERSION
            );
        }
        if self.all_commands().is_empty() {
            anyhow::bail!("Build-spec has no commands");
        }
        for (name, command) in self.all_commands() {
            if command.trim().is_empty() {
                anyhow::bail!("Empty command in {} phase", name);
            }
        }
        for exported in &self.env.exported_variables {
            if exported.is_empty() {
                anyhow::bail!("Exported variable name cannot be empty");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BuildSpec {
        BuildSpec::new()
            .runtime(PhaseName::Install, "nodejs", "18.x")
            .command(PhaseName::Install, "cd $CODEBUILD_SRC_DIR/deploy/cdk")
            .command(PhaseName::Install, "npm install")
            .command(PhaseName::Build, "npm run cdk deploy -- app")
    }

    #[test]
    fn test_commands_in_phase_order() {
        let spec = sample().command(PhaseName::PreBuild, "echo pre");
        let commands: Vec<&str> = spec.all_commands().into_iter().map(|(_, c)| c).collect();
        assert_eq!(
            commands,
            vec![
                "cd $CODEBUILD_SRC_DIR/deploy/cdk",
                "npm install",
                "echo pre",
                "npm run cdk deploy -- app"
            ]
        );
    }

    #[test]
    fn test_position() {
        let spec = sample();
        assert_eq!(spec.position(|c| c == "npm install"), Some(1));
        assert_eq!(spec.position(|c| c == "missing"), None);
    }

    #[test]
    fn test_yaml_shape() {
        let mut spec = sample();
        spec.env
            .parameter_store
            .insert("DB_HOST".to_string(), "/all/app/database/host".to_string());
        spec.env.exported_variables.push("IMAGE_TAG".to_string());

        let yaml = spec.to_yaml().unwrap();
        assert!(yaml.contains("version: '0.2'") || yaml.contains("version: \"0.2\""));
        assert!(yaml.contains("runtime-versions:"));
        assert!(yaml.contains("parameter-store:"));
        assert!(yaml.contains("exported-variables:"));
        assert!(!yaml.contains("pre_build"));
    }

    #[test]
    fn test_yaml_round_trip_keeps_commands() {
        let spec = sample();
        let parsed: BuildSpec = serde_yaml::from_str(&spec.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_validate() {
        assert!(sample().validate().is_ok());
        assert!(BuildSpec::new().validate().is_err());

        let blank = BuildSpec::new().command(PhaseName::Build, "  ");
        assert!(blank.validate().is_err());

        let mut wrong_version = sample();
        wrong_version.version = "0.1".to_string();
        assert!(wrong_version.validate().is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(PhaseName::PreBuild.to_string(), "pre_build");
        assert_eq!(PhaseName::PostBuild.to_string(), "post_build");
    }
}
