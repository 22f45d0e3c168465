//! Post-deploy smoke tests
//!
//! Runs a newman collection against the freshly deployed hostname.

use super::StepBuilder;
use crate::annotations::Annotation;
use crate::fs::FileSystem;
use crate::output::buildspec::{BuildSpec, PhaseName};
use crate::output::schema::{
    ActionConfiguration, ActionDefinition, ActionKind, BuildConfiguration, BuildProject,
};
use crate::source::SourceBinding;
use indexmap::IndexMap;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct SmokeTestProps {
    pub action_name: String,
    pub source: SourceBinding,
    /// Collection path relative to the source root.
    pub collection: String,
    pub hostname: String,
    pub env_vars: IndexMap<String, String>,
}

impl SmokeTestProps {
    pub fn new(
        source: SourceBinding,
        collection: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            action_name: "SmokeTests".to_string(),
            source,
            collection: collection.into(),
            hostname: hostname.into(),
            env_vars: IndexMap::new(),
        }
    }

    pub fn with_env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct SmokeTest {
    props: SmokeTestProps,
}

impl SmokeTest {
    pub fn new(props: SmokeTestProps) -> Self {
        Self { props }
    }

    pub fn run_command(&self) -> String {
        let mut command = format!(
            "newman run {} --env-var app-host={}",
            self.props.collection, self.props.hostname
        );
        for (key, value) in &self.props.env_vars {
            command.push_str(&format!(" --env-var {}={}", key, value));
        }
        command
    }

    pub fn build_spec(&self) -> BuildSpec {
        BuildSpec::new()
            .runtime(PhaseName::Install, "nodejs", super::deploy::NODE_RUNTIME_VERSION)
            .command(PhaseName::Install, "npm install -g newman")
            .command(PhaseName::Build, "cd $CODEBUILD_SRC_DIR")
            .command(PhaseName::Build, self.run_command())
    }

    pub fn check_collection(&self, fs: &dyn FileSystem, checkout: &Path) -> Option<Annotation> {
        let path = checkout.join(&self.props.collection);
        if fs.is_file(&path) {
            return None;
        }
        Some(Annotation::error(
            self.props.action_name.clone(),
            format!("Smoke test collection not found at {}", path.display()),
        ))
    }
}

impl StepBuilder for SmokeTest {
    fn name(&self) -> &str {
        &self.props.action_name
    }

    fn kind(&self) -> ActionKind {
        ActionKind::SmokeTest
    }

    fn to_action(&self, run_order: u32) -> ActionDefinition {
        let source = self.props.source.artifact().name().to_string();
        ActionDefinition {
            name: self.props.action_name.clone(),
            kind: ActionKind::SmokeTest,
            run_order,
            input_artifacts: vec![source.clone()],
            output_artifacts: vec![],
            variables_namespace: None,
            configuration: ActionConfiguration::CodeBuild(BuildConfiguration {
                project: BuildProject::new(
                    format!("{}-smoke-tests", self.props.hostname.replace('.', "-")),
                    self.build_spec(),
                ),
                environment_variables: IndexMap::new(),
                primary_source: Some(source),
                deploy_target: None,
            }),
            policy: vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::MockFileSystem;
    use crate::source::OAuthTokenRef;

    fn smoke() -> SmokeTest {
        let source = SourceBinding::github(
            "InfraCode",
            "ndlib",
            "marble-blueprints",
            "main",
            OAuthTokenRef::new("/all/github/ndlib-git"),
        );
        SmokeTest::new(SmokeTestProps::new(
            source,
            "deploy/cdk/test/smoke.json",
            "app-test.library.nd.edu",
        ))
    }

    #[test]
    fn test_run_command() {
        assert_eq!(
            smoke().run_command(),
            "newman run deploy/cdk/test/smoke.json --env-var app-host=app-test.library.nd.edu"
        );
        let props = SmokeTestProps::new(smoke().props.source, "c.json", "h").with_env_var("k", "v");
        assert!(SmokeTest::new(props).run_command().ends_with("--env-var k=v"));
    }

    #[test]
    fn test_build_spec_installs_newman_first() {
        let spec = smoke().build_spec();
        let install = spec.position(|c| c == "npm install -g newman").unwrap();
        let run = spec.position(|c| c.starts_with("newman run")).unwrap();
        assert!(install < run);
    }

    #[test]
    fn test_action() {
        let action = smoke().to_action(98);
        assert_eq!(action.run_order, 98);
        assert_eq!(action.input_artifacts, vec!["InfraCode"]);
        assert!(action.policy.is_empty());
        assert_eq!(
            action.build().unwrap().project.name,
            "app-test-library-nd-edu-smoke-tests"
        );
    }

    #[test]
    fn test_missing_collection() {
        let fs = MockFileSystem::new();
        assert!(smoke()
            .check_collection(&fs, Path::new("/mock"))
            .unwrap()
            .is_blocking());
        fs.add_file("deploy/cdk/test/smoke.json", "{}");
        assert!(smoke().check_collection(&fs, Path::new("/mock")).is_none());
    }
}
