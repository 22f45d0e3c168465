//! Per-stage permission strategies
//!
//! A deploy step's built-in statements only cover driving the deploy tool.
//! Whatever the deployed stack itself creates (buckets, services, records)
//! is granted by strategies attached to the stage. The composer calls every
//! strategy once per stage, after the deploy step is built.

use crate::namespace::Namespace;
use crate::policy::{global, namespaced, AwsEnv, Capability, GlobalAction, PolicyStatement};
use crate::steps::CdkDeploy;

/// What a strategy knows about the stage it is granting for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageMeta {
    pub stage_name: String,
    pub context_env: String,
    pub namespace: Namespace,
    pub hostname: Option<String>,
    /// True for the last stage of the pipeline.
    pub is_final: bool,
}

pub trait DeployPermissionStrategy: Send + Sync {
    fn statements(&self, deploy: &CdkDeploy, stage: &StageMeta) -> Vec<PolicyStatement>;
}

impl<F> DeployPermissionStrategy for F
where
    F: Fn(&CdkDeploy, &StageMeta) -> Vec<PolicyStatement> + Send + Sync,
{
    fn statements(&self, deploy: &CdkDeploy, stage: &StageMeta) -> Vec<PolicyStatement> {
        self(deploy, stage)
    }
}

/// Grants namespaced capabilities over the stage's namespace, plus any
/// global actions the stack needs.
#[derive(Debug, Clone)]
pub struct NamespacedCapabilities {
    capabilities: Vec<Capability>,
    global_actions: Vec<GlobalAction>,
    env: AwsEnv,
}

impl NamespacedCapabilities {
    pub fn new(env: AwsEnv) -> Self {
        Self {
            capabilities: Vec::new(),
            global_actions: Vec::new(),
            env,
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.push(capability);
        self
    }

    pub fn with_capabilities<I: IntoIterator<Item = Capability>>(mut self, capabilities: I) -> Self {
        self.capabilities.extend(capabilities);
        self
    }

    pub fn with_global<I: IntoIterator<Item = GlobalAction>>(mut self, actions: I) -> Self {
        self.global_actions.extend(actions);
        self
    }
}

impl DeployPermissionStrategy for NamespacedCapabilities {
    fn statements(&self, deploy: &CdkDeploy, _stage: &StageMeta) -> Vec<PolicyStatement> {
        let mut statements = namespaced::statements(deploy.namespace(), &self.capabilities, &self.env);
        if !self.global_actions.is_empty() {
            statements.push(global::statement(&self.global_actions));
        }
        statements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{OAuthTokenRef, SourceBinding};
    use crate::steps::CdkDeployProps;

    fn env() -> AwsEnv {
        AwsEnv::new("123456789012", "us-east-1")
    }

    fn deploy() -> CdkDeploy {
        let infra = SourceBinding::github(
            "InfraCode",
            "ndlib",
            "marble-blueprints",
            "main",
            OAuthTokenRef::new("/all/github/ndlib-git"),
        );
        CdkDeploy::new(CdkDeployProps::new(
            "app-test-service",
            Namespace::new("app-test").unwrap(),
            "test",
            infra,
            env(),
        ))
    }

    fn meta() -> StageMeta {
        StageMeta {
            stage_name: "Test".to_string(),
            context_env: "test".to_string(),
            namespace: Namespace::new("app-test").unwrap(),
            hostname: None,
            is_final: false,
        }
    }

    #[test]
    fn test_closure_strategy() {
        let strategy = |deploy: &CdkDeploy, stage: &StageMeta| {
            vec![PolicyStatement::allow(
                ["s3:PutObject"],
                [format!("arn:aws:s3:::{}-{}*", deploy.namespace(), stage.context_env)],
            )]
        };
        let statements = strategy.statements(&deploy(), &meta());
        assert_eq!(statements[0].resources, vec!["arn:aws:s3:::app-test-test*"]);
    }

    #[test]
    fn test_namespaced_capabilities() {
        let strategy = NamespacedCapabilities::new(env())
            .with_capabilities([Capability::S3, Capability::Ecs])
            .with_global([GlobalAction::AutoScaling]);
        let statements = strategy.statements(&deploy(), &meta());

        assert_eq!(statements.len(), 3);
        assert!(statements[0]
            .resources
            .iter()
            .all(|r| r.starts_with("arn:aws:s3:::app-test")));
        assert!(!statements[1].is_global());
        assert!(statements[2].is_global());
    }

    #[test]
    fn test_no_globals_no_wildcard() {
        let strategy = NamespacedCapabilities::new(env()).with_capability(Capability::Logs);
        let statements = strategy.statements(&deploy(), &meta());
        assert_eq!(statements.len(), 1);
        assert!(!statements[0].is_wildcard());
    }
}
