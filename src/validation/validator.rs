use crate::output::schema::PipelineDefinition;
use crate::validation::rules::{
    ArtifactFlowRule, BuildSpecRule, DeployDirectoryRule, DeployExclusivityRule, RunOrderRule,
    UniqueNamesRule, ValidationRule, WildcardResourceRule,
};
use anyhow::Result;

pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: Vec<Box<dyn ValidationRule>>) -> Self {
        Self { rules }
    }

    /// Stops at the first failing rule.
    pub fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        for rule in &self.rules {
            if let Err(e) = rule.validate(pipeline) {
                anyhow::bail!("[{}] {}", rule.name(), e);
            }
        }
        Ok(())
    }

    /// Runs every rule and collects each failure.
    pub fn validate_all(&self, pipeline: &PipelineDefinition) -> Vec<String> {
        self.rules
            .iter()
            .filter_map(|rule| {
                rule.validate(pipeline)
                    .err()
                    .map(|e| format!("[{}] {}", rule.name(), e))
            })
            .collect()
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self {
            rules: vec![
                Box::new(UniqueNamesRule),
                Box::new(ArtifactFlowRule),
                Box::new(RunOrderRule),
                Box::new(WildcardResourceRule),
                Box::new(DeployExclusivityRule),
                Box::new(DeployDirectoryRule),
                Box::new(BuildSpecRule),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::Namespace;
    use crate::pipeline::{DeployStageProps, RailsPipeline, RailsPipelineProps};
    use crate::policy::{AwsEnv, PolicyStatement};
    use crate::source::{OAuthTokenRef, SourceBinding};

    fn composed() -> PipelineDefinition {
        let source = |name: &str, repo: &str| {
            SourceBinding::github(name, "ndlib", repo, "main", OAuthTokenRef::new("/all/github/ndlib-git"))
        };
        let props = RailsPipelineProps::new(
            "app-pipeline",
            Namespace::new("app").unwrap(),
            AwsEnv::new("123456789012", "us-east-1"),
            source("AppCode", "marble-app"),
            source("InfraCode", "marble-blueprints"),
        )
        .with_approval_topic("arn:aws:sns:us-east-1:123456789012:approvals")
        .with_stage(DeployStageProps::new(
            "Test",
            "test",
            Namespace::new("app-test").unwrap(),
            "app-test-service",
            "/all/app-test",
        ))
        .with_stage(DeployStageProps::new(
            "Production",
            "prod",
            Namespace::new("app-prod").unwrap(),
            "app-prod-service",
            "/all/app-prod",
        ));
        RailsPipeline::new(props).compose().unwrap()
    }

    #[test]
    fn test_composed_pipeline_is_valid() {
        let pipeline = composed();
        assert!(Validator::new().validate(&pipeline).is_ok());
        assert!(Validator::new().validate_all(&pipeline).is_empty());
    }

    #[test]
    fn test_failure_names_rule() {
        let mut pipeline = composed();
        pipeline.stages[1].actions[0].policy.push(PolicyStatement::allow(["s3:*"], ["*"]));

        let err = Validator::new().validate(&pipeline).unwrap_err();
        assert!(err.to_string().contains("WildcardResource"));

        let failures = Validator::new().validate_all(&pipeline);
        assert_eq!(failures.len(), 1);
    }

    #[test]
    fn test_custom_rules() {
        let validator = Validator::with_rules(vec![]);
        let mut pipeline = composed();
        pipeline.stages.clear();
        assert!(validator.validate(&pipeline).is_ok());
    }
}
