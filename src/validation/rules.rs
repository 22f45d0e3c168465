use crate::output::buildspec::PhaseName;
use crate::output::schema::{ActionKind, PipelineDefinition};
use crate::steps::{
    APPROVAL_RUN_ORDER, DEPLOY_RUN_ORDER, MIGRATE_RUN_ORDER, SMOKE_TEST_RUN_ORDER,
};
use anyhow::Result;
use std::collections::HashSet;

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()>;
}

pub struct UniqueNamesRule;

impl ValidationRule for UniqueNamesRule {
    fn name(&self) -> &'static str {
        "UniqueNames"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        let mut stages = HashSet::new();
        for stage in &pipeline.stages {
            if !stages.insert(stage.name.as_str()) {
                anyhow::bail!("Stage '{}' appears more than once", stage.name);
            }
            if stage.actions.is_empty() {
                anyhow::bail!("Stage '{}' has no actions", stage.name);
            }
            let mut actions = HashSet::new();
            for action in &stage.actions {
                if !actions.insert(action.name.as_str()) {
                    anyhow::bail!(
                        "Action '{}' appears more than once in stage '{}'",
                        action.name,
                        stage.name
                    );
                }
            }
        }
        Ok(())
    }
}

/// Every input artifact must be produced by an earlier stage, or by an
/// earlier run-order group of the same stage. Output names are unique.
pub struct ArtifactFlowRule;

impl ValidationRule for ArtifactFlowRule {
    fn name(&self) -> &'static str {
        "ArtifactFlow"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        let mut available: HashSet<&str> = HashSet::new();
        for stage in &pipeline.stages {
            for (_, group) in stage.run_groups() {
                for action in &group {
                    for input in &action.input_artifacts {
                        if !available.contains(input.as_str()) {
                            anyhow::bail!(
                                "Action '{}' in stage '{}' reads artifact '{}' before anything produces it",
                                action.name,
                                stage.name,
                                input
                            );
                        }
                    }
                }
                for action in &group {
                    for output in &action.output_artifacts {
                        if !available.insert(output.as_str()) {
                            anyhow::bail!("Artifact '{}' is produced more than once", output);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct RunOrderRule;

impl ValidationRule for RunOrderRule {
    fn name(&self) -> &'static str {
        "RunOrder"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        let last = pipeline.stages.len().saturating_sub(1);
        for (index, stage) in pipeline.stages.iter().enumerate() {
            let highest = stage.actions.iter().map(|a| a.run_order).max().unwrap_or(0);
            for action in &stage.actions {
                let expected = match action.kind {
                    ActionKind::Deploy => Some(DEPLOY_RUN_ORDER),
                    ActionKind::Migrate => Some(MIGRATE_RUN_ORDER),
                    ActionKind::SmokeTest => Some(SMOKE_TEST_RUN_ORDER),
                    ActionKind::Approval => Some(APPROVAL_RUN_ORDER),
                    ActionKind::Source | ActionKind::ContainerBuild => None,
                };
                if let Some(expected) = expected {
                    if action.run_order != expected {
                        anyhow::bail!(
                            "Action '{}' in stage '{}' has run-order {}, expected {}",
                            action.name,
                            stage.name,
                            action.run_order,
                            expected
                        );
                    }
                }
                if action.kind == ActionKind::Approval {
                    if index == last {
                        anyhow::bail!(
                            "Final stage '{}' must not contain an approval",
                            stage.name
                        );
                    }
                    if action.run_order != highest {
                        anyhow::bail!(
                            "Approval '{}' must run last in stage '{}'",
                            action.name,
                            stage.name
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Only statements built from the global action list may use `*`.
pub struct WildcardResourceRule;

impl ValidationRule for WildcardResourceRule {
    fn name(&self) -> &'static str {
        "WildcardResource"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        for action in pipeline.actions() {
            for statement in &action.policy {
                if statement.is_wildcard() && !statement.is_global() {
                    anyhow::bail!(
                        "Action '{}' grants {} on '*' outside the global action list",
                        action.name,
                        statement.actions.join(", ")
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct DeployExclusivityRule;

impl ValidationRule for DeployExclusivityRule {
    fn name(&self) -> &'static str {
        "DeployExclusivity"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        for action in pipeline.actions().filter(|a| a.kind == ActionKind::Deploy) {
            let Some(build) = action.build() else {
                anyhow::bail!("Deploy action '{}' is not a build action", action.name);
            };
            let Some(command) = build
                .project
                .build_spec
                .phase_commands(PhaseName::Build)
                .iter()
                .find(|c| c.starts_with("npm run cdk deploy"))
            else {
                anyhow::bail!("Deploy action '{}' never runs the deploy command", action.name);
            };
            if !command.contains("--exclusively") {
                anyhow::bail!("Deploy action '{}' is not exclusive", action.name);
            }
            if let Some(target) = &build.deploy_target {
                for dependency in &target.depends_on {
                    let deployed = command
                        .split_whitespace()
                        .any(|word| word == dependency);
                    if deployed {
                        anyhow::bail!(
                            "Deploy action '{}' deploys dependent stack '{}'",
                            action.name,
                            dependency
                        );
                    }
                }
            }
        }
        Ok(())
    }
}

/// Deploy phases that run tool or application commands must start by
/// changing directory.
pub struct DeployDirectoryRule;

impl ValidationRule for DeployDirectoryRule {
    fn name(&self) -> &'static str {
        "DeployDirectory"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        for action in pipeline.actions().filter(|a| a.kind == ActionKind::Deploy) {
            let Some(spec) = action.build_spec() else {
                continue;
            };
            for phase in [PhaseName::Install, PhaseName::Build] {
                let commands = spec.phase_commands(phase);
                if !commands.first().is_some_and(|c| c.starts_with("cd ")) {
                    anyhow::bail!(
                        "Deploy action '{}' does not change into the infrastructure directory at the start of {}",
                        action.name,
                        phase
                    );
                }
            }
        }
        Ok(())
    }
}

pub struct BuildSpecRule;

impl ValidationRule for BuildSpecRule {
    fn name(&self) -> &'static str {
        "BuildSpec"
    }

    fn validate(&self, pipeline: &PipelineDefinition) -> Result<()> {
        for action in pipeline.actions() {
            if let Some(spec) = action.build_spec() {
                spec.validate()
                    .map_err(|e| anyhow::anyhow!("Action '{}': {}", action.name, e))?;
            }
        }
        Ok(())
    }
}
