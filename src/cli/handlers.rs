//! Subcommand handlers. Each returns the process exit code.

use super::commands::{CheckoutArgs, PolicyArgs, SynthArgs, ValidateArgs};
use super::output::{OutputFormatter, ValidationReport};
use crate::config::PipelineConfig;
use crate::namespace::Namespace;
use crate::output::schema::PipelineDefinition;
use crate::pipeline::RailsPipeline;
use crate::policy::{global, namespaced, AwsEnv, PolicyDocument};
use crate::validation::Validator;
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub fn handle_synth(args: &SynthArgs, quiet: bool) -> i32 {
    exit_code(run_synth(args, quiet))
}

pub fn handle_policy(args: &PolicyArgs) -> i32 {
    exit_code(run_policy(args).map(|()| true))
}

pub fn handle_validate(args: &ValidateArgs, quiet: bool) -> i32 {
    exit_code(run_validate(args, quiet))
}

fn exit_code(result: Result<bool>) -> i32 {
    match result {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    }
}

fn compose(config_path: &Path, checkouts: &CheckoutArgs) -> Result<PipelineDefinition> {
    let config = PipelineConfig::from_file(config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let props = config.into_pipeline_props()?;

    let mut pipeline = RailsPipeline::new(props);
    if let Some(path) = &checkouts.app_checkout {
        pipeline = pipeline.with_app_checkout(path.clone());
    }
    if let Some(path) = &checkouts.infra_checkout {
        pipeline = pipeline.with_infra_checkout(path.clone());
    }
    Ok(pipeline.compose()?)
}

fn run_synth(args: &SynthArgs, quiet: bool) -> Result<bool> {
    let pipeline = compose(&args.config, &args.checkouts)?;
    let rendered = OutputFormatter::new(args.format.into()).format_pipeline(&pipeline)?;

    match &args.output {
        Some(path) => {
            fs::write(path, &rendered)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!(path = %path.display(), "Wrote pipeline definition");
        }
        None => println!("{}", rendered),
    }

    if let Some(dir) = &args.buildspec_dir {
        let written = write_build_specs(&pipeline, dir)?;
        info!(dir = %dir.display(), count = written.len(), "Wrote build-specs");
    }

    if !quiet {
        for annotation in pipeline.blocking_annotations() {
            eprintln!("{}", annotation);
        }
    }
    Ok(true)
}

/// Writes `<dir>/<stage>-<action>.yml` for every build action.
pub fn write_build_specs(pipeline: &PipelineDefinition, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let mut written = Vec::new();
    for stage in &pipeline.stages {
        for action in &stage.actions {
            let Some(spec) = action.build_spec() else {
                continue;
            };
            let path = dir.join(format!(
                "{}-{}.yml",
                stage.name.to_lowercase(),
                action.name.to_lowercase()
            ));
            fs::write(&path, spec.to_yaml()?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }
    }
    Ok(written)
}

fn run_policy(args: &PolicyArgs) -> Result<()> {
    let namespace = Namespace::new(args.namespace.clone())?;
    let env = AwsEnv::new(args.account.clone(), args.region.clone());

    let mut statements = namespaced::statements(&namespace, &args.capabilities, &env);
    if !args.global_actions.is_empty() {
        statements.push(global::statement(&args.global_actions));
    }
    if statements.is_empty() {
        anyhow::bail!("Nothing to grant: pass at least one --capability or --global");
    }

    let document = PolicyDocument::new(statements);
    println!(
        "{}",
        OutputFormatter::new(args.format.into()).format_policy(&document)?
    );
    Ok(())
}

fn run_validate(args: &ValidateArgs, quiet: bool) -> Result<bool> {
    let pipeline = compose(&args.config, &args.checkouts)?;
    let report = ValidationReport {
        pipeline: pipeline.name.clone(),
        fingerprint: pipeline.fingerprint()?,
        rule_failures: Validator::new().validate_all(&pipeline),
        annotations: pipeline.annotations.clone(),
    };

    let passed = report.passed();
    if !passed {
        warn!(
            failures = report.rule_failures.len(),
            blocking = pipeline.blocking_annotations().count(),
            "Validation failed"
        );
    }
    if !quiet || !passed {
        print!(
            "{}",
            OutputFormatter::new(super::output::OutputFormat::Human).format_report(&report)?
        );
    }
    Ok(passed)
}
