use crate::policy::{Capability, GlobalAction};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Deployment pipeline and permission generator for DEC services
#[derive(Parser, Debug)]
#[command(
    name = "dec-pipelines",
    about = "Deployment pipeline and permission generator for DEC services",
    version,
    author,
    long_about = "dec-pipelines composes Source -> Build -> Test -> Production deployment \
                  pipelines from a YAML description and derives least-privilege permission \
                  statements from namespace naming conventions."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, global = true, value_name = "LEVEL", help = "Set logging level")]
    pub log_level: Option<String>,

    #[arg(short = 'v', long, global = true, help = "Log composition details")]
    pub verbose: bool,

    #[arg(
        short = 'q',
        long,
        global = true,
        conflicts_with = "verbose",
        help = "Quiet mode - only log errors"
    )]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(
        about = "Compose a pipeline and print its definition",
        long_about = "Reads a pipeline description, composes it and prints the resulting \
                      definition.\n\n\
                      Examples:\n  \
                      dec-pipelines synth pipeline.yml\n  \
                      dec-pipelines synth pipeline.yml --format json -o pipeline.json\n  \
                      dec-pipelines synth pipeline.yml --app-checkout ../marble-app"
    )]
    Synth(SynthArgs),

    #[command(
        about = "Print permission statements for a namespace",
        long_about = "Prints the IAM policy document granting the given capabilities over \
                      resources named after the namespace.\n\n\
                      Examples:\n  \
                      dec-pipelines policy --namespace marble-test --account 123456789012 -c s3 -c ecs\n  \
                      dec-pipelines policy --namespace marble-test --account 123456789012 \
                      -c route53-record-set=Z123 --global autoscaling"
    )]
    Policy(PolicyArgs),

    #[command(
        about = "Compose a pipeline and check it",
        long_about = "Composes the pipeline and runs every validation rule. Exits non-zero \
                      when a rule fails or a stack carries an error annotation."
    )]
    Validate(ValidateArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct CheckoutArgs {
    #[arg(
        long,
        value_name = "PATH",
        help = "Local checkout of the application, used to check dockerfiles"
    )]
    pub app_checkout: Option<PathBuf>,

    #[arg(
        long,
        value_name = "PATH",
        help = "Local checkout of the infrastructure code, used to check smoke test collections"
    )]
    pub infra_checkout: Option<PathBuf>,
}

#[derive(Parser, Debug, Clone)]
pub struct SynthArgs {
    #[arg(value_name = "CONFIG", help = "Pipeline description (YAML)")]
    pub config: PathBuf,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "human",
        help = "Output format"
    )]
    pub format: OutputFormatArg,

    #[arg(
        short = 'o',
        long,
        value_name = "FILE",
        help = "Write output to file instead of stdout"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        value_name = "DIR",
        help = "Also write every build-spec to <DIR>/<stage>-<action>.yml"
    )]
    pub buildspec_dir: Option<PathBuf>,

    #[command(flatten)]
    pub checkouts: CheckoutArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(value_name = "CONFIG", help = "Pipeline description (YAML)")]
    pub config: PathBuf,

    #[command(flatten)]
    pub checkouts: CheckoutArgs,
}

#[derive(Parser, Debug, Clone)]
pub struct PolicyArgs {
    #[arg(short = 'n', long, value_name = "NAMESPACE")]
    pub namespace: String,

    #[arg(long, value_name = "ACCOUNT")]
    pub account: String,

    #[arg(long, value_name = "REGION", default_value = "us-east-1")]
    pub region: String,

    #[arg(
        short = 'c',
        long = "capability",
        value_name = "NAME[=ARG]",
        value_parser = parse_capability,
        help = "Capability to grant; record sets take the hosted zone id, roles and tables an optional suffix"
    )]
    pub capabilities: Vec<Capability>,

    #[arg(
        short = 'g',
        long = "global",
        value_name = "ACTION",
        value_parser = parse_global_action,
        help = "Global action to grant on '*'"
    )]
    pub global_actions: Vec<GlobalAction>,

    #[arg(
        short = 'f',
        long,
        value_enum,
        default_value = "json",
        help = "Output format"
    )]
    pub format: OutputFormatArg,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormatArg {
    Json,
    Yaml,
    Human,
}

impl From<OutputFormatArg> for super::output::OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Json => super::output::OutputFormat::Json,
            OutputFormatArg::Yaml => super::output::OutputFormat::Yaml,
            OutputFormatArg::Human => super::output::OutputFormat::Human,
        }
    }
}

fn parse_capability(s: &str) -> Result<Capability, String> {
    let (name, argument) = match s.split_once('=') {
        Some((name, argument)) => (name, Some(argument)),
        None => (s, None),
    };
    Capability::from_name(name, argument).ok_or_else(|| {
        if name == "route53-record-set" {
            "route53-record-set needs a hosted zone id: route53-record-set=<ZONE_ID>".to_string()
        } else {
            format!("Invalid capability: {}", s)
        }
    })
}

fn parse_global_action(s: &str) -> Result<GlobalAction, String> {
    GlobalAction::from_name(s).ok_or_else(|| {
        let valid: Vec<&str> = GlobalAction::all().iter().map(GlobalAction::name).collect();
        format!("Invalid global action: {}. Valid options: {}", s, valid.join(", "))
    })
}
