use dec_pipelines::cli::commands::{CliArgs, Commands};
use dec_pipelines::cli::handlers::{handle_policy, handle_synth, handle_validate};
use dec_pipelines::util::logging::{self, parse_level, LoggingConfig};
use dec_pipelines::VERSION;

use clap::Parser;
use tracing::{debug, Level};

fn main() {
    let args = CliArgs::parse();
    init_logging_from_args(&args);

    debug!("dec-pipelines v{} starting", VERSION);
    debug!("Arguments: {:?}", args);

    let exit_code = match &args.command {
        Commands::Synth(synth_args) => handle_synth(synth_args, args.quiet),
        Commands::Policy(policy_args) => handle_policy(policy_args),
        Commands::Validate(validate_args) => handle_validate(validate_args, args.quiet),
    };

    std::process::exit(exit_code);
}

fn init_logging_from_args(args: &CliArgs) {
    let mut config = logging::config_from_env();
    if let Some(level_str) = &args.log_level {
        config.level = parse_level(level_str);
    } else if args.verbose {
        config.level = Level::DEBUG;
    } else if args.quiet {
        config.level = Level::ERROR;
    }
    logging::init_logging(LoggingConfig {
        include_target: args.verbose,
        ..config
    });
}
