//! Structured logging setup
//!
//! Logs always go to stderr so that `synth` output on stdout stays
//! machine-readable. `RUST_LOG` is honored; the crate's own level comes from
//! [`LoggingConfig::level`].
//!
//! ```no_run
//! use dec_pipelines::util::logging;
//!
//! // DEC_LOG_LEVEL=debug DEC_LOG_JSON=true
//! logging::init_from_env();
//! tracing::info!(pipeline = "marble-pipeline", "Composing");
//! ```

use std::env;
use std::io;
use std::sync::Once;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: Level,
    /// One JSON object per event instead of human-readable lines.
    pub use_json: bool,
    pub include_target: bool,
    /// File and line of the emitting call site.
    pub include_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            use_json: false,
            include_target: false,
            include_location: false,
        }
    }
}

impl LoggingConfig {
    /// JSON with full metadata, for CI job logs that are shipped elsewhere.
    pub fn ci() -> Self {
        Self {
            level: Level::INFO,
            use_json: true,
            include_target: true,
            include_location: true,
        }
    }
}

/// Parses a level name, case-insensitively. Unknown names fall back to WARN.
pub fn parse_level(level_str: &str) -> Level {
    match level_str.trim().to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!(
                "Invalid log level '{}', defaulting to WARN. Valid levels: trace, debug, info, warn, error",
                level_str
            );
            Level::WARN
        }
    }
}

fn build_filter(level: Level) -> EnvFilter {
    let filter = EnvFilter::from_default_env();
    match format!("dec_pipelines={}", level).parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    }
}

/// Installs the global subscriber. Only the first call has any effect.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        let filter = build_filter(config.level);
        let layer = fmt::layer()
            .with_writer(io::stderr)
            .with_target(config.include_target)
            .with_file(config.include_location)
            .with_line_number(config.include_location);

        let result = if config.use_json {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer.json())
                .try_init()
        } else {
            tracing_subscriber::registry()
                .with(filter)
                .with(layer)
                .try_init()
        };
        if let Err(e) = result {
            eprintln!("Logging already initialized: {}", e);
        }
    });
}

/// Reads `DEC_LOG_LEVEL` and `DEC_LOG_JSON`.
pub fn init_from_env() {
    init_logging(config_from_env());
}

pub fn config_from_env() -> LoggingConfig {
    let level = env::var("DEC_LOG_LEVEL")
        .map(|value| parse_level(&value))
        .unwrap_or(Level::WARN);
    let use_json = env::var("DEC_LOG_JSON")
        .ok()
        .and_then(|v| v.parse::<bool>().ok())
        .unwrap_or(false);

    LoggingConfig {
        level,
        use_json,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("trace"), Level::TRACE);
        assert_eq!(parse_level("Debug"), Level::DEBUG);
        assert_eq!(parse_level(" INFO "), Level::INFO);
        assert_eq!(parse_level("warning"), Level::WARN);
        assert_eq!(parse_level("error"), Level::ERROR);
        assert_eq!(parse_level("loud"), Level::WARN);
    }

    #[test]
    fn test_ci_config() {
        let config = LoggingConfig::ci();
        assert!(config.use_json);
        assert!(config.include_location);
    }

    #[test]
    fn test_filter_targets_crate() {
        let filter = build_filter(Level::DEBUG);
        assert!(filter.to_string().contains("dec_pipelines=debug"));
    }

    #[test]
    #[serial]
    fn test_config_from_env() {
        env::set_var("DEC_LOG_LEVEL", "debug");
        env::set_var("DEC_LOG_JSON", "true");
        let config = config_from_env();
        env::remove_var("DEC_LOG_LEVEL");
        env::remove_var("DEC_LOG_JSON");

        assert_eq!(config.level, Level::DEBUG);
        assert!(config.use_json);

        let config = config_from_env();
        assert_eq!(config.level, Level::WARN);
        assert!(!config.use_json);
    }
}
