//! Structured logging on top of `tracing`.
//!
//! Console output goes to stderr so command output on stdout stays clean.
//! When `[logging].file` is set, a second non-blocking layer writes to a
//! daily-rotated file under `.forge/logs/`.
//!
//! Filter priority (highest first): `FORGE_LOG`, `--verbose`, `[logging].level`.

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::time::ChronoUtc;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::forge_config::{LogFormat, LoggingSection};

pub const LOG_ENV_VAR: &str = "FORGE_LOG";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber. Keep the returned guard alive for as long
/// as file logging should flush.
pub fn init_logging(
    config: &LoggingSection,
    log_dir: &Path,
    verbose: bool,
) -> Result<Option<WorkerGuard>> {
    let directive = filter_directive(
        &config.level,
        verbose,
        std::env::var(LOG_ENV_VAR).ok(),
    );
    let filter = EnvFilter::try_new(&directive)
        .with_context(|| format!("Invalid log filter '{}'", directive))?;

    let mut layers: Vec<BoxedLayer> = vec![console_layer(config.format)];

    let guard = match &config.file {
        Some(file_name) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;
            let appender = tracing_appender::rolling::daily(log_dir, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(file_layer(config.format, writer));
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(guard)
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(console::Term::stderr().features().colors_supported())
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn file_layer(format: LogFormat, writer: tracing_appender::non_blocking::NonBlocking) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_writer(writer)
            .boxed(),
        LogFormat::Text => fmt::layer()
            .with_target(true)
            .with_timer(ChronoUtc::rfc_3339())
            .with_ansi(false)
            .with_writer(writer)
            .boxed(),
    }
}

/// Resolve the filter directive.
fn filter_directive(level: &str, verbose: bool, env: Option<String>) -> String {
    match env {
        Some(directive) if !directive.trim().is_empty() => directive,
        _ if verbose => "debug".to_string(),
        _ => level.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_wins() {
        assert_eq!(
            filter_directive("info", true, Some("forge=trace".into())),
            "forge=trace"
        );
    }

    #[test]
    fn test_verbose_over_config() {
        assert_eq!(filter_directive("warn", true, None), "debug");
        assert_eq!(filter_directive("warn", true, Some("  ".into())), "debug");
    }

    #[test]
    fn test_config_level_by_default() {
        assert_eq!(filter_directive("warn", false, None), "warn");
    }

    #[test]
    fn test_directives_parse() {
        assert!(EnvFilter::try_new("info").is_ok());
        assert!(EnvFilter::try_new("forge=debug,tower_http=warn").is_ok());
    }
}
