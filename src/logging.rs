//! Tracing setup for the reader binary.
//!
//! Uses `tracing` and `tracing-subscriber`:
//! - Structured events with fields (`buffer`, `frame`, `sim_time`, ...)
//! - Pretty, compact or JSON output
//! - `RUST_LOG` filtering, falling back to the configured level
//!
//! # Example
//! ```no_run
//! use rdb_shm_reader::{config::ReaderConfig, logging};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ReaderConfig::default();
//! logging::init_from_config(&config)?;
//! tracing::info!(key = config.shm_key, "Reader starting");
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ReaderConfig;

/// Output format for log events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Multi-line, colored output for interactive use.
    Pretty,
    /// One line per event, no colors.
    #[default]
    Compact,
    /// Newline-delimited JSON for log collectors.
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: Level,
    /// Output format
    pub format: LogFormat,
    /// Whether to include file and line numbers
    pub with_file_and_line: bool,
    /// Whether to enable ANSI colors (only for Pretty format)
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Compact,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    /// Tracing config for the reader settings; `verbose` selects DEBUG.
    pub fn from_reader_config(config: &ReaderConfig) -> Self {
        let level = if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        };
        Self {
            level,
            format: config.log_format,
            with_file_and_line: config.verbose,
            ..Default::default()
        }
    }
}

/// Initialize tracing from the reader configuration.
pub fn init_from_config(config: &ReaderConfig) -> Result<(), String> {
    init(TracingConfig::from_reader_config(config))
}

/// Initialize tracing with custom configuration
///
/// This function is idempotent - if tracing is already initialized, it will
/// return Ok(()) without error. This makes it safe to call in tests.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level_to_filter_string(config.level)));

    let result = match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(config.with_ansi)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_ansi(false)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
        LogFormat::Json => {
            let fmt_layer = fmt::layer()
                .json()
                .with_file(config.with_file_and_line)
                .with_line_number(config.with_file_and_line)
                .with_filter(env_filter);
            tracing_subscriber::registry().with(fmt_layer).try_init()
        }
    };

    result.or_else(|e| {
        // Already initialized, e.g. by a test harness
        if e.to_string().contains("a global default trace dispatcher has already been set") {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {}", e))
        }
    })
}

/// Convert Level to env filter string
fn level_to_filter_string(level: Level) -> String {
    match level {
        Level::TRACE => "trace".to_string(),
        Level::DEBUG => "debug".to_string(),
        Level::INFO => "info".to_string(),
        Level::WARN => "warn".to_string(),
        Level::ERROR => "error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_selects_debug() {
        let config = ReaderConfig {
            verbose: true,
            log_format: LogFormat::Json,
            ..ReaderConfig::default()
        };

        let tracing_config = TracingConfig::from_reader_config(&config);
        assert_eq!(tracing_config.level, Level::DEBUG);
        assert_eq!(tracing_config.format, LogFormat::Json);

        let quiet = TracingConfig::from_reader_config(&ReaderConfig::default());
        assert_eq!(quiet.level, Level::INFO);
    }

    #[test]
    fn test_level_filter_strings() {
        assert_eq!(level_to_filter_string(Level::TRACE), "trace");
        assert_eq!(level_to_filter_string(Level::ERROR), "error");
    }
}
