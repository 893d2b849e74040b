//! Logging setup shared by the `cast-*` binaries
//!
//! All output goes to stderr so stdout stays machine readable. `RUST_LOG`
//! overrides the configured level when set.
//!
//! # Examples
//!
//! ```no_run
//! use libcast::logging::{LoggingConfig, LogFormat};
//!
//! let config = LoggingConfig::new(LogFormat::Json, "info".to_string(), false);
//! config.init();
//!
//! // Or read CAST_LOG_FORMAT / CAST_LOG_LEVEL
//! libcast::logging::init_default();
//! ```

use std::fmt;
use std::str::FromStr;

/// Output shape of log lines on stderr
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Plain lines, no ANSI colors
    Text,
    /// One JSON object per event
    Json,
    /// Multi-line colored output
    Pretty,
}

impl LogFormat {
    const ALL: [LogFormat; 3] = [LogFormat::Text, LogFormat::Json, LogFormat::Pretty];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Text => "text",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|format| format.as_str().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let names: Vec<&str> = Self::ALL.iter().map(LogFormat::as_str).collect();
                format!("Invalid log format: '{}'. Expected one of: {}", s, names.join(", "))
            })
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: String,
    pub verbose: bool,
}

impl LoggingConfig {
    /// `verbose` forces the `debug` directive regardless of `level`
    pub fn new(format: LogFormat, level: String, verbose: bool) -> Self {
        Self {
            format,
            level,
            verbose,
        }
    }

    /// Build a configuration from `CAST_LOG_FORMAT` and `CAST_LOG_LEVEL`
    ///
    /// An unparseable format falls back to text.
    pub fn from_env(verbose: bool) -> Self {
        let format = std::env::var("CAST_LOG_FORMAT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(LogFormat::Text);
        let level = std::env::var("CAST_LOG_LEVEL").unwrap_or_else(|_| "warn".to_string());
        Self::new(format, level, verbose)
    }

    /// Effective filter directive before `RUST_LOG` is consulted
    pub fn directive(&self) -> &str {
        if self.verbose {
            "debug"
        } else {
            &self.level
        }
    }

    /// Install the global subscriber
    ///
    /// Returns false when a subscriber was already installed, e.g. by a test
    /// harness; the existing one stays in place.
    pub fn init(&self) -> bool {
        use tracing_subscriber::EnvFilter;

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.directive()));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);

        let installed = match self.format {
            LogFormat::Json => builder
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_target(true)
                .try_init(),
            LogFormat::Pretty => builder
                .pretty()
                .with_file(true)
                .with_line_number(true)
                .try_init(),
            LogFormat::Text => builder.with_ansi(false).with_target(false).try_init(),
        };
        installed.is_ok()
    }
}

/// Initialize logging from the environment
///
/// ```bash
/// export CAST_LOG_FORMAT=json
/// export CAST_LOG_LEVEL=libcast=debug
/// cast-post clip.mp4 --caption "hello"
/// ```
pub fn init_default() -> bool {
    LoggingConfig::from_env(false).init()
}
