//! Log subscriber setup for the server binary.
//!
//! Library crates only emit `tracing` events; installing a subscriber is left
//! to the process, once, before the server starts.

use std::str::FromStr;

use tracing_subscriber::{fmt, EnvFilter, Registry};

use crate::error::{Result, ServerError};

/// Output style of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingMode {
    /// No subscriber; every event is dropped
    Silent,
    /// One line per event on stderr
    Compact,
    /// Multi-line events with thread ids and source locations
    Verbose,
    /// One JSON object per event, for log shippers
    Json,
}

impl LoggingMode {
    fn default_level(&self) -> &'static str {
        match self {
            LoggingMode::Verbose => "debug",
            _ => "info",
        }
    }
}

impl FromStr for LoggingMode {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "silent" => Ok(LoggingMode::Silent),
            "compact" => Ok(LoggingMode::Compact),
            "verbose" => Ok(LoggingMode::Verbose),
            "json" => Ok(LoggingMode::Json),
            other => Err(ServerError::InvalidSetting(format!(
                "unknown log mode '{}', expected silent, compact, verbose or json",
                other
            ))),
        }
    }
}

/// Install the global subscriber.
///
/// # Environment Variables
///
/// - `STA_LOG_LEVEL`: filter directives, e.g. `debug` or `sta_notify=trace,info`
/// - `RUST_LOG`: used when `STA_LOG_LEVEL` is not set
pub fn init_logging(mode: LoggingMode) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = create_env_filter(mode.default_level());
    let installed = match mode {
        LoggingMode::Silent => return Ok(()),
        LoggingMode::Compact => Registry::default()
            .with(fmt::layer().with_target(false).compact())
            .with(filter)
            .try_init(),
        LoggingMode::Verbose => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init(),
        LoggingMode::Json => Registry::default()
            .with(fmt::layer().json().with_current_span(false))
            .with(filter)
            .try_init(),
    };

    installed.map_err(|e| ServerError::Logging(e.to_string()))
}

/// `STA_LOG_LEVEL`, then `RUST_LOG`, then `default_level`
fn create_env_filter(default_level: &str) -> EnvFilter {
    if let Ok(level) = std::env::var("STA_LOG_LEVEL") {
        EnvFilter::new(level)
    } else if let Ok(rust_log) = std::env::var("RUST_LOG") {
        EnvFilter::new(rust_log)
    } else {
        EnvFilter::new(default_level)
    }
}

/// Whether a global subscriber is already installed
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_silent_mode() {
        assert!(init_logging(LoggingMode::Silent).is_ok());
    }

    #[rstest]
    #[case("silent", LoggingMode::Silent)]
    #[case("Compact", LoggingMode::Compact)]
    #[case("VERBOSE", LoggingMode::Verbose)]
    #[case("json", LoggingMode::Json)]
    fn test_mode_names(#[case] name: &str, #[case] expected: LoggingMode) {
        assert_eq!(name.parse::<LoggingMode>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_mode() {
        assert!(matches!(
            "pretty".parse::<LoggingMode>(),
            Err(ServerError::InvalidSetting(_))
        ));
    }
}
