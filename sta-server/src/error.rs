use std::path::PathBuf;

use sta_notify::NotifyError;
use thiserror::Error;

/// Errors raised while starting or running the server
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for the expected structure
    #[error("Failed to parse configuration file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A command line override is out of range
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// The notification subsystem failed to start
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// The log subscriber could not be installed
    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = ServerError::InvalidSetting("status interval must be a number".to_string());
        assert_eq!(
            error.to_string(),
            "Invalid setting: status interval must be a number"
        );

        let error = ServerError::ConfigRead {
            path: PathBuf::from("/etc/sta.json"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        };
        assert_eq!(
            error.to_string(),
            "Failed to read configuration file /etc/sta.json: missing"
        );
    }

    #[test]
    fn test_notify_errors_pass_through() {
        let error: ServerError = NotifyError::Configuration("bad queue".to_string()).into();
        assert_eq!(error.to_string(), "Configuration error: bad queue");
    }
}
