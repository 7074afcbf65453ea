//! Error handling for the devserve CLI.
//!
//! Library errors are wrapped in [`CliError`] and turned into `miette`
//! reports at the very end, in `main`.

use miette::Report;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level CLI error type.
#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration file could not be found, read or parsed
    #[error("Failed to load {}: {}", .path.display(), .message)]
    ConfigFile {
        path: PathBuf,
        message: String,
    },

    /// Resolution or startup failed inside the server
    #[error(transparent)]
    Serve(#[from] devserve::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for CLI operations.
pub type Result<T> = std::result::Result<T, CliError>;

/// Convert a [`CliError`] into a `miette` report for display.
pub fn cli_error_to_miette(err: CliError) -> Report {
    match err {
        CliError::ConfigFile { path, message } => miette::miette!(
            "Failed to load {}\n\n{}\n\nHint: Check the file's syntax and field names",
            path.display(),
            message
        ),
        CliError::Serve(devserve::Error::Config(e)) => {
            miette::miette!("Invalid options: {}", e)
        }
        CliError::Serve(devserve::Error::Server(devserve::ServerError::Bind { addr, source })) => {
            miette::miette!(
                "Could not listen on {}: {}\n\nHint: Pick another port with --port",
                addr,
                source
            )
        }
        _ => miette::miette!("{}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_file_message() {
        let err = CliError::ConfigFile {
            path: PathBuf::from("devserve.config.json"),
            message: "unknown field `bad`".to_string(),
        };
        let report = format!("{}", cli_error_to_miette(err));
        assert!(report.contains("devserve.config.json"));
        assert!(report.contains("unknown field `bad`"));
    }

    #[test]
    fn test_config_error_passes_through() {
        let err = CliError::from(devserve::Error::from(devserve::ConfigError::Http2Unsupported));
        let report = format!("{}", cli_error_to_miette(err));
        assert!(report.starts_with("Invalid options"));
    }
}
