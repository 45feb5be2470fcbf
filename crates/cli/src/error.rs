//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Settings file not found
    #[error("Settings file not found: {path}")]
    ConfigNotFound { path: String },

    /// Settings, storage or queue failure
    #[error(transparent)]
    Contract(#[from] contracts::ContractError),

    /// A seed line is not a usable work item
    #[error("Bad work item at {path}:{line}: {message}")]
    Seed {
        path: String,
        line: usize,
        message: String,
    },

    /// Dispatcher failed to start or a worker died
    #[error("Dispatcher failed: {0}")]
    Dispatcher(#[from] dispatcher::DispatcherError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error wrapper
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn seed(path: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Seed {
            path: path.into(),
            line,
            message: message.into(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
