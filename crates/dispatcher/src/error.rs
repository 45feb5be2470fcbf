//! Dispatcher error types
//!
//! These are startup errors. Per-item failures are `TransformError`s and
//! never leave the worker loop.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatcherError {
    /// Sink creation error
    #[error("failed to create sink '{name}': {message}")]
    SinkCreation { name: String, message: String },

    /// Route names a transform nobody registered
    #[error("route '{route}' uses unknown transform '{transform}'")]
    UnknownTransform { route: String, transform: String },

    /// Route notifies a queue the dispatcher was not given
    #[error("route '{route}' notifies unknown queue '{queue}'")]
    UnknownQueue { route: String, queue: String },

    #[error("contract error: {0}")]
    Contract(#[from] contracts::ContractError),

    /// Worker task panicked or was aborted
    #[error("worker {worker} failed: {message}")]
    Worker { worker: usize, message: String },
}

impl DispatcherError {
    pub fn sink_creation(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkCreation {
            name: name.into(),
            message: message.into(),
        }
    }
}
