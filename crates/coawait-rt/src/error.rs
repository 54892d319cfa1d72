// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error types for result channels, tasks, and the waiter configuration.

use thiserror::Error;

/// Misuse of a [`ResultChannel`](crate::channel::ResultChannel).
///
/// These are programmer errors, not outcomes: correct code never sees them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel left `Empty` once already.
    #[error("result channel already resolved")]
    AlreadyResolved,
    /// The outcome was taken by an earlier `consume`.
    #[error("result channel outcome already consumed")]
    AlreadyConsumed,
    /// A continuation is already waiting on this channel.
    #[error("a continuation is already registered on this channel")]
    ContinuationRegistered,
}

/// Failure stored in a channel and re-raised to whoever consumes it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The wrapped computation failed.
    #[error("operation failed: {0}")]
    OperationFailed(String),
    /// The task body panicked; the panic message is kept.
    #[error("task panicked: {0}")]
    Panicked(String),
    /// The adapter refused to spawn another waiter thread.
    #[error("waiter thread limit reached ({limit} live)")]
    WaiterLimit { limit: usize },
    /// The OS refused to create a waiter thread.
    #[error("failed to spawn waiter thread: {0}")]
    WaiterSpawn(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
}

impl TaskError {
    /// Shorthand for [`TaskError::OperationFailed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        TaskError::OperationFailed(msg.into())
    }

    /// The user-visible message of a failed or panicked operation.
    pub fn payload(&self) -> Option<&str> {
        match self {
            TaskError::OperationFailed(msg) | TaskError::Panicked(msg) => Some(msg),
            _ => None,
        }
    }
}

/// Malformed environment configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: expected a positive integer")]
    InvalidValue { var: &'static str, value: String },
}
