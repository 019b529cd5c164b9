//! Error types surfaced at the [`crate::scheduler::Scheduler`] API boundary.

use thiserror::Error;

/// Errors that can arise while driving a [`crate::scheduler::Scheduler`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// `publish` failed because the message ring is saturated.
    #[error("message queue is full")]
    QueueFull,

    /// `publish` failed because the payload exceeds the configured cap.
    #[error("message payload too large: {len} bytes (max {max})")]
    MessageTooLarge { len: usize, max: usize },

    /// `unsubscribe`/`remove_task` given a handle that does not (or no longer)
    /// refer to a live entry.
    #[error("unknown handle")]
    UnknownHandle,

    /// `subscribe`/`add_task` could not grow the registry past its configured
    /// capacity.
    #[error("registry is at capacity")]
    RegistryFull,

    /// A subscription pattern is ill-formed: `#` appeared somewhere other than
    /// as the final character of the pattern.
    #[error("invalid topic pattern: {0}")]
    InvalidPattern(String),

    /// A [`crate::config::Config`] value is out of range for the scheduler
    /// it would construct.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
