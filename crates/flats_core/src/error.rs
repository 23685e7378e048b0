//! Error types for the dispatch core.
//!
//! Each component has its own error enum. [`CoreError`] gathers them and
//! [`ErrorClass`] sorts every failure into one of four classes that decide how
//! it is reported.

use crate::types::EntityHandle;
use thiserror::Error;

/// How a failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Bad arguments or missing permission. Reported to the requester, no state change.
    Validation,
    /// Operation on an entity with no active record. Reported, no state change.
    NotFound,
    /// A scheduled task body failed. Logged; the task ends as `Failed`.
    TransientTask,
    /// Invariant breach. Fatal to the affected operation, logged at error level.
    ConsistencyViolation,
}

/// State store errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("No active record for {0}")]
    NotFound(EntityHandle),

    #[error("Invalid attribute '{key}' on {handle}: {reason}")]
    InvalidAttribute {
        handle: EntityHandle,
        key: String,
        reason: String,
    },

    #[error("A record for {0} already exists")]
    DuplicateRecord(EntityHandle),

    #[error("Record of {0} changed while it was being updated")]
    Conflict(EntityHandle),
}

impl StoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StoreError::NotFound(_) => ErrorClass::NotFound,
            StoreError::InvalidAttribute { .. } => ErrorClass::Validation,
            StoreError::DuplicateRecord(_) | StoreError::Conflict(_) => {
                ErrorClass::ConsistencyViolation
            }
        }
    }
}

/// Event handling errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EventError {
    #[error("Handler execution error: {0}")]
    HandlerExecution(String),

    #[error("Failed to decode {kind} payload: {reason}")]
    Payload { kind: String, reason: String },

    #[error("Event feed is closed")]
    FeedClosed,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl EventError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EventError::Store(e) => e.class(),
            EventError::FeedClosed => ErrorClass::ConsistencyViolation,
            _ => ErrorClass::TransientTask,
        }
    }
}

/// Scheduled task errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Repeating task period must be at least one tick")]
    InvalidPeriod,

    #[error("No async runtime available for out-of-band work")]
    NoRuntime,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TaskError {
    pub fn class(&self) -> ErrorClass {
        match self {
            TaskError::Store(e) => e.class(),
            TaskError::InvalidPeriod => ErrorClass::Validation,
            _ => ErrorClass::TransientTask,
        }
    }
}

/// Command invocation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("You do not have permission to use this command")]
    PermissionDenied { command: String },

    #[error("Usage: {usage}")]
    Usage { usage: String },

    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Player '{0}' is not online")]
    PlayerNotFound(String),

    /// Domain-level refusal raised by a handler; the message is shown verbatim.
    #[error("{0}")]
    Rejected(String),

    /// The help listing, returned when no subcommand matched.
    #[error("{}", .0.join("\n"))]
    Help(Vec<String>),

    #[error("Command handler failed: {0}")]
    Internal(String),

    #[error("Command was cancelled: {0}")]
    Cancelled(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Task(#[from] TaskError),
}

impl CommandError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CommandError::Store(e) => e.class(),
            CommandError::Task(e) => e.class(),
            CommandError::Internal(_) => ErrorClass::ConsistencyViolation,
            CommandError::Cancelled(_) => ErrorClass::NotFound,
            _ => ErrorClass::Validation,
        }
    }

    /// Short message suitable for the requester.
    pub fn user_message(&self) -> String {
        match self.class() {
            ErrorClass::ConsistencyViolation | ErrorClass::TransientTask => {
                "An internal error occurred while running this command".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Umbrella error for callers that drive several components at once.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Event(#[from] EventError),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl CoreError {
    pub fn class(&self) -> ErrorClass {
        match self {
            CoreError::Store(e) => e.class(),
            CoreError::Event(e) => e.class(),
            CoreError::Task(e) => e.class(),
            CoreError::Command(e) => e.class(),
        }
    }
}

/// Result type for state store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for event handlers
pub type EventResult<T> = Result<T, EventError>;

/// Result type for task bodies and scheduling
pub type TaskResult<T> = Result<T, TaskError>;

/// Result type for command handlers
pub type CommandResult<T> = Result<T, CommandError>;
