//! Error types for scheduler and memory operations.

use std::any::Any;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error taxonomy shared by every component and by external collaborators
/// (model engines, GPU wrappers) that report through the same channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No error.
    Success,
    /// Caller supplied an invalid argument.
    InvalidArgument,
    /// A bounded resource (arena, queue, permits) is exhausted.
    ResourceExhausted,
    /// Unexpected failure caught at a task boundary.
    InternalError,
    /// Platform query or system call failed.
    PlatformError,
    /// Network transport failure.
    NetworkError,
    /// Operation exceeded its deadline.
    TimeoutError,
    /// Requested model is not registered.
    ModelNotFound,
    /// Inference engine reported a failure.
    InferenceFailed,
    /// GPU runtime failure.
    GpuError,
    /// Memory subsystem failure.
    MemoryError,
    /// Task was cancelled before producing a value.
    Cancelled,
}

impl ErrorCode {
    /// Canonical message used when an error is created without one.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "Success",
            Self::InvalidArgument => "Invalid argument",
            Self::ResourceExhausted => "Resource exhausted",
            Self::InternalError => "Internal error",
            Self::PlatformError => "Platform error",
            Self::NetworkError => "Network error",
            Self::TimeoutError => "Timeout error",
            Self::ModelNotFound => "Model not found",
            Self::InferenceFailed => "Inference failed",
            Self::GpuError => "GPU error",
            Self::MemoryError => "Memory error",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error carried by task handles and [`Outcome`](crate::core::Outcome)s.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct TaskError {
    code: ErrorCode,
    message: String,
}

impl TaskError {
    /// Build an error; an empty message is replaced by the code's canonical text.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        let message = message.into();
        let message = if message.is_empty() {
            code.as_str().to_owned()
        } else {
            message
        };
        Self { code, message }
    }

    /// Error code.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        self.code
    }

    /// Human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Task resolved without running.
    pub fn cancelled(reason: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, reason)
    }

    /// Build an `InternalError` from a caught panic payload.
    #[must_use]
    pub fn from_panic(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "task panicked".to_owned());
        Self::new(ErrorCode::InternalError, message)
    }

    /// Convert an arbitrary error, keeping the code of an embedded `TaskError`.
    #[must_use]
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        match err.downcast_ref::<Self>() {
            Some(task_err) => task_err.clone(),
            None => Self::new(ErrorCode::InternalError, format!("{err:#}")),
        }
    }
}

/// Errors returned synchronously by scheduler and memory APIs.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Pool or scheduler is shutting down; no new work is accepted.
    #[error("pool is shutting down")]
    PoolShutdown,
    /// Queue reached its configured depth.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Configuration value missing or malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Manager used before `initialize`.
    #[error("{0} not initialized")]
    NotInitialized(&'static str),
    /// Worker id does not belong to the pool.
    #[error("unknown worker {0}")]
    UnknownWorker(usize),
    /// Allocation handle is not live in the arena.
    #[error("no live allocation at offset {0}")]
    UnknownAllocation(usize),
    /// Byte access outside an allocation.
    #[error("access of {len} bytes at {offset} exceeds allocation of {size} bytes")]
    OutOfBounds {
        /// Offset inside the allocation.
        offset: usize,
        /// Requested length.
        len: usize,
        /// Usable size of the allocation.
        size: usize,
    },
    /// The OS refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    WorkerSpawn(String),
    /// `Outcome::value` called on an error outcome.
    #[error("attempted to access value of failed outcome ({code}: {message})")]
    ValueOfFailedOutcome {
        /// Code of the stored error.
        code: ErrorCode,
        /// Message of the stored error.
        message: String,
    },
}

impl CoreError {
    /// Map onto the shared taxonomy.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::PoolShutdown | Self::NotInitialized(_) | Self::ValueOfFailedOutcome { .. } => {
                ErrorCode::InternalError
            }
            Self::QueueFull(_) => ErrorCode::ResourceExhausted,
            Self::InvalidConfig(_) | Self::UnknownWorker(_) => ErrorCode::InvalidArgument,
            Self::UnknownAllocation(_) | Self::OutOfBounds { .. } => ErrorCode::MemoryError,
            Self::WorkerSpawn(_) => ErrorCode::PlatformError,
        }
    }
}

impl From<CoreError> for TaskError {
    fn from(err: CoreError) -> Self {
        Self::new(err.code(), err.to_string())
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
