//! Error types for the scheduling core

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by pool operations
///
/// Execution failures, queue-wait timeouts and cancellations are not errors
/// at this level; they are terminal [`TaskStatus`](crate::TaskStatus) values
/// carried on the task record.
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// Pending queue is at capacity; callers should back off and retry
    #[error("queue for pool '{pool}' is full (capacity {capacity})")]
    QueueFull { pool: String, capacity: usize },

    /// Unknown task id
    #[error("no task found with id {0}")]
    TaskNotFound(Uuid),

    /// Pool no longer accepts submissions
    #[error("pool '{0}' is shutting down")]
    ShuttingDown(String),

    /// In-flight workers did not finish within the shutdown deadline
    #[error("graceful shutdown timed out")]
    ShutdownTimeout,
}

impl PoolError {
    /// Whether the caller should treat this as a retryable backpressure signal
    pub fn is_retryable(&self) -> bool {
        matches!(self, PoolError::QueueFull { .. })
    }
}
