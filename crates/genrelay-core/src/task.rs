//! Task data model
//!
//! A [`TaskItem`] is one schedulable unit of work; the pool that accepts it
//! creates a matching [`TaskRecord`] which is the only mutable view of the
//! task's lifecycle.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Outcome of executing a task payload
pub type TaskResult = Result<serde_json::Value, String>;

/// Boxed future produced by a task payload
pub type TaskFuture = BoxFuture<'static, TaskResult>;

/// Executable payload of a task
///
/// The cancellation token is a consumer obligation: the scheduler never
/// force-kills a running payload. A payload that ignores its token runs to
/// completion regardless of cancellation or shutdown.
pub type TaskPayload = Box<dyn FnOnce(CancellationToken) -> TaskFuture + Send + 'static>;

/// Lazily-produced sequence of text fragments
///
/// Not restartable: a factory must be called at most once.
pub type FragmentStream = BoxStream<'static, Result<String, String>>;

/// Zero-arg factory producing a fragment stream
pub type StreamFactory = Box<dyn FnOnce() -> FragmentStream + Send + 'static>;

/// One schedulable unit of work
///
/// Immutable once created. Lower `priority` values are dispatched first;
/// `queue_timeout` bounds how long the item may wait before execution, not
/// how long it may run.
pub struct TaskItem {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub priority: u8,
    pub created_at: DateTime<Utc>,
    pub queue_timeout: Duration,
    pub(crate) payload: TaskPayload,
}

impl TaskItem {
    pub fn new<F>(
        owner: impl Into<String>,
        kind: impl Into<String>,
        priority: u8,
        queue_timeout: Duration,
        payload: F,
    ) -> Self
    where
        F: FnOnce(CancellationToken) -> TaskFuture + Send + 'static,
    {
        Self {
            id: Uuid::now_v7(),
            owner: owner.into(),
            kind: kind.into(),
            priority,
            created_at: Utc::now(),
            queue_timeout,
            payload: Box::new(payload),
        }
    }
}

impl fmt::Debug for TaskItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskItem")
            .field("id", &self.id)
            .field("owner", &self.owner)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("created_at", &self.created_at)
            .field("queue_timeout", &self.queue_timeout)
            .finish_non_exhaustive()
    }
}

/// Task lifecycle status
///
/// `Pending -> Running -> {Completed|Failed}`; `Pending -> TimedOut` when the
/// queue wait is exceeded before dispatch; `Running -> Cancelled` only for
/// items dispatched to a worker whose execution has not begun. No transition
/// leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::TimedOut
                | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::TimedOut => "timed_out",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Mutable lifecycle record of a submitted task
///
/// Created in `Pending` state at submission time, exactly one per item, and
/// mutated only by the owning pool. `value` is set iff `Completed`, `error`
/// iff `Failed`.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct TaskRecord {
    pub id: Uuid,
    pub owner: String,
    pub kind: String,
    pub priority: u8,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub value: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

impl TaskRecord {
    pub(crate) fn pending(item: &TaskItem) -> Self {
        Self {
            id: item.id,
            owner: item.owner.clone(),
            kind: item.kind.clone(),
            priority: item.priority,
            status: TaskStatus::Pending,
            value: None,
            error: None,
            created_at: item.created_at,
            started_at: None,
            finished_at: None,
            duration_seconds: None,
        }
    }
}
