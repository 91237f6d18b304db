//! Smart stream routing
//!
//! Given a fragment-stream factory, picks one of two execution paths and
//! normalizes both into a single outgoing sequence of SSE frames:
//!
//! - **Direct**: the agent pool is idle, so the stream is drained inline and
//!   every fragment is emitted the moment it is produced. No pool involved.
//! - **Queued**: the agent pool is busy, so the factory is handed to the
//!   orchestrator for buffered execution and the task is polled until
//!   terminal; the buffered fragments are then replayed with a small pacing
//!   delay so the client still sees a stream.
//!
//! Every outgoing frame touches the connection registry; a terminal
//! non-success becomes exactly one `error` event and ends the stream.

mod schedule;

pub use schedule::{PollSchedule, StatusTicker};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::PoolError;
use crate::orchestrator::{PoolOrchestrator, STREAM_EMPTY_ERROR};
use crate::registry::ConnectionRegistry;
use crate::sse;
use crate::task::{StreamFactory, TaskStatus};

/// Router tuning
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Pacing delay between emitted chunks
    pub chunk_delay: Duration,

    /// Cadence of `waiting` status events on the queued path
    pub status_period: Duration,

    /// Poll cadence for watching a queued task
    pub poll: PollSchedule,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            chunk_delay: Duration::from_millis(10),
            status_period: Duration::from_secs(5),
            poll: PollSchedule::default(),
        }
    }
}

impl RouterConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub fn with_status_period(mut self, period: Duration) -> Self {
        self.status_period = period;
        self
    }

    pub fn with_poll(mut self, poll: PollSchedule) -> Self {
        self.poll = poll;
        self
    }
}

/// Terminal failure of one routed stream, translated to an `error` event
struct RouteError {
    code: &'static str,
    message: String,
}

impl RouteError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Sends frames to the client and keeps the connection heartbeat fresh
struct Emitter {
    tx: mpsc::Sender<String>,
    registry: Arc<ConnectionRegistry>,
    connection_id: String,
}

impl Emitter {
    /// Returns `false` when the client has gone away
    async fn emit(&self, frame: String) -> bool {
        self.registry.touch(&self.connection_id);
        self.tx.send(frame).await.is_ok()
    }
}

/// Routes stream requests between direct and queued execution
pub struct StreamRouter {
    orchestrator: Arc<PoolOrchestrator>,
    registry: Arc<ConnectionRegistry>,
    config: RouterConfig,
}

impl StreamRouter {
    pub fn new(orchestrator: Arc<PoolOrchestrator>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
            config: RouterConfig::default(),
        }
    }

    pub fn with_config(mut self, config: RouterConfig) -> Self {
        self.config = config;
        self
    }

    /// Open a routed SSE stream
    ///
    /// Registers a connection for the stream's lifetime and returns the
    /// sequence of wire-ready SSE frames.
    pub fn stream(
        &self,
        owner: impl Into<String>,
        label: impl Into<String>,
        factory: StreamFactory,
    ) -> ReceiverStream<String> {
        let owner = owner.into();
        let label = label.into();
        let connection_id = format!("{owner}-{}", Uuid::now_v7());

        self.registry.register(&connection_id, &owner, &label);

        let (tx, rx) = mpsc::channel(32);
        let emitter = Emitter {
            tx,
            registry: Arc::clone(&self.registry),
            connection_id: connection_id.clone(),
        };
        let orchestrator = Arc::clone(&self.orchestrator);
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();

        tokio::spawn(async move {
            let direct = orchestrator.is_agent_pool_idle();
            debug!(owner = %owner, label = %label, direct, "Routing stream request");

            let result = if direct {
                stream_direct(&config, &emitter, &label, factory).await
            } else {
                stream_queued(&orchestrator, &config, &emitter, &owner, &label, factory).await
            };

            if let Err(route_err) = result {
                warn!(
                    owner = %owner,
                    label = %label,
                    code = route_err.code,
                    "Stream request failed: {}",
                    route_err.message
                );
                emitter
                    .emit(sse::error(&route_err.message, Some(route_err.code)))
                    .await;
            }

            registry.unregister(&connection_id);
        });

        ReceiverStream::new(rx)
    }
}

/// Direct path: drain the factory's stream inline, chunk by chunk
async fn stream_direct(
    config: &RouterConfig,
    emitter: &Emitter,
    label: &str,
    factory: StreamFactory,
) -> Result<(), RouteError> {
    if !emitter
        .emit(sse::status("started", Some(&format!("{label} started")), None))
        .await
    {
        return Ok(());
    }

    let mut stream = factory();
    let mut joined = String::new();
    let mut count: usize = 0;

    while let Some(next) = stream.next().await {
        let fragment = next.map_err(|e| RouteError::new("stream_error", e))?;
        if fragment.is_empty() {
            continue;
        }
        count += 1;
        joined.push_str(&fragment);

        let frame = sse::chunk(
            &fragment,
            None,
            json!({
                "action": label,
                "chunk_count": count,
                "total_length": joined.len(),
            }),
        );
        if !emitter.emit(frame).await {
            return Ok(());
        }
        tokio::time::sleep(config.chunk_delay).await;
    }

    if count == 0 {
        return Err(RouteError::new("stream_empty", STREAM_EMPTY_ERROR));
    }

    emitter
        .emit(sse::complete(json!({"joined": joined, "count": count})))
        .await;
    Ok(())
}

/// Queued path: buffered execution on the agent pool, then replay
async fn stream_queued(
    orchestrator: &PoolOrchestrator,
    config: &RouterConfig,
    emitter: &Emitter,
    owner: &str,
    label: &str,
    factory: StreamFactory,
) -> Result<(), RouteError> {
    let id = orchestrator.submit_stream(owner, factory).map_err(|e| match e {
        PoolError::QueueFull { .. } => RouteError::new("queue_full", e.to_string()),
        other => RouteError::new("submit_failed", other.to_string()),
    })?;

    if !emitter
        .emit(sse::status("queued", Some("waiting for an available worker"), None))
        .await
    {
        return Ok(());
    }

    let submitted = Instant::now();
    let mut ticker = StatusTicker::new(config.status_period);

    let record = loop {
        let elapsed = submitted.elapsed();
        if ticker.should_fire(Instant::now()) {
            let frame = sse::status(
                "waiting",
                Some(&format!("still queued after {}s", elapsed.as_secs())),
                None,
            );
            if !emitter.emit(frame).await {
                return Ok(());
            }
        }

        match orchestrator.status(id) {
            Some(record) if record.status.is_terminal() => break record,
            Some(_) => {}
            None => {
                return Err(RouteError::new(
                    "task_not_found",
                    format!("task {id} disappeared while waiting"),
                ));
            }
        }

        tokio::time::sleep(config.poll.interval_after(elapsed)).await;
    };

    match record.status {
        TaskStatus::Completed => {
            let value = record.value.unwrap_or(serde_json::Value::Null);
            replay_buffered(config, emitter, label, &value).await;
            Ok(())
        }
        TaskStatus::Failed => {
            let message = record
                .error
                .unwrap_or_else(|| "task failed without error detail".to_string());
            let code = if message == STREAM_EMPTY_ERROR {
                "stream_empty"
            } else {
                "task_failed"
            };
            Err(RouteError::new(code, message))
        }
        TaskStatus::TimedOut => Err(RouteError::new(
            "task_timeout",
            "timed out waiting for a worker slot",
        )),
        TaskStatus::Cancelled => Err(RouteError::new("task_cancelled", "task was cancelled")),
        // Loop only breaks on terminal statuses
        TaskStatus::Pending | TaskStatus::Running => unreachable!(),
    }
}

/// Replay a buffered `{fragments, joined, count}` aggregate as paced chunks
async fn replay_buffered(
    config: &RouterConfig,
    emitter: &Emitter,
    label: &str,
    value: &serde_json::Value,
) {
    let fragments: Vec<&str> = value["fragments"]
        .as_array()
        .map(|arr| arr.iter().filter_map(|f| f.as_str()).collect())
        .unwrap_or_default();

    let mut emitted_length = 0;
    for (index, fragment) in fragments.iter().enumerate() {
        emitted_length += fragment.len();
        let frame = sse::chunk(
            fragment,
            None,
            json!({
                "action": label,
                "chunk_count": index + 1,
                "total_length": emitted_length,
            }),
        );
        if !emitter.emit(frame).await {
            return;
        }
        tokio::time::sleep(config.chunk_delay).await;
    }

    emitter
        .emit(sse::complete(json!({
            "joined": value["joined"],
            "count": value["count"],
        })))
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::pool::PoolConfig;
    use crate::task::TaskItem;
    use futures::stream;
    use serde_json::Value;

    fn fast_config() -> RouterConfig {
        RouterConfig::new()
            .with_chunk_delay(Duration::from_millis(1))
            .with_status_period(Duration::from_millis(200))
    }

    fn parse_event(frame: &str) -> (String, Value) {
        let event = frame
            .lines()
            .find_map(|l| l.strip_prefix("event: "))
            .expect("frame has an event line")
            .to_string();
        let data = frame
            .lines()
            .find_map(|l| l.strip_prefix("data: "))
            .expect("frame has a data line");
        (event, serde_json::from_str(data).expect("payload is JSON"))
    }

    fn hello_factory() -> StreamFactory {
        Box::new(|| {
            Box::pin(stream::iter(vec![
                Ok("Hi".to_string()),
                Ok(" there".to_string()),
            ]))
        })
    }

    async fn collect(mut rx: ReceiverStream<String>) -> Vec<(String, Value)> {
        let mut events = Vec::new();
        while let Some(frame) = rx.next().await {
            events.push(parse_event(&frame));
        }
        events
    }

    #[tokio::test]
    async fn test_idle_pool_streams_directly() {
        let orchestrator = Arc::new(PoolOrchestrator::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = StreamRouter::new(Arc::clone(&orchestrator), Arc::clone(&registry))
            .with_config(fast_config());

        let events = collect(router.stream("user-1", "generate", hello_factory())).await;

        assert_eq!(events[0].0, "status");
        assert_eq!(events[0].1["status"], "started");
        assert_eq!(events[1].0, "chunk");
        assert_eq!(events[1].1["chunk"], "Hi");
        assert_eq!(events[1].1["chunk_count"], 1);
        assert_eq!(events[2].0, "chunk");
        assert_eq!(events[2].1["chunk"], " there");
        let (last_event, last_data) = events.last().unwrap();
        assert_eq!(last_event, "complete");
        assert_eq!(last_data["joined"], "Hi there");
        assert_eq!(last_data["count"], 2);

        // The direct path never touched the agent pool
        assert_eq!(orchestrator.aggregate_status().completed, 0);
        // Connection removed once the stream ended
        assert_eq!(registry.global_stats().total_connections, 0);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_direct_stream_is_an_error() {
        let orchestrator = Arc::new(PoolOrchestrator::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = StreamRouter::new(Arc::clone(&orchestrator), registry).with_config(fast_config());

        let factory: StreamFactory =
            Box::new(|| Box::pin(stream::iter(Vec::<Result<String, String>>::new())));
        let events = collect(router.stream("user-1", "generate", factory)).await;

        let (last_event, last_data) = events.last().unwrap();
        assert_eq!(last_event, "error");
        assert_eq!(last_data["code"], "stream_empty");
        assert!(!events.iter().any(|(e, _)| e == "complete"));

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_direct_stream_failure_emits_single_error() {
        let orchestrator = Arc::new(PoolOrchestrator::default());
        let registry = Arc::new(ConnectionRegistry::new());
        let router = StreamRouter::new(Arc::clone(&orchestrator), registry).with_config(fast_config());

        let factory: StreamFactory = Box::new(|| {
            Box::pin(stream::iter(vec![
                Ok("partial".to_string()),
                Err("generator died".to_string()),
            ]))
        });
        let events = collect(router.stream("user-1", "generate", factory)).await;

        let errors: Vec<_> = events.iter().filter(|(e, _)| e == "error").collect();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].1["code"], "stream_error");
        assert_eq!(errors[0].1["message"], "generator died");
        assert!(!events.iter().any(|(e, _)| e == "complete"));

        orchestrator.shutdown().await.unwrap();
    }

    /// Occupy every agent worker until the returned sender is dropped or used.
    fn block_agent_pool(
        orchestrator: &PoolOrchestrator,
        workers: usize,
    ) -> Vec<tokio::sync::oneshot::Sender<()>> {
        (0..workers)
            .map(|_| {
                let (tx, rx) = tokio::sync::oneshot::channel::<()>();
                let blocker = TaskItem::new("blocker", "busy", 0, Duration::from_secs(60), move |_| {
                    Box::pin(async move {
                        let _ = rx.await;
                        Ok(serde_json::json!(null))
                    })
                });
                orchestrator.submit_agent(blocker).unwrap();
                tx
            })
            .collect()
    }

    #[tokio::test]
    async fn test_busy_pool_replays_buffered_output() {
        let config = OrchestratorConfig::new()
            .with_agent(
                PoolConfig::new("agent")
                    .with_max_workers(1)
                    .with_queue_capacity(10),
            )
            .with_system(PoolConfig::new("system"));
        let orchestrator = Arc::new(PoolOrchestrator::new(config));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = StreamRouter::new(Arc::clone(&orchestrator), registry).with_config(fast_config());

        let blockers = block_agent_pool(&orchestrator, 1);
        // Pool is busy: the request must take the queued path
        assert!(!orchestrator.is_agent_pool_idle());

        let rx = router.stream("user-1", "generate", hello_factory());

        // Free the worker shortly after so the queued task can run
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for tx in blockers {
                let _ = tx.send(());
            }
        });

        let events = collect(rx).await;

        assert_eq!(events[0].0, "status");
        assert_eq!(events[0].1["status"], "queued");

        let chunks: Vec<String> = events
            .iter()
            .filter(|(e, _)| e == "chunk")
            .map(|(_, d)| d["chunk"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(chunks.concat(), "Hi there");

        let (_, complete) = events.iter().find(|(e, _)| e == "complete").unwrap();
        assert_eq!(complete["joined"], "Hi there");
        assert_eq!(complete["count"], 2);

        orchestrator.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_queue_becomes_queue_full_error() {
        let config = OrchestratorConfig::new()
            .with_agent(
                PoolConfig::new("agent")
                    .with_max_workers(1)
                    .with_queue_capacity(1),
            )
            .with_system(PoolConfig::new("system"));
        let orchestrator = Arc::new(PoolOrchestrator::new(config));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = StreamRouter::new(Arc::clone(&orchestrator), registry).with_config(fast_config());

        let (block_tx, block_rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = TaskItem::new("blocker", "busy", 0, Duration::from_secs(60), move |_| {
            Box::pin(async move {
                let _ = block_rx.await;
                Ok(serde_json::json!(null))
            })
        });
        let blocker_id = orchestrator.submit_agent(blocker).unwrap();

        // Wait until the blocker holds the only worker slot, then occupy the
        // only queue slot
        for _ in 0..200 {
            if orchestrator
                .status(blocker_id)
                .is_some_and(|r| r.status == TaskStatus::Running)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let filler = TaskItem::new("filler", "busy", 0, Duration::from_secs(60), |_| {
            Box::pin(async { Ok(serde_json::json!(null)) })
        });
        orchestrator.submit_agent(filler).unwrap();

        let events = collect(router.stream("user-1", "generate", hello_factory())).await;

        let (last_event, last_data) = events.last().unwrap();
        assert_eq!(last_event, "error");
        assert_eq!(last_data["code"], "queue_full");

        let _ = block_tx.send(());
        orchestrator.shutdown().await.unwrap();
    }
}
