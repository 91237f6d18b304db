//! Dual-pool orchestration
//!
//! Owns exactly two pools with different tuning: "agent" (few workers, small
//! queue, long queue timeout — generation workloads) and "system" (more
//! workers, larger queue, short timeout — housekeeping). The split keeps a
//! cleanup job from ever waiting behind a long-running generation job, and
//! vice versa.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::error::PoolError;
use crate::pool::{PoolConfig, PoolSnapshot, TaskPool};
use crate::task::{StreamFactory, TaskItem, TaskRecord};

/// Error text recorded when a drained stream yields nothing
///
/// An empty generation is a failure, not a silent success.
pub const STREAM_EMPTY_ERROR: &str = "stream produced no fragments";

/// Priority assigned to queued stream work
const STREAM_PRIORITY: u8 = 5;

/// Orchestrator configuration: tuning for both pools
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub agent: PoolConfig,
    pub system: PoolConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agent: PoolConfig::new("agent")
                .with_max_workers(2)
                .with_queue_capacity(10)
                .with_queue_timeout(Duration::from_secs(300)),
            system: PoolConfig::new("system")
                .with_max_workers(4)
                .with_queue_capacity(50)
                .with_queue_timeout(Duration::from_secs(30)),
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agent(mut self, config: PoolConfig) -> Self {
        self.agent = config;
        self
    }

    pub fn with_system(mut self, config: PoolConfig) -> Self {
        self.system = config;
        self
    }
}

/// Merged counters of both pools
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct AggregateSnapshot {
    pub agent: PoolSnapshot,
    pub system: PoolSnapshot,
    pub running: usize,
    pub pending: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Owns the "agent" and "system" pools and routes operations across them
pub struct PoolOrchestrator {
    agent: TaskPool,
    system: TaskPool,
}

impl PoolOrchestrator {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            agent: TaskPool::new(config.agent),
            system: TaskPool::new(config.system),
        }
    }

    /// Submit to the generation pool
    pub fn submit_agent(&self, item: TaskItem) -> Result<Uuid, PoolError> {
        self.agent.submit(item)
    }

    /// Submit to the housekeeping pool
    pub fn submit_system(&self, item: TaskItem) -> Result<Uuid, PoolError> {
        self.system.submit(item)
    }

    /// Queue a fragment stream for buffered execution on the agent pool
    ///
    /// The worker drains the stream to completion before anything is
    /// observable, returning `{fragments, joined, count}` as the task value.
    /// This converts streaming into batch on purpose: first-chunk latency is
    /// traded for keeping generation work isolated in its own pool.
    #[instrument(skip(self, factory), fields(owner = %owner))]
    pub fn submit_stream(&self, owner: &str, factory: StreamFactory) -> Result<Uuid, PoolError> {
        let queue_timeout = self.agent.config().queue_timeout;
        let item = TaskItem::new(
            owner,
            "stream",
            STREAM_PRIORITY,
            queue_timeout,
            move |token| {
                Box::pin(async move {
                    let mut stream = factory();
                    let mut fragments: Vec<String> = Vec::new();
                    while let Some(next) = stream.next().await {
                        if token.is_cancelled() {
                            return Err("stream drain cancelled".to_string());
                        }
                        let fragment = next?;
                        if !fragment.is_empty() {
                            fragments.push(fragment);
                        }
                    }
                    if fragments.is_empty() {
                        return Err(STREAM_EMPTY_ERROR.to_string());
                    }
                    let joined = fragments.concat();
                    let count = fragments.len();
                    Ok(json!({
                        "fragments": fragments,
                        "joined": joined,
                        "count": count,
                    }))
                })
            },
        );
        self.agent.submit(item)
    }

    /// Look up a task record, probing the agent pool then the system pool
    pub fn status(&self, id: Uuid) -> Option<TaskRecord> {
        self.agent.status(id).or_else(|| self.system.status(id))
    }

    /// Best-effort cancel, probing the agent pool then the system pool
    pub fn cancel(&self, id: Uuid) -> bool {
        if self.agent.status(id).is_some() {
            self.agent.cancel(id)
        } else if self.system.status(id).is_some() {
            self.system.cancel(id)
        } else {
            false
        }
    }

    /// Drop old terminal records from both pools
    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.agent.cleanup(max_age) + self.system.cleanup(max_age)
    }

    /// Merged counters for observability
    pub fn aggregate_status(&self) -> AggregateSnapshot {
        let agent = self.agent.snapshot();
        let system = self.system.snapshot();
        AggregateSnapshot {
            running: agent.running + system.running,
            pending: agent.pending + system.pending,
            completed: agent.completed + system.completed,
            failed: agent.failed + system.failed,
            agent,
            system,
        }
    }

    /// True iff the agent pool has nothing pending and nothing running
    ///
    /// This single predicate drives the direct-vs-queued routing decision.
    pub fn is_agent_pool_idle(&self) -> bool {
        self.agent.is_idle()
    }

    /// Shut down both pools
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        self.agent.shutdown().await?;
        self.system.shutdown().await?;
        Ok(())
    }
}

impl Default for PoolOrchestrator {
    fn default() -> Self {
        Self::new(OrchestratorConfig::default())
    }
}

/// Shared handle used by the router and the API layer
pub type SharedOrchestrator = Arc<PoolOrchestrator>;
