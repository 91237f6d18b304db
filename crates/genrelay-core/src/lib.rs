//! # Genrelay Core
//!
//! An in-process scheduling engine that offloads long-running generation
//! work onto bounded worker pools and re-exposes results as a uniform
//! Server-Sent-Events stream.
//!
//! ## Features
//!
//! - **Bounded priority pools**: rejection-based backpressure, FIFO within a
//!   priority band, queue-wait timeouts, best-effort cancellation
//! - **Dual-pool orchestration**: generation work and housekeeping isolated
//!   in separately tuned pools
//! - **Smart stream routing**: direct incremental streaming when the agent
//!   pool is idle, buffered queued execution with paced replay when it isn't
//! - **Connection bookkeeping**: heartbeat tracking with periodic eviction
//!   of stale streaming connections
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       StreamRouter                           │
//! │   (direct drain when idle, queued replay when busy; SSE)    │
//! └─────────────────────────────────────────────────────────────┘
//!                │                               │
//!                ▼                               ▼
//! ┌───────────────────────────┐   ┌───────────────────────────────┐
//! │      PoolOrchestrator      │   │      ConnectionRegistry       │
//! │  ("agent" + "system" pool) │   │  (heartbeats, stale sweeps)   │
//! └───────────────────────────┘   └───────────────────────────────┘
//!                │
//!                ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         TaskPool                             │
//! │  (priority queue, dispatcher, bounded workers, records)     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Everything is single-process and in-memory: no state survives a restart,
//! and nothing here is a distributed scheduler.
//!
//! ## Example
//!
//! ```ignore
//! use genrelay_core::prelude::*;
//!
//! let orchestrator = Arc::new(PoolOrchestrator::default());
//! let registry = Arc::new(ConnectionRegistry::new());
//! let router = StreamRouter::new(orchestrator.clone(), registry.clone());
//!
//! let frames = router.stream("user-1", "generate", Box::new(|| {
//!     Box::pin(futures::stream::iter(vec![Ok("Hi".into()), Ok(" there".into())]))
//! }));
//! // frames is an async sequence of wire-ready SSE strings
//! ```

pub mod error;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod router;
pub mod sse;
pub mod task;

/// Prelude for common imports
pub mod prelude {
    pub use crate::error::PoolError;
    pub use crate::orchestrator::{
        AggregateSnapshot, OrchestratorConfig, PoolOrchestrator, SharedOrchestrator,
    };
    pub use crate::pool::{PoolConfig, PoolSnapshot, TaskPool};
    pub use crate::registry::{start_sweeper, ConnectionInfo, ConnectionRegistry, RegistryStats};
    pub use crate::router::{PollSchedule, RouterConfig, StreamRouter};
    pub use crate::task::{
        FragmentStream, StreamFactory, TaskItem, TaskPayload, TaskRecord, TaskStatus,
    };
}

// Re-export key types at crate root
pub use error::PoolError;
pub use orchestrator::{AggregateSnapshot, OrchestratorConfig, PoolOrchestrator};
pub use pool::{PoolConfig, PoolSnapshot, TaskPool};
pub use registry::{start_sweeper, ConnectionInfo, ConnectionRegistry, RegistryStats, SweeperHandle};
pub use router::{PollSchedule, RouterConfig, StreamRouter};
pub use task::{FragmentStream, StreamFactory, TaskItem, TaskRecord, TaskStatus};
