//! Bounded priority worker pool
//!
//! One dedicated dispatcher loop per pool moves items from the pending queue
//! to a semaphore-bounded set of worker tasks. Submission is non-blocking and
//! rejected outright when the queue is full; only the dispatcher ever waits
//! for a worker slot.

mod queue;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use self::queue::PendingQueue;
use crate::error::PoolError;
use crate::task::{TaskItem, TaskRecord, TaskStatus};

/// Pool configuration
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Pool name used in logs and error messages
    pub name: String,

    /// Maximum concurrent worker tasks
    pub max_workers: usize,

    /// Maximum pending (not yet dispatched) items
    pub queue_capacity: usize,

    /// Default maximum queue wait before an item is expired unrun
    pub queue_timeout: Duration,

    /// Graceful shutdown deadline for in-flight workers
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            max_workers: 4,
            queue_capacity: 32,
            queue_timeout: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Set maximum concurrent workers
    pub fn with_max_workers(mut self, max: usize) -> Self {
        self.max_workers = max.max(1);
        self
    }

    /// Set pending queue capacity
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Set the default queue-wait timeout
    pub fn with_queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }

    /// Set the graceful shutdown deadline
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Point-in-time pool counters for observability
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct PoolSnapshot {
    pub name: String,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub cancelled: usize,
    pub max_workers: usize,
    pub queue_capacity: usize,
}

/// Handle to an item that has been dispatched to a worker
///
/// `claimed` is the single arbiter of the cancel-vs-start race: whichever
/// side flips it first decides the task's fate.
#[derive(Clone)]
struct DispatchHandle {
    token: CancellationToken,
    claimed: Arc<AtomicBool>,
}

struct PoolShared {
    config: PoolConfig,
    queue: Mutex<PendingQueue>,
    records: RwLock<HashMap<Uuid, TaskRecord>>,
    handles: Mutex<HashMap<Uuid, DispatchHandle>>,
    notify: Notify,
    workers: Arc<Semaphore>,
    /// Items popped by the dispatcher but not yet handed to a worker.
    /// Counted against queue capacity so the bound stays exact.
    parked: AtomicUsize,
}

/// Bounded worker pool with a priority dispatcher
///
/// # Example
///
/// ```ignore
/// let pool = TaskPool::new(PoolConfig::new("agent").with_max_workers(2));
///
/// let item = TaskItem::new("user-1", "generate", 5, Duration::from_secs(300), |_token| {
///     Box::pin(async { Ok(json!({"text": "done"})) })
/// });
/// let id = pool.submit(item)?;
///
/// // ... later
/// pool.shutdown().await?;
/// ```
pub struct TaskPool {
    shared: Arc<PoolShared>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl TaskPool {
    /// Create the pool and start its dispatcher loop
    pub fn new(config: PoolConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PendingQueue::new(config.queue_capacity)),
            records: RwLock::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            notify: Notify::new(),
            workers: Arc::new(Semaphore::new(config.max_workers)),
            parked: AtomicUsize::new(0),
            config,
        });

        let dispatcher = tokio::spawn(run_dispatcher(Arc::clone(&shared), shutdown_rx));
        info!(
            pool = %shared.config.name,
            max_workers = shared.config.max_workers,
            queue_capacity = shared.config.queue_capacity,
            "Pool started"
        );

        Self {
            shared,
            shutdown_tx,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Submit a task for execution
    ///
    /// Never blocks: returns [`PoolError::QueueFull`] immediately when the
    /// pending queue is at capacity.
    #[instrument(skip(self, item), fields(pool = %self.shared.config.name, task_id = %item.id))]
    pub fn submit(&self, item: TaskItem) -> Result<Uuid, PoolError> {
        if *self.shutdown_tx.borrow() {
            return Err(PoolError::ShuttingDown(self.shared.config.name.clone()));
        }

        let id = item.id;
        let record = TaskRecord::pending(&item);
        self.shared.records.write().insert(id, record);

        let accepted = {
            let mut queue = self.shared.queue.lock();
            let waiting = queue.len() + self.shared.parked.load(Ordering::SeqCst);
            waiting < self.shared.config.queue_capacity && queue.push(item)
        };
        if !accepted {
            self.shared.records.write().remove(&id);
            return Err(PoolError::QueueFull {
                pool: self.shared.config.name.clone(),
                capacity: self.shared.config.queue_capacity,
            });
        }

        self.shared.notify.notify_one();
        debug!("Task queued");
        Ok(id)
    }

    /// Look up the record of a submitted task
    pub fn status(&self, id: Uuid) -> Option<TaskRecord> {
        self.shared.records.read().get(&id).cloned()
    }

    /// Best-effort cancellation
    ///
    /// Succeeds only for items already dispatched to a worker handle whose
    /// execution has not begun. Items still sitting in the raw queue have no
    /// handle yet and return `false` — the queue-wait timeout is the only way
    /// a purely-pending item is dropped. Terminal items also return `false`.
    pub fn cancel(&self, id: Uuid) -> bool {
        let handle = match self.shared.handles.lock().get(&id) {
            Some(handle) => handle.clone(),
            None => return false,
        };

        if handle
            .claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // The worker got there first; execution is underway.
            return false;
        }

        handle.token.cancel();
        let mut records = self.shared.records.write();
        if let Some(record) = records.get_mut(&id) {
            if !record.status.is_terminal() {
                record.status = TaskStatus::Cancelled;
                record.finished_at = Some(Utc::now());
            }
        }
        info!(pool = %self.shared.config.name, task_id = %id, "Task cancelled before start");
        true
    }

    /// Drop terminal records older than `max_age`
    ///
    /// Pending and Running entries are never removed. Returns the number of
    /// records dropped.
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let Ok(max_age) = chrono::Duration::from_std(max_age) else {
            return 0;
        };
        let cutoff = Utc::now() - max_age;

        let mut records = self.shared.records.write();
        let before = records.len();
        records.retain(|_, record| match (record.status.is_terminal(), record.finished_at) {
            (true, Some(finished_at)) => finished_at >= cutoff,
            _ => true,
        });
        let removed = before - records.len();
        drop(records);

        if removed > 0 {
            debug!(pool = %self.shared.config.name, removed, "Cleaned up old task records");
        }
        removed
    }

    /// Current pool counters
    pub fn snapshot(&self) -> PoolSnapshot {
        let records = self.shared.records.read();
        let mut snapshot = PoolSnapshot {
            name: self.shared.config.name.clone(),
            pending: 0,
            running: 0,
            completed: 0,
            failed: 0,
            timed_out: 0,
            cancelled: 0,
            max_workers: self.shared.config.max_workers,
            queue_capacity: self.shared.config.queue_capacity,
        };
        for record in records.values() {
            match record.status {
                TaskStatus::Pending => snapshot.pending += 1,
                TaskStatus::Running => snapshot.running += 1,
                TaskStatus::Completed => snapshot.completed += 1,
                TaskStatus::Failed => snapshot.failed += 1,
                TaskStatus::TimedOut => snapshot.timed_out += 1,
                TaskStatus::Cancelled => snapshot.cancelled += 1,
            }
        }
        snapshot
    }

    /// True iff the pool has no Pending and no Running items
    pub fn is_idle(&self) -> bool {
        !self
            .shared
            .records
            .read()
            .values()
            .any(|record| matches!(record.status, TaskStatus::Pending | TaskStatus::Running))
    }

    /// Stop the dispatcher and wait for in-flight workers
    ///
    /// New submissions are refused as soon as shutdown begins. Workers that
    /// are already running are waited for up to the configured shutdown
    /// deadline; they are never force-killed.
    #[instrument(skip(self), fields(pool = %self.shared.config.name))]
    pub async fn shutdown(&self) -> Result<(), PoolError> {
        if self.shutdown_tx.send(true).is_err() {
            return Ok(());
        }
        self.shared.notify.notify_one();

        let dispatcher = self.dispatcher.lock().take();
        if let Some(handle) = dispatcher {
            let _ = handle.await;
        }

        let deadline = tokio::time::Instant::now() + self.shared.config.shutdown_timeout;
        loop {
            let available = self.shared.workers.available_permits();
            if available == self.shared.config.max_workers {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.shared.config.max_workers - available,
                    "Shutdown deadline reached with workers still running"
                );
                return Err(PoolError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        info!("Pool stopped");
        Ok(())
    }
}

/// Dispatcher loop: pending queue -> bounded worker slots
async fn run_dispatcher(shared: Arc<PoolShared>, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        // Wait for work or shutdown
        let item = loop {
            if *shutdown_rx.borrow() {
                debug!(pool = %shared.config.name, "Dispatcher exiting");
                return;
            }
            {
                let mut queue = shared.queue.lock();
                if let Some(item) = queue.pop() {
                    // Popped but not yet handed to a worker; still counts
                    // against queue capacity.
                    shared.parked.fetch_add(1, Ordering::SeqCst);
                    break item;
                }
            }
            tokio::select! {
                _ = shared.notify.notified() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        };

        // Expire items that waited past their queue timeout; they never ran.
        if expire_if_stale(&shared, &item) {
            shared.parked.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        // The item is dispatched from here on: it gets a cancellation handle
        // and becomes cancellable until a worker claims it.
        let token = CancellationToken::new();
        let handle = DispatchHandle {
            token: token.clone(),
            claimed: Arc::new(AtomicBool::new(false)),
        };
        shared.handles.lock().insert(item.id, handle.clone());

        // Block only the dispatcher, never callers, until a slot frees. An
        // item popped but still slotless when shutdown fires is dropped; its
        // record stays Pending and dies with the process.
        let permit = tokio::select! {
            permit = Arc::clone(&shared.workers).acquire_owned() => {
                let Ok(permit) = permit else { return };
                permit
            }
            _ = shutdown_rx.changed() => {
                debug!(pool = %shared.config.name, task_id = %item.id, "Shutdown while waiting for a worker slot");
                shared.handles.lock().remove(&item.id);
                shared.parked.fetch_sub(1, Ordering::SeqCst);
                return;
            }
        };

        // Cancelled while waiting for a slot: nothing left to run.
        if handle.claimed.load(Ordering::SeqCst) {
            shared.handles.lock().remove(&item.id);
            shared.parked.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        // The wait for a worker slot counts as queue wait too; re-check
        // before the item is allowed to run.
        if expire_if_stale(&shared, &item) {
            shared.handles.lock().remove(&item.id);
            shared.parked.fetch_sub(1, Ordering::SeqCst);
            continue;
        }

        {
            let mut records = shared.records.write();
            if let Some(record) = records.get_mut(&item.id) {
                record.status = TaskStatus::Running;
            }
        }
        shared.parked.fetch_sub(1, Ordering::SeqCst);

        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let _permit = permit;
            let id = item.id;

            if handle
                .claimed
                .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                .is_err()
            {
                // Cancelled between dispatch and start; record already terminal.
                shared.handles.lock().remove(&id);
                return;
            }

            let started_at = Utc::now();
            {
                let mut records = shared.records.write();
                if let Some(record) = records.get_mut(&id) {
                    record.started_at = Some(started_at);
                }
            }
            debug!(pool = %shared.config.name, task_id = %id, "Task started");

            let result = (item.payload)(token).await;

            let finished_at = Utc::now();
            let duration = (finished_at - started_at).num_milliseconds() as f64 / 1000.0;
            {
                let mut records = shared.records.write();
                if let Some(record) = records.get_mut(&id) {
                    if !record.status.is_terminal() {
                        match result {
                            Ok(value) => {
                                record.status = TaskStatus::Completed;
                                record.value = Some(value);
                            }
                            Err(error) => {
                                warn!(pool = %shared.config.name, task_id = %id, error = %error, "Task failed");
                                record.status = TaskStatus::Failed;
                                record.error = Some(error);
                            }
                        }
                        record.finished_at = Some(finished_at);
                        record.duration_seconds = Some(duration);
                    }
                }
            }
            shared.handles.lock().remove(&id);
            debug!(pool = %shared.config.name, task_id = %id, duration, "Task finished");
        });
    }
}

/// Mark an item TimedOut if its queue wait exceeded the limit; it never ran.
fn expire_if_stale(shared: &PoolShared, item: &TaskItem) -> bool {
    let waited = Utc::now().signed_duration_since(item.created_at);
    let expired = waited
        .to_std()
        .map(|waited| waited > item.queue_timeout)
        .unwrap_or(false);
    if !expired {
        return false;
    }

    let mut records = shared.records.write();
    if let Some(record) = records.get_mut(&item.id) {
        if !record.status.is_terminal() {
            record.status = TaskStatus::TimedOut;
            record.finished_at = Some(Utc::now());
        }
    }
    drop(records);
    warn!(
        pool = %shared.config.name,
        task_id = %item.id,
        waited_ms = waited.num_milliseconds(),
        "Task expired in queue"
    );
    true
}
