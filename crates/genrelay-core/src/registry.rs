//! Connection registry
//!
//! Bookkeeping for logical streaming connections. The registry knows nothing
//! about the underlying transport; emitters are expected to `touch` on every
//! outgoing message, and a background sweep evicts connections whose
//! heartbeat has gone stale.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// One logical streaming connection
///
/// Unlike task records, connections are not retained after termination.
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ConnectionInfo {
    pub id: String,
    pub owner: String,
    pub kind: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub message_count: u64,
}

/// Registry-wide counters
#[derive(Debug, Clone, Serialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RegistryStats {
    pub total_connections: usize,
    pub unique_owners: usize,
    pub by_kind: HashMap<String, usize>,
}

/// Tracks active streaming connections and their heartbeats
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionInfo>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection
    pub fn register(&self, id: impl Into<String>, owner: impl Into<String>, kind: impl Into<String>) {
        let id = id.into();
        let now = Utc::now();
        let info = ConnectionInfo {
            id: id.clone(),
            owner: owner.into(),
            kind: kind.into(),
            connected_at: now,
            last_heartbeat: now,
            message_count: 0,
        };
        self.connections.write().insert(id.clone(), info);
        debug!(connection_id = %id, "Connection registered");
    }

    /// Refresh the heartbeat and bump the message counter
    ///
    /// Called on every outgoing message, heartbeats included.
    pub fn touch(&self, id: &str) {
        let mut connections = self.connections.write();
        if let Some(info) = connections.get_mut(id) {
            info.last_heartbeat = Utc::now();
            info.message_count += 1;
        }
    }

    /// Remove a connection when its stream ends
    pub fn unregister(&self, id: &str) {
        if self.connections.write().remove(id).is_some() {
            debug!(connection_id = %id, "Connection unregistered");
        }
    }

    /// All connections belonging to one owner
    pub fn list_by_owner(&self, owner: &str) -> Vec<ConnectionInfo> {
        self.connections
            .read()
            .values()
            .filter(|info| info.owner == owner)
            .cloned()
            .collect()
    }

    /// Registry-wide counters
    pub fn global_stats(&self) -> RegistryStats {
        let connections = self.connections.read();
        let mut owners: Vec<&str> = connections.values().map(|c| c.owner.as_str()).collect();
        owners.sort_unstable();
        owners.dedup();

        let mut by_kind: HashMap<String, usize> = HashMap::new();
        for info in connections.values() {
            *by_kind.entry(info.kind.clone()).or_default() += 1;
        }

        RegistryStats {
            total_connections: connections.len(),
            unique_owners: owners.len(),
            by_kind,
        }
    }

    /// Evict connections whose heartbeat is older than `timeout`
    ///
    /// Returns the number of connections removed.
    pub fn sweep(&self, timeout: Duration) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        let cutoff = Utc::now() - timeout;

        let mut evicted = Vec::new();
        {
            let mut connections = self.connections.write();
            connections.retain(|id, info| {
                let stale = info.last_heartbeat < cutoff;
                if stale {
                    evicted.push(id.clone());
                }
                !stale
            });
        }

        for id in &evicted {
            info!(connection_id = %id, "Evicted stale connection");
        }
        evicted.len()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a running sweep loop
pub struct SweeperHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweep loop and wait for it to exit
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.handle.await;
    }
}

/// Start the background sweep loop
///
/// Runs `sweep(timeout)` every `interval` until stopped.
pub fn start_sweeper(
    registry: std::sync::Arc<ConnectionRegistry>,
    interval: Duration,
    timeout: Duration,
) -> SweeperHandle {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a fresh start
        // does not sweep before anything could have gone stale.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = registry.sweep(timeout);
                    if evicted > 0 {
                        info!(evicted, "Connection sweep removed stale entries");
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Sweep loop: shutdown requested");
                        break;
                    }
                }
            }
        }
    });

    SweeperHandle { shutdown_tx, handle }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_touch_unregister() {
        let registry = ConnectionRegistry::new();
        registry.register("conn-1", "user-1", "stream");

        let before = registry.list_by_owner("user-1");
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].message_count, 0);

        registry.touch("conn-1");
        registry.touch("conn-1");
        let after = registry.list_by_owner("user-1");
        assert_eq!(after[0].message_count, 2);
        assert!(after[0].last_heartbeat >= before[0].last_heartbeat);

        registry.unregister("conn-1");
        assert!(registry.list_by_owner("user-1").is_empty());
    }

    #[test]
    fn test_touch_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.touch("ghost");
        assert_eq!(registry.global_stats().total_connections, 0);
    }

    #[test]
    fn test_global_stats() {
        let registry = ConnectionRegistry::new();
        registry.register("c1", "user-1", "stream");
        registry.register("c2", "user-1", "stream");
        registry.register("c3", "user-2", "monitor");

        let stats = registry.global_stats();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.unique_owners, 2);
        assert_eq!(stats.by_kind.get("stream"), Some(&2));
        assert_eq!(stats.by_kind.get("monitor"), Some(&1));
    }

    #[test]
    fn test_sweep_evicts_only_stale_connections() {
        let registry = ConnectionRegistry::new();
        registry.register("stale", "user-1", "stream");
        {
            // Age the heartbeat directly
            let mut connections = registry.connections.write();
            let info = connections.get_mut("stale").unwrap();
            info.last_heartbeat = Utc::now() - chrono::Duration::seconds(120);
        }
        registry.register("fresh", "user-2", "stream");

        let evicted = registry.sweep(Duration::from_secs(60));
        assert_eq!(evicted, 1);

        let stats = registry.global_stats();
        assert_eq!(stats.total_connections, 1);
        assert!(registry.list_by_owner("user-1").is_empty());
        assert_eq!(registry.list_by_owner("user-2").len(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_loop_evicts_in_background() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry.register("stale", "user-1", "stream");
        {
            let mut connections = registry.connections.write();
            connections.get_mut("stale").unwrap().last_heartbeat =
                Utc::now() - chrono::Duration::seconds(120);
        }

        let sweeper = start_sweeper(
            Arc::clone(&registry),
            Duration::from_millis(20),
            Duration::from_secs(60),
        );

        for _ in 0..100 {
            if registry.global_stats().total_connections == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(registry.global_stats().total_connections, 0);

        sweeper.stop().await;
    }
}
