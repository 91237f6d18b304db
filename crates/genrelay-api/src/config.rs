// Server configuration loaded from the environment

use std::time::Duration;

use genrelay_core::{OrchestratorConfig, PoolConfig};

/// API server configuration
///
/// Every knob has a default; environment variables override individually.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Bind address, e.g. "0.0.0.0:9000"
    pub bind_addr: String,

    /// Pool tuning for the orchestrator
    pub orchestrator: OrchestratorConfig,

    /// Heartbeat age after which a connection is evicted
    pub connection_timeout: Duration,

    /// How often the connection sweep runs
    pub sweep_interval: Duration,

    /// Heartbeat cadence on monitor connections
    pub heartbeat_interval: Duration,

    /// Allowed CORS origins (empty = same-origin only)
    pub cors_origins: Vec<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9000".to_string(),
            orchestrator: OrchestratorConfig::default(),
            connection_timeout: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            heartbeat_interval: Duration::from_secs(30),
            cors_origins: Vec::new(),
        }
    }
}

impl ApiConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = OrchestratorConfig::default();

        let agent = pool_from_env("GENRELAY_AGENT", defaults.agent);
        let system = pool_from_env("GENRELAY_SYSTEM", defaults.system);

        Self {
            bind_addr: std::env::var("GENRELAY_BIND")
                .unwrap_or_else(|_| "0.0.0.0:9000".to_string()),
            orchestrator: OrchestratorConfig::new()
                .with_agent(agent)
                .with_system(system),
            connection_timeout: secs_from_env("GENRELAY_CONNECTION_TIMEOUT_SECS", 60),
            sweep_interval: secs_from_env("GENRELAY_SWEEP_INTERVAL_SECS", 30),
            heartbeat_interval: secs_from_env("GENRELAY_HEARTBEAT_INTERVAL_SECS", 30),
            cors_origins: std::env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .filter(|s| !s.is_empty())
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default(),
        }
    }
}

fn pool_from_env(prefix: &str, base: PoolConfig) -> PoolConfig {
    let mut config = base;
    if let Some(workers) = usize_from_env(&format!("{prefix}_WORKERS")) {
        config = config.with_max_workers(workers);
    }
    if let Some(capacity) = usize_from_env(&format!("{prefix}_QUEUE_CAPACITY")) {
        config = config.with_queue_capacity(capacity);
    }
    if let Some(timeout) = u64_from_env(&format!("{prefix}_QUEUE_TIMEOUT_SECS")) {
        config = config.with_queue_timeout(Duration::from_secs(timeout));
    }
    config
}

fn usize_from_env(name: &str) -> Option<usize> {
    std::env::var(name).ok()?.parse().ok()
}

fn u64_from_env(name: &str) -> Option<u64> {
    std::env::var(name).ok()?.parse().ok()
}

fn secs_from_env(name: &str, default: u64) -> Duration {
    Duration::from_secs(u64_from_env(name).unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ApiConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.connection_timeout, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(30));
        assert!(config.cors_origins.is_empty());
    }
}
