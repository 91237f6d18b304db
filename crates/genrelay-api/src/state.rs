// Shared application state

use std::sync::Arc;
use std::time::Duration;

use genrelay_core::{ConnectionRegistry, PoolOrchestrator, StreamRouter};

use crate::config::ApiConfig;
use crate::generator::{SimulatedGenerator, TextGenerator};

/// App state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PoolOrchestrator>,
    pub registry: Arc<ConnectionRegistry>,
    pub router: Arc<StreamRouter>,
    pub generator: Arc<dyn TextGenerator>,
    pub heartbeat_interval: Duration,
}

impl AppState {
    pub fn new(config: &ApiConfig, generator: Arc<dyn TextGenerator>) -> Self {
        let orchestrator = Arc::new(PoolOrchestrator::new(config.orchestrator.clone()));
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(StreamRouter::new(
            Arc::clone(&orchestrator),
            Arc::clone(&registry),
        ));

        Self {
            orchestrator,
            registry,
            router,
            generator,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    /// State with default tuning, the instant simulated backend, and no
    /// replay pacing (used by route tests)
    #[cfg(test)]
    pub fn for_tests() -> Self {
        let config = ApiConfig::default();
        let mut state = Self::new(&config, Arc::new(SimulatedGenerator::instant()));
        state.router = Arc::new(
            StreamRouter::new(Arc::clone(&state.orchestrator), Arc::clone(&state.registry))
                .with_config(
                    genrelay_core::RouterConfig::new().with_chunk_delay(Duration::from_millis(1)),
                ),
        );
        state.heartbeat_interval = Duration::from_millis(10);
        state
    }
}

/// Build the production state from configuration
pub fn build_state(config: &ApiConfig) -> AppState {
    AppState::new(config, Arc::new(SimulatedGenerator::default()))
}
