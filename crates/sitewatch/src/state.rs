//! Shared application state, grounded on the teacher's `state.rs`
//! `AppState::new`/`initialize` split: construction wires up the pieces,
//! `initialize` starts the background tasks that depend on the fully built
//! state existing first (the scheduler needs the cache and label index
//! already behind `Arc`s before it can spawn per-source tickers).

use crate::cache::StatusCache;
use crate::config::{AppConfig, ServerSettings};
use crate::index::LabelIndex;
use crate::metrics::MetricsProjector;
use crate::scrape::scheduler::Scheduler;
use axum::extract::FromRef;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub server: Arc<ServerSettings>,
    pub cache: Arc<StatusCache>,
    pub metrics: Arc<MetricsProjector>,
    /// Watch channel for shutdown signaling.
    /// Unlike broadcast, watch never loses messages — receivers always
    /// see the latest value, even if they subscribe after the send.
    pub shutdown_tx: tokio::sync::watch::Sender<bool>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, _) = tokio::sync::watch::channel(false);
        let index = Arc::new(LabelIndex::new());
        let cache = Arc::new(StatusCache::new(index));
        let metrics = Arc::new(MetricsProjector::new());
        let server = Arc::new(config.server_settings.clone());

        Self {
            config: Arc::new(config),
            server,
            cache,
            metrics,
            shutdown_tx,
        }
    }

    /// Spawn the per-source scheduler tasks. Returns immediately; the tasks
    /// run until `shutdown()` is called.
    pub fn initialize(&self) {
        info!("starting scheduler for {} sources", self.config.sources.len());
        let scheduler = Scheduler::new(
            self.cache.clone(),
            self.server.clone(),
            self.config.scraping.clone(),
            self.metrics.clone(),
            self.config.locations.clone(),
        );
        scheduler.spawn_all(self.config.sources.clone(), self.shutdown_tx.subscribe());
    }

    /// Signal shutdown to all components.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl FromRef<AppState> for Arc<StatusCache> {
    fn from_ref(state: &AppState) -> Self {
        state.cache.clone()
    }
}

impl FromRef<AppState> for Arc<ServerSettings> {
    fn from_ref(state: &AppState) -> Self {
        state.server.clone()
    }
}

impl FromRef<AppState> for Arc<MetricsProjector> {
    fn from_ref(state: &AppState) -> Self {
        state.metrics.clone()
    }
}
