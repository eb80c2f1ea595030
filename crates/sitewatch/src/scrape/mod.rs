pub mod drivers;
pub mod scheduler;

use crate::config::{ScrapingConfig, ServerSettings, SourceConfig};
use crate::metrics::MetricsProjector;
use crate::model::{AppStatus, Location};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("transport error: {0}")]
    Transport(String),
}

pub type DriverResult<T> = Result<T, DriverError>;

/// Contract every pluggable source driver implements (spec §4.3).
#[async_trait]
pub trait Source: Send + Sync {
    /// Called once at startup; any error is fatal (spec §7).
    fn validate_config(&self, source: &SourceConfig) -> DriverResult<()>;

    /// Called on every tick. A transport-level setup failure (invalid URL,
    /// can't build a request) is returned as the driver-level error and
    /// aborts that source's tick (spec §4.3); a single app probe failure
    /// is represented in its `AppStatus::status`, not as an `Err` here.
    ///
    /// `site_peers` is the full set of URLs this instance directly scrapes
    /// via its own `site`-kind sources; only the `site` driver uses it (for
    /// the circular-prevention filter), but it's passed to every driver the
    /// same way `server`/`scraping` are, rather than special-casing one
    /// driver's trait signature.
    async fn scrape(
        &self,
        source: &SourceConfig,
        server: &ServerSettings,
        scraping: &ScrapingConfig,
        site_peers: &[String],
    ) -> DriverResult<(Vec<AppStatus>, Vec<Location>)>;
}

/// Build the driver for a validated `source.kind`. Unknown kinds are
/// rejected at config-validation time (`config::AppConfig::validate`), so
/// reaching the wildcard here would be a programming error, not a runtime
/// one. `metrics` is only consumed by the `site` driver (sync counters),
/// same pattern as `site_peers` in [`Source::scrape`].
pub fn build_driver(kind: &str, metrics: Arc<MetricsProjector>) -> Box<dyn Source> {
    match kind {
        "prometheus" => Box::new(drivers::prometheus::PrometheusDriver::new()),
        "http" => Box::new(drivers::http::HttpDriver::new()),
        "site" => Box::new(drivers::site::SiteDriver::new(metrics)),
        other => panic!("unknown source type '{other}' reached build_driver"),
    }
}

pub fn timeout_duration(scraping: &ScrapingConfig) -> Duration {
    Duration::from_secs(scraping.timeout)
}

/// Validate every configured source's driver-specific config synchronously,
/// once, before the process starts serving traffic (spec §4.3 — "called
/// once at startup; any error is fatal", §7, §6's "non-zero on unrecoverable
/// init failure"). Called from `main` before the listener is bound; a
/// failure here must abort the process rather than leave that one source
/// silently unscheduled while everything else starts up.
pub fn validate_all_sources(sources: &[SourceConfig], metrics: Arc<MetricsProjector>) -> anyhow::Result<()> {
    for source in sources {
        build_driver(&source.kind, metrics.clone())
            .validate_config(source)
            .with_context(|| format!("source '{}' ({}): invalid config", source.name, source.kind))?;
    }
    Ok(())
}
