//! Per-source scheduler: one tokio task per configured source, each with
//! its own ticker. Grounded directly on the teacher's
//! `agent::registry::AgentRegistry::start_health_monitoring` — the same
//! `tokio::select!` race between an `interval` tick and a `watch`
//! shutdown signal, the same `MissedTickBehavior::Skip` — generalized from
//! "poll one health RPC per agent" to "run one source's `Source::scrape`
//! and write the result into the cache".

use crate::cache::StatusCache;
use crate::config::{LocationConfig, ScrapingConfig, ServerSettings, SourceConfig};
use crate::metrics::MetricsProjector;
use crate::model::{Labels, Location};
use crate::scrape::{build_driver, Source};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info};

pub struct Scheduler {
    cache: Arc<StatusCache>,
    server: Arc<ServerSettings>,
    scraping: ScrapingConfig,
    metrics: Arc<MetricsProjector>,
    locations: Arc<Vec<LocationConfig>>,
}

impl Scheduler {
    pub fn new(
        cache: Arc<StatusCache>,
        server: Arc<ServerSettings>,
        scraping: ScrapingConfig,
        metrics: Arc<MetricsProjector>,
        locations: Vec<LocationConfig>,
    ) -> Self {
        Self { cache, server, scraping, metrics, locations: Arc::new(locations) }
    }

    /// Spawn one ticker task per source. Returns immediately; tasks run
    /// until their `shutdown_rx` fires.
    pub fn spawn_all(
        &self,
        sources: Vec<SourceConfig>,
        shutdown_rx: tokio::sync::watch::Receiver<bool>,
    ) {
        let site_peers: Arc<Vec<String>> = Arc::new(
            sources
                .iter()
                .filter(|s| s.kind == "site")
                .filter_map(|s| s.config.get("url").and_then(|v| v.as_str()).map(|s| s.to_string()))
                .collect(),
        );

        for source in sources {
            let cache = self.cache.clone();
            let server = self.server.clone();
            let scraping = self.scraping.clone();
            let metrics = self.metrics.clone();
            let site_peers = site_peers.clone();
            let locations = self.locations.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                run_source_loop(source, server, scraping, cache, metrics, locations, site_peers, &mut shutdown_rx)
                    .await;
            });
        }
    }
}

async fn run_source_loop(
    source: SourceConfig,
    server: Arc<ServerSettings>,
    scraping: ScrapingConfig,
    cache: Arc<StatusCache>,
    metrics: Arc<MetricsProjector>,
    locations: Arc<Vec<LocationConfig>>,
    site_peers: Arc<Vec<String>>,
    shutdown_rx: &mut tokio::sync::watch::Receiver<bool>,
) {
    // Config validity (incl. driver-specific shape) is checked fatally at
    // process startup (`scrape::validate_all_sources`, called from `main`
    // before the listener is bound); a source reaching this point already
    // passed `validate_config` once, so there's nothing left to check here.
    let driver = build_driver(&source.kind, metrics);

    info!(
        "source '{}' ({}): starting, interval={}s",
        source.name, source.kind, scraping.interval
    );

    // Initial scrape before entering the tick loop (spec §4.3).
    tick_once(&source, &server, &scraping, &cache, driver.as_ref(), &locations, &site_peers).await;

    let mut interval = time::interval(Duration::from_secs(scraping.interval));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval.tick().await; // consume the immediate first tick; we already scraped above

    loop {
        tokio::select! {
            _ = interval.tick() => {
                tick_once(&source, &server, &scraping, &cache, driver.as_ref(), &locations, &site_peers).await;
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("source '{}': shutdown signal received, stopping", source.name);
                    break;
                }
            }
        }
    }
}

async fn tick_once(
    source: &SourceConfig,
    server: &ServerSettings,
    scraping: &ScrapingConfig,
    cache: &Arc<StatusCache>,
    driver: &dyn Source,
    known_locations: &[LocationConfig],
    site_peers: &[String],
) {
    let upstream_url = source
        .config
        .get("url")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let result = driver.scrape(source, server, scraping, site_peers).await;
    let (mut apps, mut locations) = match result {
        Ok(pair) => pair,
        Err(e) => {
            // Driver-level failure: write an empty result so a prolonged
            // failure reads as "no apps" rather than stale data (spec
            // §4.3, §7).
            error!("source '{}': scrape failed, writing empty result: {}", source.name, e);
            (Vec::new(), Vec::new())
        }
    };

    // An app with no origin_url was observed directly by this instance
    // rather than imported through a `site` source, which already stamps
    // the remote origin on its own apps (spec §4.5).
    for app in &mut apps {
        if app.origin_url.is_none() {
            app.origin_url = Some(server.host_url.clone());
        }
    }

    // A non-federation driver (prometheus/http) never reports its own
    // locations; derive them from the top-level `locations:` table by
    // cross-referencing the distinct `app.location` names this source
    // actually returned (spec §6's `locations:` block, §4.2). A `site`
    // source already brought its own `Location`s back from the peer, so
    // leave those as-is.
    if locations.is_empty() {
        locations = locations_for_apps(&apps, known_locations);
    }

    let source_labels = Labels::from_map(&source.labels);
    cache.update_app_status(&source.name, apps, &source_labels, server, upstream_url.as_deref());
    cache.update_location_cache(&source.name, locations);
}

/// Build one `Location` per distinct `app.location` name this source's apps
/// reference, looked up against the declared `locations:` table. A location
/// name an app references but that isn't declared in config is skipped —
/// there is no lat/long to report for it.
fn locations_for_apps(apps: &[crate::model::AppStatus], known_locations: &[LocationConfig]) -> Vec<Location> {
    let mut names: Vec<&str> = apps.iter().map(|a| a.location.as_str()).collect();
    names.sort_unstable();
    names.dedup();

    names
        .into_iter()
        .filter_map(|name| known_locations.iter().find(|l| l.name == name))
        .map(|l| Location {
            name: l.name.clone(),
            latitude: l.latitude,
            longitude: l.longitude,
            source: String::new(), // stamped to the local source name by `cache::update_location_cache`
            status: None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AppStatus, Status};

    fn app(name: &str, location: &str) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: location.into(),
            status: Status::Up,
            source: "s1".into(),
            origin_url: None,
            labels: Labels::new(),
        }
    }

    fn known(name: &str) -> LocationConfig {
        LocationConfig { name: name.into(), latitude: 1.0, longitude: 2.0 }
    }

    #[test]
    fn derives_distinct_locations_from_referenced_apps() {
        let apps = vec![app("a", "nyc"), app("b", "nyc"), app("c", "sfo")];
        let known_locations = vec![known("nyc"), known("sfo"), known("lhr")];
        let mut got = locations_for_apps(&apps, &known_locations);
        got.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<&str> = got.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["nyc", "sfo"]);
    }

    #[test]
    fn skips_a_location_name_with_no_matching_config_entry() {
        let apps = vec![app("a", "undeclared")];
        let got = locations_for_apps(&apps, &[known("nyc")]);
        assert!(got.is_empty());
    }

    #[test]
    fn no_apps_means_no_locations() {
        let got = locations_for_apps(&[], &[known("nyc")]);
        assert!(got.is_empty());
    }
}
