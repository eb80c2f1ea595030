//! Federation consumer driver (spec §4.5): pulls another sitewatch
//! instance's `/sync` endpoint and folds its apps/locations in as if they
//! were a locally configured source. Grounded on the teacher's
//! `agent::discovery` remote-peer polling, generalized from a gRPC health
//! call to a signed HTTP GET.

use crate::auth::hmac;
use crate::config::{ScrapingConfig, ServerSettings, SourceConfig};
use crate::metrics::MetricsProjector;
use crate::model::{AppStatus, Location};
use crate::scrape::{DriverError, DriverResult, Source};
use crate::sync::{filter_circular, StatusResponse};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct SiteConfig {
    url: String,
    token: String,
}

pub struct SiteDriver {
    metrics: Arc<MetricsProjector>,
}

impl SiteDriver {
    pub fn new(metrics: Arc<MetricsProjector>) -> Self {
        Self { metrics }
    }
}

#[async_trait]
impl Source for SiteDriver {
    fn validate_config(&self, source: &SourceConfig) -> DriverResult<()> {
        let cfg: SiteConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        reqwest::Url::parse(&cfg.url).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        if cfg.token.is_empty() {
            return Err(DriverError::InvalidConfig("site source requires a token".into()));
        }
        Ok(())
    }

    async fn scrape(
        &self,
        source: &SourceConfig,
        server: &ServerSettings,
        scraping: &ScrapingConfig,
        site_peers: &[String],
    ) -> DriverResult<(Vec<AppStatus>, Vec<Location>)> {
        let cfg: SiteConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;

        self.metrics.record_sync_attempt(&source.name);
        let start = Instant::now();

        match pull(&cfg, scraping, server).await {
            Ok(response) => {
                self.metrics.record_sync_success(&source.name, start.elapsed().as_secs_f64());
                let (apps, locations) =
                    filter_circular(response.apps, response.locations, &server.host_url, &cfg.url, site_peers);
                Ok((apps, locations))
            }
            Err(msg) => {
                self.metrics.record_sync_failure(&source.name, start.elapsed().as_secs_f64());
                // A peer being unreachable is local to this one source,
                // not a reason to abort the whole tick; degrade to empty
                // and let the cache hold no apps for this source until
                // the next successful pull (spec §4.5, §7).
                warn!("source '{}': sync pull from '{}' failed: {}", source.name, cfg.url, msg);
                Ok((Vec::new(), Vec::new()))
            }
        }
    }
}

async fn pull(cfg: &SiteConfig, scraping: &ScrapingConfig, server: &ServerSettings) -> Result<StatusResponse, String> {
    let root_certs = super::load_root_certs(&server.custom_ca_path).map_err(|e| e.to_string())?;
    let client = super::build_client(Duration::from_secs(scraping.timeout), false, &root_certs)
        .map_err(|e| e.to_string())?;

    let timestamp = chrono::Utc::now().to_rfc3339();
    let signature = hmac::generate_signature(&cfg.token, &timestamp, b"");

    let url = format!("{}/sync", cfg.url.trim_end_matches('/'));
    let response = client
        .get(&url)
        .header("X-Site-Sync-Timestamp", &timestamp)
        .header("X-Site-Sync-Signature", &signature)
        .send()
        .await
        .map_err(|e| e.to_string())?;

    if !response.status().is_success() {
        return Err(format!("http status {}", response.status()));
    }

    response
        .json::<StatusResponse>()
        .await
        .map_err(|e| format!("decode failure: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, Status};
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_config(url: &str) -> SourceConfig {
        SourceConfig {
            name: "peer".into(),
            kind: "site".into(),
            labels: Default::default(),
            config: serde_json::json!({"url": url, "token": "shared-secret"}),
        }
    }

    fn remote_app(name: &str, origin: &str) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: "nyc".into(),
            status: Status::Up,
            source: "peer".into(),
            origin_url: Some(origin.to_string()),
            labels: Labels::new(),
        }
    }

    #[tokio::test]
    async fn pulls_and_filters_circular_entries() {
        let server = MockServer::start().await;
        let own_host_url = "http://self.example";

        let response = StatusResponse {
            apps: vec![
                remote_app("a", own_host_url),
                remote_app("b", "http://third-party"),
            ],
            locations: vec![],
        };

        Mock::given(method("GET"))
            .and(path("/sync"))
            .and(header_exists("X-Site-Sync-Signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response))
            .mount(&server)
            .await;

        let driver = SiteDriver::new(Arc::new(MetricsProjector::new()));
        let cfg = source_config(&server.uri());
        let mut server_settings = ServerSettings::default();
        server_settings.host_url = own_host_url.to_string();
        let scraping = ScrapingConfig { interval: 1, timeout: 5, max_parallel: 4 };

        let (apps, _) = driver.scrape(&cfg, &server_settings, &scraping, &[]).await.unwrap();
        assert_eq!(apps.len(), 1);
        assert_eq!(apps[0].name, "b");
    }

    #[tokio::test]
    async fn drops_apps_reachable_through_a_directly_scraped_peer() {
        let server = MockServer::start().await;
        let own_host_url = "http://self.example";
        let directly_scraped_peer = "http://direct-peer.example";

        // "c" originates from a site we scrape directly ourselves, so the
        // direct path is authoritative and this indirect copy is dropped.
        let response = StatusResponse {
            apps: vec![remote_app("c", directly_scraped_peer)],
            locations: vec![],
        };

        Mock::given(method("GET"))
            .and(path("/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(&response))
            .mount(&server)
            .await;

        let driver = SiteDriver::new(Arc::new(MetricsProjector::new()));
        let cfg = source_config(&server.uri());
        let mut server_settings = ServerSettings::default();
        server_settings.host_url = own_host_url.to_string();
        let scraping = ScrapingConfig { interval: 1, timeout: 5, max_parallel: 4 };
        let site_peers = vec![directly_scraped_peer.to_string()];

        let (apps, _) = driver.scrape(&cfg, &server_settings, &scraping, &site_peers).await.unwrap();
        assert!(apps.is_empty());
    }

    #[tokio::test]
    async fn unreachable_peer_degrades_to_empty() {
        let cfg = source_config("http://127.0.0.1:1");
        let driver = SiteDriver::new(Arc::new(MetricsProjector::new()));
        let (apps, locations) = driver
            .scrape(
                &cfg,
                &ServerSettings::default(),
                &ScrapingConfig { interval: 1, timeout: 1, max_parallel: 1 },
                &[],
            )
            .await
            .unwrap();
        assert!(apps.is_empty());
        assert!(locations.is_empty());
    }
}
