//! Prometheus driver (spec §4.4): queries `{url}/api/v1/query?query=<metric>`
//! per app, bounded to `max_parallel` concurrent requests by a semaphore —
//! the HTTP-driver analogue of the teacher's per-agent gRPC connection, but
//! here one shared client fans out across apps within a single source.

use crate::config::{ScrapingConfig, ServerSettings, SourceConfig};
use crate::model::{AppStatus, Labels, Location, Status};
use crate::scrape::{DriverError, DriverResult, Source};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

#[derive(Debug, Deserialize)]
struct PrometheusConfig {
    url: String,
    #[serde(default)]
    auth: String,
    #[serde(default)]
    token: String,
    apps: Vec<PrometheusApp>,
}

#[derive(Debug, Clone, Deserialize)]
struct PrometheusApp {
    name: String,
    location: String,
    metric: String,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    /// `[timestamp, value]`; value may be a string or a number on the
    /// wire — accept both (spec §9).
    value: (serde_json::Value, FlexibleString),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FlexibleString {
    Text(String),
    Number(f64),
}

impl FlexibleString {
    fn as_str(&self) -> String {
        match self {
            FlexibleString::Text(s) => s.clone(),
            FlexibleString::Number(n) => n.to_string(),
        }
    }
}

pub struct PrometheusDriver;

impl PrometheusDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for PrometheusDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for PrometheusDriver {
    fn validate_config(&self, source: &SourceConfig) -> DriverResult<()> {
        let cfg: PrometheusConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        reqwest::Url::parse(&cfg.url).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        Ok(())
    }

    async fn scrape(
        &self,
        source: &SourceConfig,
        server: &ServerSettings,
        scraping: &ScrapingConfig,
        _site_peers: &[String],
    ) -> DriverResult<(Vec<AppStatus>, Vec<Location>)> {
        let cfg: PrometheusConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        let base_url = reqwest::Url::parse(&cfg.url).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;

        let root_certs = super::load_root_certs(&server.custom_ca_path)?;
        let client = super::build_client(Duration::from_secs(scraping.timeout), false, &root_certs)?;
        let semaphore = Arc::new(Semaphore::new(scraping.max_parallel.max(1)));

        let mut tasks = Vec::with_capacity(cfg.apps.len());
        for app in cfg.apps.clone() {
            let client = client.clone();
            let base_url = base_url.clone();
            let semaphore = semaphore.clone();
            let auth = cfg.auth.clone();
            let token = cfg.token.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore not closed");
                probe_app(&client, &base_url, &auth, &token, &app).await
            }));
        }

        let mut apps = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(app_status) => apps.push(app_status),
                Err(join_err) => {
                    warn!("source '{}': probe task panicked: {}", source.name, join_err);
                }
            }
        }
        Ok((apps, Vec::new()))
    }
}

async fn probe_app(
    client: &reqwest::Client,
    base_url: &reqwest::Url,
    auth: &str,
    token: &str,
    app: &PrometheusApp,
) -> AppStatus {
    let status = match query_one(client, base_url, auth, token, &app.metric).await {
        Ok(status) => status,
        Err(ProbeError::Unavailable(msg)) => {
            warn!("prometheus app '{}': {}", app.name, msg);
            Status::Unavailable
        }
    };

    AppStatus {
        name: app.name.clone(),
        location: app.location.clone(),
        status,
        source: String::new(), // filled in by the cache on write
        origin_url: None,
        labels: Labels::from_map(&app.labels),
    }
}

enum ProbeError {
    Unavailable(String),
}

async fn query_one(
    client: &reqwest::Client,
    base_url: &reqwest::Url,
    auth: &str,
    token: &str,
    metric: &str,
) -> Result<Status, ProbeError> {
    let mut url = base_url
        .join("/api/v1/query")
        .map_err(|e| ProbeError::Unavailable(e.to_string()))?;
    url.query_pairs_mut().append_pair("query", metric);

    let mut request = client.get(url);
    request = match auth {
        "bearer" => request.bearer_auth(token),
        "basic" => request.header("Authorization", format!("Basic {token}")),
        _ => request,
    };

    let response = request
        .send()
        .await
        .map_err(|e| ProbeError::Unavailable(e.to_string()))?;

    if response.status().as_u16() == 401 {
        return Err(ProbeError::Unavailable("authentication failed (401)".to_string()));
    }
    if !response.status().is_success() {
        return Err(ProbeError::Unavailable(format!("http status {}", response.status())));
    }

    let body: QueryResponse = response
        .json()
        .await
        .map_err(|e| ProbeError::Unavailable(format!("decode failure: {e}")))?;

    if body.status != "success" {
        return Err(ProbeError::Unavailable(format!("query status '{}'", body.status)));
    }
    let result = body
        .data
        .map(|d| d.result)
        .filter(|r| !r.is_empty())
        .ok_or_else(|| ProbeError::Unavailable("empty result".to_string()))?;

    let value = result[0].value.1.as_str();
    Ok(if value == "1" { Status::Up } else { Status::Down })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn source_config(url: &str, metric: &str) -> SourceConfig {
        SourceConfig {
            name: "prom".into(),
            kind: "prometheus".into(),
            labels: Default::default(),
            config: serde_json::json!({
                "url": url,
                "apps": [{"name": "web", "location": "nyc", "metric": metric}]
            }),
        }
    }

    #[tokio::test]
    async fn scenario_s1_up_down_unavailable() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"result": [{"value": [0, "1"]}]}
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let driver = PrometheusDriver::new();
        let cfg = source_config(&server.uri(), "up");
        let scraping = ScrapingConfig { interval: 1, timeout: 5, max_parallel: 4 };
        let (apps, _) = driver.scrape(&cfg, &ServerSettings::default(), &scraping, &[]).await.unwrap();
        assert_eq!(apps[0].status, Status::Up);

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "data": {"result": [{"value": [0, "0"]}]}
            })))
            .mount(&server)
            .await;
        let (apps, _) = driver.scrape(&cfg, &ServerSettings::default(), &scraping, &[]).await.unwrap();
        assert_eq!(apps[0].status, Status::Down);

        server.reset().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/query"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (apps, _) = driver.scrape(&cfg, &ServerSettings::default(), &scraping, &[]).await.unwrap();
        assert_eq!(apps[0].status, Status::Unavailable);
    }

    #[test]
    fn flexible_string_accepts_number_or_text() {
        let numeric: QueryResult = serde_json::from_value(serde_json::json!({
            "value": [0, 1.0]
        }))
        .unwrap();
        assert_eq!(numeric.value.1.as_str(), "1");

        let textual: QueryResult = serde_json::from_value(serde_json::json!({
            "value": [0, "1"]
        }))
        .unwrap();
        assert_eq!(textual.value.1.as_str(), "1");
    }
}
