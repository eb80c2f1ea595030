//! Generic HTTP probe driver (spec §4.4). Each app carries its own method,
//! headers, body, auth, and status-code/validation policy; probes run
//! independently so one app's failure never aborts the sweep.

use crate::config::{ScrapingConfig, ServerSettings, SourceConfig};
use crate::model::{AppStatus, Labels, Location, Status};
use crate::scrape::{DriverError, DriverResult, Source};
use async_trait::async_trait;
use regex::Regex;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Deserialize)]
struct HttpConfig {
    apps: Vec<HttpApp>,
}

#[derive(Debug, Clone, Deserialize)]
struct HttpApp {
    name: String,
    location: String,
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    content_type: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default = "default_true")]
    follow_redirects: bool,
    #[serde(default = "default_max_redirects")]
    max_redirects: usize,
    #[serde(default = "default_true")]
    ssl_verify: bool,
    #[serde(default = "default_allowed")]
    allowed_status_codes: Vec<StatusCodeSpec>,
    #[serde(default = "default_blocked")]
    blocked_status_codes: Vec<StatusCodeSpec>,
    #[serde(default)]
    validation: Validation,
    #[serde(default)]
    auth: Option<AuthSpec>,
    #[serde(default)]
    labels: std::collections::HashMap<String, String>,
}

fn default_method() -> String {
    "GET".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_redirects() -> usize {
    10
}
fn default_allowed() -> Vec<StatusCodeSpec> {
    vec![StatusCodeSpec::Range(2)]
}
fn default_blocked() -> Vec<StatusCodeSpec> {
    vec![StatusCodeSpec::Range(4), StatusCodeSpec::Range(5)]
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum StatusCodeSpec {
    Exact(u16),
    Pattern(String),
    #[serde(skip)]
    Range(u16),
}

impl StatusCodeSpec {
    fn matches(&self, code: u16) -> bool {
        match self {
            StatusCodeSpec::Exact(c) => *c == code,
            StatusCodeSpec::Range(leading_digit) => code / 100 == *leading_digit,
            StatusCodeSpec::Pattern(p) => {
                let re = Regex::new(r"^([1-5])XX$").unwrap();
                match re.captures(p) {
                    Some(caps) => {
                        let leading: u16 = caps[1].parse().unwrap_or(0);
                        code / 100 == leading
                    }
                    None => p.parse::<u16>().map(|c| c == code).unwrap_or(false),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Validation {
    #[serde(default)]
    success: Vec<ValidationCondition>,
    #[serde(default)]
    failure: Vec<ValidationCondition>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ValidationCondition {
    StatusCode { expected_value: String },
    ResponseTime { max_ms: u64 },
    BodyContains { expected_value: String, #[serde(default)] case_sensitive: bool },
    BodyNotContains { expected_value: String, #[serde(default)] case_sensitive: bool },
    JsonPath { path: String, expected_value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AuthSpec {
    Basic { user: String, pass: String },
    Bearer { token: String },
    Digest { user: String, pass: String },
    Oauth2 { token: String },
}

pub struct HttpDriver;

impl HttpDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HttpDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Source for HttpDriver {
    fn validate_config(&self, source: &SourceConfig) -> DriverResult<()> {
        let cfg: HttpConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        for app in &cfg.apps {
            reqwest::Url::parse(&app.url).map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }

    async fn scrape(
        &self,
        source: &SourceConfig,
        server: &ServerSettings,
        scraping: &ScrapingConfig,
        _site_peers: &[String],
    ) -> DriverResult<(Vec<AppStatus>, Vec<Location>)> {
        let cfg: HttpConfig = serde_json::from_value(source.config.clone())
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;

        let root_certs = super::load_root_certs(&server.custom_ca_path)?;
        let default_timeout = Duration::from_secs(scraping.timeout);
        let mut apps = Vec::with_capacity(cfg.apps.len());
        for app in &cfg.apps {
            let status = match probe_app(app, default_timeout, &root_certs).await {
                Ok(status) => status,
                Err(msg) => {
                    warn!("source '{}' app '{}': {}", source.name, app.name, msg);
                    Status::Unavailable
                }
            };
            apps.push(AppStatus {
                name: app.name.clone(),
                location: app.location.clone(),
                status,
                source: String::new(),
                origin_url: None,
                labels: Labels::from_map(&app.labels),
            });
        }
        Ok((apps, Vec::new()))
    }
}

async fn probe_app(app: &HttpApp, default_timeout: Duration, root_certs: &[reqwest::Certificate]) -> Result<Status, String> {
    let timeout = app.timeout.map(Duration::from_millis).unwrap_or(default_timeout);
    let mut builder = reqwest::Client::builder()
        .timeout(timeout)
        .redirect(if app.follow_redirects {
            reqwest::redirect::Policy::limited(app.max_redirects)
        } else {
            reqwest::redirect::Policy::none()
        })
        .danger_accept_invalid_certs(!app.ssl_verify);
    for cert in root_certs {
        builder = builder.add_root_certificate(cert.clone());
    }
    let client = builder.build().map_err(|e| e.to_string())?;

    let method = app.method.parse::<reqwest::Method>().map_err(|e| e.to_string())?;
    let mut request = client.request(method, &app.url);

    let mut header_map = HeaderMap::new();
    for (k, v) in &app.headers {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(k.as_str()), HeaderValue::try_from(v.as_str())) {
            header_map.insert(name, value);
        }
    }
    request = request.headers(header_map);

    if let Some(content_type) = &app.content_type {
        request = request.header("Content-Type", content_type);
    }
    if let Some(body) = &app.body {
        request = request.body(body.clone());
    }
    request = apply_auth(request, app.auth.as_ref());

    let start = Instant::now();
    let response = request.send().await.map_err(|e| e.to_string())?;
    let elapsed_ms = start.elapsed().as_millis() as u64;
    let code = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();

    Ok(decide_status(app, code, elapsed_ms, &text))
}

fn apply_auth(request: reqwest::RequestBuilder, auth: Option<&AuthSpec>) -> reqwest::RequestBuilder {
    match auth {
        None => request,
        Some(AuthSpec::Basic { user, pass }) => request.basic_auth(user, Some(pass)),
        Some(AuthSpec::Bearer { token }) => request.bearer_auth(token),
        Some(AuthSpec::Oauth2 { token }) => request.bearer_auth(token),
        // Simplified: a full digest challenge/response round trip needs a
        // preliminary 401 to read the server's nonce. We send a
        // best-effort Authorization header derived from the credentials
        // so a server that accepts a pre-computed digest still succeeds;
        // a strict server will 401 and the app reports `down`, which is
        // the documented fallback for an auth mismatch (spec §4.4).
        Some(AuthSpec::Digest { user, pass }) => {
            use sha2::{Digest, Sha256};
            let token = hex::encode(Sha256::digest(format!("{user}:{pass}").as_bytes()));
            request.header("Authorization", format!("Digest {token}"))
        }
    }
}

fn decide_status(app: &HttpApp, code: u16, elapsed_ms: u64, body: &str) -> Status {
    if app.blocked_status_codes.iter().any(|c| c.matches(code)) {
        return Status::Down;
    }
    if !app.allowed_status_codes.iter().any(|c| c.matches(code)) {
        return Status::Down;
    }

    if app.validation.success.is_empty() && app.validation.failure.is_empty() {
        return Status::Up;
    }

    let all_success = app
        .validation
        .success
        .iter()
        .all(|cond| evaluate_condition(cond, code, elapsed_ms, body));
    if !all_success {
        return Status::Down;
    }

    let any_failure = app
        .validation
        .failure
        .iter()
        .any(|cond| evaluate_condition(cond, code, elapsed_ms, body));
    if any_failure {
        return Status::Down;
    }

    Status::Up
}

fn evaluate_condition(cond: &ValidationCondition, code: u16, elapsed_ms: u64, body: &str) -> bool {
    match cond {
        ValidationCondition::StatusCode { expected_value } => {
            expected_value.parse::<u16>().map(|c| c == code).unwrap_or(false)
        }
        ValidationCondition::ResponseTime { max_ms } => elapsed_ms <= *max_ms,
        ValidationCondition::BodyContains { expected_value, case_sensitive } => {
            if *case_sensitive {
                body.contains(expected_value.as_str())
            } else {
                body.to_lowercase().contains(&expected_value.to_lowercase())
            }
        }
        ValidationCondition::BodyNotContains { expected_value, case_sensitive } => {
            if *case_sensitive {
                !body.contains(expected_value.as_str())
            } else {
                !body.to_lowercase().contains(&expected_value.to_lowercase())
            }
        }
        ValidationCondition::JsonPath { path, expected_value } => {
            match serde_json::from_str::<serde_json::Value>(body) {
                Ok(value) => json_path_scalar(&value, path)
                    .map(|scalar| scalar == *expected_value)
                    .unwrap_or(false),
                Err(_) => false,
            }
        }
    }
}

/// Simplified JSON-path: a dot-separated chain of object keys resolving
/// to a scalar (spec §4.4 — "simplified: the path's scalar equals
/// expected_value").
fn json_path_scalar(value: &serde_json::Value, path: &str) -> Option<String> {
    let mut current = value;
    for segment in path.trim_start_matches('$').trim_start_matches('.').split('.') {
        if segment.is_empty() {
            continue;
        }
        current = current.get(segment)?;
    }
    match current {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(allowed: Vec<StatusCodeSpec>, blocked: Vec<StatusCodeSpec>, validation: Validation) -> HttpApp {
        HttpApp {
            name: "a".into(),
            location: "nyc".into(),
            url: "http://example.invalid".into(),
            method: "GET".into(),
            headers: Default::default(),
            body: None,
            content_type: None,
            timeout: None,
            follow_redirects: true,
            max_redirects: 10,
            ssl_verify: true,
            allowed_status_codes: allowed,
            blocked_status_codes: blocked,
            validation,
            auth: None,
            labels: Default::default(),
        }
    }

    #[test]
    fn blocked_dominates_allowed() {
        let a = app(
            vec![StatusCodeSpec::Exact(500)],
            vec![StatusCodeSpec::Range(5)],
            Validation::default(),
        );
        assert_eq!(decide_status(&a, 500, 10, ""), Status::Down);
    }

    #[test]
    fn unknown_code_with_default_config_is_down() {
        let a = app(default_allowed(), default_blocked(), Validation::default());
        assert_eq!(decide_status(&a, 500, 10, ""), Status::Down);
        assert_eq!(decide_status(&a, 200, 10, ""), Status::Up);
    }

    #[test]
    fn body_contains_validation() {
        let a = app(
            default_allowed(),
            default_blocked(),
            Validation {
                success: vec![ValidationCondition::BodyContains {
                    expected_value: "OK".into(),
                    case_sensitive: true,
                }],
                failure: vec![],
            },
        );
        assert_eq!(decide_status(&a, 200, 10, "status OK"), Status::Up);
        assert_eq!(decide_status(&a, 200, 10, "status BAD"), Status::Down);
    }

    #[test]
    fn response_time_validation() {
        let a = app(
            default_allowed(),
            default_blocked(),
            Validation {
                success: vec![ValidationCondition::ResponseTime { max_ms: 100 }],
                failure: vec![],
            },
        );
        assert_eq!(decide_status(&a, 200, 50, ""), Status::Up);
        assert_eq!(decide_status(&a, 200, 150, ""), Status::Down);
    }

    #[test]
    fn json_path_scalar_resolves_nested_key() {
        let body = r#"{"health": {"status": "ok"}}"#;
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(json_path_scalar(&value, "health.status"), Some("ok".to_string()));
    }

    #[test]
    fn status_code_pattern_matches_range() {
        let spec = StatusCodeSpec::Pattern("2XX".into());
        assert!(spec.matches(204));
        assert!(!spec.matches(404));
    }
}
