//! Config contract consumed by the core (spec §6), loaded the way the
//! teacher's `ClusterConfig::load` does: compile-time defaults layered
//! under an optional TOML file, layered under environment variables.
//!
//! YAML loading/merging, the OIDC/local-admin producer, and CLI flags are
//! out of scope (spec §1) — `credentials` below is intentionally opaque.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct AppConfig {
    pub server_settings: ServerSettings,
    pub scraping: ScrapingConfig,
    #[serde(default)]
    pub locations: Vec<LocationConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
    /// Logger setup is out of scope for the core (spec §1) beyond this
    /// shape: the core only needs to know the format/destination to wire
    /// up `tracing-subscriber` the way the teacher's `main.rs` does.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub output: LogOutput,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { format: LogFormat::Pretty, output: LogOutput::Stdout }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase", tag = "kind")]
pub enum LogOutput {
    Stdout,
    File { path: String },
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerSettings {
    pub port: u16,
    pub host_url: String,
    pub session_timeout: u64,
    pub sync_enable: bool,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub custom_ca_path: Option<String>,
    #[serde(default)]
    pub trust_proxy_headers: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// role -> {label_key: label_value}
    #[serde(default)]
    pub roles: HashMap<String, HashMap<String, String>>,
    /// Allowed clock skew for `/sync` signature verification, in seconds.
    #[serde(default = "default_sync_window")]
    pub sync_window_secs: i64,
    /// Optional bearer token required to read `/metrics`.
    #[serde(default)]
    pub metrics_token: Option<String>,
    /// Opaque to the core: OIDC/local-admin settings live here, untouched.
    #[serde(default)]
    pub credentials: serde_json::Value,
}

fn default_sync_window() -> i64 {
    300
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 8080,
            host_url: "http://localhost:8080".to_string(),
            session_timeout: 3600,
            sync_enable: false,
            token: None,
            custom_ca_path: None,
            trust_proxy_headers: false,
            labels: HashMap::new(),
            roles: HashMap::new(),
            sync_window_secs: default_sync_window(),
            metrics_token: None,
            credentials: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScrapingConfig {
    pub interval: u64,
    pub timeout: u64,
    pub max_parallel: usize,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            interval: 30,
            timeout: 10,
            max_parallel: 8,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LocationConfig {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Driver-specific shape; parsed by the matching driver at validation
    /// time (spec §4.3's `ValidateConfig`).
    pub config: serde_json::Value,
}

impl AppConfig {
    /// Load configuration from `CONFIG_FILE` (or the conventional search
    /// path) and environment variables, layered over compile-time
    /// defaults, the same three-tier precedence as the teacher's
    /// `ClusterConfig::load`.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = config::Config::try_from(&AppConfig::default())
            .context("failed to serialize default configuration")?;

        let mut builder = config::Config::builder().add_source(defaults);

        let explicit = std::env::var("CONFIG_FILE").ok();
        let config_paths: Vec<String> = match explicit {
            Some(path) => vec![path],
            None => vec![
                "/etc/sitewatch/config".to_string(),
                "config/sitewatch".to_string(),
            ],
        };
        for path in config_paths {
            builder = builder.add_source(config::File::with_name(&path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SITEWATCH")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // `CUSTOM_CA_PATH` (spec §6) is a standalone env var, not under the
        // `SITEWATCH__` prefix, so it's applied as an explicit override
        // after deserialization rather than through the `config` crate's
        // environment source.
        if let Ok(path) = std::env::var("CUSTOM_CA_PATH") {
            cfg.server_settings.custom_ca_path = Some(path);
        }

        Ok(cfg)
    }

    /// Fatal-at-startup validation (spec §7 — config errors are fatal).
    pub fn validate(&self) -> Result<()> {
        if self.server_settings.port == 0 {
            anyhow::bail!("server_settings.port must be nonzero");
        }
        if self.server_settings.sync_enable
            && self.server_settings.token.as_deref().unwrap_or("").is_empty()
        {
            anyhow::bail!("server_settings.sync_enable requires a non-empty token");
        }
        for loc in &self.locations {
            if !(-90.0..=90.0).contains(&loc.latitude) {
                anyhow::bail!("location '{}' latitude out of range", loc.name);
            }
            if !(-180.0..=180.0).contains(&loc.longitude) {
                anyhow::bail!("location '{}' longitude out of range", loc.name);
            }
        }

        let mut seen_names = std::collections::HashSet::new();
        for source in &self.sources {
            if !seen_names.insert(source.name.clone()) {
                anyhow::bail!("duplicate source name '{}'", source.name);
            }
            match source.kind.as_str() {
                "prometheus" | "http" | "site" => {}
                other => {
                    anyhow::bail!("unknown source type '{}' for source '{}'", other, source.name)
                }
            }
        }
        if self.scraping.max_parallel == 0 {
            anyhow::bail!("scraping.max_parallel must be at least 1");
        }
        Ok(())
    }
}
