//! Prometheus metrics projector (spec §4.6). Snapshots the status cache on
//! every `/metrics` scrape and renders it as a fresh set of gauges, the same
//! "derive everything from current state, no incremental bookkeeping" shape
//! the teacher's `SubscriptionMetrics` used for atomic counters — except the
//! per-app gauge vector's label set itself changes over time, which the
//! teacher's fixed-shape metrics never had to handle, so this module adds
//! the unregister/re-register dance `dashflow-prometheus-exporter` uses for
//! the same reason.

use crate::model::{AppStatus, Status};
use parking_lot::Mutex;
use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::collections::{HashMap, HashSet};

const SYSTEM_LABEL_KEYS: [&str; 4] = ["name", "location", "source", "origin_url"];

struct DynamicGauge {
    keys: Vec<String>,
    gauge: GaugeVec,
}

pub struct MetricsProjector {
    registry: Registry,
    status_gauge: Mutex<DynamicGauge>,

    apps_total: GaugeVec,
    apps_up: GaugeVec,
    apps_down: GaugeVec,
    apps_unavailable: GaugeVec,

    total_apps: Gauge,
    total_apps_up: Gauge,
    total_apps_down: Gauge,
    total_apps_unavailable: Gauge,

    sync_attempts_total: IntCounterVec,
    sync_failures_total: IntCounterVec,
    sync_latency_seconds: HistogramVec,
    sync_last_success_timestamp: GaugeVec,
    sync_status: Mutex<HashMap<String, String>>,
    sync_status_gauge: GaugeVec,

    render_lock: tokio::sync::Mutex<()>,
}

impl MetricsProjector {
    pub fn new() -> Self {
        let registry = Registry::new();

        let initial_keys: Vec<String> = SYSTEM_LABEL_KEYS.iter().map(|s| s.to_string()).collect();
        let status_gauge = new_gauge_vec("site_availability_status", "Per-app up/down status (1/0)", &initial_keys);
        registry
            .register(Box::new(status_gauge.clone()))
            .expect("registering a fresh gauge vec cannot fail");

        let apps_total = register_gauge_vec(&registry, "site_availability_apps", "Apps known per (location, source)");
        let apps_up = register_gauge_vec(&registry, "site_availability_apps_up", "Up apps per (location, source)");
        let apps_down = register_gauge_vec(&registry, "site_availability_apps_down", "Down apps per (location, source)");
        let apps_unavailable = register_gauge_vec(
            &registry,
            "site_availability_apps_unavailable",
            "Unavailable apps per (location, source)",
        );

        let total_apps = register_gauge(&registry, "site_availability_total_apps", "Total apps known");
        let total_apps_up = register_gauge(&registry, "site_availability_total_apps_up", "Total up apps");
        let total_apps_down = register_gauge(&registry, "site_availability_total_apps_down", "Total down apps");
        let total_apps_unavailable =
            register_gauge(&registry, "site_availability_total_apps_unavailable", "Total unavailable apps");

        let sync_attempts_total = register_int_counter_vec(
            &registry,
            "site_availability_sync_attempts_total",
            "Federation sync attempts per peer",
            &["site"],
        );
        let sync_failures_total = register_int_counter_vec(
            &registry,
            "site_availability_sync_failures_total",
            "Federation sync failures per peer",
            &["site"],
        );
        let sync_latency_seconds = {
            let opts = HistogramOpts::new("site_availability_sync_latency_seconds", "Federation sync pull latency");
            let hv = HistogramVec::new(opts, &["site"]).expect("static histogram opts are always valid");
            registry
                .register(Box::new(hv.clone()))
                .expect("registering a fresh histogram vec cannot fail");
            hv
        };
        let sync_last_success_timestamp = register_gauge_vec_labels(
            &registry,
            "site_availability_sync_last_success_timestamp",
            "Unix timestamp of the last successful sync per peer",
            &["site"],
        );
        let sync_status_gauge = register_gauge_vec_labels(
            &registry,
            "site_availability_sync_status",
            "Per-peer sync health (1 for the peer's current status)",
            &["site", "status"],
        );

        Self {
            registry,
            status_gauge: Mutex::new(DynamicGauge { keys: initial_keys, gauge: status_gauge }),
            apps_total,
            apps_up,
            apps_down,
            apps_unavailable,
            total_apps,
            total_apps_up,
            total_apps_down,
            total_apps_unavailable,
            sync_attempts_total,
            sync_failures_total,
            sync_latency_seconds,
            sync_last_success_timestamp,
            sync_status: Mutex::new(HashMap::new()),
            sync_status_gauge,
            render_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn record_sync_attempt(&self, site: &str) {
        self.sync_attempts_total.with_label_values(&[site]).inc();
    }

    pub fn record_sync_success(&self, site: &str, latency_secs: f64) {
        self.sync_latency_seconds.with_label_values(&[site]).observe(latency_secs);
        self.sync_last_success_timestamp
            .with_label_values(&[site])
            .set(chrono::Utc::now().timestamp() as f64);
        self.sync_status.lock().insert(site.to_string(), "up".to_string());
    }

    pub fn record_sync_failure(&self, site: &str, latency_secs: f64) {
        self.sync_failures_total.with_label_values(&[site]).inc();
        self.sync_latency_seconds.with_label_values(&[site]).observe(latency_secs);
        self.sync_status.lock().insert(site.to_string(), "down".to_string());
    }

    /// Rebuild every gauge from a fresh snapshot (spec §4.6 steps 1-5).
    /// Callers serialize concurrent scrapes via `render_lock` before calling
    /// this and `encode`.
    fn rebuild(&self, apps: &[AppStatus]) {
        self.rebuild_status_gauge(apps);
        self.rebuild_aggregates(apps);
        self.rebuild_sync_status_gauge();
    }

    fn rebuild_status_gauge(&self, apps: &[AppStatus]) {
        let mut user_keys: HashSet<&str> = HashSet::new();
        for app in apps {
            for (k, _) in &app.labels.0 {
                user_keys.insert(k.as_str());
            }
        }
        let mut user_keys: Vec<String> = user_keys.into_iter().map(|s| s.to_string()).collect();
        user_keys.sort();

        let mut keys: Vec<String> = SYSTEM_LABEL_KEYS.iter().map(|s| s.to_string()).collect();
        keys.extend(user_keys);

        let mut guard = self.status_gauge.lock();
        if guard.keys != keys {
            self.registry
                .unregister(Box::new(guard.gauge.clone()))
                .expect("gauge was registered by this projector");
            let gauge = new_gauge_vec("site_availability_status", "Per-app up/down status (1/0)", &keys);
            self.registry
                .register(Box::new(gauge.clone()))
                .expect("registering a fresh gauge vec cannot fail");
            guard.keys = keys.clone();
            guard.gauge = gauge;
        } else {
            guard.gauge.reset();
        }

        for app in apps {
            let values: Vec<String> = guard
                .keys
                .iter()
                .map(|key| match key.as_str() {
                    "name" => app.name.clone(),
                    "location" => app.location.clone(),
                    "source" => app.source.clone(),
                    "origin_url" => app.origin_url.clone().unwrap_or_default(),
                    custom => app.labels.get(custom).unwrap_or("").to_string(),
                })
                .collect();
            let refs: Vec<&str> = values.iter().map(|s| s.as_str()).collect();
            let sample = if app.status == Status::Up { 1.0 } else { 0.0 };
            guard.gauge.with_label_values(&refs).set(sample);
        }
    }

    fn rebuild_aggregates(&self, apps: &[AppStatus]) {
        self.apps_total.reset();
        self.apps_up.reset();
        self.apps_down.reset();
        self.apps_unavailable.reset();

        let mut totals: HashMap<(String, String), (f64, f64, f64, f64)> = HashMap::new();
        for app in apps {
            let key = (app.location.clone(), app.source.clone());
            let entry = totals.entry(key).or_insert((0.0, 0.0, 0.0, 0.0));
            entry.0 += 1.0;
            match app.status {
                Status::Up => entry.1 += 1.0,
                Status::Down => entry.2 += 1.0,
                Status::Unavailable => entry.3 += 1.0,
            }
        }
        for ((location, source), (total, up, down, unavailable)) in &totals {
            let labels = [location.as_str(), source.as_str()];
            self.apps_total.with_label_values(&labels).set(*total);
            self.apps_up.with_label_values(&labels).set(*up);
            self.apps_down.with_label_values(&labels).set(*down);
            self.apps_unavailable.with_label_values(&labels).set(*unavailable);
        }

        let total = apps.len() as f64;
        let up = apps.iter().filter(|a| a.status == Status::Up).count() as f64;
        let down = apps.iter().filter(|a| a.status == Status::Down).count() as f64;
        let unavailable = apps.iter().filter(|a| a.status == Status::Unavailable).count() as f64;
        self.total_apps.set(total);
        self.total_apps_up.set(up);
        self.total_apps_down.set(down);
        self.total_apps_unavailable.set(unavailable);
    }

    fn rebuild_sync_status_gauge(&self) {
        self.sync_status_gauge.reset();
        for (site, status) in self.sync_status.lock().iter() {
            self.sync_status_gauge.with_label_values(&[site.as_str(), status.as_str()]).set(1.0);
        }
    }

    /// Rebuild from `apps` and serialize the full registry to Prometheus
    /// text exposition format, holding `render_lock` for the duration so
    /// concurrent `/metrics` requests share one rebuild (spec §5).
    pub async fn render(&self, apps: &[AppStatus]) -> Result<Vec<u8>, prometheus::Error> {
        let _guard = self.render_lock.lock().await;
        self.rebuild(apps);
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(buffer)
    }
}

impl Default for MetricsProjector {
    fn default() -> Self {
        Self::new()
    }
}

fn new_gauge_vec(name: &str, help: &str, label_keys: &[String]) -> GaugeVec {
    let label_refs: Vec<&str> = label_keys.iter().map(|s| s.as_str()).collect();
    GaugeVec::new(Opts::new(name, help), &label_refs).expect("static gauge opts are always valid")
}

fn register_gauge_vec(registry: &Registry, name: &str, help: &str) -> GaugeVec {
    register_gauge_vec_labels(registry, name, help, &["location", "source"])
}

fn register_gauge_vec_labels(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let gauge = GaugeVec::new(Opts::new(name, help), labels).expect("static gauge opts are always valid");
    registry
        .register(Box::new(gauge.clone()))
        .expect("registering a fresh gauge vec cannot fail");
    gauge
}

fn register_gauge(registry: &Registry, name: &str, help: &str) -> Gauge {
    let gauge = Gauge::new(name, help).expect("static gauge opts are always valid");
    registry
        .register(Box::new(gauge.clone()))
        .expect("registering a fresh gauge cannot fail");
    gauge
}

fn register_int_counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    let counter = IntCounterVec::new(Opts::new(name, help), labels).expect("static counter opts are always valid");
    registry
        .register(Box::new(counter.clone()))
        .expect("registering a fresh counter vec cannot fail");
    counter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Labels;

    fn app(name: &str, location: &str, source: &str, status: Status, labels: &[(&str, &str)]) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: location.into(),
            source: source.into(),
            status,
            origin_url: None,
            labels: Labels(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        }
    }

    #[tokio::test]
    async fn render_includes_app_and_aggregate_series() {
        let projector = MetricsProjector::new();
        let apps = vec![
            app("a", "nyc", "s1", Status::Up, &[("team", "red")]),
            app("b", "nyc", "s1", Status::Down, &[]),
        ];
        let rendered = String::from_utf8(projector.render(&apps).await.unwrap()).unwrap();
        assert!(rendered.contains("site_availability_status"));
        assert!(rendered.contains("site_availability_total_apps 2"));
        assert!(rendered.contains("site_availability_total_apps_down 1"));
    }

    #[tokio::test]
    async fn label_key_set_change_triggers_rebuild_without_duplicate_registration() {
        let projector = MetricsProjector::new();
        let first = vec![app("a", "nyc", "s1", Status::Up, &[("team", "red")])];
        projector.render(&first).await.unwrap();

        let second = vec![app("a", "nyc", "s1", Status::Up, &[("team", "red"), ("env", "prod")])];
        let rendered = String::from_utf8(projector.render(&second).await.unwrap()).unwrap();
        assert!(rendered.contains("env="));
    }

    #[tokio::test]
    async fn sync_counters_track_attempts_and_failures() {
        let projector = MetricsProjector::new();
        projector.record_sync_attempt("peer-a");
        projector.record_sync_failure("peer-a", 0.5);
        let rendered = String::from_utf8(projector.render(&[]).await.unwrap()).unwrap();
        assert!(rendered.contains("site_availability_sync_attempts_total"));
        assert!(rendered.contains("site_availability_sync_failures_total"));
        assert!(rendered.contains("peer-a"));
    }
}
