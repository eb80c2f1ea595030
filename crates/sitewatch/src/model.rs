//! Core data model: apps, locations, labels.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Up/down/unavailable status of a single monitored app.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Up,
    Down,
    Unavailable,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Status::Up => "up",
            Status::Down => "down",
            Status::Unavailable => "unavailable",
        };
        f.write_str(s)
    }
}

/// An ordered set of (key, value) label pairs.
///
/// A plain `Vec` rather than a `HashMap` so merge order is deterministic:
/// callers can tell app-level labels apart from server/source-level ones
/// by re-running the merge, which matters for tests pinning §3's priority
/// invariant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Labels(pub Vec<(String, String)>);

impl Labels {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn from_map(map: &std::collections::HashMap<String, String>) -> Self {
        let mut pairs: Vec<(String, String)> = map
            .iter()
            .filter(|(_, v)| !v.is_empty())
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        Self(pairs)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str, value: &str) -> bool {
        self.0.iter().any(|(k, v)| k == key && v == value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    fn set(&mut self, key: String, value: String) {
        if value.is_empty() {
            return;
        }
        if let Some(existing) = self.0.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    /// Merge server, source and app labels: app > source > server on key
    /// collision. Pure — none of the inputs are mutated.
    pub fn merge(server: &Labels, source: &Labels, app: &Labels) -> Labels {
        let mut out = Labels::new();
        for (k, v) in &server.0 {
            out.set(k.clone(), v.clone());
        }
        for (k, v) in &source.0 {
            out.set(k.clone(), v.clone());
        }
        for (k, v) in &app.0 {
            out.set(k.clone(), v.clone());
        }
        out
    }
}

/// The atomic monitored unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppStatus {
    pub name: String,
    pub location: String,
    pub status: Status,
    /// Local source name that produced or imported this record.
    pub source: String,
    /// Host URL of the instance that originally observed this app.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
    #[serde(default)]
    pub labels: Labels,
}

impl AppStatus {
    /// `"source:name"` — the identity key used by the cache and label index.
    pub fn unique_id(&self) -> String {
        format!("{}:{}", self.source, self.name)
    }
}

/// A named geographic point apps are pinned to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub source: String,
    /// Derived status is never stored on a `Location` directly; this field
    /// only exists on the wire (`/sync`, `/api/locations`) where it carries
    /// the value computed by `cache::fold_location_status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
}

impl Location {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("location name must not be empty".into());
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("latitude {} out of range [-90,90]", self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(format!(
                "longitude {} out of range [-180,180]",
                self.longitude
            ));
        }
        Ok(())
    }
}

/// Fold a location's apps down to a single derived status, per spec §4.2:
/// unavailable-without-down beats up, down beats everything but itself,
/// all-up is up, no apps is unavailable.
pub fn fold_location_status(apps: &[&AppStatus]) -> Status {
    if apps.is_empty() {
        return Status::Unavailable;
    }
    let any_down = apps.iter().any(|a| a.status == Status::Down);
    if any_down {
        return Status::Down;
    }
    let any_unavailable = apps.iter().any(|a| a.status == Status::Unavailable);
    if any_unavailable {
        return Status::Unavailable;
    }
    Status::Up
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app(name: &str, status: Status) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: "nyc".into(),
            status,
            source: "s".into(),
            origin_url: None,
            labels: Labels::new(),
        }
    }

    #[test]
    fn merge_all_empty_is_empty() {
        let merged = Labels::merge(&Labels::new(), &Labels::new(), &Labels::new());
        assert!(merged.0.is_empty());
    }

    #[test]
    fn merge_priority_app_wins() {
        let server = Labels(vec![("env".into(), "prod".into()), ("team".into(), "red".into())]);
        let source = Labels(vec![("team".into(), "blue".into()), ("tier".into(), "api".into())]);
        let app = Labels(vec![("team".into(), "green".into())]);
        let merged = Labels::merge(&server, &source, &app);
        assert_eq!(merged.get("env"), Some("prod"));
        assert_eq!(merged.get("team"), Some("green"));
        assert_eq!(merged.get("tier"), Some("api"));
    }

    #[test]
    fn merge_drops_empty_values() {
        let app = Labels(vec![("k".into(), "".into())]);
        let merged = Labels::merge(&Labels::new(), &Labels::new(), &app);
        assert_eq!(merged.get("k"), None);
    }

    #[test]
    fn fold_no_apps_is_unavailable() {
        assert_eq!(fold_location_status(&[]), Status::Unavailable);
    }

    #[test]
    fn fold_down_dominates_unavailable() {
        let a = app("a", Status::Down);
        let b = app("b", Status::Unavailable);
        assert_eq!(fold_location_status(&[&a, &b]), Status::Down);
    }

    #[test]
    fn fold_unavailable_without_down() {
        let a = app("a", Status::Up);
        let b = app("b", Status::Unavailable);
        assert_eq!(fold_location_status(&[&a, &b]), Status::Unavailable);
    }

    #[test]
    fn fold_all_up() {
        let a = app("a", Status::Up);
        let b = app("b", Status::Up);
        assert_eq!(fold_location_status(&[&a, &b]), Status::Up);
    }

    #[test]
    fn unique_id_is_source_colon_name() {
        let a = app("web", Status::Up);
        assert_eq!(a.unique_id(), "s:web");
    }
}
