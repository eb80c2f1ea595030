//! Status cache: authoritative per-source app/location partitions.
//!
//! Grounded on the teacher's `agent::pool::AgentPool`, whose `DashMap<String,
//! Arc<AgentConnection>>` keyed by agent id is generalized here into two
//! maps keyed by source name: `source -> Vec<AppStatus>` and
//! `source -> Vec<Location>`. Replacing a source's entry replaces it
//! atomically (`DashMap::insert` of a whole `Vec`), so partial results
//! never leak (spec §3).

use crate::config::ServerSettings;
use crate::index::LabelIndex;
use crate::model::{fold_location_status, AppStatus, Labels, Location};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct StatusCache {
    apps: DashMap<String, Vec<AppStatus>>,
    locations: DashMap<String, Vec<Location>>,
    index: Arc<LabelIndex>,
}

impl StatusCache {
    pub fn new(index: Arc<LabelIndex>) -> Self {
        Self {
            apps: DashMap::new(),
            locations: DashMap::new(),
            index,
        }
    }

    /// Replace the full set of apps reported by `source`, applying label
    /// merging and de-duplication, then rebuild the label index over the
    /// new authoritative total.
    pub fn update_app_status(
        &self,
        source: &str,
        mut incoming: Vec<AppStatus>,
        source_labels: &Labels,
        server: &ServerSettings,
        upstream_url: Option<&str>,
    ) {
        let server_labels = Labels::from_map(&server.labels);
        for app in &mut incoming {
            app.source = source.to_string();
            app.labels = Labels::merge(&server_labels, source_labels, &app.labels);
        }
        let deduped = dedup_by_source_name(incoming, upstream_url);
        self.apps.insert(source.to_string(), deduped);
        self.rebuild_index();
    }

    /// Replace the full set of locations reported by `source`, stamping
    /// each with the importing source's local name (spec §4.4 — a `site`
    /// source's locations arrive carrying the remote's own source name and
    /// must be rewritten to the local one, same as `update_app_status` does
    /// for apps).
    pub fn update_location_cache(&self, source: &str, mut locations: Vec<Location>) {
        for location in &mut locations {
            location.source = source.to_string();
        }
        self.locations.insert(source.to_string(), locations);
    }

    /// Remove a source's partitions entirely (config removal / GC).
    pub fn remove_source(&self, source: &str) {
        self.apps.remove(source);
        self.locations.remove(source);
        self.rebuild_index();
    }

    fn rebuild_index(&self) {
        let snapshot = self.get_app_status_cache();
        self.index.update(&snapshot);
    }

    /// A flat snapshot over all sources, materialized on demand.
    pub fn get_app_status_cache(&self) -> Vec<AppStatus> {
        self.apps.iter().flat_map(|e| e.value().clone()).collect()
    }

    pub fn get_location_cache(&self) -> Vec<Location> {
        self.locations.iter().flat_map(|e| e.value().clone()).collect()
    }

    /// Locations with derived status folded from the apps currently
    /// resident at each location, across all sources.
    pub fn get_locations_with_derived_status(&self) -> Vec<Location> {
        let apps = self.get_app_status_cache();
        self.get_location_cache()
            .into_iter()
            .map(|mut loc| {
                let at_location: Vec<&AppStatus> =
                    apps.iter().filter(|a| a.location == loc.name).collect();
                loc.status = Some(fold_location_status(&at_location));
                loc
            })
            .collect()
    }

    /// Readiness signal: true iff no source has published yet.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.locations.is_empty()
    }

    /// AND-intersection lookup over the label index, for `/api/apps` query
    /// filtering. Predicate field names are the index's own vocabulary:
    /// system fields unprefixed (`location`, `status`, ...), app labels as
    /// `labels.<key>`.
    pub fn find_by_fields(&self, predicates: &std::collections::HashMap<String, String>) -> Vec<String> {
        self.index.find_by_fields(predicates)
    }

    /// Distinct app label keys currently indexed, with the `labels.`
    /// prefix stripped back to the bare key name (spec §4.8 — `/api/labels`
    /// deals in label keys, not the index's internal field names).
    pub fn label_keys(&self) -> Vec<String> {
        self.index
            .keys()
            .into_iter()
            .filter_map(|k| k.strip_prefix("labels.").map(|s| s.to_string()))
            .collect()
    }

    /// Distinct values observed for one label key.
    pub fn label_values(&self, key: &str) -> Vec<String> {
        self.index.values(&format!("labels.{key}"))
    }

    #[cfg(test)]
    pub fn reset_for_testing(&self) {
        self.apps.clear();
        self.locations.clear();
        self.rebuild_index();
    }
}

/// Among records sharing `(source, name)`, prefer the one whose
/// `origin_url` matches the importing source's upstream URL; break further
/// ties by first occurrence (spec §4.2, §9 — "origin_url tie-break").
fn dedup_by_source_name(incoming: Vec<AppStatus>, upstream_url: Option<&str>) -> Vec<AppStatus> {
    let mut order: Vec<String> = Vec::new();
    let mut by_name: std::collections::HashMap<String, AppStatus> = std::collections::HashMap::new();

    for app in incoming {
        let key = app.name.clone();
        match by_name.get(&key) {
            None => {
                order.push(key.clone());
                by_name.insert(key, app);
            }
            Some(existing) => {
                let existing_matches = matches_upstream(existing, upstream_url);
                let new_matches = matches_upstream(&app, upstream_url);
                if new_matches && !existing_matches {
                    by_name.insert(key, app);
                }
                // else: keep the existing (first-occurrence) entry.
            }
        }
    }

    order
        .into_iter()
        .filter_map(|name| by_name.remove(&name))
        .collect()
}

fn matches_upstream(app: &AppStatus, upstream_url: Option<&str>) -> bool {
    match (app.origin_url.as_deref(), upstream_url) {
        (Some(origin), Some(upstream)) => origin == upstream,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Status;

    fn settings() -> ServerSettings {
        ServerSettings::default()
    }

    fn app(name: &str, source: &str, origin: Option<&str>) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: "nyc".into(),
            status: Status::Up,
            source: source.into(),
            origin_url: origin.map(|s| s.to_string()),
            labels: Labels::new(),
        }
    }

    #[test]
    fn unique_identity_per_source_name() {
        let cache = StatusCache::new(Arc::new(LabelIndex::new()));
        cache.update_app_status(
            "s1",
            vec![app("a", "ignored", None), app("b", "ignored", None)],
            &Labels::new(),
            &settings(),
            None,
        );
        let snapshot = cache.get_app_status_cache();
        let mut ids: Vec<String> = snapshot.iter().map(|a| a.unique_id()).collect();
        ids.sort();
        assert_eq!(ids, vec!["s1:a".to_string(), "s1:b".to_string()]);
    }

    #[test]
    fn replace_is_atomic_per_source() {
        let cache = StatusCache::new(Arc::new(LabelIndex::new()));
        cache.update_app_status("s1", vec![app("a", "s1", None)], &Labels::new(), &settings(), None);
        cache.update_app_status("s1", vec![app("b", "s1", None)], &Labels::new(), &settings(), None);
        let snapshot = cache.get_app_status_cache();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "b");
    }

    #[test]
    fn dedup_prefers_upstream_match() {
        let a = app("x", "s", Some("http://a"));
        let b = app("x", "s", Some("http://b"));
        let deduped = dedup_by_source_name(vec![a, b], Some("http://b"));
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].origin_url.as_deref(), Some("http://b"));
    }

    #[test]
    fn dedup_breaks_ties_by_first_occurrence() {
        let a = app("x", "s", Some("http://other"));
        let b = app("x", "s", Some("http://other"));
        let deduped = dedup_by_source_name(vec![a, b], Some("http://upstream"));
        assert_eq!(deduped.len(), 1);
        // Neither matches upstream: first occurrence wins.
        assert_eq!(deduped[0].origin_url.as_deref(), Some("http://other"));
    }

    #[test]
    fn is_empty_true_until_a_source_publishes() {
        let cache = StatusCache::new(Arc::new(LabelIndex::new()));
        assert!(cache.is_empty());
        cache.update_app_status("s1", vec![], &Labels::new(), &settings(), None);
        assert!(!cache.is_empty());
    }

    #[test]
    fn location_folding_matches_rule() {
        let cache = StatusCache::new(Arc::new(LabelIndex::new()));
        cache.update_location_cache(
            "s1",
            vec![Location {
                name: "nyc".into(),
                latitude: 0.0,
                longitude: 0.0,
                source: "s1".into(),
                status: None,
            }],
        );
        let mut a = app("a", "s1", None);
        a.status = Status::Down;
        let mut b = app("b", "s1", None);
        b.status = Status::Unavailable;
        cache.update_app_status("s1", vec![a, b], &Labels::new(), &settings(), None);

        let locations = cache.get_locations_with_derived_status();
        assert_eq!(locations[0].status, Some(Status::Down));
    }
}
