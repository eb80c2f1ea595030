//! Inverted label index: `field -> value -> [unique_id]`.
//!
//! Rebuilt from scratch on every cache write (spec §4.1) rather than
//! incrementally maintained: rebuilds are cheap at fleet scale and a full
//! rebuild sidesteps any incremental-maintenance bugs. Single-writer,
//! many-reader, guarded by one `parking_lot::RwLock` the way the teacher's
//! `metrics.rs` guards its per-agent subscription counts.

use crate::model::AppStatus;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

const SYSTEM_FIELDS: [&str; 5] = ["name", "location", "status", "source", "origin_url"];

#[derive(Default)]
pub struct LabelIndex {
    inner: RwLock<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl LabelIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically rebuild the inverted index for the full app set.
    pub fn update(&self, apps: &[AppStatus]) {
        let mut next: HashMap<String, HashMap<String, Vec<String>>> = HashMap::new();
        for app in apps {
            let id = app.unique_id();
            push(&mut next, "name", &app.name, &id);
            push(&mut next, "location", &app.location, &id);
            push(&mut next, "status", &app.status.to_string(), &id);
            push(&mut next, "source", &app.source, &id);
            if let Some(origin) = &app.origin_url {
                push(&mut next, "origin_url", origin, &id);
            }
            for (k, v) in &app.labels.0 {
                let field = format!("labels.{k}");
                push(&mut next, &field, v, &id);
            }
        }
        *self.inner.write() = next;
    }

    /// Returns a defensive copy of the posting list for `field=value`.
    pub fn find_by_field(&self, field: &str, value: &str) -> Vec<String> {
        self.inner
            .read()
            .get(field)
            .and_then(|values| values.get(value))
            .cloned()
            .unwrap_or_default()
    }

    /// AND-intersection across predicates, short-circuiting on empty.
    /// Starts from the smallest candidate posting list when the sizes are
    /// known up front, so the common case (one highly selective predicate
    /// plus several broad ones) does the least work.
    pub fn find_by_fields(&self, predicates: &HashMap<String, String>) -> Vec<String> {
        if predicates.is_empty() {
            return Vec::new();
        }
        let guard = self.inner.read();
        let mut lists: Vec<&Vec<String>> = Vec::with_capacity(predicates.len());
        for (field, value) in predicates {
            match guard.get(field).and_then(|values| values.get(value)) {
                Some(list) => lists.push(list),
                None => return Vec::new(),
            }
        }
        lists.sort_by_key(|l| l.len());
        let mut acc: HashSet<&str> = lists[0].iter().map(|s| s.as_str()).collect();
        for list in &lists[1..] {
            if acc.is_empty() {
                break;
            }
            let set: HashSet<&str> = list.iter().map(|s| s.as_str()).collect();
            acc.retain(|id| set.contains(id));
        }
        acc.into_iter().map(|s| s.to_string()).collect()
    }

    /// All distinct fields currently indexed (system fields + `labels.*`).
    pub fn keys(&self) -> Vec<String> {
        self.inner.read().keys().cloned().collect()
    }

    /// All distinct values observed for `field`.
    pub fn values(&self, field: &str) -> Vec<String> {
        self.inner
            .read()
            .get(field)
            .map(|values| values.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_system_field(field: &str) -> bool {
        SYSTEM_FIELDS.contains(&field)
    }
}

fn push(
    index: &mut HashMap<String, HashMap<String, Vec<String>>>,
    field: &str,
    value: &str,
    id: &str,
) {
    if value.is_empty() {
        return;
    }
    let list = index
        .entry(field.to_string())
        .or_default()
        .entry(value.to_string())
        .or_default();
    // A single app can carry the same (field, value) pair more than once
    // (e.g. a malformed labels claim); keep the posting list a set even
    // though the source data isn't.
    if !list.iter().any(|existing| existing == id) {
        list.push(id.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, Status};
    use std::collections::HashMap;

    fn app(name: &str, location: &str, status: Status, labels: &[(&str, &str)]) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: location.into(),
            status,
            source: "src".into(),
            origin_url: None,
            labels: Labels(labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()),
        }
    }

    #[test]
    fn find_by_field_is_subset_and_matches() {
        let idx = LabelIndex::new();
        let apps = vec![
            app("a", "nyc", Status::Up, &[("team", "red")]),
            app("b", "nyc", Status::Down, &[("team", "blue")]),
        ];
        idx.update(&apps);
        let found = idx.find_by_field("labels.team", "red");
        assert_eq!(found, vec!["src:a".to_string()]);
    }

    #[test]
    fn find_by_fields_is_and_intersection() {
        let idx = LabelIndex::new();
        let apps = vec![
            app("a", "nyc", Status::Up, &[("team", "red")]),
            app("b", "nyc", Status::Up, &[("team", "blue")]),
            app("c", "sfo", Status::Up, &[("team", "red")]),
        ];
        idx.update(&apps);
        let mut predicates = HashMap::new();
        predicates.insert("location".to_string(), "nyc".to_string());
        predicates.insert("labels.team".to_string(), "red".to_string());
        let found = idx.find_by_fields(&predicates);
        assert_eq!(found, vec!["src:a".to_string()]);
    }

    #[test]
    fn find_by_fields_short_circuits_on_empty() {
        let idx = LabelIndex::new();
        idx.update(&[app("a", "nyc", Status::Up, &[])]);
        let mut predicates = HashMap::new();
        predicates.insert("location".to_string(), "nowhere".to_string());
        predicates.insert("status".to_string(), "up".to_string());
        assert!(idx.find_by_fields(&predicates).is_empty());
    }

    #[test]
    fn dedups_even_with_duplicate_postings() {
        let idx = LabelIndex::new();
        // Two apps with the same label value should not produce a
        // duplicated id in a single posting list by construction, but the
        // intersection logic must also not introduce duplicates.
        let apps = vec![app("a", "nyc", Status::Up, &[("team", "red"), ("team", "red")])];
        idx.update(&apps);
        let found = idx.find_by_field("labels.team", "red");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn rebuild_replaces_previous_state() {
        let idx = LabelIndex::new();
        idx.update(&[app("a", "nyc", Status::Up, &[])]);
        assert_eq!(idx.find_by_field("name", "a").len(), 1);
        idx.update(&[app("b", "nyc", Status::Up, &[])]);
        assert!(idx.find_by_field("name", "a").is_empty());
        assert_eq!(idx.find_by_field("name", "b").len(), 1);
    }
}
