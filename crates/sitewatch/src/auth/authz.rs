//! Authorization filter (spec §4.7): a role/label visibility predicate
//! applied on every read. Never mutates the cache; a denial is silent
//! omission, not a rejection (spec §7).

use crate::model::{fold_location_status, AppStatus, Location};
use crate::auth::principal::Principal;
use std::collections::{HashMap, HashSet};

pub struct AuthorizationFilter<'a> {
    principal: &'a Principal,
    roles: &'a HashMap<String, HashMap<String, String>>,
}

impl<'a> AuthorizationFilter<'a> {
    pub fn new(principal: &'a Principal, roles: &'a HashMap<String, HashMap<String, String>>) -> Self {
        Self { principal, roles }
    }

    /// Admin short-circuit: any `admin` role, or any owned role whose
    /// predicate map is empty (`{}`), grants full access (spec §4.7, §9).
    fn has_full_access(&self) -> bool {
        if self.principal.is_admin {
            return true;
        }
        self.principal.roles.iter().any(|role| {
            self.roles
                .get(role)
                .map(|predicate| predicate.is_empty())
                .unwrap_or(false)
        })
    }

    /// All (key, value) pairs granted by any of the user's roles.
    fn owned_pairs(&self) -> HashSet<(&str, &str)> {
        let mut pairs = HashSet::new();
        for role in &self.principal.roles {
            if let Some(predicate) = self.roles.get(role) {
                for (k, v) in predicate {
                    pairs.insert((k.as_str(), v.as_str()));
                }
            }
        }
        pairs
    }

    /// `None` means unrestricted (admin short-circuit): the caller should
    /// substitute the full, unfiltered key set instead of treating this as
    /// "no keys visible".
    pub fn visible_keys(&self) -> Option<Vec<String>> {
        if self.has_full_access() {
            return None;
        }
        let mut keys: HashSet<&str> = HashSet::new();
        for (k, _) in self.owned_pairs() {
            keys.insert(k);
        }
        let mut keys: Vec<String> = keys.into_iter().map(|s| s.to_string()).collect();
        keys.sort();
        Some(keys)
    }

    /// `None` means unrestricted, same convention as [`Self::visible_keys`].
    pub fn visible_values(&self, key: &str) -> Option<Vec<String>> {
        if self.has_full_access() {
            return None;
        }
        let mut values: Vec<String> = self
            .owned_pairs()
            .into_iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, v)| v.to_string())
            .collect();
        values.sort();
        values.dedup();
        Some(values)
    }

    /// An app is visible iff some merged label of it matches some (key,
    /// value) pair owned by any of the user's roles. OR across roles,
    /// OR across the app's labels.
    pub fn app_is_visible(&self, app: &AppStatus) -> bool {
        if self.has_full_access() {
            return true;
        }
        let owned = self.owned_pairs();
        app.labels.0.iter().any(|(k, v)| owned.contains(&(k.as_str(), v.as_str())))
    }

    pub fn filter_apps<'apps>(&self, apps: &'apps [AppStatus]) -> Vec<&'apps AppStatus> {
        apps.iter().filter(|a| self.app_is_visible(a)).collect()
    }

    /// A location is visible iff at least one visible app resides there.
    /// Derived status is computed over visible apps only.
    pub fn filter_locations(&self, locations: &[Location], apps: &[AppStatus]) -> Vec<Location> {
        let visible_apps = self.filter_apps(apps);
        locations
            .iter()
            .filter_map(|loc| {
                let at_location: Vec<&AppStatus> =
                    visible_apps.iter().filter(|a| a.location == loc.name).copied().collect();
                if at_location.is_empty() {
                    return None;
                }
                let mut loc = loc.clone();
                loc.status = Some(fold_location_status(&at_location));
                Some(loc)
            })
            .collect()
    }
}
