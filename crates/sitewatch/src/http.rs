//! Read API, health probes, and the middleware chain (spec §4.8).
//!
//! Grounded on the teacher's `main.rs` handler style (plain `Json`
//! responses, `State` extractors, one function per route) rather than its
//! GraphQL surface — the teacher's own `/api/agents/*` handlers are already
//! that plain-JSON shape (see `DESIGN.md`). Authentication is the
//! `Principal` extractor (spec §1 — an external collaborator's contract);
//! authorization is the per-handler `AuthorizationFilter` built from the
//! principal's roles and `server_settings.roles`. A denial is silent
//! omission from the response body, never a rejected request (spec §7).

use crate::auth::{AuthorizationFilter, Principal};
use crate::cache::StatusCache;
use crate::config::ServerSettings;
use crate::error::{ApiError, ApiResult};
use crate::metrics::MetricsProjector;
use crate::model::{AppStatus, Location};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use std::collections::HashMap;
use std::sync::Arc;

/// `GET /healthz` — liveness. No auth, never fails while the process runs.
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

/// `GET /readyz` — 200 iff at least one source has published, else 503
/// (spec §4.2 `IsEmpty`, §4.8).
pub async fn readyz(State(cache): State<Arc<StatusCache>>) -> StatusCode {
    if cache.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

/// `GET /metrics` — Prometheus exposition, gated by an optional bearer
/// token (`server_settings.metrics_token`); no token configured means the
/// endpoint is open (spec §4.8's "metrics-auth (optional token)").
pub async fn metrics(
    State(cache): State<Arc<StatusCache>>,
    State(server): State<Arc<ServerSettings>>,
    State(metrics): State<Arc<MetricsProjector>>,
    headers: HeaderMap,
) -> ApiResult<impl IntoResponse> {
    if let Some(expected) = server.metrics_token.as_deref().filter(|t| !t.is_empty()) {
        let provided = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));
        if provided != Some(expected) {
            return Err(ApiError::Unauthorized("invalid or missing metrics token".into()));
        }
    }

    let apps = cache.get_app_status_cache();
    let body = metrics
        .render(&apps)
        .await
        .map_err(|e| ApiError::Internal(format!("failed to render metrics: {e}")))?;
    Ok((
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

/// `GET /api/apps` — filtered by system-field query params (`location`,
/// `status`, `source`, `origin_url`, `name`) and `labels.<key>=v`, then
/// restricted to what the caller's roles make visible (spec §4.8).
pub async fn list_apps(
    State(cache): State<Arc<StatusCache>>,
    State(server): State<Arc<ServerSettings>>,
    principal: Principal,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<AppStatus>> {
    let snapshot = cache.get_app_status_cache();
    let matched = apply_query_filter(&cache, &snapshot, &query);

    let filter = AuthorizationFilter::new(&principal, &server.roles);
    let visible: Vec<AppStatus> = filter.filter_apps(&matched).into_iter().cloned().collect();
    Json(visible)
}

/// `GET /api/locations` — derived status, filtered by `name`/`status` query
/// params and the caller's visible apps (spec §4.7's location visibility:
/// a location is visible iff at least one visible app resides there, and
/// its derived status is folded over visible apps only).
pub async fn list_locations(
    State(cache): State<Arc<StatusCache>>,
    State(server): State<Arc<ServerSettings>>,
    principal: Principal,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<Location>> {
    let apps = cache.get_app_status_cache();
    let locations = cache.get_locations_with_derived_status();

    let filter = AuthorizationFilter::new(&principal, &server.roles);
    let mut visible = filter.filter_locations(&locations, &apps);

    if let Some(name) = query.get("name") {
        visible.retain(|l| &l.name == name);
    }
    if let Some(status) = query.get("status") {
        visible.retain(|l| l.status.map(|s| s.to_string()) == Some(status.clone()));
    }

    Json(visible)
}

/// `GET /api/labels` — with no query, the caller's visible label keys;
/// with `?<key>` present (empty value), the distinct visible values for
/// that key (spec §4.8).
pub async fn list_labels(
    State(cache): State<Arc<StatusCache>>,
    State(server): State<Arc<ServerSettings>>,
    principal: Principal,
    Query(query): Query<HashMap<String, String>>,
) -> Json<Vec<String>> {
    let filter = AuthorizationFilter::new(&principal, &server.roles);

    // A bare `?team` query param arrives as `team=""`; any key present at
    // all (even with a non-empty value) selects the values branch.
    if let Some(key) = query.keys().next() {
        let present = cache.label_values(key);
        let present: std::collections::HashSet<String> = present.into_iter().collect();
        let values = match filter.visible_values(key) {
            Some(visible) => visible.into_iter().filter(|v| present.contains(v)).collect(),
            None => {
                let mut all: Vec<String> = present.into_iter().collect();
                all.sort();
                all
            }
        };
        return Json(values);
    }

    let present: std::collections::HashSet<String> = cache.label_keys().into_iter().collect();
    let keys = match filter.visible_keys() {
        Some(visible) => visible.into_iter().filter(|k| present.contains(k)).collect(),
        None => {
            let mut all: Vec<String> = present.into_iter().collect();
            all.sort();
            all
        }
    };
    Json(keys)
}

/// Apply a query-param predicate map to `snapshot` via the label index
/// (spec §4.1 `FindByFields`). An empty query returns every app; an
/// unrecognized system field behaves exactly like a `labels.<key>` lookup
/// since the index doesn't distinguish at query time.
fn apply_query_filter<'a>(
    cache: &StatusCache,
    snapshot: &'a [AppStatus],
    query: &HashMap<String, String>,
) -> Vec<&'a AppStatus> {
    if query.is_empty() {
        return snapshot.iter().collect();
    }
    let matched_ids: std::collections::HashSet<String> =
        cache.find_by_fields(query).into_iter().collect();
    snapshot.iter().filter(|a| matched_ids.contains(&a.unique_id())).collect()
}
