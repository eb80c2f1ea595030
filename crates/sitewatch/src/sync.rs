//! Federation wire format and publisher handler (spec §4.5). A peer site
//! reads `/sync` the same way a client reads `/api/apps` + `/api/locations`,
//! except the response is unfiltered by authorization and signed with HMAC
//! instead of gated by a `Principal`.

use crate::auth::hmac;
use crate::cache::StatusCache;
use crate::config::ServerSettings;
use crate::model::{AppStatus, Location};
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub locations: Vec<Location>,
    pub apps: Vec<AppStatus>,
}

/// `GET /sync` handler. Requires `server_settings.sync_enable` and a valid
/// `X-Site-Sync-Timestamp` / `X-Site-Sync-Signature` pair over the empty
/// body (spec §4.5 — sync is a GET, so there is no request body to sign
/// beyond the timestamp). Rejections are a bare 401/404 with no body detail
/// (spec §7 — "401 with no body details"), unlike the read API's `ApiError`
/// bodies: a sync auth failure must not hint at which part of the check
/// failed.
pub async fn handle_sync(
    State(cache): State<Arc<StatusCache>>,
    State(server): State<Arc<ServerSettings>>,
    headers: HeaderMap,
) -> Response {
    if !server.sync_enable {
        return StatusCode::NOT_FOUND.into_response();
    }
    let Some(token) = server.token.as_deref() else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    let timestamp = headers.get("X-Site-Sync-Timestamp").and_then(|v| v.to_str().ok());
    let signature = headers.get("X-Site-Sync-Signature").and_then(|v| v.to_str().ok());
    let (Some(timestamp), Some(signature)) = (timestamp, signature) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };

    if !hmac::verify(token, timestamp, b"", signature, chrono::Utc::now(), server.sync_window_secs) {
        return StatusCode::UNAUTHORIZED.into_response();
    }

    let apps = cache.get_app_status_cache();
    let locations = cache.get_locations_with_derived_status();

    Json(StatusResponse { apps, locations }).into_response()
}

/// Circular-prevention filter (spec §4.5). `own_host_url` is this site's
/// address, `peer_url` is the site we just pulled from (`U`), and
/// `directly_scraped` is the set of URLs this site scrapes through its own
/// `site`-kind sources (`D`). For each incoming app with `origin_url = O`:
/// drop if `O == own_host_url` (a stale echo of our own apps); drop if
/// `O ∈ D` and `O != U` (a third peer we also scrape directly — the direct
/// path is authoritative); otherwise keep. This guarantees convergence in a
/// connected mesh: an app surfaces at most once per node, along the
/// shortest path.
pub fn filter_circular(
    mut apps: Vec<AppStatus>,
    mut locations: Vec<Location>,
    own_host_url: &str,
    peer_url: &str,
    directly_scraped: &[String],
) -> (Vec<AppStatus>, Vec<Location>) {
    let keep_origin = |origin: Option<&str>| -> bool {
        match origin {
            Some(o) if o == own_host_url => false,
            Some(o) if o != peer_url && directly_scraped.iter().any(|d| d == o) => false,
            _ => true,
        }
    };
    apps.retain(|a| keep_origin(a.origin_url.as_deref()));
    locations.retain(|l| l.source != own_host_url);
    (apps, locations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Labels, Status};

    fn app(name: &str, origin: Option<&str>) -> AppStatus {
        AppStatus {
            name: name.into(),
            location: "nyc".into(),
            status: Status::Up,
            source: "peer".into(),
            origin_url: origin.map(|s| s.to_string()),
            labels: Labels::new(),
        }
    }

    #[test]
    fn circular_filter_drops_reflected_app() {
        let apps = vec![app("a", Some("http://self")), app("b", Some("http://other"))];
        let (filtered, _) = filter_circular(apps, vec![], "http://self", "http://other", &[]);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].name, "b");
    }

    #[test]
    fn circular_filter_keeps_apps_with_no_origin() {
        let apps = vec![app("a", None)];
        let (filtered, _) = filter_circular(apps, vec![], "http://self", "http://peer", &[]);
        assert_eq!(filtered.len(), 1);
    }

    #[test]
    fn circular_filter_drops_third_party_reachable_directly() {
        let apps = vec![app("c", Some("http://direct-peer"))];
        let directly_scraped = vec!["http://direct-peer".to_string()];
        let (filtered, _) = filter_circular(apps, vec![], "http://self", "http://indirect-peer", &directly_scraped);
        assert!(filtered.is_empty());
    }

    #[test]
    fn circular_filter_keeps_direct_peers_own_apps() {
        // The peer we are pulling from may also appear in our own D set
        // (we scrape it directly too); its own-observed apps still pass
        // through this specific pull since O == U.
        let apps = vec![app("d", Some("http://peer"))];
        let directly_scraped = vec!["http://peer".to_string()];
        let (filtered, _) = filter_circular(apps, vec![], "http://self", "http://peer", &directly_scraped);
        assert_eq!(filtered.len(), 1);
    }
}
