//! Authentication contract (spec §1, §11): the core consumes a
//! `{username, roles, is_admin}` principal and never produces one itself —
//! OIDC/local login and session cookies are external collaborators. The
//! `axum::FromRequestParts` impl below is a header-based stand-in good
//! enough to drive the authorization filter and its tests; a real
//! deployment swaps it for a session-cookie extractor without touching
//! `auth::authz` or any handler signature.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub username: String,
    pub roles: Vec<String>,
    pub is_admin: bool,
}

impl Principal {
    pub fn new(username: impl Into<String>, roles: Vec<String>) -> Self {
        let roles_has_admin = roles.iter().any(|r| r == "admin");
        Self {
            username: username.into(),
            roles,
            is_admin: roles_has_admin,
        }
    }
}

impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let username = parts
            .headers
            .get("x-sitewatch-user")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let username = match username {
            Some(u) if !u.is_empty() => u,
            _ => return Err((StatusCode::UNAUTHORIZED, "missing authentication context")),
        };

        let roles = parts
            .headers
            .get("x-sitewatch-roles")
            .and_then(|v| v.to_str().ok())
            .map(|s| {
                s.split(',')
                    .map(|r| r.trim().to_string())
                    .filter(|r| !r.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Principal::new(username, roles))
    }
}
