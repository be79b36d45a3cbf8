// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication middleware for Axum.
//!
//! [`require_auth`] guards a router subtree: it verifies the bearer token and
//! inserts the [`Principal`] into request extensions before the handler runs.
//! [`optional_auth`] does the same but lets anonymous requests through.
//! [`require_role`] must be layered *inside* `require_auth` (added first,
//! since the last `route_layer` call is the outermost).
//!
//! ```rust,ignore
//! let admin = Router::new()
//!     .route("/audit", get(list_audit))
//!     .route_layer(from_fn_with_state(RoleGate::admin_only(), require_role))
//!     .route_layer(from_fn_with_state(state.clone(), require_auth));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::{AuthError, Principal, Role};
use crate::state::AppState;

/// Extract the bearer token from an `Authorization` header.
///
/// The scheme is matched case-insensitively; the token must be non-empty.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?;

    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidAuthHeader)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }
    Ok(token)
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, AuthError> {
    let token = bearer_token(headers)?;
    state.tokens.verify(token).map_err(AuthError::from)
}

/// Reject requests without a valid access token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(principal) => {
            tracing::debug!(
                user_id = %principal.user_id,
                org_id = %principal.org_id,
                role = %principal.role,
                "Request authenticated"
            );
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(e) => {
            tracing::debug!(
                error_code = e.error_code(),
                path = %request.uri().path(),
                "Authentication failed"
            );
            e.into_response()
        }
    }
}

/// Attach a principal when a valid token is present; never reject.
///
/// A missing header is anonymous. A present but invalid token is also
/// treated as anonymous; handlers see no principal either way.
pub async fn optional_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    match authenticate(&state, request.headers()) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
        }
        Err(AuthError::MissingAuthHeader) => {}
        Err(e) => {
            tracing::debug!(error_code = e.error_code(), "Ignoring invalid optional credentials");
        }
    }
    next.run(request).await
}

/// Set of roles admitted by [`require_role`].
#[derive(Debug, Clone)]
pub struct RoleGate {
    allowed: Arc<[Role]>,
}

impl RoleGate {
    pub fn new(allowed: impl IntoIterator<Item = Role>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
        }
    }

    pub fn admin_only() -> Self {
        Self::new([Role::Admin])
    }

    pub fn allowed(&self) -> &[Role] {
        &self.allowed
    }
}

/// Check a request's principal against an allowed role set.
///
/// No principal is 401, a principal outside the set is 403.
pub fn authorize<'a>(
    principal: Option<&'a Principal>,
    allowed: &[Role],
) -> Result<&'a Principal, AuthError> {
    let principal = principal.ok_or(AuthError::MissingPrincipal)?;
    if principal.role.is_in(allowed) {
        Ok(principal)
    } else {
        Err(AuthError::InsufficientPermissions)
    }
}

/// Reject principals whose role is not in the gate's set.
pub async fn require_role(State(gate): State<RoleGate>, request: Request, next: Next) -> Response {
    if let Err(e) = authorize(request.extensions().get::<Principal>(), gate.allowed()) {
        if e == AuthError::InsufficientPermissions {
            if let Some(p) = request.extensions().get::<Principal>() {
                tracing::warn!(
                    user_id = %p.user_id,
                    role = %p.role,
                    path = %request.uri().path(),
                    "Role not permitted"
                );
            }
        }
        return e.into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{HeaderValue, Request as HttpRequest, StatusCode},
        middleware::from_fn_with_state,
        routing::get,
        Extension, Router,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        h
    }

    fn principal(role: Role) -> Principal {
        Principal::new(Uuid::new_v4(), Uuid::new_v4(), "user@example.com", role)
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(bearer_token(&headers("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers("BEARER  abc ")).unwrap(), "abc");
    }

    #[test]
    fn malformed_headers_are_rejected() {
        assert_eq!(bearer_token(&HeaderMap::new()), Err(AuthError::MissingAuthHeader));
        for value in ["Basic abc", "Bearer", "Bearer   ", "abc", "Token abc"] {
            assert_eq!(
                bearer_token(&headers(value)),
                Err(AuthError::InvalidAuthHeader),
                "{value:?}"
            );
        }
    }

    #[test]
    fn authorize_distinguishes_401_and_403() {
        assert_eq!(
            authorize(None, &[Role::Admin]).unwrap_err(),
            AuthError::MissingPrincipal
        );

        let viewer = principal(Role::Viewer);
        assert_eq!(
            authorize(Some(&viewer), &[Role::Admin, Role::Editor]).unwrap_err(),
            AuthError::InsufficientPermissions
        );

        let editor = principal(Role::Editor);
        assert!(authorize(Some(&editor), &[Role::Admin, Role::Editor]).is_ok());
    }

    async fn status_for(gate: RoleGate, principal: Option<Principal>) -> StatusCode {
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .route_layer(from_fn_with_state(gate, require_role));
        let app = match principal {
            Some(p) => app.layer(Extension(p)),
            None => app,
        };
        let response = app
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[tokio::test]
    async fn role_gate_admits_only_listed_roles() {
        let gate = RoleGate::new([Role::Admin, Role::Editor]);
        assert_eq!(status_for(gate.clone(), Some(principal(Role::Viewer))).await, StatusCode::FORBIDDEN);
        assert_eq!(status_for(gate.clone(), Some(principal(Role::Editor))).await, StatusCode::OK);
        assert_eq!(status_for(gate.clone(), Some(principal(Role::Admin))).await, StatusCode::OK);
        assert_eq!(status_for(gate, None).await, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn admin_only_gate_forbids_editors() {
        assert_eq!(
            status_for(RoleGate::admin_only(), Some(principal(Role::Editor))).await,
            StatusCode::FORBIDDEN
        );
    }
}
