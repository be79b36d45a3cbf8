// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session endpoints: token refresh and principal introspection.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    auth::{Auth, AuthError, OptionalAuth, Principal, TokenPair},
    state::AppState,
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
}

/// Exchange a refresh token for a new token pair.
#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Session",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Refresh token invalid, expired or of the wrong type"),
        (status = 429, description = "Rate limit exceeded")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let pair = state.tokens.refresh(request.refresh_token.trim()).map_err(|e| {
        tracing::debug!(error = %e, "Refresh rejected");
        AuthError::from(e)
    })?;
    Ok(Json(pair))
}

/// Report whether the caller is authenticated. Never returns 401.
#[utoipa::path(
    get,
    path = "/v1/session",
    tag = "Session",
    responses(
        (status = 200, description = "Session state", body = SessionResponse)
    )
)]
pub async fn session(OptionalAuth(principal): OptionalAuth) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: principal.is_some(),
        principal,
    })
}

/// The authenticated principal.
#[utoipa::path(
    get,
    path = "/v1/me",
    tag = "Session",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current principal", body = Principal),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn me(Auth(principal): Auth) -> Json<Principal> {
    Json(principal)
}
