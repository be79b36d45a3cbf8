// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail read endpoints (admin only, enforced by the router's role gate).

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use uuid::Uuid;

use crate::{
    auth::Auth,
    error::ApiError,
    state::AppState,
    storage::{AuditAction, AuditPage, AuditQuery, AuditRecord, AuditRepository},
};

const MAX_PAGE_SIZE: usize = 500;
const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditListParams {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    /// Page size (default 100, max 500)
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<AuditListParams> for AuditQuery {
    fn from(p: AuditListParams) -> Self {
        AuditQuery {
            resource_type: p.resource_type,
            resource_id: p.resource_id,
            actor_user_id: p.actor_user_id,
            action: p.action,
            limit: p.limit.unwrap_or(DEFAULT_PAGE_SIZE).min(MAX_PAGE_SIZE),
            offset: p.offset.unwrap_or(0),
        }
    }
}

/// List the caller's organization audit trail, newest first.
#[utoipa::path(
    get,
    path = "/v1/audit",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(AuditListParams),
    responses(
        (status = 200, description = "Page of audit records", body = AuditPage),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires admin role")
    )
)]
pub async fn list_audit(
    Auth(principal): Auth,
    State(state): State<AppState>,
    Query(params): Query<AuditListParams>,
) -> Result<Json<AuditPage>, ApiError> {
    let org_id = principal.org_id;
    let query: AuditQuery = params.into();
    let page = state
        .store
        .read_async(move |store| AuditRepository::new(store).list(&org_id, &query))
        .await?;
    Ok(Json(page))
}

/// Fetch one audit record.
#[utoipa::path(
    get,
    path = "/v1/audit/{record_id}",
    tag = "Audit",
    security(("bearer_auth" = [])),
    params(("record_id" = Uuid, Path, description = "Audit record ID")),
    responses(
        (status = 200, description = "Audit record", body = AuditRecord),
        (status = 403, description = "Requires admin role"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_audit_record(
    Auth(principal): Auth,
    State(state): State<AppState>,
    Path(record_id): Path<Uuid>,
) -> Result<Json<AuditRecord>, ApiError> {
    let org_id = principal.org_id;
    let record = state
        .store
        .read_async(move |store| AuditRepository::new(store).get(&org_id, &record_id))
        .await?;
    Ok(Json(record))
}
