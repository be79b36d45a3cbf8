// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Cluster credential API endpoints.
//!
//! Secrets are write-only over HTTP: responses carry metadata and a
//! fingerprint, never the plaintext. Every write records an audit entry in
//! the same transaction.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::middleware::RequestDeadline;
use crate::{
    auth::{AdminOnly, AdminOrEditor, Auth, RequireRole},
    error::ApiError,
    state::AppState,
    storage::{
        deletion_entry, AuditContext, CredentialKind, CredentialMetadata, CredentialRepository,
    },
};

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct PutCredentialRequest {
    /// Secret value (service account token or kubeconfig YAML)
    pub value: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CredentialListResponse {
    pub credentials: Vec<CredentialMetadata>,
    pub total: usize,
}

fn parse_kind(kind: &str) -> Result<CredentialKind, ApiError> {
    CredentialKind::parse(kind)
        .ok_or_else(|| ApiError::bad_request(format!("Unknown credential kind '{kind}'")))
}

/// List credential metadata for a cluster.
#[utoipa::path(
    get,
    path = "/v1/clusters/{cluster_id}/credentials",
    tag = "Credentials",
    security(("bearer_auth" = [])),
    params(("cluster_id" = String, Path, description = "Cluster identifier")),
    responses(
        (status = 200, description = "Credential metadata", body = CredentialListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_credentials(
    Auth(principal): Auth,
    State(state): State<AppState>,
    Path(cluster_id): Path<String>,
) -> Result<Json<CredentialListResponse>, ApiError> {
    let org_id = principal.org_id;
    let encryptor = Arc::clone(&state.encryptor);
    let credentials: Vec<CredentialMetadata> = state
        .store
        .read_async(move |store| {
            CredentialRepository::new(store, &encryptor).list_for_resource(&org_id, &cluster_id)
        })
        .await?
        .iter()
        .map(|c| c.metadata())
        .collect();

    Ok(Json(CredentialListResponse {
        total: credentials.len(),
        credentials,
    }))
}

/// Create or rotate a cluster credential.
#[utoipa::path(
    put,
    path = "/v1/clusters/{cluster_id}/credentials/{kind}",
    tag = "Credentials",
    security(("bearer_auth" = [])),
    params(
        ("cluster_id" = String, Path, description = "Cluster identifier"),
        ("kind" = CredentialKind, Path, description = "Credential kind")
    ),
    request_body = PutCredentialRequest,
    responses(
        (status = 201, description = "Credential created", body = CredentialMetadata),
        (status = 200, description = "Credential rotated", body = CredentialMetadata),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires admin or editor role"),
        (status = 504, description = "Request deadline exceeded")
    )
)]
pub async fn put_credential(
    RequireRole(principal, _): RequireRole<AdminOrEditor>,
    State(state): State<AppState>,
    ctx: AuditContext,
    deadline: RequestDeadline,
    Path((cluster_id, kind)): Path<(String, String)>,
    Json(request): Json<PutCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialMetadata>), ApiError> {
    let kind = parse_kind(&kind)?;
    let org_id = principal.org_id;
    let transactions = state.transactions.clone();

    let change = transactions
        .run_async(deadline.at, deadline.gate, move |scope| {
            let change = state
                .credentials()
                .upsert(scope, org_id, &cluster_id, kind, &request.value)?;
            state.audit.record(scope, &ctx, change.audit_entry())?;
            Ok(change)
        })
        .await?;

    tracing::info!(
        credential_id = %change.current.id,
        org_id = %org_id,
        kind = %kind,
        version = change.current.version,
        "Credential stored"
    );

    let status = if change.previous.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(change.current.metadata())))
}

/// Delete a cluster credential.
#[utoipa::path(
    delete,
    path = "/v1/clusters/{cluster_id}/credentials/{kind}",
    tag = "Credentials",
    security(("bearer_auth" = [])),
    params(
        ("cluster_id" = String, Path, description = "Cluster identifier"),
        ("kind" = CredentialKind, Path, description = "Credential kind")
    ),
    responses(
        (status = 204, description = "Credential deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Requires admin role"),
        (status = 404, description = "Credential not found")
    )
)]
pub async fn delete_credential(
    RequireRole(principal, _): RequireRole<AdminOnly>,
    State(state): State<AppState>,
    ctx: AuditContext,
    deadline: RequestDeadline,
    Path((cluster_id, kind)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let kind = parse_kind(&kind)?;
    let org_id = principal.org_id;
    let transactions = state.transactions.clone();

    let removed = transactions
        .run_async(deadline.at, deadline.gate, move |scope| {
            let removed = state.credentials().delete(scope, org_id, &cluster_id, kind)?;
            state.audit.record(scope, &ctx, deletion_entry(&removed))?;
            Ok(removed)
        })
        .await?;

    tracing::info!(credential_id = %removed.id, org_id = %org_id, kind = %kind, "Credential deleted");
    Ok(StatusCode::NO_CONTENT)
}
