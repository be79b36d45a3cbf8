// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token claims and the authenticated principal.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::roles::Role;

/// Distinguishes short-lived access tokens from long-lived refresh tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

/// Claim set embedded in every signed token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (same value as `user_id`)
    pub sub: String,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub email: String,
    pub role: Role,
    pub token_type: TokenKind,
    /// Unique token ID
    pub jti: String,
    /// Issued at (Unix seconds)
    pub iat: i64,
    /// Expiration (Unix seconds)
    pub exp: i64,
}

impl TokenClaims {
    pub(crate) fn for_principal(principal: &Principal, kind: TokenKind, iat: i64, exp: i64) -> Self {
        Self {
            sub: principal.user_id.to_string(),
            user_id: principal.user_id,
            organization_id: principal.org_id,
            email: principal.email.clone(),
            role: principal.role,
            token_type: kind,
            jti: Uuid::new_v4().to_string(),
            iat,
            exp,
        }
    }
}

/// Authenticated identity attached to one request.
///
/// This is the only type handlers use to learn who is calling. It is built
/// from a verified access token by the auth middleware and is never
/// persisted, which is why it is `Serialize` but not `Deserialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Principal {
    pub user_id: Uuid,
    #[serde(rename = "organization_id")]
    pub org_id: Uuid,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn new(user_id: Uuid, org_id: Uuid, email: impl Into<String>, role: Role) -> Self {
        Self {
            user_id,
            org_id,
            email: email.into(),
            role,
        }
    }
}

impl From<TokenClaims> for Principal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            user_id: claims.user_id,
            org_id: claims.organization_id,
            email: claims.email,
            role: claims.role,
        }
    }
}
