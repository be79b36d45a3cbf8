// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authenticated principal.
//!
//! These read what the auth middleware left in request extensions; they
//! never look at headers themselves.
//!
//! ```rust,ignore
//! async fn me(Auth(principal): Auth) -> Json<Principal> {
//!     Json(principal)
//! }
//!
//! async fn put_secret(RequireRole(principal, _): RequireRole<AdminOrEditor>) { .. }
//! ```

use std::marker::PhantomData;

use axum::{extract::FromRequestParts, http::request::Parts};

use super::middleware::authorize;
use super::{AuthError, Principal, Role};

/// Extractor for authenticated principals.
///
/// Rejects with 401 when no principal was attached.
pub struct Auth(pub Principal);

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(Auth)
            .ok_or(AuthError::MissingPrincipal)
    }
}

/// Principal if one was attached, `None` for anonymous requests.
pub struct OptionalAuth(pub Option<Principal>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<Principal>().cloned()))
    }
}

/// Static role set used by [`RequireRole`].
pub trait RolePolicy {
    const ALLOWED: &'static [Role];
}

pub struct AdminOnly;

impl RolePolicy for AdminOnly {
    const ALLOWED: &'static [Role] = &[Role::Admin];
}

pub struct AdminOrEditor;

impl RolePolicy for AdminOrEditor {
    const ALLOWED: &'static [Role] = &[Role::Admin, Role::Editor];
}

/// Extractor that requires the principal's role to be in `P::ALLOWED`.
pub struct RequireRole<P: RolePolicy>(pub Principal, pub PhantomData<P>);

impl<P, S> FromRequestParts<S> for RequireRole<P>
where
    P: RolePolicy,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let principal = authorize(parts.extensions.get::<Principal>(), P::ALLOWED)?;
        Ok(RequireRole(principal.clone(), PhantomData))
    }
}
