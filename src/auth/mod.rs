// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Self-issued HS256 tokens for the inventory API.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <access token>`
//! 2. [`middleware::require_auth`]:
//!    - Rejects any token whose header names an algorithm other than HS256
//!    - Verifies the signature, then expiry against the server clock
//!    - Rejects refresh tokens
//!    - Inserts the [`Principal`] into request extensions
//! 3. Handlers read it through [`Auth`], [`OptionalAuth`] or [`RequireRole`]
//!
//! Expired access tokens are exchanged at `POST /v1/auth/refresh`, which only
//! accepts refresh tokens.
//!
//! ## Security
//!
//! - Every `/v1` route except refresh and session requires authentication
//! - Tokens are never logged
//! - Revocation is not supported; tokens live until `exp`

pub mod claims;
pub mod error;
pub mod extractor;
pub mod middleware;
pub mod roles;
pub mod tokens;

pub use claims::{Principal, TokenClaims, TokenKind};
pub use error::AuthError;
pub use extractor::{AdminOnly, AdminOrEditor, Auth, OptionalAuth, RequireRole, RolePolicy};
pub use middleware::{bearer_token, optional_auth, require_auth, require_role, RoleGate};
pub use roles::Role;
pub use tokens::{TokenError, TokenPair, TokenService, TokenTtl, SIGNING_ALGORITHM};
