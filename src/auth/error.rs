// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication and authorization errors.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use super::tokens::TokenError;

/// Authentication error type.
///
/// Every variant except `InsufficientPermissions` maps to 401; the client is
/// expected to re-authenticate. None of them are retried server-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No authorization header present
    MissingAuthHeader,
    /// Invalid authorization header format
    InvalidAuthHeader,
    /// Token is malformed
    MalformedToken,
    /// Token signature is invalid
    InvalidSignature,
    /// Token header names an algorithm other than the pinned one
    UnexpectedAlgorithm,
    /// Token has expired
    TokenExpired,
    /// Refresh token used where an access token is required, or vice versa
    WrongTokenType,
    /// No principal attached to the request (auth did not run or failed)
    MissingPrincipal,
    /// Insufficient permissions
    InsufficientPermissions,
}

#[derive(Serialize)]
struct AuthErrorBody {
    error: String,
    error_code: String,
}

impl AuthError {
    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::MalformedToken => "malformed_token",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::UnexpectedAlgorithm => "unexpected_algorithm",
            AuthError::TokenExpired => "token_expired",
            AuthError::WrongTokenType => "wrong_token_type",
            AuthError::MissingPrincipal => "unauthenticated",
            AuthError::InsufficientPermissions => "insufficient_permissions",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::MalformedToken
            | AuthError::InvalidSignature
            | AuthError::UnexpectedAlgorithm
            | AuthError::TokenExpired
            | AuthError::WrongTokenType
            | AuthError::MissingPrincipal => StatusCode::UNAUTHORIZED,
            AuthError::InsufficientPermissions => StatusCode::FORBIDDEN,
        }
    }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthError::MissingAuthHeader => write!(f, "Authorization header is required"),
            AuthError::InvalidAuthHeader => {
                write!(f, "Invalid authorization header format (expected 'Bearer <token>')")
            }
            AuthError::MalformedToken => write!(f, "Token is malformed"),
            AuthError::InvalidSignature => write!(f, "Token signature is invalid"),
            AuthError::UnexpectedAlgorithm => write!(f, "Token signing algorithm is not accepted"),
            AuthError::TokenExpired => write!(f, "Token has expired"),
            AuthError::WrongTokenType => write!(f, "Token type is not valid for this operation"),
            AuthError::MissingPrincipal => write!(f, "Authentication is required"),
            AuthError::InsufficientPermissions => {
                write!(f, "Insufficient permissions for this operation")
            }
        }
    }
}

impl std::error::Error for AuthError {}

impl From<TokenError> for AuthError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Expired => AuthError::TokenExpired,
            TokenError::InvalidSignature => AuthError::InvalidSignature,
            TokenError::UnexpectedAlgorithm => AuthError::UnexpectedAlgorithm,
            TokenError::WrongTokenType { .. } => AuthError::WrongTokenType,
            TokenError::Malformed | TokenError::InvalidSecret | TokenError::Signing => {
                AuthError::MalformedToken
            }
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(AuthErrorBody {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });
        (status, body).into_response()
    }
}
