// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Token issuance, verification and refresh.
//!
//! Tokens are HS256 JWTs. Verification is stateless: nothing is stored
//! server-side, so a token stays valid until `exp`.
//!
//! ## Algorithm pinning
//!
//! The header algorithm is compared against [`SIGNING_ALGORITHM`] before the
//! signature is checked. Headers naming any other algorithm (including the
//! unsigned `none`) are rejected outright.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, decode_header, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;
use utoipa::ToSchema;

use super::claims::{Principal, TokenClaims, TokenKind};

/// The only algorithm accepted for issued and presented tokens.
pub const SIGNING_ALGORITHM: Algorithm = Algorithm::HS256;

/// Token errors. All of them are authentication failures to the caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("signing secret must not be empty")]
    InvalidSecret,

    #[error("token is malformed")]
    Malformed,

    #[error("token signature is invalid")]
    InvalidSignature,

    #[error("token uses an unexpected signing algorithm")]
    UnexpectedAlgorithm,

    #[error("token has expired")]
    Expired,

    #[error("token is a {found:?} token, expected {expected:?}")]
    WrongTokenType { expected: TokenKind, found: TokenKind },

    #[error("failed to sign token")]
    Signing,
}

/// Lifetimes applied at issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtl {
    pub access: Duration,
    pub refresh: Duration,
}

impl TokenTtl {
    pub fn from_hours(access_hours: i64, refresh_hours: i64) -> Self {
        Self {
            access: Duration::hours(access_hours),
            refresh: Duration::hours(refresh_hours),
        }
    }
}

impl Default for TokenTtl {
    /// One day for access tokens, one week for refresh tokens.
    fn default() -> Self {
        Self::from_hours(24, 24 * 7)
    }
}

/// Access/refresh pair returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry
    pub expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    /// Always `Bearer`
    pub token_type: String,
}

/// Issues and verifies signed identity tokens.
///
/// Built once at startup and shared through `AppState`.
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    ttl: TokenTtl,
    /// Seconds of clock skew tolerated past `exp`
    leeway: i64,
}

impl std::fmt::Debug for TokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenService")
            .field("algorithm", &SIGNING_ALGORITHM)
            .field("ttl", &self.ttl)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    pub fn new(secret: impl AsRef<[u8]>, ttl: TokenTtl) -> Result<Self, TokenError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(TokenError::InvalidSecret);
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            ttl,
            leeway: 0,
        })
    }

    /// Tolerate `seconds` of clock skew when checking expiry.
    pub fn with_leeway(mut self, seconds: u32) -> Self {
        self.leeway = i64::from(seconds);
        self
    }

    pub fn ttl(&self) -> TokenTtl {
        self.ttl
    }

    /// Issue a pair using the configured lifetimes.
    pub fn issue(&self, principal: &Principal) -> Result<TokenPair, TokenError> {
        self.issue_with(principal, self.ttl, Utc::now())
    }

    /// Issue a pair with explicit lifetimes and issue time.
    pub fn issue_with(
        &self,
        principal: &Principal,
        ttl: TokenTtl,
        now: DateTime<Utc>,
    ) -> Result<TokenPair, TokenError> {
        let expires_at = now + ttl.access;
        let refresh_expires_at = now + ttl.refresh;

        let access = TokenClaims::for_principal(
            principal,
            TokenKind::Access,
            now.timestamp(),
            expires_at.timestamp(),
        );
        let refresh = TokenClaims::for_principal(
            principal,
            TokenKind::Refresh,
            now.timestamp(),
            refresh_expires_at.timestamp(),
        );

        Ok(TokenPair {
            access_token: self.sign(&access)?,
            refresh_token: self.sign(&refresh)?,
            expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Verify an access token and return its principal.
    pub fn verify(&self, token: &str) -> Result<Principal, TokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<Principal, TokenError> {
        let claims = self.decode_claims(token, TokenKind::Access, now)?;
        Ok(Principal::from(claims))
    }

    /// Exchange a refresh token for a brand-new pair.
    pub fn refresh(&self, refresh_token: &str) -> Result<TokenPair, TokenError> {
        self.refresh_at(refresh_token, Utc::now())
    }

    pub fn refresh_at(&self, refresh_token: &str, now: DateTime<Utc>) -> Result<TokenPair, TokenError> {
        let claims = self.decode_claims(refresh_token, TokenKind::Refresh, now)?;
        let principal = Principal::from(claims);
        tracing::debug!(user_id = %principal.user_id, "Refreshing token pair");
        self.issue_with(&principal, self.ttl, now)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(SIGNING_ALGORITHM), claims, &self.encoding_key).map_err(|e| {
            tracing::error!(error = %e, "Token signing failed");
            TokenError::Signing
        })
    }

    fn decode_claims(
        &self,
        token: &str,
        expected: TokenKind,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenError> {
        // Unknown algorithms, including "none", fail header parsing.
        let header = decode_header(token).map_err(|_| TokenError::Malformed)?;
        if header.alg != SIGNING_ALGORITHM {
            return Err(TokenError::UnexpectedAlgorithm);
        }

        // Expiry is checked below against the supplied clock.
        let mut validation = Validation::new(SIGNING_ALGORITHM);
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iat"]);

        let claims = decode::<TokenClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidSignature => TokenError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => TokenError::UnexpectedAlgorithm,
                _ => TokenError::Malformed,
            })?
            .claims;

        if now.timestamp() > claims.exp + self.leeway {
            return Err(TokenError::Expired);
        }

        if claims.token_type != expected {
            return Err(TokenError::WrongTokenType {
                expected,
                found: claims.token_type,
            });
        }

        Ok(claims)
    }
}
