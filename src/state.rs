// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::TokenService;
use crate::config::{DEFAULT_RATE_LIMIT_PER_MINUTE, DEFAULT_REQUEST_TIMEOUT_SECS};
use crate::crypto::Encryptor;
use crate::rate_limit::RateLimiter;
use crate::storage::{AuditRecorder, CredentialRepository, Store, TransactionManager};

/// Shared application state. Built once in `main`, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub tokens: Arc<TokenService>,
    pub encryptor: Arc<Encryptor>,
    pub store: Store,
    pub transactions: TransactionManager,
    pub audit: AuditRecorder,
    pub rate_limiter: RateLimiter,
    pub request_timeout: Duration,
    /// Peers whose forwarding headers are believed.
    pub trusted_proxies: Arc<[IpAddr]>,
}

impl AppState {
    pub fn new(tokens: TokenService, encryptor: Encryptor, store: Store) -> Self {
        let transactions = TransactionManager::new(&store);
        Self {
            tokens: Arc::new(tokens),
            encryptor: Arc::new(encryptor),
            store,
            transactions,
            audit: AuditRecorder::new(),
            rate_limiter: RateLimiter::per_minute(DEFAULT_RATE_LIMIT_PER_MINUTE),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            trusted_proxies: Arc::from([]),
        }
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.rate_limiter = limiter;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_trusted_proxies(mut self, proxies: impl Into<Arc<[IpAddr]>>) -> Self {
        self.trusted_proxies = proxies.into();
        self
    }

    pub fn with_audit_recorder(mut self, recorder: AuditRecorder) -> Self {
        self.audit = recorder;
        self
    }

    pub fn credentials(&self) -> CredentialRepository<'_> {
        CredentialRepository::new(&self.store, &self.encryptor)
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("store", &self.store)
            .field("request_timeout", &self.request_timeout)
            .field("trusted_proxies", &self.trusted_proxies)
            .finish_non_exhaustive()
    }
}
