// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Inventory Core - security and audit layer of a multi-tenant inventory service
//!
//! This crate encrypts cluster credentials at rest, issues and verifies bearer
//! tokens, gates requests by role and records every mutation in an
//! append-only audit trail committed atomically with the mutation itself.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers and router (Axum)
//! - `auth` - Token service, auth middleware and extractors
//! - `crypto` - AES-256-GCM credential encryption
//! - `storage` - Embedded database, transactions, audit trail (redb)
//! - `rate_limit` - Per-caller request quotas (governor)

pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod logging;
pub mod rate_limit;
pub mod state;
pub mod storage;
