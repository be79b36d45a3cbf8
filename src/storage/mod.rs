// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Storage Module
//!
//! Persistent state lives in a single embedded redb database under
//! `DATA_DIR`. Every mutation goes through [`TransactionManager`], and every
//! mutation that changes a resource writes its [`AuditRecord`] in the same
//! write transaction, so either both are visible or neither is.
//!
//! ## Table Layout
//!
//! ```text
//! meta            "schema_version" -> u64
//! credentials     "{org_id}/{resource_id}/{kind}" -> StoredCredential (JSON)
//! audit_records   org_id | created_at_micros_be | record_id -> AuditRecord (JSON)
//! ```
//!
//! ## Isolation
//!
//! redb admits one write transaction at a time and readers only ever see
//! committed snapshots, so mutation+audit pairs are serializable.

pub mod audit;
pub mod credentials;
pub mod database;
pub mod transaction;

pub use audit::{
    changed_fields, AuditAction, AuditContext, AuditEntry, AuditPage, AuditQuery, AuditRecord,
    AuditRecorder, AuditRepository,
};
pub use credentials::{
    deletion_entry, CredentialChange, CredentialKind, CredentialMetadata, CredentialRepository,
    StoredCredential, CREDENTIAL_RESOURCE_TYPE,
};
pub use database::{StorageError, StorageResult, Store, SCHEMA_VERSION};
pub use transaction::{CommitGate, TransactionManager, TxScope};
