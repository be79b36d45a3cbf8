// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Encrypted cluster credentials.
//!
//! Plaintext only exists in memory between the request body and
//! [`Encryptor::encrypt_string`]; the table holds the base64 blob.

use chrono::{DateTime, Utc};
use redb::ReadableTable;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::{AuditAction, AuditEntry};
use super::database::CREDENTIALS;
use super::{StorageError, StorageResult, Store, TxScope};
use crate::crypto::Encryptor;

/// Resource type written to audit records for credential changes.
pub const CREDENTIAL_RESOURCE_TYPE: &str = "cluster_credential";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CredentialKind {
    ServiceAccountToken,
    Kubeconfig,
}

impl CredentialKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKind::ServiceAccountToken => "service_account_token",
            CredentialKind::Kubeconfig => "kubeconfig",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "service_account_token" => Some(CredentialKind::ServiceAccountToken),
            "kubeconfig" => Some(CredentialKind::Kubeconfig),
            _ => None,
        }
    }
}

impl std::fmt::Display for CredentialKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row stored in the `credentials` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredential {
    pub id: Uuid,
    pub org_id: Uuid,
    pub resource_id: String,
    pub kind: CredentialKind,
    /// Base64 of `nonce | ciphertext | tag`
    pub cipher_blob: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What API responses expose about a credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct CredentialMetadata {
    pub id: Uuid,
    pub resource_id: String,
    pub kind: CredentialKind,
    pub version: u32,
    /// SHA-256 of the stored blob, hex, first 16 chars
    pub fingerprint: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StoredCredential {
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.cipher_blob.as_bytes());
        digest.iter().take(8).map(|b| format!("{b:02x}")).collect()
    }

    pub fn metadata(&self) -> CredentialMetadata {
        CredentialMetadata {
            id: self.id,
            resource_id: self.resource_id.clone(),
            kind: self.kind,
            version: self.version,
            fingerprint: self.fingerprint(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Snapshot used as old/new values in audit records. Never includes the
    /// secret or its ciphertext.
    pub fn audit_values(&self) -> Value {
        json!({
            "kind": self.kind,
            "version": self.version,
            "fingerprint": self.fingerprint(),
            "updated_at": self.updated_at,
        })
    }

    fn audit_resource_id(&self) -> String {
        format!("{}/{}", self.resource_id, self.kind)
    }
}

/// Result of an upsert: the row before and after.
#[derive(Debug, Clone)]
pub struct CredentialChange {
    pub previous: Option<StoredCredential>,
    pub current: StoredCredential,
}

impl CredentialChange {
    pub fn action(&self) -> AuditAction {
        if self.previous.is_some() {
            AuditAction::Update
        } else {
            AuditAction::Create
        }
    }

    pub fn audit_entry(&self) -> AuditEntry {
        let entry = AuditEntry::new(
            self.action(),
            CREDENTIAL_RESOURCE_TYPE,
            self.current.audit_resource_id(),
        )
        .with_name(self.current.resource_id.clone())
        .with_new_values(self.current.audit_values());

        match &self.previous {
            Some(previous) => entry.with_old_values(previous.audit_values()),
            None => entry,
        }
    }
}

/// Audit entry for a removed credential.
pub fn deletion_entry(removed: &StoredCredential) -> AuditEntry {
    AuditEntry::new(
        AuditAction::Delete,
        CREDENTIAL_RESOURCE_TYPE,
        removed.audit_resource_id(),
    )
    .with_name(removed.resource_id.clone())
    .with_old_values(removed.audit_values())
}

fn validate_resource_id(resource_id: &str) -> StorageResult<()> {
    if resource_id.trim().is_empty() {
        return Err(StorageError::InvalidInput("resource id is empty".into()));
    }
    if resource_id.contains('/') {
        return Err(StorageError::InvalidInput("resource id must not contain '/'".into()));
    }
    Ok(())
}

fn credential_key(org_id: &Uuid, resource_id: &str, kind: CredentialKind) -> String {
    format!("{org_id}/{resource_id}/{kind}")
}

/// Typed access to the `credentials` table.
pub struct CredentialRepository<'a> {
    store: &'a Store,
    encryptor: &'a Encryptor,
}

impl<'a> CredentialRepository<'a> {
    pub fn new(store: &'a Store, encryptor: &'a Encryptor) -> Self {
        Self { store, encryptor }
    }

    /// Encrypt and write a credential, bumping its version if it exists.
    pub fn upsert(
        &self,
        scope: &TxScope,
        org_id: Uuid,
        resource_id: &str,
        kind: CredentialKind,
        plaintext: &str,
    ) -> StorageResult<CredentialChange> {
        validate_resource_id(resource_id)?;
        if plaintext.is_empty() {
            return Err(StorageError::InvalidInput("credential value is empty".into()));
        }

        let key = credential_key(&org_id, resource_id, kind);
        let mut table = scope.txn().open_table(CREDENTIALS)?;

        let previous: Option<StoredCredential> = match table.get(key.as_str())? {
            Some(raw) => Some(serde_json::from_slice(raw.value())?),
            None => None,
        };

        let now = Utc::now();
        let cipher_blob = self.encryptor.encrypt_string(plaintext)?;
        let current = match &previous {
            Some(prev) => StoredCredential {
                cipher_blob,
                version: prev.version + 1,
                updated_at: now,
                ..prev.clone()
            },
            None => StoredCredential {
                id: Uuid::new_v4(),
                org_id,
                resource_id: resource_id.to_string(),
                kind,
                cipher_blob,
                version: 1,
                created_at: now,
                updated_at: now,
            },
        };

        let json = serde_json::to_vec(&current)?;
        table.insert(key.as_str(), json.as_slice())?;

        Ok(CredentialChange { previous, current })
    }

    /// Remove a credential, returning the removed row.
    pub fn delete(
        &self,
        scope: &TxScope,
        org_id: Uuid,
        resource_id: &str,
        kind: CredentialKind,
    ) -> StorageResult<StoredCredential> {
        validate_resource_id(resource_id)?;
        let key = credential_key(&org_id, resource_id, kind);
        let mut table = scope.txn().open_table(CREDENTIALS)?;

        let removed = table
            .remove(key.as_str())?
            .ok_or_else(|| StorageError::NotFound(format!("Credential {resource_id}/{kind}")))?;
        Ok(serde_json::from_slice(removed.value())?)
    }

    pub fn get(
        &self,
        org_id: &Uuid,
        resource_id: &str,
        kind: CredentialKind,
    ) -> StorageResult<Option<StoredCredential>> {
        validate_resource_id(resource_id)?;
        let read_txn = self.store.begin_read()?;
        let table = read_txn.open_table(CREDENTIALS)?;
        let key = credential_key(org_id, resource_id, kind);

        match table.get(key.as_str())? {
            Some(raw) => Ok(Some(serde_json::from_slice(raw.value())?)),
            None => Ok(None),
        }
    }

    /// All credentials stored for one resource of an organization.
    pub fn list_for_resource(
        &self,
        org_id: &Uuid,
        resource_id: &str,
    ) -> StorageResult<Vec<StoredCredential>> {
        validate_resource_id(resource_id)?;
        let read_txn = self.store.begin_read()?;
        let table = read_txn.open_table(CREDENTIALS)?;

        // '0' sorts right after '/', so this covers exactly "{prefix}/*".
        let start = format!("{org_id}/{resource_id}/");
        let end = format!("{org_id}/{resource_id}0");

        let mut credentials = Vec::new();
        for entry in table.range(start.as_str()..end.as_str())? {
            let (_, value) = entry?;
            credentials.push(serde_json::from_slice(value.value())?);
        }
        Ok(credentials)
    }

    /// Decrypt a stored credential.
    pub fn reveal(&self, credential: &StoredCredential) -> StorageResult<String> {
        Ok(self.encryptor.decrypt_string(&credential.cipher_blob)?)
    }
}
