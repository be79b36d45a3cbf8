// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only audit trail for resource mutations.
//!
//! Records are written by [`AuditRecorder::record`] inside the caller's
//! [`TxScope`], so a record exists if and only if the mutation it describes
//! was committed. There is no update or delete path.
//!
//! ## Key Layout
//!
//! `org_id (16 B) | created_at micros, big-endian (8 B) | record_id (16 B)`
//!
//! Records of one organization are contiguous and ordered by creation time,
//! so listing newest-first is a reverse range scan.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use super::database::AUDIT_RECORDS;
use super::{StorageError, StorageResult, Store, TxScope};
use crate::auth::Principal;

const KEY_LEN: usize = 16 + 8 + 16;

/// Placeholder written over sensitive values before they are persisted.
pub const REDACTED: &str = "[REDACTED]";

/// Field names whose values never reach the audit trail.
const DEFAULT_REDACTED_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "plaintext",
    "kubeconfig",
    "cipher_blob",
];

/// Kind of change an audit record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
        }
    }
}

impl std::fmt::Display for AuditAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who is acting, built once per request and passed to every mutating call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditContext {
    pub org_id: Uuid,
    pub user_id: Option<Uuid>,
    pub user_email: String,
    pub user_ip: String,
    pub user_agent: String,
}

impl AuditContext {
    pub fn from_principal(
        principal: &Principal,
        user_ip: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            org_id: principal.org_id,
            user_id: Some(principal.user_id),
            user_email: principal.email.clone(),
            user_ip: user_ip.into(),
            user_agent: user_agent.into(),
        }
    }
}

/// An immutable audit trail entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AuditRecord {
    pub id: Uuid,
    pub org_id: Uuid,
    pub actor_user_id: Option<Uuid>,
    pub actor_email: String,
    pub actor_ip: String,
    pub actor_user_agent: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub old_values: Option<Value>,
    #[schema(value_type = Option<Object>)]
    pub new_values: Option<Value>,
    pub changed_fields: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Description of one change, handed to [`AuditRecorder::record`].
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: String,
    pub resource_name: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

impl AuditEntry {
    pub fn new(
        action: AuditAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            resource_name: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// State before the change (absent for creates).
    pub fn with_old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    /// State after the change (absent for deletes).
    pub fn with_new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Compute the names of fields a change touched, sorted.
///
/// - update: fields present in both objects whose values differ
/// - create (no old values): every field of the new object
/// - delete (no new values): every field of the old object
pub fn changed_fields(old: Option<&Value>, new: Option<&Value>) -> Vec<String> {
    let keys = |v: &Value| -> BTreeSet<String> {
        v.as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default()
    };

    match (old, new) {
        (Some(Value::Object(old)), Some(Value::Object(new))) => old
            .iter()
            .filter(|(k, v)| new.get(k.as_str()).is_some_and(|n| n != *v))
            .map(|(k, _)| k.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        (None, Some(new)) => keys(new).into_iter().collect(),
        (Some(old), None) => keys(old).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn record_key(org_id: &Uuid, created_at: &DateTime<Utc>, id: &Uuid) -> [u8; KEY_LEN] {
    let micros = created_at.timestamp_micros().max(0) as u64;
    let mut key = [0u8; KEY_LEN];
    key[..16].copy_from_slice(org_id.as_bytes());
    key[16..24].copy_from_slice(&micros.to_be_bytes());
    key[24..].copy_from_slice(id.as_bytes());
    key
}

fn org_bounds(org_id: &Uuid) -> ([u8; KEY_LEN], [u8; KEY_LEN]) {
    let mut start = [0x00u8; KEY_LEN];
    let mut end = [0xFFu8; KEY_LEN];
    start[..16].copy_from_slice(org_id.as_bytes());
    end[..16].copy_from_slice(org_id.as_bytes());
    (start, end)
}

/// Persists audit records inside the caller's transaction.
#[derive(Debug, Clone)]
pub struct AuditRecorder {
    redacted_fields: Arc<[String]>,
}

impl Default for AuditRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditRecorder {
    pub fn new() -> Self {
        Self {
            redacted_fields: DEFAULT_REDACTED_FIELDS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Mask `fields` in addition to the built-in sensitive names.
    pub fn with_redacted_fields<I, S>(self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let redacted_fields = self
            .redacted_fields
            .iter()
            .cloned()
            .chain(fields.into_iter().map(Into::into))
            .collect();
        Self { redacted_fields }
    }

    /// Write one record for `entry` using the caller's transaction.
    ///
    /// Any error here must be propagated out of the unit of work so the
    /// triggering mutation rolls back with it.
    pub fn record(
        &self,
        scope: &TxScope,
        ctx: &AuditContext,
        entry: AuditEntry,
    ) -> StorageResult<AuditRecord> {
        validate(ctx, &entry)?;

        let changed = changed_fields(entry.old_values.as_ref(), entry.new_values.as_ref());
        let record = AuditRecord {
            id: Uuid::new_v4(),
            org_id: ctx.org_id,
            actor_user_id: ctx.user_id,
            actor_email: ctx.user_email.clone(),
            actor_ip: ctx.user_ip.clone(),
            actor_user_agent: ctx.user_agent.clone(),
            action: entry.action,
            resource_type: entry.resource_type,
            resource_id: entry.resource_id,
            resource_name: entry.resource_name,
            old_values: entry.old_values.map(|v| self.redact(v)),
            new_values: entry.new_values.map(|v| self.redact(v)),
            changed_fields: changed,
            created_at: Utc::now(),
        };

        let key = record_key(&record.org_id, &record.created_at, &record.id);
        let json = serde_json::to_vec(&record)?;

        let mut table = scope.txn().open_table(AUDIT_RECORDS)?;
        let existed = table.insert(key.as_slice(), json.as_slice())?.is_some();
        if existed {
            return Err(StorageError::AppendOnlyViolation(record.id.to_string()));
        }

        tracing::info!(
            audit_id = %record.id,
            org_id = %record.org_id,
            action = %record.action,
            resource_type = %record.resource_type,
            resource_id = %record.resource_id,
            changed_fields = ?record.changed_fields,
            "Audit record written"
        );

        Ok(record)
    }

    fn redact(&self, value: Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| {
                        if self.redacted_fields.iter().any(|f| f.eq_ignore_ascii_case(&k)) {
                            (k, Value::String(REDACTED.to_string()))
                        } else {
                            (k, self.redact(v))
                        }
                    })
                    .collect(),
            ),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact(v)).collect()),
            other => other,
        }
    }
}

fn validate(ctx: &AuditContext, entry: &AuditEntry) -> StorageResult<()> {
    if ctx.org_id.is_nil() {
        return Err(StorageError::InvalidAuditRecord("organization id is nil".into()));
    }
    if ctx.user_email.trim().is_empty() {
        return Err(StorageError::InvalidAuditRecord("actor email is empty".into()));
    }
    if entry.resource_type.trim().is_empty() {
        return Err(StorageError::InvalidAuditRecord("resource type is empty".into()));
    }
    if entry.resource_id.trim().is_empty() {
        return Err(StorageError::InvalidAuditRecord("resource id is empty".into()));
    }
    Ok(())
}

// =============================================================================
// Queries
// =============================================================================

/// Filters for listing an organization's audit trail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub actor_user_id: Option<Uuid>,
    pub action: Option<AuditAction>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for AuditQuery {
    fn default() -> Self {
        Self {
            resource_type: None,
            resource_id: None,
            actor_user_id: None,
            action: None,
            limit: 100,
            offset: 0,
        }
    }
}

impl AuditQuery {
    fn matches(&self, record: &AuditRecord) -> bool {
        self.resource_type.as_ref().is_none_or(|t| *t == record.resource_type)
            && self.resource_id.as_ref().is_none_or(|id| *id == record.resource_id)
            && self.actor_user_id.is_none_or(|u| record.actor_user_id == Some(u))
            && self.action.is_none_or(|a| a == record.action)
    }
}

/// One page of audit records, newest first.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AuditPage {
    pub records: Vec<AuditRecord>,
    /// Matching records before limit/offset
    pub total: usize,
    pub has_more: bool,
}

/// Read access to the audit trail.
pub struct AuditRepository<'a> {
    store: &'a Store,
}

impl<'a> AuditRepository<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// List an organization's records, newest first.
    pub fn list(&self, org_id: &Uuid, query: &AuditQuery) -> StorageResult<AuditPage> {
        let read_txn = self.store.begin_read()?;
        let table = read_txn.open_table(AUDIT_RECORDS)?;
        let (start, end) = org_bounds(org_id);

        let mut records = Vec::new();
        let mut total = 0usize;
        for entry in table.range(start.as_slice()..=end.as_slice())?.rev() {
            let (_, value) = entry?;
            let record: AuditRecord = serde_json::from_slice(value.value())?;
            if !query.matches(&record) {
                continue;
            }
            if total >= query.offset && records.len() < query.limit {
                records.push(record);
            }
            total += 1;
        }

        let has_more = query.offset + records.len() < total;
        Ok(AuditPage {
            records,
            total,
            has_more,
        })
    }

    /// Fetch a single record of `org_id`.
    pub fn get(&self, org_id: &Uuid, record_id: &Uuid) -> StorageResult<AuditRecord> {
        let read_txn = self.store.begin_read()?;
        let table = read_txn.open_table(AUDIT_RECORDS)?;
        let (start, end) = org_bounds(org_id);

        for entry in table.range(start.as_slice()..=end.as_slice())? {
            let (key, value) = entry?;
            if &key.value()[24..] == record_id.as_bytes() {
                return Ok(serde_json::from_slice(value.value())?);
            }
        }

        Err(StorageError::NotFound(format!("Audit record {record_id}")))
    }
}
