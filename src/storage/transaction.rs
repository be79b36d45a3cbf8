// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Unit-of-work wrapper around redb write transactions.
//!
//! ```rust,ignore
//! let record = state.transactions.run(deadline, |scope| {
//!     let change = credentials.upsert(scope, org_id, "cluster-1", kind, secret)?;
//!     recorder.record(scope, &ctx, change.audit_entry())
//! })?;
//! ```
//!
//! The closure's error is returned unchanged after rollback. If rollback
//! itself fails, both errors are kept in [`StorageError::RollbackFailed`].
//!
//! ## Abandoned callers
//!
//! A unit of work may outlive the request that started it: the client can
//! disconnect, or the deadline middleware can answer 504 while the work is
//! still running on the blocking pool. A [`CommitGate`] settles that race.
//! The worker must claim the gate before committing; the caller closes it
//! when it gives up. Whichever happens first wins, so a write never becomes
//! visible after its caller was told it failed.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use redb::{Database, WriteTransaction};

use super::{StorageError, StorageResult, Store};

const GATE_OPEN: u8 = 0;
const GATE_COMMITTING: u8 = 1;
const GATE_CLOSED: u8 = 2;

/// Shared commit/abandon decision between a caller and its unit of work.
#[derive(Debug, Clone, Default)]
pub struct CommitGate {
    state: Arc<AtomicU8>,
}

impl CommitGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Abandon the work. Returns `false` when a commit is already in
    /// flight; the caller must then wait for its outcome.
    pub fn close(&self) -> bool {
        match self.state.compare_exchange(
            GATE_OPEN,
            GATE_CLOSED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == GATE_CLOSED,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::Acquire) == GATE_CLOSED
    }

    fn claim(&self) -> bool {
        self.state
            .compare_exchange(GATE_OPEN, GATE_COMMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        let _ = self.state.compare_exchange(
            GATE_COMMITTING,
            GATE_OPEN,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}

/// Closes the gate when the owning future is dropped before completion.
struct CloseOnDrop(Option<CommitGate>);

impl CloseOnDrop {
    fn disarm(mut self) {
        self.0 = None;
    }
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        if let Some(gate) = self.0.take() {
            if gate.close() {
                tracing::debug!("Caller dropped; pending transaction will roll back");
            }
        }
    }
}

/// An open write transaction handed to unit-of-work closures.
pub struct TxScope {
    txn: WriteTransaction,
    deadline: Option<Instant>,
}

impl TxScope {
    /// The underlying write transaction. All writes of one unit of work must
    /// go through this handle.
    pub fn txn(&self) -> &WriteTransaction {
        &self.txn
    }

    /// Fail with [`StorageError::DeadlineExceeded`] once the deadline passed.
    pub fn check_deadline(&self) -> StorageResult<()> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Err(StorageError::DeadlineExceeded),
            _ => Ok(()),
        }
    }
}

/// Runs closures atomically: commit on `Ok`, roll back on `Err`.
#[derive(Clone)]
pub struct TransactionManager {
    db: Arc<Database>,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager").finish_non_exhaustive()
    }
}

impl TransactionManager {
    pub fn new(store: &Store) -> Self {
        Self {
            db: Arc::clone(store.database()),
        }
    }

    /// Run `work` inside one write transaction.
    ///
    /// The deadline is checked before the transaction begins and again right
    /// before commit; a late unit of work is rolled back, never committed.
    pub fn run<T, F>(&self, deadline: Option<Instant>, work: F) -> StorageResult<T>
    where
        F: FnOnce(&TxScope) -> StorageResult<T>,
    {
        self.run_gated(deadline, &CommitGate::new(), work)
    }

    /// Like [`TransactionManager::run`], but only commits if `gate` can be
    /// claimed; a closed gate rolls the work back with
    /// [`StorageError::Cancelled`].
    pub fn run_gated<T, F>(
        &self,
        deadline: Option<Instant>,
        gate: &CommitGate,
        work: F,
    ) -> StorageResult<T>
    where
        F: FnOnce(&TxScope) -> StorageResult<T>,
    {
        if gate.is_closed() {
            return Err(StorageError::Cancelled);
        }
        if matches!(deadline, Some(d) if Instant::now() >= d) {
            return Err(StorageError::DeadlineExceeded);
        }

        let scope = TxScope {
            txn: self.db.begin_write()?,
            deadline,
        };

        let outcome = work(&scope).and_then(|value| {
            scope.check_deadline()?;
            if !gate.claim() {
                return Err(StorageError::Cancelled);
            }
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                let committed = scope.txn.commit();
                gate.release();
                committed?;
                Ok(value)
            }
            Err(err) => match scope.txn.abort() {
                Ok(()) => {
                    tracing::debug!(error = %err, "Transaction rolled back");
                    Err(err)
                }
                Err(rollback) => {
                    tracing::error!(
                        error = %err,
                        rollback_error = %rollback,
                        "Transaction rollback failed"
                    );
                    Err(StorageError::RollbackFailed {
                        source: Box::new(err),
                        rollback,
                    })
                }
            },
        }
    }

    /// [`TransactionManager::run_gated`] on the blocking pool, for async
    /// callers.
    ///
    /// Dropping the returned future closes `gate`, so work left running on
    /// the pool after its caller went away rolls back instead of committing.
    pub async fn run_async<T, F>(
        &self,
        deadline: Option<Instant>,
        gate: CommitGate,
        work: F,
    ) -> StorageResult<T>
    where
        F: FnOnce(&TxScope) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let manager = self.clone();
        let guard = CloseOnDrop(Some(gate.clone()));
        let result = tokio::task::spawn_blocking(move || manager.run_gated(deadline, &gate, work))
            .await
            .map_err(|e| StorageError::Worker(e.to_string()));
        guard.disarm();
        result?
    }
}
