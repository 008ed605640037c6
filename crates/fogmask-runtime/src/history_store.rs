#![forbid(unsafe_code)]

//! Commit protocol for the persisted history log.
//!
//! A [`HistoryStore`] owns the pending buffer for one scene and is the only
//! writer of that scene's `"history"` flag from this process.
//!
//! # Commit
//!
//! ```text
//! append_pending(op) ─┐
//! append_pending(op) ─┤  pending: [op, op, …]
//!                     ▼
//! commit() ── writer lock ── take pending ── load log ── truncate+push
//!                                                           │
//!                       restore pending ◄── Err ── persist (retry)
//!                                                           │ Ok
//!                                                           ▼
//!                                                     Some(new log)
//! ```
//!
//! Commits are serialized by a writer mutex. A commit that arrives while
//! another is in flight waits for it, then commits whatever is pending by
//! then. Ops appended during an in-flight write are never lost.
//!
//! # Failure
//!
//! If the write still fails after the [`RetryPolicy`], the batch goes back
//! to the front of the pending buffer and [`FogError::StorageWrite`] is
//! returned. Nothing local changes, so calling `commit` again retries.

use std::sync::{Arc, Mutex, MutexGuard};

use fogmask_core::{BrushOperation, HistoryLog, LogRecord, LogRepair};
use serde_json::Value;

use crate::cancellation::CancellationToken;
use crate::error::FogError;
use crate::retry::RetryPolicy;
use crate::storage::{Scope, StorageBackend};

/// Flag key under which a scene's history log is stored.
pub const HISTORY_KEY: &str = "history";

/// Decode a stored snapshot, clamping what can be clamped.
///
/// `null` reads as an empty log.
pub fn decode_snapshot(value: Value) -> Result<(HistoryLog, Option<LogRepair>), FogError> {
    if value.is_null() {
        return Ok((HistoryLog::new(), None));
    }
    let record: LogRecord = serde_json::from_value(value).map_err(FogError::MalformedSnapshot)?;
    Ok(HistoryLog::from_record(record))
}

/// Pending buffer plus serialized writes of one scene's history.
pub struct HistoryStore {
    storage: Arc<dyn StorageBackend>,
    scope: Scope,
    key: String,
    pending: Mutex<Vec<BrushOperation>>,
    writer: Mutex<()>,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("scope", &self.scope)
            .field("key", &self.key)
            .field("pending", &self.pending_len())
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, scope: Scope) -> Self {
        Self {
            storage,
            scope,
            key: HISTORY_KEY.to_owned(),
            pending: Mutex::new(Vec::new()),
            writer: Mutex::new(()),
            retry: RetryPolicy::default(),
            cancel: CancellationToken::never(),
        }
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Token that aborts retry back-off.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[inline]
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    #[inline]
    pub fn key(&self) -> &str {
        &self.key
    }

    fn pending(&self) -> MutexGuard<'_, Vec<BrushOperation>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Pending buffer
    // ========================================================================

    /// Buffer an op for the next commit.
    pub fn append_pending(&self, op: BrushOperation) {
        self.pending().push(op);
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending().len()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending().is_empty()
    }

    /// Copy of the pending ops, oldest first.
    #[must_use]
    pub fn pending_ops(&self) -> Vec<BrushOperation> {
        self.pending().clone()
    }

    /// Drop the in-progress gesture. Returns how many ops were discarded.
    pub fn clear_pending(&self) -> usize {
        let mut pending = self.pending();
        let n = pending.len();
        pending.clear();
        n
    }

    // ========================================================================
    // Persisted log
    // ========================================================================

    /// Whether a history flag exists at all.
    pub fn exists(&self) -> Result<bool, FogError> {
        Ok(self.read()?.is_some())
    }

    fn read(&self) -> Result<Option<Value>, FogError> {
        self.storage
            .get(&self.scope, &self.key)
            .map_err(|source| FogError::StorageRead {
                key: self.key.clone(),
                source,
            })
    }

    /// Load the persisted log; a missing flag is an empty log.
    pub fn load(&self) -> Result<HistoryLog, FogError> {
        let Some(value) = self.read()? else {
            return Ok(HistoryLog::new());
        };
        let (log, repair) = decode_snapshot(value)?;
        if let Some(repair) = repair {
            tracing::warn!(
                scope = %self.scope,
                missing_events = repair.missing_events,
                missing_pointer = repair.missing_pointer,
                clamped_pointer = ?repair.clamped_pointer,
                "repaired stored history"
            );
        }
        Ok(log)
    }

    fn persist(&self, log: &HistoryLog) -> Result<(), FogError> {
        let value = serde_json::to_value(log).map_err(FogError::Encode)?;
        self.retry
            .run(&self.cancel, &self.key, || {
                self.storage.set(&self.scope, &self.key, value.clone())
            })
            .map_err(|source| FogError::StorageWrite {
                key: self.key.clone(),
                source,
            })
    }

    fn writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Commit the pending buffer as one batch.
    ///
    /// Returns `Ok(None)` when nothing was pending, or the new log.
    pub fn commit(&self) -> Result<Option<HistoryLog>, FogError> {
        let _writer = self.writer();
        let batch = std::mem::take(&mut *self.pending());
        if batch.is_empty() {
            return Ok(None);
        }
        let ops = batch.len();

        let result = self.load().and_then(|mut log| {
            log.commit(batch.clone());
            self.persist(&log).map(|()| log)
        });

        match result {
            Ok(log) => {
                tracing::info!(
                    scope = %self.scope,
                    ops,
                    events = log.len(),
                    pointer = log.pointer(),
                    "committed history batch"
                );
                Ok(Some(log))
            }
            Err(err) => {
                let mut pending = self.pending();
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                tracing::warn!(
                    scope = %self.scope,
                    ops,
                    error = %err,
                    "commit failed, ops kept pending"
                );
                Err(err)
            }
        }
    }

    /// Move the persisted pointer back by `steps`.
    ///
    /// Undone batches stay stored until the next commit truncates them.
    pub fn undo(&self, steps: usize) -> Result<HistoryLog, FogError> {
        let _writer = self.writer();
        let mut log = self.load()?;
        let before = log.pointer();
        let after = log.undo(steps);
        if after != before {
            self.persist(&log)?;
            tracing::info!(scope = %self.scope, from = before, to = after, "history undo");
        }
        Ok(log)
    }

    /// Persist an empty log.
    pub fn reset(&self) -> Result<HistoryLog, FogError> {
        let _writer = self.writer();
        let log = HistoryLog::new();
        self.persist(&log)?;
        tracing::info!(scope = %self.scope, "history reset");
        Ok(log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::MemoryStorage;
    use fogmask_core::Point;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn op(tag: f32) -> BrushOperation {
        BrushOperation::rect(Point::new(tag, tag), 2.0, 2.0, 0)
    }

    fn store() -> (Arc<MemoryStorage>, HistoryStore) {
        let storage = Arc::new(MemoryStorage::new());
        let store = HistoryStore::new(storage.clone(), Scope::Scene("s".into()))
            .with_retry(RetryPolicy::no_retry());
        (storage, store)
    }

    #[test]
    fn empty_commit_is_noop() {
        let (storage, store) = store();
        assert!(store.commit().unwrap().is_none());
        assert!(storage.get(store.scope(), HISTORY_KEY).unwrap().is_none());
    }

    #[test]
    fn commit_persists_batch_and_clears_pending() {
        let (_, store) = store();
        store.append_pending(op(1.0));
        store.append_pending(op(2.0));
        let log = store.commit().unwrap().unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log.events()[0].len(), 2);
        assert!(!store.has_pending());
        assert_eq!(store.load().unwrap(), log);
    }

    #[test]
    fn undo_uses_persisted_pointer_and_keeps_events() {
        let (_, store) = store();
        for i in 0..3 {
            store.append_pending(op(i as f32));
            store.commit().unwrap();
        }
        let log = store.undo(2).unwrap();
        assert_eq!(log.pointer(), 1);
        assert_eq!(log.len(), 3);
        assert_eq!(store.load().unwrap().pointer(), 1);
    }

    #[test]
    fn commit_after_undo_truncates_persisted_log() {
        let (_, store) = store();
        for i in 0..3 {
            store.append_pending(op(i as f32));
            store.commit().unwrap();
        }
        store.undo(2).unwrap();
        store.append_pending(op(9.0));
        let log = store.commit().unwrap().unwrap();
        assert_eq!(log.events(), &[vec![op(0.0)], vec![op(9.0)]][..]);
        assert_eq!(log.pointer(), 2);
    }

    #[test]
    fn reset_persists_empty_log() {
        let (storage, store) = store();
        store.append_pending(op(1.0));
        store.commit().unwrap();
        store.reset().unwrap();
        assert_eq!(
            storage.get(store.scope(), HISTORY_KEY).unwrap(),
            Some(json!({"events": [], "pointer": 0}))
        );
    }

    #[test]
    fn clear_pending_reports_count() {
        let (_, store) = store();
        store.append_pending(op(1.0));
        store.append_pending(op(2.0));
        assert_eq!(store.clear_pending(), 2);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn missing_pointer_in_storage_is_repaired() {
        let (storage, store) = store();
        storage
            .set(
                store.scope(),
                HISTORY_KEY,
                json!({"events": [[{"shape": 1, "x": 0, "y": 0, "width": 1, "height": 1, "fill": 0}]]}),
            )
            .unwrap();
        assert_eq!(store.load().unwrap().pointer(), 1);
    }

    #[test]
    fn undecodable_snapshot_is_an_error() {
        let (storage, store) = store();
        storage
            .set(store.scope(), HISTORY_KEY, json!("garbage"))
            .unwrap();
        assert!(matches!(store.load(), Err(FogError::MalformedSnapshot(_))));
    }

    struct Flaky {
        inner: MemoryStorage,
        failures: AtomicUsize,
    }

    impl StorageBackend for Flaky {
        fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>, StorageError> {
            self.inner.get(scope, key)
        }
        fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<(), StorageError> {
            let left = self.failures.load(Ordering::SeqCst);
            if left > 0 {
                self.failures.store(left - 1, Ordering::SeqCst);
                return Err(StorageError::Unavailable("flaky".into()));
            }
            self.inner.set(scope, key, value)
        }
        fn unset(&self, scope: &Scope, key: &str) -> Result<(), StorageError> {
            self.inner.unset(scope, key)
        }
        fn watch(
            &self,
            scope: &Scope,
            key: &str,
        ) -> std::sync::mpsc::Receiver<crate::storage::StorageEvent> {
            self.inner.watch(scope, key)
        }
    }

    #[test]
    fn failed_write_restores_pending_in_front() {
        let flaky = Arc::new(Flaky {
            inner: MemoryStorage::new(),
            failures: AtomicUsize::new(1),
        });
        let store = HistoryStore::new(flaky, Scope::Scene("s".into()))
            .with_retry(RetryPolicy::no_retry());
        store.append_pending(op(1.0));
        let err = store.commit().unwrap_err();
        assert!(matches!(err, FogError::StorageWrite { .. }));
        assert!(err.is_transient());

        store.append_pending(op(2.0));
        assert_eq!(store.pending_ops(), vec![op(1.0), op(2.0)]);

        let log = store.commit().unwrap().unwrap();
        assert_eq!(log.events(), &[vec![op(1.0), op(2.0)]][..]);
    }

    #[test]
    fn retry_policy_absorbs_transient_failures() {
        let flaky = Arc::new(Flaky {
            inner: MemoryStorage::new(),
            failures: AtomicUsize::new(2),
        });
        let store = HistoryStore::new(flaky, Scope::Scene("s".into())).with_retry(
            RetryPolicy::new(2, crate::retry::BackoffStrategy::Fixed { delay_ms: 1 }),
        );
        store.append_pending(op(1.0));
        assert!(store.commit().unwrap().is_some());
    }
}
