#![forbid(unsafe_code)]

//! Commit protocol under contention and failure.
//!
//! Validates:
//! - Commits racing from several threads queue on the writer; no op is lost.
//! - A write that fails after retries keeps the ops pending and painted.
//! - Calling commit again after the storage recovers persists them once.
//! - Cancelling during back-off stops retrying early.
//! - A failed undo or reset leaves the mask and log as they were.
//! - Blanking the mask drops ops left over from a failed commit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use serde_json::Value;

use fogmask_core::{BrushOperation, FILL_HIDDEN, FILL_REVEALED, Point};
use fogmask_render::SoftwareRenderer;
use fogmask_runtime::{
    BackoffStrategy, CancellationSource, FogError, HistoryStore, LayerContext, Level, MaskLayer,
    MemoryStorage, RecordingNotifier, ReplayMode, RetryPolicy, Role, Scope, StorageBackend,
    StorageError, StorageEvent,
};

// ============================================================================
// Test storage
// ============================================================================

/// Memory storage whose writes can be slowed down or made to fail.
#[derive(Default)]
struct Unreliable {
    inner: MemoryStorage,
    failures_left: AtomicUsize,
    offline: AtomicBool,
    write_delay_ms: u64,
    writes: AtomicUsize,
}

impl Unreliable {
    fn failing(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Self::default()
        }
    }

    fn slow(ms: u64) -> Self {
        Self {
            write_delay_ms: ms,
            ..Self::default()
        }
    }

    /// Fail every write until switched back.
    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

impl StorageBackend for Unreliable {
    fn get(&self, scope: &Scope, key: &str) -> Result<Option<Value>, StorageError> {
        self.inner.get(scope, key)
    }

    fn set(&self, scope: &Scope, key: &str, value: Value) -> Result<(), StorageError> {
        if self.write_delay_ms > 0 {
            thread::sleep(Duration::from_millis(self.write_delay_ms));
        }
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed || self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("injected failure".into()));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.set(scope, key, value)
    }

    fn unset(&self, scope: &Scope, key: &str) -> Result<(), StorageError> {
        self.inner.unset(scope, key)
    }

    fn watch(&self, scope: &Scope, key: &str) -> Receiver<StorageEvent> {
        self.inner.watch(scope, key)
    }
}

fn op(i: usize) -> BrushOperation {
    BrushOperation::rect(Point::new(i as f32, 0.0), 1.0, 1.0, FILL_HIDDEN)
}

// ============================================================================
// Contention
// ============================================================================

#[test]
fn concurrent_commits_lose_no_ops() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 25;

    let storage = Arc::new(Unreliable::slow(1));
    let store = Arc::new(
        HistoryStore::new(storage.clone(), Scope::Scene("s".into()))
            .with_retry(RetryPolicy::no_retry()),
    );
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for i in 0..PER_THREAD {
                    store.append_pending(op(t * PER_THREAD + i));
                    store.commit().unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    assert!(!store.has_pending());
    let log = store.load().unwrap();
    assert_eq!(log.pointer(), log.len());
    assert_eq!(log.visible_op_count(), THREADS * PER_THREAD);
    assert!(log.events().iter().all(|batch| !batch.is_empty()));

    let mut xs: Vec<usize> = log
        .events()
        .iter()
        .flatten()
        .map(|op| op.geometry().bounds().x as usize)
        .collect();
    xs.sort_unstable();
    assert_eq!(xs, (0..THREADS * PER_THREAD).collect::<Vec<_>>());
}

#[test]
fn ops_appended_during_a_write_are_committed_next() {
    let storage = Arc::new(Unreliable::slow(30));
    let store = Arc::new(HistoryStore::new(storage, Scope::Scene("s".into())));

    store.append_pending(op(0));
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.commit().unwrap())
    };
    thread::sleep(Duration::from_millis(10));
    store.append_pending(op(1));
    writer.join().unwrap();

    let log = store.commit().unwrap().unwrap();
    assert_eq!(log.visible_op_count(), 2);
    assert!(!store.has_pending());
}

// ============================================================================
// Failure
// ============================================================================

fn gm_layer(storage: &Arc<Unreliable>, notes: &Arc<RecordingNotifier>) -> MaskLayer {
    let ctx = LayerContext::new("s", "u", Role::Gm, 50.0, 50.0).with_retry(RetryPolicy::no_retry());
    MaskLayer::new(storage.clone(), SoftwareRenderer::new(), ctx).with_notifier(notes.clone())
}

#[test]
fn failed_commit_keeps_ops_and_retry_succeeds() {
    let storage = Arc::new(Unreliable::failing(1));
    let notes = Arc::new(RecordingNotifier::new());
    let ctx = LayerContext::new("s", "u", Role::Gm, 50.0, 50.0).with_retry(RetryPolicy::no_retry());
    let mut layer = MaskLayer::new(storage.clone(), SoftwareRenderer::new(), ctx)
        .with_notifier(notes.clone());
    layer.activate().unwrap();

    layer.append(BrushOperation::rect(Point::ORIGIN, 10.0, 10.0, FILL_HIDDEN));
    let err = layer.commit().unwrap_err();
    assert!(matches!(err, FogError::StorageWrite { .. }));
    assert!(err.is_transient());
    assert_eq!(notes.entries().len(), 1);
    assert_eq!(notes.entries()[0].0, Level::Error);

    assert_eq!(layer.store().pending_len(), 1);
    assert_eq!(layer.read_pixel(5.0, 5.0), Some(FILL_HIDDEN));
    assert!(layer.store().load().unwrap().is_empty());

    let report = layer.commit().unwrap().unwrap();
    assert_eq!(report.mode, ReplayMode::Adopted);
    assert_eq!(layer.store().load().unwrap().len(), 1);
    assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
    assert_eq!(layer.read_pixel(5.0, 5.0), Some(FILL_HIDDEN));
    assert_eq!(layer.read_pixel(20.0, 20.0), Some(FILL_REVEALED));
}

#[test]
fn retry_policy_rides_out_transient_failures() {
    let storage = Arc::new(Unreliable::failing(2));
    let store = HistoryStore::new(storage.clone(), Scope::Scene("s".into()))
        .with_retry(RetryPolicy::new(2, BackoffStrategy::Fixed { delay_ms: 1 }));
    store.append_pending(op(0));
    assert!(store.commit().unwrap().is_some());
    assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
}

#[test]
fn cancellation_stops_backoff() {
    let storage = Arc::new(Unreliable::failing(10));
    let source = CancellationSource::new();
    let store = HistoryStore::new(storage, Scope::Scene("s".into()))
        .with_retry(RetryPolicy::new(5, BackoffStrategy::Fixed { delay_ms: 10_000 }))
        .with_cancellation(source.token());
    source.cancel();

    store.append_pending(op(0));
    let started = std::time::Instant::now();
    assert!(store.commit().is_err());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(store.pending_len(), 1);
}

#[test]
fn failed_reset_keeps_mask_and_history() {
    let storage = Arc::new(Unreliable::default());
    let notes = Arc::new(RecordingNotifier::new());
    let mut layer = gm_layer(&storage, &notes);
    layer.activate().unwrap();
    layer.append(BrushOperation::rect(Point::ORIGIN, 20.0, 20.0, FILL_HIDDEN));
    layer.commit().unwrap().unwrap();

    storage.set_offline(true);
    let err = layer.reset_mask(true).unwrap_err();
    assert!(matches!(err, FogError::StorageWrite { .. }));
    assert_eq!(layer.read_pixel(10.0, 10.0), Some(FILL_HIDDEN));
    assert_eq!(layer.log().len(), 1);
    assert_eq!(layer.engine().local_pointer(), 1);
    assert_eq!(layer.store().load().unwrap().len(), 1);
    let entries = notes.take();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::Error);

    storage.set_offline(false);
    layer.reset_mask(true).unwrap();
    assert_eq!(layer.read_pixel(10.0, 10.0), Some(FILL_REVEALED));
    assert!(layer.log().is_empty());
    assert!(layer.store().load().unwrap().is_empty());
}

#[test]
fn failed_undo_keeps_mask_and_notifies() {
    let storage = Arc::new(Unreliable::default());
    let notes = Arc::new(RecordingNotifier::new());
    let mut layer = gm_layer(&storage, &notes);
    layer.activate().unwrap();
    layer.append(BrushOperation::rect(Point::ORIGIN, 20.0, 20.0, FILL_HIDDEN));
    layer.commit().unwrap().unwrap();

    storage.set_offline(true);
    assert!(layer.undo(1).is_err());
    assert_eq!(layer.read_pixel(10.0, 10.0), Some(FILL_HIDDEN));
    assert_eq!(layer.log().pointer(), 1);
    assert_eq!(layer.store().load().unwrap().pointer(), 1);
    let entries = notes.take();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::Error);

    storage.set_offline(false);
    layer.undo(1).unwrap();
    assert_eq!(layer.read_pixel(10.0, 10.0), Some(FILL_REVEALED));
}

#[test]
fn blank_mask_discards_unsaved_ops() {
    let storage = Arc::new(Unreliable::default());
    let notes = Arc::new(RecordingNotifier::new());
    let mut layer = gm_layer(&storage, &notes);
    layer.activate().unwrap();

    storage.set_offline(true);
    layer.append(BrushOperation::rect(Point::ORIGIN, 5.0, 5.0, FILL_REVEALED));
    assert!(layer.commit().is_err());
    assert_eq!(layer.store().pending_len(), 1);
    notes.take();

    storage.set_offline(false);
    layer.blank_mask().unwrap().unwrap();
    let log = layer.store().load().unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log.events()[0].len(), 1);
    assert_eq!(log.events()[0][0].fill(), FILL_HIDDEN);
    assert_eq!(layer.read_pixel(2.0, 2.0), Some(FILL_HIDDEN));
    assert!(!layer.store().has_pending());

    let entries = notes.take();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].0, Level::Warn);
}
