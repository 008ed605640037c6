#![forbid(unsafe_code)]

//! Structured logging of history and sync events.
//!
//! Validates:
//! - Commits log at INFO with `ops`, `events` and `pointer` fields.
//! - Repaired snapshots log at WARN with the repair fields.
//! - Undecodable snapshots log at WARN with an `error` field.
//! - A no-op undo logs nothing at INFO.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing_subscriber::layer::SubscriberExt;

use fogmask_core::{BrushOperation, FILL_HIDDEN, Point};
use fogmask_runtime::{HistoryStore, MemoryStorage, Scope, StorageBackend, SyncAdapter, SyncOutcome};

#[derive(Debug, Clone)]
struct Captured {
    level: tracing::Level,
    message: String,
    fields: HashMap<String, String>,
}

#[derive(Default)]
struct FieldVisitor(Vec<(String, String)>);

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.push((field.name().to_string(), format!("{value:?}")));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.0.push((field.name().to_string(), value.to_string()));
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.0.push((field.name().to_string(), value.to_string()));
    }
}

struct Capture(Arc<Mutex<Vec<Captured>>>);

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for Capture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);
        let mut fields: HashMap<String, String> = visitor.0.into_iter().collect();
        let message = fields.remove("message").unwrap_or_default();
        self.0.lock().unwrap().push(Captured {
            level: *event.metadata().level(),
            message,
            fields,
        });
    }
}

fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<Captured>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let subscriber = tracing_subscriber::registry().with(Capture(events.clone()));
    let out = tracing::subscriber::with_default(subscriber, f);
    let captured = events.lock().unwrap().clone();
    (out, captured)
}

fn scene() -> Scope {
    Scope::Scene("log-scene".into())
}

fn op() -> BrushOperation {
    BrushOperation::rect(Point::new(1.0, 1.0), 4.0, 4.0, FILL_HIDDEN)
}

#[test]
fn commit_logs_structured_fields() {
    let storage = Arc::new(MemoryStorage::new());
    let store = HistoryStore::new(storage, scene());
    store.append_pending(op());
    store.append_pending(op());

    let (result, events) = capture(|| store.commit());
    assert!(result.unwrap().is_some());

    let commit = events
        .iter()
        .find(|e| e.message == "committed history batch")
        .expect("commit event");
    assert_eq!(commit.level, tracing::Level::INFO);
    assert_eq!(commit.fields["ops"], "2");
    assert_eq!(commit.fields["events"], "1");
    assert_eq!(commit.fields["pointer"], "1");
    assert!(commit.fields.contains_key("scope"));
}

#[test]
fn repaired_snapshot_warns_with_repair_fields() {
    let storage = Arc::new(MemoryStorage::new());
    storage
        .set(
            &scene(),
            "history",
            json!({ "events": [[{"shape": 1, "x": 0, "y": 0, "width": 2, "height": 2, "fill": 0}]] }),
        )
        .unwrap();
    let store = HistoryStore::new(storage, scene());

    let (log, events) = capture(|| store.load());
    assert_eq!(log.unwrap().pointer(), 1);

    let warn = events
        .iter()
        .find(|e| e.level == tracing::Level::WARN)
        .expect("repair warning");
    assert_eq!(warn.fields["missing_pointer"], "true");
    assert_eq!(warn.fields["missing_events"], "false");
}

#[test]
fn rejected_sync_snapshot_warns_with_error() {
    let storage = Arc::new(MemoryStorage::new());
    let mut sync = SyncAdapter::subscribe(storage.as_ref(), scene());
    storage
        .set(&scene(), "history", json!({ "events": "not a list", "pointer": 0 }))
        .unwrap();

    let (outcome, events) = capture(|| sync.poll());
    assert!(matches!(outcome, SyncOutcome::Rejected { .. }));

    let warn = events
        .iter()
        .find(|e| e.message == "rejected history snapshot")
        .expect("rejection warning");
    assert_eq!(warn.level, tracing::Level::WARN);
    assert!(warn.fields.contains_key("error"));
}

#[test]
fn saturated_undo_is_silent() {
    let storage = Arc::new(MemoryStorage::new());
    let store = HistoryStore::new(storage, scene());

    let (log, events) = capture(|| store.undo(3));
    assert_eq!(log.unwrap().pointer(), 0);
    assert!(events.iter().all(|e| e.level != tracing::Level::INFO));
}
