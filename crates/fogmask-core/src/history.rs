#![forbid(unsafe_code)]

//! Pointer-addressed history log of brush batches.
//!
//! The [`HistoryLog`] is the persisted source of truth for a fog mask. It is
//! an append-only sequence of [`Batch`]es plus a `pointer` marking the end of
//! the visible prefix:
//!
//! - **Replay**: `events[0..pointer)` painted in order over a blank canvas
//!   reconstructs the mask.
//! - **Undo**: moves the pointer back; undone batches stay stored.
//! - **Branching**: the next commit truncates to the pointer before
//!   appending, so the undone tail is lost for good.
//!
//! # Invariants
//!
//! 1. `pointer <= events.len()` after any operation (fields are private).
//! 2. A commit always leaves `pointer == events.len()`.
//! 3. Undo never changes `events`.
//!
//! ```text
//! commit(A) commit(B) commit(C)
//! ┌─────────────────────────────────┐
//! │ events: [A, B, C]   pointer: 3  │
//! └─────────────────────────────────┘
//!
//! undo(2)
//! ┌─────────────────────────────────┐
//! │ events: [A, B, C]   pointer: 1  │   B, C hidden but stored
//! └─────────────────────────────────┘
//!
//! commit(D)  <-- new branch, truncates
//! ┌─────────────────────────────────┐
//! │ events: [A, D]      pointer: 2  │
//! └─────────────────────────────────┘
//! ```
//!
//! # Malformed snapshots
//!
//! Logs received from storage go through [`LogRecord`]. Missing `events` are
//! treated as empty, a missing `pointer` as "everything visible", and an out
//! of range pointer is clamped. [`HistoryLog::from_record`] reports what was
//! repaired so callers can log it.

use serde::{Deserialize, Serialize};

use crate::brush::BrushOperation;

/// One user gesture's worth of brush operations; the unit of undo.
pub type Batch = Vec<BrushOperation>;

/// Append-only, truncate-on-branch history of brush batches.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(from = "LogRecord")]
pub struct HistoryLog {
    events: Vec<Batch>,
    pointer: usize,
}

impl HistoryLog {
    /// Create an empty log: `{ events: [], pointer: 0 }`.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from parts, clamping `pointer` into range.
    #[must_use]
    pub fn from_parts(events: Vec<Batch>, pointer: usize) -> Self {
        let pointer = pointer.min(events.len());
        Self { events, pointer }
    }

    /// Sanitize a raw record, reporting any repair that was needed.
    #[must_use]
    pub fn from_record(record: LogRecord) -> (Self, Option<LogRepair>) {
        let mut repair = LogRepair::default();
        let events = record.events.unwrap_or_else(|| {
            repair.missing_events = true;
            Vec::new()
        });
        let len = events.len();
        let pointer = match record.pointer {
            None => {
                repair.missing_pointer = true;
                len
            }
            Some(raw) if !raw.is_finite() || raw < 0.0 => {
                repair.clamped_pointer = Some(raw);
                0
            }
            Some(raw) => {
                let floored = raw.floor();
                if floored != raw || floored > len as f64 {
                    repair.clamped_pointer = Some(raw);
                }
                (floored as usize).min(len)
            }
        };
        let log = Self { events, pointer };
        (log, repair.any().then_some(repair))
    }

    // ========================================================================
    // Core operations
    // ========================================================================

    /// Append a batch as a new branch head.
    ///
    /// Truncates `events` to `pointer`, pushes the batch and moves the pointer
    /// to the end. An empty batch is ignored and `false` is returned.
    pub fn commit(&mut self, batch: Batch) -> bool {
        if batch.is_empty() {
            return false;
        }
        self.events.truncate(self.pointer);
        self.events.push(batch);
        self.pointer = self.events.len();
        true
    }

    /// Move the pointer back by `steps`, saturating at zero.
    ///
    /// Returns the new pointer. Stored events are left intact.
    pub fn undo(&mut self, steps: usize) -> usize {
        self.pointer = self.pointer.saturating_sub(steps);
        self.pointer
    }

    /// Clear back to `{ events: [], pointer: 0 }`.
    pub fn reset(&mut self) {
        self.events.clear();
        self.pointer = 0;
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[inline]
    pub fn pointer(&self) -> usize {
        self.pointer
    }

    #[inline]
    pub fn events(&self) -> &[Batch] {
        &self.events
    }

    /// Number of stored batches (visible or not).
    #[inline]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Batches currently replayed onto the mask.
    #[inline]
    pub fn visible(&self) -> &[Batch] {
        &self.events[..self.pointer]
    }

    /// Number of undone batches still stored past the pointer.
    #[inline]
    pub fn redo_len(&self) -> usize {
        self.events.len() - self.pointer
    }

    /// Total brush operations in the visible prefix.
    pub fn visible_op_count(&self) -> usize {
        self.visible().iter().map(Vec::len).sum()
    }
}

/// Raw persisted shape of a [`HistoryLog`], tolerant of missing fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(default)]
    pub events: Option<Vec<Batch>>,
    #[serde(default)]
    pub pointer: Option<f64>,
}

impl From<LogRecord> for HistoryLog {
    fn from(record: LogRecord) -> Self {
        Self::from_record(record).0
    }
}

/// What [`HistoryLog::from_record`] had to fix.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LogRepair {
    /// `events` was absent or null.
    pub missing_events: bool,
    /// `pointer` was absent; it now points past the last batch.
    pub missing_pointer: bool,
    /// `pointer` was negative, fractional, non-finite or past the end.
    pub clamped_pointer: Option<f64>,
}

impl LogRepair {
    #[must_use]
    pub fn any(&self) -> bool {
        self.missing_events || self.missing_pointer || self.clamped_pointer.is_some()
    }
}

// ============================================================================
// Tests
// ============================================================================
