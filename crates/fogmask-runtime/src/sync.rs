#![forbid(unsafe_code)]

//! Peer synchronization of the history log.
//!
//! Every write to a scene's history flag, local or remote, arrives as a
//! full snapshot on the watch channel. Only the newest snapshot matters, so
//! [`SyncAdapter::poll`] drains the channel and decodes the last event.
//! There is no merge: the last writer wins, and the replay engine's prefix
//! check turns a divergent snapshot into a rebuild.

use std::sync::mpsc::{Receiver, TryRecvError};

use fogmask_core::{HistoryLog, LogRepair};

use crate::history_store::{HISTORY_KEY, decode_snapshot};
use crate::storage::{Scope, StorageBackend, StorageEvent};

/// Result of draining the watch channel.
#[derive(Debug)]
pub enum SyncOutcome {
    /// No change since the last poll.
    Idle,
    /// A snapshot arrived. `skipped` counts the older ones it superseded.
    Updated {
        log: HistoryLog,
        repair: Option<LogRepair>,
        skipped: usize,
    },
    /// The newest snapshot could not be decoded; keep the current raster.
    Rejected { reason: String },
}

/// Receives history snapshots for one scene.
pub struct SyncAdapter {
    scope: Scope,
    rx: Receiver<StorageEvent>,
    disconnected: bool,
}

impl std::fmt::Debug for SyncAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncAdapter")
            .field("scope", &self.scope)
            .field("disconnected", &self.disconnected)
            .finish_non_exhaustive()
    }
}

impl SyncAdapter {
    /// Subscribe to the history flag of `scope`.
    pub fn subscribe(storage: &dyn StorageBackend, scope: Scope) -> Self {
        let rx = storage.watch(&scope, HISTORY_KEY);
        Self {
            scope,
            rx,
            disconnected: false,
        }
    }

    /// Whether the storage side dropped the channel.
    #[inline]
    pub fn is_disconnected(&self) -> bool {
        self.disconnected
    }

    /// Drain queued events and decode the newest.
    pub fn poll(&mut self) -> SyncOutcome {
        let mut latest = None;
        let mut seen = 0usize;
        loop {
            match self.rx.try_recv() {
                Ok(event) => {
                    seen += 1;
                    latest = Some(event);
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if !self.disconnected {
                        tracing::warn!(scope = %self.scope, "history watch channel closed");
                    }
                    self.disconnected = true;
                    break;
                }
            }
        }

        let Some(event) = latest else {
            return SyncOutcome::Idle;
        };
        let skipped = seen - 1;
        if skipped > 0 {
            tracing::debug!(scope = %self.scope, skipped, "coalesced history snapshots");
        }

        let decoded = match event {
            StorageEvent::Unset { .. } => Ok((HistoryLog::new(), None)),
            StorageEvent::Set { value, .. } => decode_snapshot(value),
        };
        match decoded {
            Ok((log, repair)) => {
                if let Some(repair) = &repair {
                    tracing::warn!(
                        scope = %self.scope,
                        missing_events = repair.missing_events,
                        missing_pointer = repair.missing_pointer,
                        clamped_pointer = ?repair.clamped_pointer,
                        "repaired incoming history snapshot"
                    );
                }
                SyncOutcome::Updated {
                    log,
                    repair,
                    skipped,
                }
            }
            Err(err) => {
                tracing::warn!(scope = %self.scope, error = %err, "rejected history snapshot");
                SyncOutcome::Rejected {
                    reason: err.to_string(),
                }
            }
        }
    }
}
