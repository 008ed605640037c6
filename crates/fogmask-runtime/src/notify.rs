#![forbid(unsafe_code)]

//! User-facing notifications.
//!
//! The layer reports things a user should see (a failed save, a rejected
//! peer update) through a [`Notifier`]. Hosts plug in their own toast or
//! status-bar implementation; the default forwards to `tracing`.

use std::sync::Mutex;

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Sink for user-facing messages.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: Level, message: &str);
}

/// Forwards notifications to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, level: Level, message: &str) {
        match level {
            Level::Info => tracing::info!(target: "fogmask::notify", "{message}"),
            Level::Warn => tracing::warn!(target: "fogmask::notify", "{message}"),
            Level::Error => tracing::error!(target: "fogmask::notify", "{message}"),
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    entries: Mutex<Vec<(Level, String)>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notifications received so far, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<(Level, String)> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Remove and return everything recorded.
    pub fn take(&self) -> Vec<(Level, String)> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: Level, message: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_owned()));
    }
}
