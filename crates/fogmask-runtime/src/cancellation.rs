#![forbid(unsafe_code)]

//! Cooperative cancellation for storage retry back-off.
//!
//! A [`CancellationSource`] hands out [`CancellationToken`]s. The history
//! store waits on its token between write attempts, so cancelling aborts
//! the back-off immediately instead of sleeping it out. An in-flight
//! storage call is never interrupted.
//!
//! ```
//! use fogmask_runtime::cancellation::CancellationSource;
//! use std::time::Duration;
//!
//! let source = CancellationSource::new();
//! let token = source.token();
//! source.cancel();
//! assert!(token.wait_timeout(Duration::from_secs(60)));
//! ```

use std::sync::{Arc, Condvar, Mutex};

use web_time::{Duration, Instant};

#[derive(Default)]
struct Shared {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cloneable view of a cancellation flag.
#[derive(Clone, Default)]
pub struct CancellationToken {
    shared: Arc<Shared>,
}

/// The side that requests cancellation.
///
/// Dropping the source does not cancel its tokens.
#[derive(Default)]
pub struct CancellationSource {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl std::fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationSource")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancellationSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn token(&self) -> CancellationToken {
        CancellationToken {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancel every token and wake all waiters. Idempotent.
    pub fn cancel(&self) {
        let mut cancelled = self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *cancelled = true;
        self.shared.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl CancellationToken {
    /// A token that is never cancelled.
    #[must_use]
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        *self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` if cancelled, `false` if the full duration elapsed.
    pub fn wait_timeout(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut cancelled = self
            .shared
            .cancelled
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .shared
                .wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(|e| e.into_inner());
            cancelled = guard;
        }
        true
    }
}
