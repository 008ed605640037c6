#![forbid(unsafe_code)]

//! Runtime: persistence, replay and peer sync of fog masks.
//!
//! # Role in fogmask
//! `fogmask-runtime` turns the pure data of `fogmask-core` into a working
//! layer. It persists the history log, keeps a render target in step with
//! it, and follows changes written by other clients.
//!
//! # Primary responsibilities
//! - **HistoryStore**: pending buffer and the serialized commit protocol.
//! - **ReplayEngine**: incremental, rewind-aware replay onto a target.
//! - **SyncAdapter**: newest-snapshot-wins intake of peer writes.
//! - **SettingsResolver / FogConfig**: scene → user → default settings.
//! - **MaskLayer**: the composition of all of the above for one viewer.
//!
//! # How it fits in the system
//! Storage and rendering are collaborators behind [`StorageBackend`] and
//! [`Renderer`](fogmask_render::Renderer). The host supplies them, feeds
//! pointer events in, and samples [`AppearanceFrame`]s out.

pub mod appearance;
pub mod cancellation;
pub mod error;
pub mod history_store;
pub mod layer;
pub mod notify;
pub mod replay;
pub mod retry;
pub mod settings;
pub mod storage;
pub mod sync;

pub use appearance::{AppearanceFrame, BlurSettings, FogAppearance};
pub use cancellation::{CancellationSource, CancellationToken};
pub use error::{FogError, StorageError};
pub use history_store::{HISTORY_KEY, HistoryStore, decode_snapshot};
pub use layer::{LayerContext, MaskLayer, PointerPhase};
pub use notify::{Level, Notifier, RecordingNotifier, TracingNotifier};
pub use replay::{ReplayEngine, ReplayMode, ReplayReport};
pub use retry::{BackoffStrategy, RetryPolicy};
pub use settings::{ConfigError, FogConfig, Role, SettingsResolver, preview_tint};
pub use storage::{FileStorage, MemoryStorage, Scope, StorageBackend, StorageEvent};
pub use sync::{SyncAdapter, SyncOutcome};
