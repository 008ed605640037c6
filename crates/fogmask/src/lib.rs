#![forbid(unsafe_code)]

//! fogmask public facade crate.
//!
//! Re-exports the types a host needs to put a fog-of-war layer on a scene
//! and offers a prelude for day-to-day usage.
//!
//! ```
//! use std::sync::Arc;
//! use fogmask::prelude::*;
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let ctx = LayerContext::new("scene", "gm", Role::Gm, 400.0, 300.0);
//! let mut layer = MaskLayer::new(storage, SoftwareRenderer::new(), ctx);
//! layer.activate()?;
//!
//! layer.set_tool(ToolKind::Box);
//! layer.handle_pointer(PointerPhase::Down, PointerEvent::primary(Point::new(10.0, 10.0)))?;
//! layer.handle_pointer(PointerPhase::Up, PointerEvent::primary(Point::new(60.0, 40.0)))?;
//! assert_eq!(layer.read_pixel(30.0, 20.0), Some(FILL_HIDDEN));
//!
//! layer.undo(1)?;
//! assert_eq!(layer.read_pixel(30.0, 20.0), Some(FILL_REVEALED));
//! # Ok::<(), fogmask::Error>(())
//! ```

use thiserror::Error;

// --- Core re-exports -------------------------------------------------------

pub use fogmask_core::{
    AlphaTween, Animation, Batch, BrushOperation, BrushShape, CellCoord, FILL_HIDDEN,
    FILL_REVEALED, Geometry, Grid, HexGrid, HexKind, HistoryLog, Point, PointerButton,
    PointerEvent, Rect, SquareGrid, SweepProvider, ToolKind, ToolSession, fill_to_percent,
    percent_to_fill,
};

// --- Render re-exports -----------------------------------------------------

pub use fogmask_render::{MaskTarget, Renderer, ShapeDescriptor, SoftwareRenderer};

// --- Runtime re-exports ----------------------------------------------------

pub use fogmask_runtime::{
    AppearanceFrame, CancellationSource, CancellationToken, FileStorage, FogConfig, FogError,
    HistoryStore, LayerContext, MaskLayer, MemoryStorage, Notifier, PointerPhase, ReplayEngine,
    ReplayMode, ReplayReport, RetryPolicy, Role, Scope, StorageBackend, StorageError,
    SyncAdapter, SyncOutcome,
};

// --- Errors ---------------------------------------------------------------

/// Top-level error type for fogmask hosts.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Fog(#[from] FogError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Config(#[from] fogmask_runtime::ConfigError),
    #[error(transparent)]
    Brush(#[from] fogmask_core::BrushError),
    /// A global logger was already installed.
    #[error("logging init failed: {0}")]
    Logging(String),
}

/// Standard result type for fogmask APIs.
pub type Result<T> = std::result::Result<T, Error>;

// --- Logging ---------------------------------------------------------------

/// Structured JSON logging for hosts without their own subscriber.
#[cfg(feature = "tracing-json")]
pub mod logging {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::{EnvFilter, fmt};

    use crate::Error;

    /// Environment variable read for the filter directives.
    pub const ENV_VAR: &str = "FOGMASK_LOG";

    /// Install a global JSON subscriber filtered by `FOGMASK_LOG`
    /// (default `info`).
    pub fn init() -> Result<(), Error> {
        let filter = EnvFilter::try_from_env(ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"));
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
            .map_err(|err| Error::Logging(err.to_string()))
    }
}

// --- Prelude --------------------------------------------------------------

pub mod prelude {
    pub use crate::{
        BrushOperation, Error, FILL_HIDDEN, FILL_REVEALED, FogConfig, HistoryLog, LayerContext,
        MaskLayer, MemoryStorage, Point, PointerEvent, PointerPhase, Result, Role,
        SoftwareRenderer, StorageBackend, ToolKind,
    };

    pub use crate::{core, render, runtime};
}

pub use fogmask_core as core;
pub use fogmask_render as render;
pub use fogmask_runtime as runtime;
