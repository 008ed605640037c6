#![forbid(unsafe_code)]

//! Core: brush operations, the history log, grids, tools and tweens.
//!
//! # Role in fogmask
//! `fogmask-core` is the data layer. It owns the persisted shape of a fog
//! mask (a [`HistoryLog`] of [`Batch`]es of [`BrushOperation`]s) and the pure
//! logic that produces those operations from pointer input.
//!
//! # Primary responsibilities
//! - **BrushOperation**: one paint primitive, serializable to plain values.
//! - **HistoryLog**: append-only, truncate-on-branch, pointer-addressed log.
//! - **Grid**: square and hex cell lookup for the grid painting tool.
//! - **ToolSession**: pointer state machines for brush/box/ellipse/polygon/
//!   grid/room tools.
//! - **AlphaTween**: time-driven opacity transitions sampled by the host.
//!
//! # How it fits in the system
//! `fogmask-render` rasterizes brush operations onto a mask target, and
//! `fogmask-runtime` persists the history log and replays it. This crate has
//! no I/O and no knowledge of either.

pub mod animation;
pub mod brush;
pub mod geometry;
pub mod grid;
pub mod history;
pub mod tool;

pub use animation::{AlphaTween, Animation, TweenState};
pub use brush::{
    BrushError, BrushOperation, BrushRecord, BrushShape, FILL_HIDDEN, FILL_REVEALED, Geometry,
    fill_to_percent, percent_to_fill,
};
pub use geometry::{Point, Rect};
pub use grid::{CellCoord, Grid, HexGrid, HexKind, HexOrientation, SquareGrid};
pub use history::{Batch, HistoryLog, LogRecord, LogRepair};
pub use tool::{
    PointerButton, PointerEvent, SweepProvider, ToolContext, ToolKind, ToolOutput, ToolSession,
};
