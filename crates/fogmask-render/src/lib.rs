#![forbid(unsafe_code)]

//! Render: the compositing contract and a software mask rasterizer.
//!
//! # Role in fogmask
//! `fogmask-render` is the drawing side of the mask. The replay engine only
//! ever talks to a [`Renderer`]; hosts plug in their own GPU-backed one, and
//! [`SoftwareRenderer`] gives a deterministic reference for tests and
//! headless use.
//!
//! # Primary responsibilities
//! - **MaskTarget**: single-channel raster with a resolution factor.
//! - **ShapeDescriptor**: brush geometry normalized for rasterization.
//! - **SoftwareRenderer**: pixel-centre coverage, "over" compositing, no AA.

pub mod raster;
pub mod renderer;
pub mod shape;
pub mod target;

pub use raster::SoftwareRenderer;
pub use renderer::Renderer;
pub use shape::{ShapeDescriptor, ShapeKind};
pub use target::{MaskTarget, resolution_for};
