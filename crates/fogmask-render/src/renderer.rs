#![forbid(unsafe_code)]

//! The compositing contract the replay engine draws through.

use fogmask_core::BrushOperation;

use crate::shape::ShapeDescriptor;

/// A backend that can hold a mask raster and paint shapes onto it.
///
/// Compositing is "over": each shape blends its fill level into the
/// existing pixels with its alpha and never clears what lies outside it.
pub trait Renderer {
    /// Backend-specific raster handle.
    type Target;

    /// Allocate a target covering `width × height` canvas units at
    /// `resolution` pixels per unit.
    fn create_target(&mut self, width: f32, height: f32, resolution: f32) -> Self::Target;

    /// Blend `shape` onto `target`.
    fn composite_shape(&mut self, target: &mut Self::Target, shape: &ShapeDescriptor);

    /// Overwrite every pixel with `value`.
    fn fill_solid(&mut self, target: &mut Self::Target, value: u8);

    /// Level at the logical point `(x, y)`, if it lies on the target.
    fn read_pixel(&self, target: &Self::Target, x: f32, y: f32) -> Option<u8>;

    /// Blend a brush operation onto `target`.
    fn composite_op(&mut self, target: &mut Self::Target, op: &BrushOperation) {
        self.composite_shape(target, &ShapeDescriptor::from_op(op));
    }
}
