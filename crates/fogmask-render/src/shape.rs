#![forbid(unsafe_code)]

//! Brush geometry normalized for rasterization.

use fogmask_core::brush::ROUNDED_RECT_RADIUS;
use fogmask_core::{BrushOperation, Geometry, Point, Rect};

/// What to fill.
#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    Ellipse {
        center: Point,
        radius_x: f32,
        radius_y: f32,
    },
    /// Normalized rectangle; `corner_radius` is already clamped.
    Rect { rect: Rect, corner_radius: f32 },
    Polygon { vertices: Vec<Point> },
}

/// A shape plus the level and opacity it is composited with.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeDescriptor {
    pub kind: ShapeKind,
    pub fill: u8,
    pub alpha: f32,
}

impl ShapeDescriptor {
    /// Normalize a brush operation.
    ///
    /// Negative box extents are flipped, and a rounded rectangle's corner
    /// radius is clamped to half its shorter side.
    #[must_use]
    pub fn from_op(op: &BrushOperation) -> Self {
        let kind = match op.geometry() {
            Geometry::Ellipse {
                center,
                radius_x,
                radius_y,
            } => ShapeKind::Ellipse {
                center: *center,
                radius_x: *radius_x,
                radius_y: *radius_y,
            },
            Geometry::Box {
                origin,
                width,
                height,
            } => ShapeKind::Rect {
                rect: Rect::from_signed(*origin, *width, *height),
                corner_radius: 0.0,
            },
            Geometry::RoundedRect {
                origin,
                width,
                height,
            } => {
                let rect = Rect::from_signed(*origin, *width, *height);
                let corner_radius = ROUNDED_RECT_RADIUS.min(rect.width.min(rect.height) / 2.0);
                ShapeKind::Rect {
                    rect,
                    corner_radius,
                }
            }
            Geometry::Polygon { vertices } => ShapeKind::Polygon {
                vertices: vertices.clone(),
            },
        };
        Self {
            kind,
            fill: op.fill(),
            alpha: op.alpha(),
        }
    }

    /// Logical bounds of the shape.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        match &self.kind {
            ShapeKind::Ellipse {
                center,
                radius_x,
                radius_y,
            } => Rect::new(
                center.x - radius_x,
                center.y - radius_y,
                radius_x * 2.0,
                radius_y * 2.0,
            ),
            ShapeKind::Rect { rect, .. } => *rect,
            ShapeKind::Polygon { vertices } => Rect::bounding(vertices).unwrap_or_default(),
        }
    }
}

impl From<&BrushOperation> for ShapeDescriptor {
    fn from(op: &BrushOperation) -> Self {
        Self::from_op(op)
    }
}
