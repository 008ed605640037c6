#![forbid(unsafe_code)]

//! Deterministic software rasterizer.
//!
//! Coverage is decided by testing each pixel's centre against the shape in
//! logical coordinates, so results do not depend on draw order within a
//! shape and there is no anti-aliasing. Polygons use even-odd scanline spans.
//!
//! Blend per covered pixel:
//!
//! ```text
//! dst = round(fill · α + dst · (1 − α))
//! ```

use fogmask_core::{Point, Rect};

use crate::renderer::Renderer;
use crate::shape::{ShapeDescriptor, ShapeKind};
use crate::target::MaskTarget;

/// CPU renderer over [`MaskTarget`]s.
#[derive(Debug, Clone, Default)]
pub struct SoftwareRenderer {
    composited: u64,
}

impl SoftwareRenderer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Shapes composited since creation.
    #[inline]
    pub fn composited(&self) -> u64 {
        self.composited
    }
}

impl Renderer for SoftwareRenderer {
    type Target = MaskTarget;

    fn create_target(&mut self, width: f32, height: f32, resolution: f32) -> MaskTarget {
        MaskTarget::new(width, height, resolution)
    }

    fn composite_shape(&mut self, target: &mut MaskTarget, shape: &ShapeDescriptor) {
        #[cfg(feature = "tracing")]
        let _span = tracing::trace_span!("composite_shape", fill = shape.fill, alpha = shape.alpha);
        #[cfg(feature = "tracing")]
        let _guard = _span.enter();

        self.composited += 1;
        if shape.alpha <= 0.0 {
            return;
        }
        let Some(span) = PixelSpan::covering(target, &shape.bounds()) else {
            return;
        };
        match &shape.kind {
            ShapeKind::Ellipse {
                center,
                radius_x,
                radius_y,
            } => {
                if *radius_x <= 0.0 || *radius_y <= 0.0 {
                    return;
                }
                span.for_each(target, shape, |p| {
                    let dx = (p.x - center.x) / radius_x;
                    let dy = (p.y - center.y) / radius_y;
                    dx * dx + dy * dy <= 1.0
                });
            }
            ShapeKind::Rect {
                rect,
                corner_radius,
            } => {
                if rect.is_empty() {
                    return;
                }
                span.for_each(target, shape, |p| in_rounded_rect(rect, *corner_radius, p));
            }
            ShapeKind::Polygon { vertices } => fill_polygon(target, &span, shape, vertices),
        }
    }

    fn fill_solid(&mut self, target: &mut MaskTarget, value: u8) {
        target.fill(value);
    }

    fn read_pixel(&self, target: &MaskTarget, x: f32, y: f32) -> Option<u8> {
        target.read_pixel(x, y)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[inline]
fn blend(dst: u8, fill: u8, alpha: f32) -> u8 {
    if alpha >= 1.0 {
        return fill;
    }
    let v = f32::from(fill) * alpha + f32::from(dst) * (1.0 - alpha);
    v.round().clamp(0.0, 255.0) as u8
}

fn in_rounded_rect(rect: &Rect, radius: f32, p: Point) -> bool {
    if !rect.contains(p) {
        return false;
    }
    if radius <= 0.0 {
        return true;
    }
    let cx = p.x.clamp(rect.x + radius, rect.right() - radius);
    let cy = p.y.clamp(rect.y + radius, rect.bottom() - radius);
    let (dx, dy) = (p.x - cx, p.y - cy);
    dx * dx + dy * dy <= radius * radius
}

/// Physical pixel range clipped to the target.
#[derive(Debug, Clone, Copy)]
struct PixelSpan {
    col0: usize,
    col1: usize,
    row0: usize,
    row1: usize,
}

impl PixelSpan {
    fn covering(target: &MaskTarget, bounds: &Rect) -> Option<Self> {
        let r = target.resolution();
        let (pw, ph) = target.pixel_size();
        let clip = |v: f32, max: usize| -> usize {
            if v.is_nan() || v <= 0.0 {
                0
            } else {
                (v as usize).min(max)
            }
        };
        let col0 = clip((bounds.x * r).floor(), pw);
        let col1 = clip((bounds.right() * r).ceil(), pw);
        let row0 = clip((bounds.y * r).floor(), ph);
        let row1 = clip((bounds.bottom() * r).ceil(), ph);
        (col0 < col1 && row0 < row1).then_some(Self {
            col0,
            col1,
            row0,
            row1,
        })
    }

    /// Logical centre of a physical pixel.
    #[inline]
    fn centre(r: f32, col: usize, row: usize) -> Point {
        Point::new((col as f32 + 0.5) / r, (row as f32 + 0.5) / r)
    }

    fn for_each(
        &self,
        target: &mut MaskTarget,
        shape: &ShapeDescriptor,
        inside: impl Fn(Point) -> bool,
    ) {
        let r = target.resolution();
        let (pw, _) = target.pixel_size();
        let data = target.data_mut();
        for row in self.row0..self.row1 {
            for col in self.col0..self.col1 {
                if inside(Self::centre(r, col, row)) {
                    let idx = row * pw + col;
                    data[idx] = blend(data[idx], shape.fill, shape.alpha);
                }
            }
        }
    }
}

fn fill_polygon(
    target: &mut MaskTarget,
    span: &PixelSpan,
    shape: &ShapeDescriptor,
    vertices: &[Point],
) {
    if vertices.len() < 3 {
        return;
    }
    let r = target.resolution();
    let (pw, _) = target.pixel_size();
    let data = target.data_mut();
    let mut crossings: Vec<f32> = Vec::with_capacity(vertices.len());

    for row in span.row0..span.row1 {
        let y = (row as f32 + 0.5) / r;
        crossings.clear();
        for (i, a) in vertices.iter().enumerate() {
            let b = vertices[(i + 1) % vertices.len()];
            if (a.y <= y && y < b.y) || (b.y <= y && y < a.y) {
                let t = (y - a.y) / (b.y - a.y);
                crossings.push(a.x + t * (b.x - a.x));
            }
        }
        crossings.sort_by(f32::total_cmp);
        for pair in crossings.chunks_exact(2) {
            let (x0, x1) = (pair[0], pair[1]);
            for col in span.col0..span.col1 {
                let x = (col as f32 + 0.5) / r;
                if x >= x0 && x < x1 {
                    let idx = row * pw + col;
                    data[idx] = blend(data[idx], shape.fill, shape.alpha);
                }
            }
        }
    }
}
