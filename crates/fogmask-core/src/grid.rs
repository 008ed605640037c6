#![forbid(unsafe_code)]

//! Grid collaborators for the grid painting tool.
//!
//! A [`Grid`] maps a canvas point to a cell and a cell to the brush
//! operation that covers it. Square grids paint boxes; hex grids paint
//! six-corner polygons.
//!
//! Hex math uses axial coordinates `(q, r)`. Pixel → hex conversion
//! produces fractional axial coordinates that are snapped with cube
//! rounding, so a point always lands in the hex whose centre is nearest.

use std::f32::consts::PI;

use crate::brush::BrushOperation;
use crate::geometry::Point;

const SQRT_3: f32 = 1.732_050_8;

/// A cell address. For square grids `(q, r)` is `(column, row)`; for hex
/// grids it is the axial coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct CellCoord {
    pub q: i32,
    pub r: i32,
}

impl CellCoord {
    #[inline]
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }
}

/// Cell lookup used by the grid tool.
pub trait Grid: Send + Sync {
    /// The cell containing `p`.
    fn cell_for_point(&self, p: Point) -> CellCoord;

    /// Corners of `cell`, in drawing order.
    fn cell_vertices(&self, cell: CellCoord) -> Vec<Point>;

    /// Brush operation covering `cell`. Defaults to the corner polygon.
    fn cell_geometry(&self, cell: CellCoord, fill: u8) -> Option<BrushOperation> {
        BrushOperation::polygon(self.cell_vertices(cell), fill).ok()
    }
}

// ---------------------------------------------------------------------------
// Square
// ---------------------------------------------------------------------------

/// Square grid of `size × size` cells anchored at the canvas origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SquareGrid {
    size: f32,
}

impl SquareGrid {
    /// Cell size is clamped to at least one canvas unit.
    #[must_use]
    pub fn new(size: f32) -> Self {
        Self {
            size: if size.is_finite() { size.max(1.0) } else { 1.0 },
        }
    }

    #[inline]
    pub fn size(&self) -> f32 {
        self.size
    }

    fn top_left(&self, cell: CellCoord) -> Point {
        Point::new(cell.q as f32 * self.size, cell.r as f32 * self.size)
    }
}

impl Grid for SquareGrid {
    fn cell_for_point(&self, p: Point) -> CellCoord {
        CellCoord::new(
            (p.x / self.size).floor() as i32,
            (p.y / self.size).floor() as i32,
        )
    }

    fn cell_vertices(&self, cell: CellCoord) -> Vec<Point> {
        let tl = self.top_left(cell);
        let s = self.size;
        vec![
            tl,
            Point::new(tl.x + s, tl.y),
            Point::new(tl.x + s, tl.y + s),
            Point::new(tl.x, tl.y + s),
        ]
    }

    fn cell_geometry(&self, cell: CellCoord, fill: u8) -> Option<BrushOperation> {
        Some(BrushOperation::rect(
            self.top_left(cell),
            self.size,
            self.size,
            fill,
        ))
    }
}

// ---------------------------------------------------------------------------
// Hex
// ---------------------------------------------------------------------------

/// Hex orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexOrientation {
    /// Vertex at the top; rows are offset.
    Pointy,
    /// Edge at the top; columns are offset.
    Flat,
}

/// Host hex grid types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HexKind {
    PointyOdd,
    PointyEven,
    FlatOdd,
    FlatEven,
}

impl HexKind {
    #[must_use]
    pub fn orientation(self) -> HexOrientation {
        match self {
            Self::PointyOdd | Self::PointyEven => HexOrientation::Pointy,
            Self::FlatOdd | Self::FlatEven => HexOrientation::Flat,
        }
    }
}

/// Hex layout: orientation, per-axis hex radius and the origin of hex `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HexGrid {
    orientation: HexOrientation,
    size: Point,
    origin: Point,
}

impl HexGrid {
    /// Layout matching a host grid of the given kind and cell size.
    ///
    /// `legacy` selects the older sizing where the hex radius is half the
    /// cell size instead of `size / √3`.
    #[must_use]
    pub fn new(kind: HexKind, grid_size: f32, legacy: bool) -> Self {
        let divisor = if legacy { 2.0 } else { SQRT_3 };
        let radius = grid_size / divisor;
        let half_offset = if legacy {
            SQRT_3 * grid_size / 4.0
        } else {
            grid_size / 2.0
        };
        let origin = match kind {
            HexKind::PointyOdd => Point::new(0.0, radius),
            HexKind::PointyEven => Point::new(half_offset, radius),
            HexKind::FlatOdd => Point::new(radius, 0.0),
            HexKind::FlatEven => Point::new(radius, half_offset),
        };
        Self::from_layout(kind.orientation(), Point::new(radius, radius), origin)
    }

    #[must_use]
    pub fn from_layout(orientation: HexOrientation, size: Point, origin: Point) -> Self {
        Self {
            orientation,
            size,
            origin,
        }
    }

    #[inline]
    pub fn orientation(&self) -> HexOrientation {
        self.orientation
    }

    /// Centre of an axial cell in canvas units.
    #[must_use]
    pub fn hex_to_pixel(&self, cell: CellCoord) -> Point {
        let (q, r) = (cell.q as f32, cell.r as f32);
        let (x, y) = match self.orientation {
            HexOrientation::Pointy => (SQRT_3 * q + SQRT_3 / 2.0 * r, 1.5 * r),
            HexOrientation::Flat => (1.5 * q, SQRT_3 / 2.0 * q + SQRT_3 * r),
        };
        Point::new(
            x * self.size.x + self.origin.x,
            y * self.size.y + self.origin.y,
        )
    }

    /// Fractional axial coordinate of a canvas point.
    #[must_use]
    pub fn pixel_to_hex(&self, p: Point) -> (f32, f32) {
        let px = (p.x - self.origin.x) / self.size.x;
        let py = (p.y - self.origin.y) / self.size.y;
        match self.orientation {
            HexOrientation::Pointy => (SQRT_3 / 3.0 * px - py / 3.0, 2.0 / 3.0 * py),
            HexOrientation::Flat => (2.0 / 3.0 * px, -px / 3.0 + SQRT_3 / 3.0 * py),
        }
    }

    fn start_angle(&self) -> f32 {
        match self.orientation {
            HexOrientation::Pointy => 0.5,
            HexOrientation::Flat => 0.0,
        }
    }
}

/// Snap a fractional axial coordinate to the nearest hex.
#[must_use]
pub fn cube_round(q: f32, r: f32) -> CellCoord {
    let s = -q - r;
    let (mut rq, mut rr, rs) = (q.round(), r.round(), s.round());
    let (dq, dr, ds) = ((rq - q).abs(), (rr - r).abs(), (rs - s).abs());
    if dq > dr && dq > ds {
        rq = -rr - rs;
    } else if dr > ds {
        rr = -rq - rs;
    }
    CellCoord::new(rq as i32, rr as i32)
}

impl Grid for HexGrid {
    fn cell_for_point(&self, p: Point) -> CellCoord {
        let (q, r) = self.pixel_to_hex(p);
        cube_round(q, r)
    }

    fn cell_vertices(&self, cell: CellCoord) -> Vec<Point> {
        let center = self.hex_to_pixel(cell);
        let start = self.start_angle();
        (0..6)
            .map(|i| {
                let angle = 2.0 * PI * (start + i as f32) / 6.0;
                Point::new(
                    center.x + self.size.x * angle.cos(),
                    center.y + self.size.y * angle.sin(),
                )
            })
            .collect()
    }
}
