#![forbid(unsafe_code)]

//! Brush operations: the paint primitives recorded in the history log.
//!
//! A [`BrushOperation`] is one shape filled with a uniform greyscale level at
//! some opacity. The in-memory form is an enum of shape-specific geometries,
//! so an operation can never carry fields for two shapes at once. The
//! persisted form is [`BrushRecord`], a flat record of plain scalars and
//! arrays that round-trips through any JSON-like flag store.
//!
//! # Mask convention
//!
//! The mask is a single channel. [`FILL_REVEALED`] (255) shows the scene,
//! [`FILL_HIDDEN`] (0) covers it. A blank canvas is fully revealed.
//!
//! # Persisted layout
//!
//! ```text
//! { "shape": 0, "x": 10, "y": 10, "width": 5, "height": 5, "fill": 0 }
//! { "shape": 3, "x": 0, "y": 0, "vertices": [0,0, 10,0, 10,10, 0,0], "fill": 255 }
//! ```
//!
//! Ellipse `width`/`height` are radii. Polygon vertices are absolute and the
//! list is closed by repeating the first point.

use std::hash::Hasher;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Point, Rect};

/// Mask level for a fully revealed pixel.
pub const FILL_REVEALED: u8 = 255;
/// Mask level for a fully hidden pixel.
pub const FILL_HIDDEN: u8 = 0;
/// Corner radius used by [`Geometry::RoundedRect`], in canvas units.
pub const ROUNDED_RECT_RADIUS: f32 = 10.0;

/// Shape discriminant, persisted as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrushShape {
    Ellipse,
    Box,
    RoundedRect,
    Polygon,
}

impl BrushShape {
    /// Persisted integer code.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Ellipse => 0,
            Self::Box => 1,
            Self::RoundedRect => 2,
            Self::Polygon => 3,
        }
    }

    /// Decode a persisted integer code.
    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Ellipse),
            1 => Some(Self::Box),
            2 => Some(Self::RoundedRect),
            3 => Some(Self::Polygon),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ellipse => "ellipse",
            Self::Box => "box",
            Self::RoundedRect => "rounded_rect",
            Self::Polygon => "polygon",
        }
    }
}

/// Shape-specific geometry of a brush operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    /// Axis-aligned ellipse around `center` with the given radii.
    Ellipse {
        center: Point,
        radius_x: f32,
        radius_y: f32,
    },
    /// Rectangle anchored at `origin`; extents may be negative.
    Box {
        origin: Point,
        width: f32,
        height: f32,
    },
    /// Rectangle with [`ROUNDED_RECT_RADIUS`] corners.
    RoundedRect {
        origin: Point,
        width: f32,
        height: f32,
    },
    /// Closed polygon over absolute vertices (first point not repeated).
    Polygon { vertices: Vec<Point> },
}

impl Geometry {
    #[must_use]
    pub fn shape(&self) -> BrushShape {
        match self {
            Self::Ellipse { .. } => BrushShape::Ellipse,
            Self::Box { .. } => BrushShape::Box,
            Self::RoundedRect { .. } => BrushShape::RoundedRect,
            Self::Polygon { .. } => BrushShape::Polygon,
        }
    }

    /// Axis-aligned bounds in canvas units.
    #[must_use]
    pub fn bounds(&self) -> Rect {
        match self {
            Self::Ellipse {
                center,
                radius_x,
                radius_y,
            } => Rect::new(
                center.x - radius_x,
                center.y - radius_y,
                radius_x * 2.0,
                radius_y * 2.0,
            ),
            Self::Box {
                origin,
                width,
                height,
            }
            | Self::RoundedRect {
                origin,
                width,
                height,
            } => Rect::from_signed(*origin, *width, *height),
            Self::Polygon { vertices } => Rect::bounding(vertices).unwrap_or_default(),
        }
    }
}

/// Errors raised while decoding or constructing a brush operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrushError {
    #[error("unknown brush shape code {0}")]
    UnknownShape(u8),
    #[error("{name} brush is missing `{field}`", name = .shape.name())]
    MissingField {
        shape: BrushShape,
        field: &'static str,
    },
    #[error("brush field `{0}` is not a finite number")]
    NonFinite(&'static str),
    #[error("polygon vertex list has odd length {0}")]
    OddVertexList(usize),
    #[error("polygon needs at least 3 vertices, got {0}")]
    TooFewVertices(usize),
    #[error("unrecognised fill value {0:?}")]
    InvalidFill(String),
}

/// One paint primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BrushRecord", into = "BrushRecord")]
pub struct BrushOperation {
    geometry: Geometry,
    fill: u8,
    alpha: f32,
}

impl BrushOperation {
    /// Ellipse centred on `center` with radii `radius_x` × `radius_y`.
    #[must_use]
    pub fn ellipse(center: Point, radius_x: f32, radius_y: f32, fill: u8) -> Self {
        Self::from_geometry(
            Geometry::Ellipse {
                center,
                radius_x: radius_x.abs(),
                radius_y: radius_y.abs(),
            },
            fill,
        )
    }

    /// Rectangle from `origin` spanning a signed extent.
    #[must_use]
    pub fn rect(origin: Point, width: f32, height: f32, fill: u8) -> Self {
        Self::from_geometry(
            Geometry::Box {
                origin,
                width,
                height,
            },
            fill,
        )
    }

    #[must_use]
    pub fn rounded_rect(origin: Point, width: f32, height: f32, fill: u8) -> Self {
        Self::from_geometry(
            Geometry::RoundedRect {
                origin,
                width,
                height,
            },
            fill,
        )
    }

    /// Polygon over absolute vertices.
    ///
    /// A trailing copy of the first vertex is dropped; at least three
    /// vertices must remain.
    pub fn polygon(vertices: Vec<Point>, fill: u8) -> Result<Self, BrushError> {
        let vertices = strip_closing_vertex(vertices);
        if vertices.len() < 3 {
            return Err(BrushError::TooFewVertices(vertices.len()));
        }
        if !vertices.iter().all(|p| p.is_finite()) {
            return Err(BrushError::NonFinite("vertices"));
        }
        Ok(Self::from_geometry(Geometry::Polygon { vertices }, fill))
    }

    fn from_geometry(geometry: Geometry, fill: u8) -> Self {
        Self {
            geometry,
            fill,
            alpha: 1.0,
        }
    }

    /// Set the opacity, clamped to `[0, 1]`.
    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = if alpha.is_finite() {
            alpha.clamp(0.0, 1.0)
        } else {
            1.0
        };
        self
    }

    #[inline]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    #[inline]
    pub fn shape(&self) -> BrushShape {
        self.geometry.shape()
    }

    #[inline]
    pub fn fill(&self) -> u8 {
        self.fill
    }

    #[inline]
    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    /// Feed a bit-exact description of this operation into `hasher`.
    ///
    /// Two operations that serialize identically hash identically. There is
    /// no `Hash` impl: float equality and bit equality disagree on `-0.0`.
    pub fn fingerprint_into<H: Hasher>(&self, hasher: &mut H) {
        hasher.write_u8(self.shape().code());
        hasher.write_u8(self.fill);
        hasher.write_u32(self.alpha.to_bits());
        match &self.geometry {
            Geometry::Ellipse {
                center,
                radius_x,
                radius_y,
            } => {
                for v in [center.x, center.y, *radius_x, *radius_y] {
                    hasher.write_u32(v.to_bits());
                }
            }
            Geometry::Box {
                origin,
                width,
                height,
            }
            | Geometry::RoundedRect {
                origin,
                width,
                height,
            } => {
                for v in [origin.x, origin.y, *width, *height] {
                    hasher.write_u32(v.to_bits());
                }
            }
            Geometry::Polygon { vertices } => {
                hasher.write_usize(vertices.len());
                for p in vertices {
                    hasher.write_u32(p.x.to_bits());
                    hasher.write_u32(p.y.to_bits());
                }
            }
        }
    }
}

fn strip_closing_vertex(mut vertices: Vec<Point>) -> Vec<Point> {
    if vertices.len() > 1 && vertices.first() == vertices.last() {
        vertices.pop();
    }
    vertices
}

// ---------------------------------------------------------------------------
// Persisted form
// ---------------------------------------------------------------------------

/// Persisted fill value.
///
/// Written as an integer level. Older data stored greyscale colours either
/// as `0xRRGGBB` integers or as `"0xRRGGBB"` strings; both decode to the low
/// byte.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FillValue {
    Level(u64),
    Float(f64),
    Hex(String),
}

impl FillValue {
    fn level(&self) -> Result<u8, BrushError> {
        match self {
            Self::Level(v) => Ok((v & 0xff) as u8),
            Self::Float(v) if v.is_finite() && *v >= 0.0 => Ok(((*v as u64) & 0xff) as u8),
            Self::Float(v) => Err(BrushError::InvalidFill(v.to_string())),
            Self::Hex(s) => {
                let digits = s
                    .trim()
                    .trim_start_matches("0x")
                    .trim_start_matches("0X")
                    .trim_start_matches('#');
                u32::from_str_radix(digits, 16)
                    .map(|v| (v & 0xff) as u8)
                    .map_err(|_| BrushError::InvalidFill(s.clone()))
            }
        }
    }
}

/// Flat persisted record of a [`BrushOperation`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushRecord {
    pub shape: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vertices: Option<Vec<f32>>,
    pub fill: FillValue,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f32>,
}

fn require(
    value: Option<f32>,
    shape: BrushShape,
    field: &'static str,
) -> Result<f32, BrushError> {
    let v = value.ok_or(BrushError::MissingField { shape, field })?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(BrushError::NonFinite(field))
    }
}

impl TryFrom<BrushRecord> for BrushOperation {
    type Error = BrushError;

    fn try_from(record: BrushRecord) -> Result<Self, Self::Error> {
        let shape = BrushShape::from_code(record.shape)
            .ok_or(BrushError::UnknownShape(record.shape))?;
        let fill = record.fill.level()?;

        let op = match shape {
            BrushShape::Polygon => {
                let flat = record.vertices.ok_or(BrushError::MissingField {
                    shape,
                    field: "vertices",
                })?;
                if flat.len() % 2 != 0 {
                    return Err(BrushError::OddVertexList(flat.len()));
                }
                let vertices = flat
                    .chunks_exact(2)
                    .map(|pair| Point::new(pair[0], pair[1]))
                    .collect();
                Self::polygon(vertices, fill)?
            }
            BrushShape::Ellipse | BrushShape::Box | BrushShape::RoundedRect => {
                let origin = Point::new(
                    require(record.x, shape, "x")?,
                    require(record.y, shape, "y")?,
                );
                let width = require(record.width, shape, "width")?;
                let height = require(record.height, shape, "height")?;
                match shape {
                    BrushShape::Ellipse => Self::ellipse(origin, width, height, fill),
                    BrushShape::Box => Self::rect(origin, width, height, fill),
                    _ => Self::rounded_rect(origin, width, height, fill),
                }
            }
        };

        match record.alpha {
            None => Ok(op),
            Some(a) if a.is_finite() => Ok(op.with_alpha(a)),
            Some(_) => Err(BrushError::NonFinite("alpha")),
        }
    }
}

impl From<BrushOperation> for BrushRecord {
    fn from(op: BrushOperation) -> Self {
        let shape = op.shape().code();
        let fill = FillValue::Level(u64::from(op.fill));
        let alpha = (op.alpha < 1.0).then_some(op.alpha);
        match op.geometry {
            Geometry::Ellipse {
                center,
                radius_x,
                radius_y,
            } => Self {
                shape,
                x: Some(center.x),
                y: Some(center.y),
                width: Some(radius_x),
                height: Some(radius_y),
                vertices: None,
                fill,
                alpha,
            },
            Geometry::Box {
                origin,
                width,
                height,
            }
            | Geometry::RoundedRect {
                origin,
                width,
                height,
            } => Self {
                shape,
                x: Some(origin.x),
                y: Some(origin.y),
                width: Some(width),
                height: Some(height),
                vertices: None,
                fill,
                alpha,
            },
            Geometry::Polygon { vertices } => {
                let mut flat = Vec::with_capacity(vertices.len() * 2 + 2);
                for p in &vertices {
                    flat.push(p.x);
                    flat.push(p.y);
                }
                if let Some(first) = vertices.first() {
                    flat.push(first.x);
                    flat.push(first.y);
                }
                Self {
                    shape,
                    x: Some(0.0),
                    y: Some(0.0),
                    width: None,
                    height: None,
                    vertices: Some(flat),
                    fill,
                    alpha,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Opacity helpers
// ---------------------------------------------------------------------------

/// Convert a brush opacity percentage (0–100) into a mask level.
#[must_use]
pub fn percent_to_fill(percent: f32) -> u8 {
    let p = if percent.is_finite() {
        percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    (p * 2.55).ceil().min(255.0) as u8
}

/// Convert a mask level back into a whole percentage (rounded up).
#[must_use]
pub fn fill_to_percent(fill: u8) -> u8 {
    ((f32::from(fill) / 255.0) * 100.0).ceil() as u8
}
