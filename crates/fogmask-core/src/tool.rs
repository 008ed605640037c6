#![forbid(unsafe_code)]

//! Pointer-driven painting tools.
//!
//! A [`ToolSession`] turns [`PointerEvent`]s into [`BrushOperation`]s. It owns
//! only gesture state; the caller appends the returned ops to the pending
//! buffer, paints them for live feedback, and commits when
//! [`ToolOutput::commit`] is set.
//!
//! | Tool      | Down                 | Move                    | Up                |
//! |-----------|----------------------|-------------------------|-------------------|
//! | Brush     | start, paint         | ellipse per point       | commit            |
//! | Grid      | start, paint cell    | one box/hex per cell    | commit            |
//! | Box       | anchor               | preview                 | box, commit       |
//! | Ellipse   | anchor               | preview                 | ellipse, commit   |
//! | Polygon   | add vertex / close   | -                       | commit            |
//! | Room      | sweep polygon        | -                       | commit            |
//!
//! Pointer-downs are ignored while ops are still pending or when they fall
//! outside the canvas. Positions are rounded to whole canvas units.

use std::collections::HashSet;

use crate::brush::{BrushOperation, Geometry};
use crate::geometry::{Point, Rect};
use crate::grid::{CellCoord, Grid};

/// Distance from the first polygon vertex within which a click closes it.
pub const POLYGON_HANDLE_SIZE: f32 = 20.0;

/// Active painting tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ToolKind {
    #[default]
    Brush,
    Grid,
    Box,
    Ellipse,
    Polygon,
    Room,
}

impl ToolKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Brush => "brush",
            Self::Grid => "grid",
            Self::Box => "box",
            Self::Ellipse => "ellipse",
            Self::Polygon => "polygon",
            Self::Room => "room",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
}

/// A pointer event in canvas coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub position: Point,
    pub button: PointerButton,
    /// Shift held: constrains box/ellipse drags, forwarded to the sweep.
    pub shift: bool,
}

impl PointerEvent {
    #[must_use]
    pub fn primary(position: Point) -> Self {
        Self {
            position,
            button: PointerButton::Primary,
            shift: false,
        }
    }

    #[must_use]
    pub fn secondary(position: Point) -> Self {
        Self {
            position,
            button: PointerButton::Secondary,
            shift: false,
        }
    }

    #[must_use]
    pub fn with_shift(mut self) -> Self {
        self.shift = true;
        self
    }
}

/// Host-provided visibility sweep for the room tool.
pub trait SweepProvider: Send + Sync {
    /// Polygon visible from `origin`, or `None` when there is nothing to paint.
    fn sweep(&self, origin: Point, shift: bool) -> Option<Vec<Point>>;
}

/// Everything a tool needs from the layer for one event.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    /// Brush radius in canvas units.
    pub brush_size: f32,
    pub fill: u8,
    pub canvas: Rect,
    /// Ops from an earlier gesture have not been committed yet.
    pub pending: bool,
    pub grid: Option<&'a dyn Grid>,
    pub sweep: Option<&'a dyn SweepProvider>,
}

impl std::fmt::Debug for ToolContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("brush_size", &self.brush_size)
            .field("fill", &self.fill)
            .field("canvas", &self.canvas)
            .field("pending", &self.pending)
            .field("grid", &self.grid.is_some())
            .field("sweep", &self.sweep.is_some())
            .finish()
    }
}

/// Result of feeding one event to a [`ToolSession`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    /// New ops to append to the pending buffer, in order.
    pub ops: Vec<BrushOperation>,
    /// The gesture ended; commit the pending buffer.
    pub commit: bool,
    /// The gesture was abandoned; drop pending ops and repaint.
    pub cancel: bool,
}

impl ToolOutput {
    fn op(op: BrushOperation) -> Self {
        Self {
            ops: vec![op],
            ..Self::default()
        }
    }

    fn cancelled() -> Self {
        Self {
            cancel: true,
            ..Self::default()
        }
    }

    fn merge(mut self, other: ToolOutput) -> Self {
        self.ops.extend(other.ops);
        self.commit |= other.commit;
        self.cancel |= other.cancel;
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty() && !self.commit && !self.cancel
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Gesture {
    Idle,
    Brushing,
    Grid,
    Drag { start: Point },
}

/// Gesture state machine for the active tool.
#[derive(Debug, Clone)]
pub struct ToolSession {
    kind: ToolKind,
    gesture: Gesture,
    polygon: Vec<Point>,
    cells: HashSet<CellCoord>,
    cursor: Option<Point>,
    right_click: bool,
}

impl Default for ToolSession {
    fn default() -> Self {
        Self::new(ToolKind::default())
    }
}

impl ToolSession {
    #[must_use]
    pub fn new(kind: ToolKind) -> Self {
        Self {
            kind,
            gesture: Gesture::Idle,
            polygon: Vec::new(),
            cells: HashSet::new(),
            cursor: None,
            right_click: false,
        }
    }

    #[inline]
    pub fn kind(&self) -> ToolKind {
        self.kind
    }

    /// Switch tools, abandoning any gesture in progress.
    pub fn set_tool(&mut self, kind: ToolKind) {
        self.kind = kind;
        self.clear();
    }

    /// Drop all gesture state.
    pub fn clear(&mut self) {
        self.gesture = Gesture::Idle;
        self.polygon.clear();
        self.cells.clear();
        self.right_click = false;
    }

    /// Whether a drag or polygon is in progress.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.gesture != Gesture::Idle || !self.polygon.is_empty()
    }

    /// Vertices placed so far by the polygon tool.
    #[must_use]
    pub fn polygon_vertices(&self) -> &[Point] {
        &self.polygon
    }

    /// Shape the host should draw as a non-committed preview.
    #[must_use]
    pub fn preview(&self, shift: bool) -> Option<Geometry> {
        let cursor = self.cursor?;
        match (self.kind, self.gesture) {
            (ToolKind::Box, Gesture::Drag { start }) => {
                let (w, h) = drag_bounds(start, cursor, shift);
                Some(Geometry::Box {
                    origin: start,
                    width: w,
                    height: h,
                })
            }
            (ToolKind::Ellipse, Gesture::Drag { start }) => {
                let (w, h) = drag_bounds(start, cursor, shift);
                Some(Geometry::Ellipse {
                    center: start,
                    radius_x: w.abs(),
                    radius_y: h.abs(),
                })
            }
            (ToolKind::Polygon, _) if self.polygon.len() >= 3 => Some(Geometry::Polygon {
                vertices: self.polygon.clone(),
            }),
            _ => None,
        }
    }

    // ========================================================================
    // Events
    // ========================================================================

    pub fn pointer_down(&mut self, event: PointerEvent, ctx: &ToolContext<'_>) -> ToolOutput {
        if ctx.pending {
            return ToolOutput::default();
        }
        if event.button == PointerButton::Secondary {
            return self.secondary_down();
        }
        let p = event.position.rounded();
        if !ctx.canvas.contains(p) {
            return ToolOutput::default();
        }
        self.cursor = Some(p);

        let out = match self.kind {
            ToolKind::Brush => {
                self.gesture = Gesture::Brushing;
                ToolOutput::default()
            }
            ToolKind::Grid => {
                self.gesture = Gesture::Grid;
                self.cells.clear();
                ToolOutput::default()
            }
            ToolKind::Box | ToolKind::Ellipse => {
                self.gesture = Gesture::Drag { start: p };
                ToolOutput::default()
            }
            ToolKind::Polygon => self.polygon_click(p, ctx),
            ToolKind::Room => self.room_click(p, event.shift, ctx),
        };
        // A click without movement still paints under the cursor.
        out.merge(self.pointer_move(event, ctx))
    }

    pub fn pointer_move(&mut self, event: PointerEvent, ctx: &ToolContext<'_>) -> ToolOutput {
        let p = event.position.rounded();
        self.cursor = Some(p);
        self.right_click = false;
        if !ctx.canvas.contains(p) {
            return ToolOutput::default();
        }
        match self.gesture {
            Gesture::Brushing => ToolOutput::op(BrushOperation::ellipse(
                p,
                ctx.brush_size,
                ctx.brush_size,
                ctx.fill,
            )),
            Gesture::Grid => self.grid_cell(p, ctx),
            Gesture::Idle | Gesture::Drag { .. } => ToolOutput::default(),
        }
    }

    pub fn pointer_up(&mut self, event: PointerEvent, ctx: &ToolContext<'_>) -> ToolOutput {
        if event.button == PointerButton::Secondary {
            if self.kind == ToolKind::Polygon && self.right_click {
                self.clear();
                return ToolOutput::cancelled();
            }
            return ToolOutput::default();
        }
        let p = event.position.rounded();
        let mut out = ToolOutput::default();
        if let Gesture::Drag { start } = self.gesture {
            let (w, h) = drag_bounds(start, p, event.shift);
            let op = match self.kind {
                ToolKind::Ellipse => Some(BrushOperation::ellipse(start, w.abs(), h.abs(), ctx.fill)),
                ToolKind::Box => Some(BrushOperation::rect(start, w, h, ctx.fill)),
                _ => None,
            };
            out.ops.extend(op);
        }
        self.gesture = Gesture::Idle;
        self.cells.clear();
        out.commit = true;
        out
    }

    /// Second click of a double-click; closes a polygon with ≥3 vertices.
    pub fn double_click(&mut self, event: PointerEvent, ctx: &ToolContext<'_>) -> ToolOutput {
        if ctx.pending || self.kind != ToolKind::Polygon || self.polygon.len() < 3 {
            return ToolOutput::default();
        }
        if !ctx.canvas.contains(event.position.rounded()) {
            return ToolOutput::default();
        }
        self.close_polygon(ctx)
    }

    // ========================================================================
    // Per-tool helpers
    // ========================================================================

    fn secondary_down(&mut self) -> ToolOutput {
        match self.kind {
            ToolKind::Box | ToolKind::Ellipse if self.gesture != Gesture::Idle => {
                self.clear();
                ToolOutput::cancelled()
            }
            ToolKind::Polygon => {
                self.right_click = true;
                ToolOutput::default()
            }
            _ => ToolOutput::default(),
        }
    }

    fn polygon_click(&mut self, p: Point, ctx: &ToolContext<'_>) -> ToolOutput {
        if let Some(first) = self.polygon.first() {
            let near = (first.x - p.x).abs() < POLYGON_HANDLE_SIZE
                && (first.y - p.y).abs() < POLYGON_HANDLE_SIZE;
            if near {
                return self.close_polygon(ctx);
            }
        }
        self.polygon.push(p);
        ToolOutput::default()
    }

    fn close_polygon(&mut self, ctx: &ToolContext<'_>) -> ToolOutput {
        let vertices = std::mem::take(&mut self.polygon);
        match BrushOperation::polygon(vertices, ctx.fill) {
            Ok(op) => ToolOutput::op(op),
            Err(_) => ToolOutput::default(),
        }
    }

    fn room_click(&mut self, p: Point, shift: bool, ctx: &ToolContext<'_>) -> ToolOutput {
        let Some(sweep) = ctx.sweep else {
            return ToolOutput::default();
        };
        sweep
            .sweep(p, shift)
            .and_then(|vertices| BrushOperation::polygon(vertices, ctx.fill).ok())
            .map(ToolOutput::op)
            .unwrap_or_default()
    }

    fn grid_cell(&mut self, p: Point, ctx: &ToolContext<'_>) -> ToolOutput {
        let Some(grid) = ctx.grid else {
            return ToolOutput::default();
        };
        let cell = grid.cell_for_point(p);
        if !self.cells.insert(cell) {
            return ToolOutput::default();
        }
        grid.cell_geometry(cell, ctx.fill)
            .map(ToolOutput::op)
            .unwrap_or_default()
    }
}

fn sign(v: f32) -> f32 {
    if v > 0.0 {
        1.0
    } else if v < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// Signed drag extent; shift makes both sides as long as the longer one.
fn drag_bounds(start: Point, end: Point, shift: bool) -> (f32, f32) {
    let mut w = end.x - start.x;
    let mut h = end.y - start.y;
    if shift {
        if h.abs() > w.abs() {
            w = h.abs() * sign(w);
        } else {
            h = w.abs() * sign(h);
        }
    }
    (w, h)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
