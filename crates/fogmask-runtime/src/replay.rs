#![forbid(unsafe_code)]

//! Mask replay engine.
//!
//! Keeps a render target in step with a [`HistoryLog`] by painting only the
//! batches it has not painted yet, and rebuilding from a blank target when
//! the log moved somewhere the raster cannot follow incrementally.
//!
//! # Decision
//!
//! For `render_range(log, start, stop)` with `stop` defaulting to the log
//! pointer and clamped to its length:
//!
//! | Condition                                           | Mode          |
//! |-----------------------------------------------------|---------------|
//! | log has no events                                   | `Reset`       |
//! | target invalidated                                  | `Rebuild`     |
//! | `stop < local_pointer`                              | `Rebuild`     |
//! | explicit `start < local_pointer`                    | `Rebuild`     |
//! | rendered prefix differs from the log's prefix       | `Rebuild`     |
//! | `stop == local_pointer`                             | `Noop`        |
//! | otherwise                                           | `Incremental` |
//!
//! The prefix check compares a fingerprint per rendered batch against the
//! incoming log. It catches a peer that truncated and re-committed to the
//! same length, and notifications that were coalesced on the way here.
//!
//! # Previewed ops
//!
//! Ops of an in-progress gesture are painted through [`ReplayEngine::preview`]
//! before they are committed. [`ReplayEngine::adopt_commit`] then advances
//! the pointer over the committed batch without painting it twice.

use std::hash::{DefaultHasher, Hash, Hasher};

use fogmask_core::{Batch, BrushOperation, FILL_REVEALED, HistoryLog};
use fogmask_render::{Renderer, resolution_for};

/// How a render call brought the target up to date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplayMode {
    /// Already current; nothing painted.
    Noop,
    /// Painted only the batches past the local pointer.
    Incremental,
    /// Refilled the base and replayed from the first batch.
    Rebuild,
    /// Empty log; refilled the base.
    Reset,
    /// A local commit whose ops were already previewed.
    Adopted,
}

/// Outcome of one render call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayReport {
    pub mode: ReplayMode,
    /// Batches composited by this call.
    pub batches: usize,
    /// Brush operations composited by this call.
    pub ops: usize,
    /// Local pointer after the call.
    pub pointer: usize,
}

type RefreshHook = Box<dyn FnMut(&ReplayReport) + Send>;

/// Fingerprint of a single brush operation.
pub fn op_fingerprint(op: &BrushOperation) -> u64 {
    let mut hasher = DefaultHasher::new();
    op.fingerprint_into(&mut hasher);
    hasher.finish()
}

/// Fingerprint of a whole batch, order sensitive.
pub fn batch_fingerprint(batch: &Batch) -> u64 {
    let mut hasher = DefaultHasher::new();
    batch.len().hash(&mut hasher);
    for op in batch {
        op.fingerprint_into(&mut hasher);
    }
    hasher.finish()
}

/// Incremental replayer of a [`HistoryLog`] onto one render target.
pub struct ReplayEngine<R: Renderer> {
    renderer: R,
    target: R::Target,
    width: f32,
    height: f32,
    base_fill: u8,
    local_pointer: usize,
    fingerprints: Vec<u64>,
    preview_ops: Vec<u64>,
    /// Batches were painted over previewed ops, so they are out of order.
    preview_stale: bool,
    dirty: bool,
    on_refresh: Option<RefreshHook>,
}

impl<R: Renderer> std::fmt::Debug for ReplayEngine<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayEngine")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("base_fill", &self.base_fill)
            .field("local_pointer", &self.local_pointer)
            .field("previewed", &self.preview_ops.len())
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl<R: Renderer> ReplayEngine<R> {
    /// Create an engine with a fresh target sized for `width × height`.
    ///
    /// The target starts invalidated, so the first render fills the base.
    pub fn new(mut renderer: R, width: f32, height: f32) -> Self {
        let target = renderer.create_target(width, height, resolution_for(width, height));
        Self {
            renderer,
            target,
            width,
            height,
            base_fill: FILL_REVEALED,
            local_pointer: 0,
            fingerprints: Vec::new(),
            preview_ops: Vec::new(),
            preview_stale: false,
            dirty: true,
            on_refresh: None,
        }
    }

    #[must_use]
    pub fn with_base_fill(mut self, fill: u8) -> Self {
        self.base_fill = fill;
        self.dirty = true;
        self
    }

    /// Called after every render call that touched the target.
    pub fn set_refresh_hook(&mut self, hook: impl FnMut(&ReplayReport) + Send + 'static) {
        self.on_refresh = Some(Box::new(hook));
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[inline]
    pub fn local_pointer(&self) -> usize {
        self.local_pointer
    }

    #[inline]
    pub fn base_fill(&self) -> u8 {
        self.base_fill
    }

    #[inline]
    pub fn target(&self) -> &R::Target {
        &self.target
    }

    #[inline]
    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    #[inline]
    pub fn size(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Whether the next render must rebuild from the base.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Number of previewed ops not yet adopted by a commit.
    #[inline]
    pub fn previewed(&self) -> usize {
        self.preview_ops.len()
    }

    /// Mask level at a logical canvas point.
    pub fn read_pixel(&self, x: f32, y: f32) -> Option<u8> {
        self.renderer.read_pixel(&self.target, x, y)
    }

    // ========================================================================
    // Target control
    // ========================================================================

    /// Replace the target with one sized for `width × height`.
    pub fn resize(&mut self, width: f32, height: f32) {
        self.target = self
            .renderer
            .create_target(width, height, resolution_for(width, height));
        self.width = width;
        self.height = height;
        self.invalidate();
        tracing::debug!(width, height, "replay target resized");
    }

    /// Force the next render to rebuild from the base fill.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Fill the target with `fill` and forget what was rendered.
    ///
    /// A fill other than the base leaves the target invalidated.
    pub fn reset_target(&mut self, fill: u8) {
        self.renderer.fill_solid(&mut self.target, fill);
        self.local_pointer = 0;
        self.fingerprints.clear();
        self.preview_ops.clear();
        self.preview_stale = false;
        self.dirty = fill != self.base_fill;
    }

    /// Paint an uncommitted op without moving the pointer.
    pub fn preview(&mut self, op: &BrushOperation) {
        self.renderer.composite_op(&mut self.target, op);
        self.preview_ops.push(op_fingerprint(op));
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    /// Bring the target up to the log's pointer.
    pub fn render_stack(&mut self, log: &HistoryLog) -> ReplayReport {
        self.render_range(log, None, None)
    }

    /// Render `events[start..stop)`, rebuilding when the target can't follow.
    ///
    /// `stop` defaults to the log pointer, `start` to the local pointer. An
    /// explicit `start` past the local pointer is clamped to it, since the
    /// batches in between would otherwise never be painted.
    pub fn render_range(
        &mut self,
        log: &HistoryLog,
        start: Option<usize>,
        stop: Option<usize>,
    ) -> ReplayReport {
        if log.is_empty() {
            self.reset_target(self.base_fill);
            return self.finish(ReplayMode::Reset, 0, 0);
        }

        let stop = stop.unwrap_or(log.pointer()).min(log.len());
        let rewind = self.dirty
            || stop < self.local_pointer
            || start.is_some_and(|s| s < self.local_pointer)
            || !self.prefix_matches(log);

        let (from, mode) = if rewind {
            self.reset_target(self.base_fill);
            (0, ReplayMode::Rebuild)
        } else if stop == self.local_pointer {
            let report = self.report(ReplayMode::Noop, 0, 0);
            tracing::trace!(pointer = stop, "replay noop");
            return report;
        } else {
            (self.local_pointer, ReplayMode::Incremental)
        };

        let events = &log.events()[from..stop];
        if !events.is_empty() && !self.preview_ops.is_empty() {
            self.preview_ops.clear();
            self.preview_stale = true;
        }
        let mut ops = 0;
        for batch in events {
            for op in batch {
                self.renderer.composite_op(&mut self.target, op);
            }
            ops += batch.len();
            self.fingerprints.push(batch_fingerprint(batch));
        }
        self.local_pointer = stop;
        self.finish(mode, events.len(), ops)
    }

    /// Record a successful local commit.
    ///
    /// When the committed batch is exactly the next batch and its ops were
    /// previewed in order, the pointer advances without painting. Otherwise
    /// this falls back to [`render_stack`](Self::render_stack), rebuilding if
    /// previewed paint would be left behind.
    pub fn adopt_commit(&mut self, log: &HistoryLog) -> ReplayReport {
        let pointer = log.pointer();
        if !self.dirty && pointer == self.local_pointer + 1 && self.prefix_matches(log) {
            let batch = &log.events()[pointer - 1];
            let previewed = batch
                .iter()
                .map(op_fingerprint)
                .zip(&self.preview_ops)
                .take_while(|(a, b)| a == *b)
                .count();
            if previewed == batch.len() {
                self.preview_ops.drain(..previewed);
                self.fingerprints.push(batch_fingerprint(batch));
                self.local_pointer = pointer;
                return self.finish(ReplayMode::Adopted, 1, 0);
            }
        }
        if self.preview_stale || !self.preview_ops.is_empty() {
            self.invalidate();
        }
        self.render_stack(log)
    }

    fn prefix_matches(&self, log: &HistoryLog) -> bool {
        let n = self.local_pointer;
        n <= log.len()
            && self.fingerprints.len() == n
            && log.events()[..n]
                .iter()
                .zip(&self.fingerprints)
                .all(|(batch, fp)| batch_fingerprint(batch) == *fp)
    }

    fn report(&self, mode: ReplayMode, batches: usize, ops: usize) -> ReplayReport {
        ReplayReport {
            mode,
            batches,
            ops,
            pointer: self.local_pointer,
        }
    }

    fn finish(&mut self, mode: ReplayMode, batches: usize, ops: usize) -> ReplayReport {
        let report = self.report(mode, batches, ops);
        tracing::debug!(
            mode = ?report.mode,
            batches = report.batches,
            ops = report.ops,
            pointer = report.pointer,
            "mask replayed"
        );
        if let Some(hook) = self.on_refresh.as_mut() {
            hook(&report);
        }
        report
    }
}
