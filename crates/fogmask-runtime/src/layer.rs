#![forbid(unsafe_code)]

//! The fog mask layer.
//!
//! [`MaskLayer`] wires the pieces together for one scene and one viewer:
//!
//! ```text
//!  PointerEvent ──► ToolSession ──► ops ──► HistoryStore.pending
//!                                    │              │ commit
//!                                    ▼              ▼
//!                             ReplayEngine ◄── HistoryLog ◄── SyncAdapter
//!                               (preview)     (adopt / render_stack)
//! ```
//!
//! All collaborators come in through [`MaskLayer::new`]; the layer reaches
//! for nothing global. The host drives it: [`activate`](MaskLayer::activate)
//! once the canvas exists, pointer events as they arrive,
//! [`poll_sync`](MaskLayer::poll_sync) and [`tick`](MaskLayer::tick) once per
//! frame.

use std::sync::Arc;
use std::time::Duration;

use fogmask_core::{
    BrushOperation, FILL_HIDDEN, Grid, HistoryLog, Point, PointerEvent, Rect, SweepProvider,
    ToolContext, ToolKind, ToolOutput, ToolSession,
};
use fogmask_render::{Renderer, SoftwareRenderer};
use serde_json::json;

use crate::appearance::{AppearanceFrame, FogAppearance};
use crate::cancellation::CancellationToken;
use crate::error::FogError;
use crate::history_store::HistoryStore;
use crate::notify::{Level, Notifier, TracingNotifier};
use crate::replay::{ReplayEngine, ReplayReport};
use crate::retry::RetryPolicy;
use crate::settings::{FogConfig, Role, SettingsResolver};
use crate::storage::{Scope, StorageBackend};
use crate::sync::{SyncAdapter, SyncOutcome};

/// Which pointer callback an event came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerPhase {
    Down,
    Move,
    Up,
    DoubleClick,
}

/// Who and where a layer is for.
#[derive(Clone)]
pub struct LayerContext {
    pub scene_id: String,
    pub user_id: String,
    pub role: Role,
    /// Scene canvas in canvas units.
    pub width: f32,
    pub height: f32,
    /// Defaults beneath scene and user settings.
    pub config: FogConfig,
    pub retry: RetryPolicy,
    pub grid: Option<Arc<dyn Grid>>,
    pub sweep: Option<Arc<dyn SweepProvider>>,
}

impl std::fmt::Debug for LayerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayerContext")
            .field("scene_id", &self.scene_id)
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("grid", &self.grid.is_some())
            .field("sweep", &self.sweep.is_some())
            .finish_non_exhaustive()
    }
}

impl LayerContext {
    #[must_use]
    pub fn new(
        scene_id: impl Into<String>,
        user_id: impl Into<String>,
        role: Role,
        width: f32,
        height: f32,
    ) -> Self {
        Self {
            scene_id: scene_id.into(),
            user_id: user_id.into(),
            role,
            width,
            height,
            config: FogConfig::default(),
            retry: RetryPolicy::default(),
            grid: None,
            sweep: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: FogConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub fn with_grid(mut self, grid: Arc<dyn Grid>) -> Self {
        self.grid = Some(grid);
        self
    }

    #[must_use]
    pub fn with_sweep(mut self, sweep: Arc<dyn SweepProvider>) -> Self {
        self.sweep = Some(sweep);
        self
    }
}

/// One scene's fog mask as seen by one viewer.
pub struct MaskLayer<R: Renderer = SoftwareRenderer> {
    store: HistoryStore,
    engine: ReplayEngine<R>,
    sync: SyncAdapter,
    settings: SettingsResolver,
    appearance: FogAppearance,
    tools: ToolSession,
    notifier: Arc<dyn Notifier>,
    config: FogConfig,
    role: Role,
    canvas: Rect,
    grid: Option<Arc<dyn Grid>>,
    sweep: Option<Arc<dyn SweepProvider>>,
    log: HistoryLog,
    visible: bool,
    active: bool,
}

impl<R: Renderer> std::fmt::Debug for MaskLayer<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaskLayer")
            .field("store", &self.store)
            .field("engine", &self.engine)
            .field("role", &self.role)
            .field("canvas", &self.canvas)
            .field("pointer", &self.log.pointer())
            .field("visible", &self.visible)
            .field("active", &self.active)
            .finish_non_exhaustive()
    }
}

impl<R: Renderer> MaskLayer<R> {
    /// Build a layer. Nothing is loaded or drawn until [`activate`](Self::activate).
    pub fn new(storage: Arc<dyn StorageBackend>, renderer: R, ctx: LayerContext) -> Self {
        let scene = Scope::Scene(ctx.scene_id);
        let user = Scope::User(ctx.user_id);
        let store = HistoryStore::new(Arc::clone(&storage), scene.clone()).with_retry(ctx.retry);
        let sync = SyncAdapter::subscribe(storage.as_ref(), scene.clone());
        let settings = SettingsResolver::new(storage, scene, user, ctx.config.clone());
        let appearance = FogAppearance::new(&ctx.config, ctx.role);
        Self {
            store,
            engine: ReplayEngine::new(renderer, 0.0, 0.0),
            sync,
            settings,
            appearance,
            tools: ToolSession::default(),
            notifier: Arc::new(TracingNotifier),
            config: ctx.config,
            role: ctx.role,
            canvas: Rect::from_size(ctx.width, ctx.height),
            grid: ctx.grid,
            sweep: ctx.sweep,
            log: HistoryLog::new(),
            visible: false,
            active: false,
        }
    }

    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Token that aborts storage retry back-off.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.store = self.store.with_cancellation(token);
        self
    }

    /// Called after every replay that changed the mask.
    pub fn set_refresh_hook(&mut self, hook: impl FnMut(&ReplayReport) + Send + 'static) {
        self.engine.set_refresh_hook(hook);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the target, load the log and replay it from scratch.
    pub fn activate(&mut self) -> Result<ReplayReport, FogError> {
        self.engine.resize(self.canvas.width, self.canvas.height);
        self.refresh_settings();
        self.appearance = FogAppearance::new(&self.config, self.role);
        self.visible = self.config.visible;
        if !self.store.exists()? && self.config.auto_enable_scene_fog {
            self.visible = true;
        }
        let log = self.store.load()?;
        let report = self.engine.render_stack(&log);
        self.log = log;
        self.active = true;
        tracing::info!(
            scope = %self.store.scope(),
            events = self.log.len(),
            pointer = self.log.pointer(),
            visible = self.visible,
            "mask layer activated"
        );
        Ok(report)
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Re-resolve settings and animate towards them.
    pub fn refresh_settings(&mut self) -> &FogConfig {
        self.config = self.settings.resolved();
        self.appearance.apply_config(&self.config);
        &self.config
    }

    // ========================================================================
    // History
    // ========================================================================

    /// Buffer an op and paint it for live feedback.
    pub fn append(&mut self, op: BrushOperation) {
        self.engine.preview(&op);
        self.store.append_pending(op);
    }

    /// Commit the pending ops as one batch.
    ///
    /// On a storage failure the ops stay pending and painted, the notifier
    /// is told, and calling `commit` again retries.
    pub fn commit(&mut self) -> Result<Option<ReplayReport>, FogError> {
        match self.store.commit() {
            Ok(None) => Ok(None),
            Ok(Some(log)) => {
                let report = self.engine.adopt_commit(&log);
                self.log = log;
                Ok(Some(report))
            }
            Err(err) => {
                self.notifier
                    .notify(Level::Error, &format!("Fog changes were not saved: {err}"));
                Err(err)
            }
        }
    }

    /// Step the persisted pointer back and repaint.
    ///
    /// On a storage failure the mask and log are left as they were and the
    /// notifier is told.
    pub fn undo(&mut self, steps: usize) -> Result<ReplayReport, FogError> {
        let log = match self.store.undo(steps) {
            Ok(log) => log,
            Err(err) => {
                self.notifier
                    .notify(Level::Error, &format!("Fog undo was not saved: {err}"));
                return Err(err);
            }
        };
        let report = self.engine.render_stack(&log);
        self.log = log;
        Ok(report)
    }

    /// Refill the mask with the base; with `save`, also clear the history.
    ///
    /// With `save`, the empty log is persisted before anything local
    /// changes. Ops still pending from a failed commit belong to the history
    /// being cleared, so they are discarded along with the gesture in
    /// progress, and the notifier is told how many were dropped. If the write
    /// fails, the mask, the log and the pending ops are untouched.
    pub fn reset_mask(&mut self, save: bool) -> Result<(), FogError> {
        if !save {
            self.engine.reset_target(self.engine.base_fill());
            return Ok(());
        }
        let log = match self.store.reset() {
            Ok(log) => log,
            Err(err) => {
                self.notifier
                    .notify(Level::Error, &format!("Fog reset was not saved: {err}"));
                return Err(err);
            }
        };
        self.tools.clear();
        let dropped = self.store.clear_pending();
        if dropped > 0 {
            self.notifier.notify(
                Level::Warn,
                &format!("Discarded {dropped} unsaved fog changes"),
            );
        }
        self.engine.reset_target(self.engine.base_fill());
        self.log = log;
        Ok(())
    }

    /// Clear the history and hide the whole canvas in one committed batch.
    ///
    /// Unsaved ops are discarded as in [`reset_mask`](Self::reset_mask);
    /// the committed batch holds only the full-canvas box.
    pub fn blank_mask(&mut self) -> Result<Option<ReplayReport>, FogError> {
        self.reset_mask(true)?;
        self.append(BrushOperation::rect(
            Point::ORIGIN,
            self.canvas.width,
            self.canvas.height,
            FILL_HIDDEN,
        ));
        self.commit()
    }

    /// Apply the newest peer snapshot, if any arrived.
    pub fn poll_sync(&mut self) -> Option<ReplayReport> {
        match self.sync.poll() {
            SyncOutcome::Idle => None,
            SyncOutcome::Updated { log, .. } => {
                let report = self.engine.render_stack(&log);
                self.log = log;
                Some(report)
            }
            SyncOutcome::Rejected { reason } => {
                self.notifier.notify(
                    Level::Warn,
                    &format!("Ignored an unreadable fog update: {reason}"),
                );
                None
            }
        }
    }

    // ========================================================================
    // Tools
    // ========================================================================

    #[inline]
    pub fn tool(&self) -> ToolKind {
        self.tools.kind()
    }

    pub fn set_tool(&mut self, kind: ToolKind) {
        self.tools.set_tool(kind);
    }

    #[inline]
    pub fn tools(&self) -> &ToolSession {
        &self.tools
    }

    /// Set the brush radius and remember it for this user.
    pub fn set_brush_size(&mut self, size: f32) -> Result<(), FogError> {
        self.settings.set_user("brush_size", json!(size))?;
        self.config.brush_size = size;
        Ok(())
    }

    /// Set the brush opacity percentage and remember it for this user.
    pub fn set_brush_opacity(&mut self, percent: f32) -> Result<(), FogError> {
        let percent = percent.clamp(0.0, 100.0);
        self.settings.set_user("brush_opacity", json!(percent))?;
        self.config.brush_opacity = percent;
        Ok(())
    }

    /// Tint the host should draw tool previews with.
    #[must_use]
    pub fn preview_tint(&self) -> u32 {
        self.config.preview_tint()
    }

    /// Feed a pointer event to the active tool.
    ///
    /// Returns the replay report when the event ended a gesture.
    pub fn handle_pointer(
        &mut self,
        phase: PointerPhase,
        event: PointerEvent,
    ) -> Result<Option<ReplayReport>, FogError> {
        let ctx = ToolContext {
            brush_size: self.config.brush_size,
            fill: self.config.brush_fill(),
            canvas: self.canvas,
            pending: self.store.has_pending(),
            grid: self.grid.as_deref(),
            sweep: self.sweep.as_deref(),
        };
        let output = match phase {
            PointerPhase::Down => self.tools.pointer_down(event, &ctx),
            PointerPhase::Move => self.tools.pointer_move(event, &ctx),
            PointerPhase::Up => self.tools.pointer_up(event, &ctx),
            PointerPhase::DoubleClick => self.tools.double_click(event, &ctx),
        };
        self.apply_tool_output(output)
    }

    fn apply_tool_output(&mut self, output: ToolOutput) -> Result<Option<ReplayReport>, FogError> {
        let ToolOutput { ops, commit, cancel } = output;
        for op in ops {
            self.append(op);
        }
        if cancel {
            return self.discard_pending().map(Some);
        }
        if commit {
            return self.commit();
        }
        Ok(None)
    }

    /// Abandon the gesture in progress and repaint without it.
    pub fn cancel_gesture(&mut self) -> Result<ReplayReport, FogError> {
        self.tools.clear();
        self.discard_pending()
    }

    fn discard_pending(&mut self) -> Result<ReplayReport, FogError> {
        let dropped = self.store.clear_pending();
        tracing::debug!(dropped, "discarded pending ops");
        self.engine.invalidate();
        let log = self.store.load()?;
        let report = self.engine.render_stack(&log);
        self.log = log;
        Ok(report)
    }

    // ========================================================================
    // Visibility and appearance
    // ========================================================================

    #[inline]
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// Flip the scene's `visible` setting.
    ///
    /// On a scene without history this also records `auto_fog`, so automatic
    /// enabling is not applied on top of the user's choice.
    pub fn toggle_visibility(&mut self) -> Result<bool, FogError> {
        let next = !self.settings.get_as::<bool>("visible").unwrap_or(false);
        self.visible = next;
        self.settings.set_scene("visible", json!(next))?;
        if !self.store.exists()? {
            self.settings.set_scene("auto_fog", json!(next))?;
        }
        Ok(next)
    }

    /// Advance appearance transitions and sample them.
    pub fn tick(&mut self, dt: Duration) -> AppearanceFrame {
        self.appearance.tick(dt)
    }

    #[inline]
    pub fn appearance(&self) -> &FogAppearance {
        &self.appearance
    }

    // ========================================================================
    // Info
    // ========================================================================

    #[inline]
    pub fn config(&self) -> &FogConfig {
        &self.config
    }

    #[inline]
    pub fn settings(&self) -> &SettingsResolver {
        &self.settings
    }

    #[inline]
    pub fn store(&self) -> &HistoryStore {
        &self.store
    }

    #[inline]
    pub fn engine(&self) -> &ReplayEngine<R> {
        &self.engine
    }

    /// The log as of the last commit, undo or sync.
    #[inline]
    pub fn log(&self) -> &HistoryLog {
        &self.log
    }

    #[inline]
    pub fn canvas(&self) -> Rect {
        self.canvas
    }

    /// Mask level at a canvas point.
    pub fn read_pixel(&self, x: f32, y: f32) -> Option<u8> {
        self.engine.read_pixel(x, y)
    }
}
