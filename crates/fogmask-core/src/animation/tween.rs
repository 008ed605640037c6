#![forbid(unsafe_code)]

//! Linear opacity tween.
//!
//! An [`AlphaTween`] moves a value from wherever it currently is towards a
//! target over a fixed duration. Starting a new tween mid-flight picks up
//! from the current sampled value, so there is never a jump.
//!
//! # Invariants
//!
//! 1. `value()` is always within `[min(from, to), max(from, to)]`.
//! 2. `tick()` only advances a `Running` tween.
//! 3. `cancel()` freezes the value where it is.
//! 4. A zero duration completes immediately at the target.

use std::time::Duration;

use super::Animation;

/// Playback state of an [`AlphaTween`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TweenState {
    /// Resting at a value; no transition requested.
    Idle,
    Running,
    /// Reached the target.
    Finished,
    /// Stopped part-way by [`AlphaTween::cancel`].
    Cancelled,
}

/// Time-driven alpha transition.
#[derive(Debug, Clone, PartialEq)]
pub struct AlphaTween {
    from: f32,
    to: f32,
    duration: Duration,
    elapsed: Duration,
    state: TweenState,
    current: f32,
}

impl AlphaTween {
    /// A tween resting at `value`.
    #[must_use]
    pub fn new(value: f32) -> Self {
        Self {
            from: value,
            to: value,
            duration: Duration::ZERO,
            elapsed: Duration::ZERO,
            state: TweenState::Idle,
            current: value,
        }
    }

    /// Begin a transition from the current value to `to` over `duration`.
    pub fn start(&mut self, to: f32, duration: Duration) {
        self.from = self.current;
        self.to = to;
        self.duration = duration;
        self.elapsed = Duration::ZERO;
        if duration.is_zero() {
            self.current = to;
            self.state = TweenState::Finished;
        } else {
            self.state = TweenState::Running;
        }
    }

    /// Set the value immediately, dropping any running transition.
    pub fn jump_to(&mut self, value: f32) {
        *self = Self::new(value);
    }

    /// Stop where the tween currently is.
    pub fn cancel(&mut self) {
        if self.state == TweenState::Running {
            self.state = TweenState::Cancelled;
        }
    }

    #[inline]
    pub fn state(&self) -> TweenState {
        self.state
    }

    #[inline]
    pub fn target(&self) -> f32 {
        self.to
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == TweenState::Running
    }

    fn progress(&self) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.elapsed.as_secs_f32() / self.duration.as_secs_f32()).clamp(0.0, 1.0)
    }
}

impl Default for AlphaTween {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl Animation for AlphaTween {
    fn tick(&mut self, dt: Duration) {
        if self.state != TweenState::Running {
            return;
        }
        self.elapsed = self.elapsed.saturating_add(dt);
        let t = self.progress();
        self.current = self.from + (self.to - self.from) * t;
        if self.elapsed >= self.duration {
            self.current = self.to;
            self.state = TweenState::Finished;
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.state, TweenState::Finished | TweenState::Cancelled)
    }

    fn value(&self) -> f32 {
        self.current
    }

    fn reset(&mut self) {
        self.elapsed = Duration::ZERO;
        self.current = self.from;
        self.state = TweenState::Idle;
    }

    fn overshoot(&self) -> Duration {
        if self.state == TweenState::Finished {
            self.elapsed.saturating_sub(self.duration)
        } else {
            Duration::ZERO
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
