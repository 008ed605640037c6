#![forbid(unsafe_code)]

//! Time-driven values sampled by the host's render loop.
//!
//! Nothing here owns a clock. The host calls [`Animation::tick`] with the
//! frame delta and reads [`Animation::value`].

use std::time::Duration;

mod tween;

pub use tween::{AlphaTween, TweenState};

/// A value that evolves as time is fed to it.
pub trait Animation {
    /// Advance by `dt`.
    fn tick(&mut self, dt: Duration);

    /// Whether the animation has reached its end.
    fn is_complete(&self) -> bool;

    /// Current sampled value.
    fn value(&self) -> f32;

    /// Return to the initial state.
    fn reset(&mut self);

    /// Time past the end consumed by the last tick.
    fn overshoot(&self) -> Duration {
        Duration::ZERO
    }
}
