#![forbid(unsafe_code)]

//! How the fog looks: opacity, tint and blur.
//!
//! Opacity changes go through [`AlphaTween`]s when transitions are enabled.
//! The host samples the result once per frame with [`FogAppearance::tick`]
//! and applies the [`AppearanceFrame`] to its own sprites and filters.

use std::time::Duration;

use fogmask_core::{AlphaTween, Animation};

use crate::settings::{FogConfig, Role};

/// Blur filter parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurSettings {
    pub radius: f32,
    pub quality: u32,
}

/// One sampled frame of appearance state.
#[derive(Debug, Clone, PartialEq)]
pub struct AppearanceFrame {
    pub color_alpha: f32,
    pub overlay_alpha: f32,
    pub tint: u32,
    /// `None` when blur is disabled.
    pub blur: Option<BlurSettings>,
    /// Empty when there is no overlay image.
    pub overlay_path: String,
    pub overlay_z_index: i32,
    /// A transition is still in flight.
    pub animating: bool,
}

/// Fog appearance for one viewer role.
#[derive(Debug, Clone)]
pub struct FogAppearance {
    role: Role,
    color: AlphaTween,
    overlay: AlphaTween,
    tint: u32,
    blur: Option<BlurSettings>,
    overlay_path: String,
    overlay_z_index: i32,
    transition: Option<Duration>,
}

impl FogAppearance {
    /// Appearance at rest at the config's values.
    #[must_use]
    pub fn new(config: &FogConfig, role: Role) -> Self {
        let mut appearance = Self {
            role,
            color: AlphaTween::new(config.color_alpha(role)),
            overlay: AlphaTween::new(config.overlay_alpha(role)),
            tint: 0,
            blur: None,
            overlay_path: String::new(),
            overlay_z_index: 0,
            transition: None,
        };
        appearance.apply_static(config);
        appearance
    }

    fn apply_static(&mut self, config: &FogConfig) {
        self.tint = config.color_tint(self.role);
        self.blur = config.blur_enable.then_some(BlurSettings {
            radius: config.blur_radius,
            quality: config.blur_quality,
        });
        self.overlay_path = config.fog_image_overlay_file_path.clone();
        self.overlay_z_index = config.fog_image_overlay_z_index;
        self.transition = config
            .transition
            .then(|| Duration::from_millis(config.transition_speed_ms));
    }

    /// Take on a changed config, animating the opacities.
    pub fn apply_config(&mut self, config: &FogConfig) {
        self.apply_static(config);
        self.set_color_alpha(config.color_alpha(self.role), false);
        self.set_overlay_alpha(config.overlay_alpha(self.role), false);
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Move the colour opacity to `alpha`; `skip` bypasses the transition.
    pub fn set_color_alpha(&mut self, alpha: f32, skip: bool) {
        Self::retarget(&mut self.color, alpha, self.transition.filter(|_| !skip));
    }

    /// Move the overlay opacity to `alpha`; `skip` bypasses the transition.
    pub fn set_overlay_alpha(&mut self, alpha: f32, skip: bool) {
        Self::retarget(&mut self.overlay, alpha, self.transition.filter(|_| !skip));
    }

    fn retarget(tween: &mut AlphaTween, alpha: f32, transition: Option<Duration>) {
        if tween.target() == alpha && (tween.is_running() || tween.value() == alpha) {
            return;
        }
        match transition {
            Some(duration) => tween.start(alpha, duration),
            None => tween.jump_to(alpha),
        }
    }

    /// Freeze both opacities where they are.
    pub fn cancel_transitions(&mut self) {
        self.color.cancel();
        self.overlay.cancel();
    }

    #[inline]
    pub fn is_animating(&self) -> bool {
        self.color.is_running() || self.overlay.is_running()
    }

    /// Advance transitions by `dt` and sample.
    pub fn tick(&mut self, dt: Duration) -> AppearanceFrame {
        self.color.tick(dt);
        self.overlay.tick(dt);
        self.frame()
    }

    /// Sample without advancing.
    #[must_use]
    pub fn frame(&self) -> AppearanceFrame {
        AppearanceFrame {
            color_alpha: self.color.value(),
            overlay_alpha: self.overlay.value(),
            tint: self.tint,
            blur: self.blur,
            overlay_path: self.overlay_path.clone(),
            overlay_z_index: self.overlay_z_index,
            animating: self.is_animating(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn starts_at_role_values() {
        let config = FogConfig::default();
        let gm = FogAppearance::new(&config, Role::Gm).frame();
        assert_eq!(gm.color_alpha, 0.6);
        assert_eq!(gm.blur, Some(BlurSettings { radius: 5.0, quality: 2 }));
        assert!(!gm.animating);
        let player = FogAppearance::new(&config, Role::Player).frame();
        assert_eq!(player.color_alpha, 1.0);
    }

    #[test]
    fn config_change_animates_over_transition_speed() {
        let config = FogConfig::default();
        let mut a = FogAppearance::new(&config, Role::Gm);
        a.apply_config(&FogConfig {
            gm_color_alpha: 0.2,
            ..config.clone()
        });
        let mid = a.tick(MS * 400);
        assert!(mid.animating);
        assert!((mid.color_alpha - 0.4).abs() < 1e-4);
        let end = a.tick(MS * 400);
        assert!(!end.animating);
        assert_eq!(end.color_alpha, 0.2);
    }

    #[test]
    fn disabled_transition_jumps() {
        let config = FogConfig {
            transition: false,
            ..FogConfig::default()
        };
        let mut a = FogAppearance::new(&config, Role::Player);
        a.set_color_alpha(0.3, false);
        assert_eq!(a.frame().color_alpha, 0.3);
        assert!(!a.is_animating());
    }

    #[test]
    fn skip_bypasses_transition() {
        let mut a = FogAppearance::new(&FogConfig::default(), Role::Player);
        a.set_overlay_alpha(0.1, true);
        assert_eq!(a.frame().overlay_alpha, 0.1);
    }

    #[test]
    fn cancel_freezes_mid_transition() {
        let mut a = FogAppearance::new(&FogConfig::default(), Role::Player);
        a.set_color_alpha(0.0, false);
        a.tick(MS * 200);
        a.cancel_transitions();
        let frozen = a.frame().color_alpha;
        assert_eq!(a.tick(MS * 600).color_alpha, frozen);
        assert!(frozen > 0.0 && frozen < 1.0);
    }

    #[test]
    fn blur_disabled_is_none() {
        let config = FogConfig {
            blur_enable: false,
            ..FogConfig::default()
        };
        assert_eq!(FogAppearance::new(&config, Role::Gm).frame().blur, None);
    }
}
