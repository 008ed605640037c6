#![forbid(unsafe_code)]

//! Layer settings: defaults as data plus scene/user overrides.
//!
//! [`FogConfig`] holds every tunable of a fog layer and can be loaded from
//! TOML or JSON at startup. At runtime a [`SettingsResolver`] answers a named
//! setting by looking, in order, at:
//!
//! 1. the scene flag of that name,
//! 2. the user flag of that name,
//! 3. the configured default.
//!
//! # Loading
//!
//! ```toml
//! # fogmask.toml
//! gm_color_alpha = 0.5
//! transition_speed_ms = 400
//! brush_size = 80
//! ```
//!
//! ```rust,ignore
//! let config = FogConfig::from_toml_file("fogmask.toml")?;
//! let config = FogConfig::from_json_str(json)?;
//! ```
//!
//! Missing fields keep their defaults.

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::FogError;
use crate::storage::{Scope, StorageBackend};

/// Tool preview tint when the brush reveals.
pub const PREVIEW_TINT_REVEAL: u32 = 0x00ff00;
/// Tool preview tint when the brush hides.
pub const PREVIEW_TINT_HIDE: u32 = 0xff0000;

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// Who is looking at the layer. Selects the GM or player appearance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Gm,
    #[default]
    Player,
}

impl Role {
    #[inline]
    pub fn is_gm(self) -> bool {
        self == Self::Gm
    }

    /// Name of the colour alpha setting for this role.
    pub const fn color_alpha_key(self) -> &'static str {
        match self {
            Self::Gm => "gm_color_alpha",
            Self::Player => "player_color_alpha",
        }
    }

    /// Name of the colour tint setting for this role.
    pub const fn color_tint_key(self) -> &'static str {
        match self {
            Self::Gm => "gm_color_tint",
            Self::Player => "player_color_tint",
        }
    }

    /// Name of the image overlay alpha setting for this role.
    pub const fn overlay_alpha_key(self) -> &'static str {
        match self {
            Self::Gm => "fog_image_overlay_gm_alpha",
            Self::Player => "fog_image_overlay_player_alpha",
        }
    }
}

// ---------------------------------------------------------------------------
// FogConfig
// ---------------------------------------------------------------------------

/// Every tunable of a fog layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FogConfig {
    /// Whether the layer is shown.
    pub visible: bool,

    pub blur_enable: bool,
    /// Blur filter passes.
    pub blur_quality: u32,
    /// Blur strength in canvas units.
    pub blur_radius: f32,

    /// Colour layer opacity seen by the GM.
    pub gm_color_alpha: f32,
    #[serde(with = "tint")]
    pub gm_color_tint: u32,
    /// Colour layer opacity seen by players.
    pub player_color_alpha: f32,
    #[serde(with = "tint")]
    pub player_color_tint: u32,

    /// Image drawn over the fog; empty for none.
    pub fog_image_overlay_file_path: String,
    pub fog_image_overlay_gm_alpha: f32,
    pub fog_image_overlay_player_alpha: f32,
    pub fog_image_overlay_z_index: i32,

    pub layer_z_index: i32,

    /// Animate opacity changes.
    pub transition: bool,
    pub transition_speed_ms: u64,

    /// Brush opacity percentage below which the brush counts as revealing.
    pub v_threshold: f32,
    pub auto_visibility: bool,
    /// Show the layer automatically on scenes without history.
    pub auto_enable_scene_fog: bool,

    /// Brush radius in canvas units.
    pub brush_size: f32,
    /// Brush opacity percentage (0 hides fully, 100 reveals fully).
    pub brush_opacity: f32,
}

impl Default for FogConfig {
    fn default() -> Self {
        Self {
            visible: false,
            blur_enable: true,
            blur_quality: 2,
            blur_radius: 5.0,
            gm_color_alpha: 0.6,
            gm_color_tint: 0x000000,
            player_color_alpha: 1.0,
            player_color_tint: 0x000000,
            fog_image_overlay_file_path: String::new(),
            fog_image_overlay_gm_alpha: 0.6,
            fog_image_overlay_player_alpha: 1.0,
            fog_image_overlay_z_index: 6000,
            layer_z_index: 220,
            transition: true,
            transition_speed_ms: 800,
            v_threshold: 1.0,
            auto_visibility: false,
            auto_enable_scene_fog: true,
            brush_size: 50.0,
            brush_opacity: 0.0,
        }
    }
}

impl FogConfig {
    /// Load from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(ConfigError::Toml)
    }

    /// Load from a TOML file on disk.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_toml_str(&content)
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(ConfigError::Json)
    }

    /// Load from a JSON file on disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ConfigError::Io)?;
        Self::from_json_str(&content)
    }

    /// Check every value is in range.
    ///
    /// Returns a list of problems; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (name, alpha) in [
            ("gm_color_alpha", self.gm_color_alpha),
            ("player_color_alpha", self.player_color_alpha),
            ("fog_image_overlay_gm_alpha", self.fog_image_overlay_gm_alpha),
            (
                "fog_image_overlay_player_alpha",
                self.fog_image_overlay_player_alpha,
            ),
        ] {
            if !(0.0..=1.0).contains(&alpha) {
                errors.push(format!("{name} must be in [0, 1], got {alpha}"));
            }
        }

        for (name, tint) in [
            ("gm_color_tint", self.gm_color_tint),
            ("player_color_tint", self.player_color_tint),
        ] {
            if tint > 0xff_ffff {
                errors.push(format!("{name} must be a 24-bit colour, got {tint:#x}"));
            }
        }

        for (name, pct) in [
            ("v_threshold", self.v_threshold),
            ("brush_opacity", self.brush_opacity),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                errors.push(format!("{name} must be in [0, 100], got {pct}"));
            }
        }

        if self.blur_quality == 0 {
            errors.push("blur_quality must be > 0".into());
        }
        if !(self.blur_radius >= 0.0) {
            errors.push(format!("blur_radius must be >= 0, got {}", self.blur_radius));
        }
        if !(self.brush_size > 0.0) {
            errors.push(format!("brush_size must be > 0, got {}", self.brush_size));
        }

        errors
    }

    #[must_use]
    pub fn color_alpha(&self, role: Role) -> f32 {
        match role {
            Role::Gm => self.gm_color_alpha,
            Role::Player => self.player_color_alpha,
        }
    }

    #[must_use]
    pub fn color_tint(&self, role: Role) -> u32 {
        match role {
            Role::Gm => self.gm_color_tint,
            Role::Player => self.player_color_tint,
        }
    }

    #[must_use]
    pub fn overlay_alpha(&self, role: Role) -> f32 {
        match role {
            Role::Gm => self.fog_image_overlay_gm_alpha,
            Role::Player => self.fog_image_overlay_player_alpha,
        }
    }

    /// Mask level painted by the brush.
    #[must_use]
    pub fn brush_fill(&self) -> u8 {
        fogmask_core::percent_to_fill(self.brush_opacity)
    }

    /// Tint of the tool preview for the current brush opacity.
    #[must_use]
    pub fn preview_tint(&self) -> u32 {
        preview_tint(self.brush_opacity, self.v_threshold)
    }

    fn default_map() -> Map<String, Value> {
        match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }
}

/// Green when the brush opacity is below the threshold, red otherwise.
#[must_use]
pub fn preview_tint(brush_opacity: f32, v_threshold: f32) -> u32 {
    if brush_opacity < v_threshold {
        PREVIEW_TINT_REVEAL
    } else {
        PREVIEW_TINT_HIDE
    }
}

/// Errors from loading a [`FogConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file")]
    Io(#[source] std::io::Error),
    #[error("invalid TOML config")]
    Toml(#[source] toml::de::Error),
    #[error("invalid JSON config")]
    Json(#[source] serde_json::Error),
}

/// Tints are written as `"0xRRGGBB"`; integers are accepted too.
mod tint {
    use serde::{Deserialize, Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &u32, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("{value:#08x}"))
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u32),
        Str(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<u32, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Int(v) => Ok(v),
            Raw::Str(s) => {
                let digits = s
                    .trim()
                    .trim_start_matches("0x")
                    .trim_start_matches("0X")
                    .trim_start_matches('#');
                u32::from_str_radix(digits, 16)
                    .map_err(|_| de::Error::custom(format!("invalid tint `{s}`")))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// SettingsResolver
// ---------------------------------------------------------------------------

/// Scene → user → default lookup of named settings.
pub struct SettingsResolver {
    storage: Arc<dyn StorageBackend>,
    scene: Scope,
    user: Scope,
    defaults: FogConfig,
    default_map: Map<String, Value>,
}

impl std::fmt::Debug for SettingsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettingsResolver")
            .field("scene", &self.scene)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

impl SettingsResolver {
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        scene: Scope,
        user: Scope,
        defaults: FogConfig,
    ) -> Self {
        let default_map = match serde_json::to_value(&defaults) {
            Ok(Value::Object(map)) => map,
            _ => FogConfig::default_map(),
        };
        Self {
            storage,
            scene,
            user,
            defaults,
            default_map,
        }
    }

    #[inline]
    pub fn defaults(&self) -> &FogConfig {
        &self.defaults
    }

    fn flag(&self, scope: &Scope, name: &str) -> Option<Value> {
        match self.storage.get(scope, name) {
            Ok(value) => value.filter(|v| !v.is_null()),
            Err(err) => {
                tracing::warn!(scope = %scope, setting = name, error = %err, "setting read failed");
                None
            }
        }
    }

    /// Resolve a setting by name. `None` if no layer defines it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.flag(&self.scene, name)
            .or_else(|| self.flag(&self.user, name))
            .or_else(|| self.default_map.get(name).cloned())
    }

    /// Resolve and decode a setting.
    ///
    /// A stored value of the wrong type falls back to the default.
    #[must_use]
    pub fn get_as<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        let value = self.get(name)?;
        match serde_json::from_value(value) {
            Ok(v) => Some(v),
            Err(err) => {
                tracing::warn!(setting = name, error = %err, "ignoring mistyped setting");
                self.default_map
                    .get(name)
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
            }
        }
    }

    /// Store a scene-wide setting.
    pub fn set_scene(&self, name: &str, value: Value) -> Result<(), FogError> {
        self.write(&self.scene, name, value)
    }

    /// Store a per-user setting.
    pub fn set_user(&self, name: &str, value: Value) -> Result<(), FogError> {
        self.write(&self.user, name, value)
    }

    fn write(&self, scope: &Scope, name: &str, value: Value) -> Result<(), FogError> {
        self.storage
            .set(scope, name, value)
            .map_err(|source| FogError::StorageWrite {
                key: name.to_owned(),
                source,
            })
    }

    /// The full config with every override applied.
    ///
    /// Overrides that would not decode are skipped with a warning.
    #[must_use]
    pub fn resolved(&self) -> FogConfig {
        let mut merged = self.default_map.clone();
        for name in self.default_map.keys() {
            let Some(value) = self
                .flag(&self.scene, name)
                .or_else(|| self.flag(&self.user, name))
            else {
                continue;
            };
            let mut trial = merged.clone();
            trial.insert(name.clone(), value);
            if serde_json::from_value::<FogConfig>(Value::Object(trial.clone())).is_ok() {
                merged = trial;
            } else {
                tracing::warn!(setting = %name, "ignoring mistyped setting");
            }
        }
        serde_json::from_value(Value::Object(merged)).unwrap_or_else(|err| {
            tracing::warn!(error = %err, "settings did not resolve, using defaults");
            self.defaults.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    fn resolver() -> (Arc<MemoryStorage>, SettingsResolver) {
        let storage = Arc::new(MemoryStorage::new());
        let r = SettingsResolver::new(
            storage.clone(),
            Scope::Scene("s".into()),
            Scope::User("u".into()),
            FogConfig::default(),
        );
        (storage, r)
    }

    #[test]
    fn default_validates_clean() {
        assert!(FogConfig::default().validate().is_empty());
    }

    #[test]
    fn validate_collects_every_problem() {
        let config = FogConfig {
            gm_color_alpha: 1.5,
            brush_opacity: -1.0,
            blur_quality: 0,
            brush_size: 0.0,
            ..FogConfig::default()
        };
        assert_eq!(config.validate().len(), 4);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = FogConfig::from_toml_str(
            "gm_color_alpha = 0.25\ngm_color_tint = \"0x112233\"\ntransition = false\n",
        )
        .unwrap();
        assert_eq!(config.gm_color_alpha, 0.25);
        assert_eq!(config.gm_color_tint, 0x112233);
        assert!(!config.transition);
        assert_eq!(config.brush_size, 50.0);
        assert_eq!(config.layer_z_index, 220);
    }

    #[test]
    fn json_accepts_integer_tint() {
        let config = FogConfig::from_json_str(r#"{"player_color_tint": 255}"#).unwrap();
        assert_eq!(config.player_color_tint, 0xff);
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(matches!(
            FogConfig::from_toml_str("brush_size = \"big\""),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn tint_serializes_as_hex_string() {
        let value = serde_json::to_value(FogConfig::default()).unwrap();
        assert_eq!(value["gm_color_tint"], json!("0x000000"));
    }

    #[test]
    fn config_file_loading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fogmask.toml");
        std::fs::write(&path, "brush_size = 80\n").unwrap();
        assert_eq!(FogConfig::from_toml_file(&path).unwrap().brush_size, 80.0);
        assert!(matches!(
            FogConfig::from_json_file(dir.path().join("missing.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn role_variants() {
        let config = FogConfig::default();
        assert_eq!(config.color_alpha(Role::Gm), 0.6);
        assert_eq!(config.color_alpha(Role::Player), 1.0);
        assert_eq!(config.overlay_alpha(Role::Gm), 0.6);
    }

    #[test]
    fn preview_tint_follows_threshold() {
        assert_eq!(preview_tint(0.0, 1.0), PREVIEW_TINT_REVEAL);
        assert_eq!(preview_tint(50.0, 1.0), PREVIEW_TINT_HIDE);
        assert_eq!(preview_tint(1.0, 1.0), PREVIEW_TINT_HIDE);
    }

    #[test]
    fn scene_overrides_user_overrides_default() {
        let (storage, r) = resolver();
        assert_eq!(r.get_as::<f32>("brush_size"), Some(50.0));
        storage
            .set(&Scope::User("u".into()), "brush_size", json!(70))
            .unwrap();
        assert_eq!(r.get_as::<f32>("brush_size"), Some(70.0));
        r.set_scene("brush_size", json!(90)).unwrap();
        assert_eq!(r.get_as::<f32>("brush_size"), Some(90.0));
        assert_eq!(r.resolved().brush_size, 90.0);
    }

    #[test]
    fn unknown_setting_is_none() {
        let (_, r) = resolver();
        assert!(r.get("auto_fog").is_none());
        r.set_scene("auto_fog", json!(true)).unwrap();
        assert_eq!(r.get_as::<bool>("auto_fog"), Some(true));
    }

    #[test]
    fn mistyped_override_falls_back() {
        let (_, r) = resolver();
        r.set_scene("visible", json!("yes")).unwrap();
        r.set_user("gm_color_alpha", json!(0.3)).unwrap();
        assert_eq!(r.get_as::<bool>("visible"), Some(false));
        let config = r.resolved();
        assert!(!config.visible);
        assert_eq!(config.gm_color_alpha, 0.3);
    }
}
