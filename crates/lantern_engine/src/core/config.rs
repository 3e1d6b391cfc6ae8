//! # Application Configuration
//!
//! Configuration for the window, the Vulkan renderer and the demo scene. Every
//! struct is serde-serializable so the whole tree can live in one `.toml` or
//! `.ron` file; see [`crate::config::Config`].

use serde::{Deserialize, Serialize};
use std::path::Path;

pub use crate::config::{Config, ConfigError};

/// Directories searched, in order, when resolving compiled shader files
pub const SHADER_SEARCH_DIRS: [&str; 5] = [
    "target/shaders/",
    "shaders/",
    "resources/shaders/",
    "../target/shaders/",
    "./",
];

/// # Window Configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Window title
    pub title: String,
    /// Initial width in screen coordinates
    pub width: u32,
    /// Initial height in screen coordinates
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Lantern".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// # Shader Configuration
///
/// Paths of one vertex/fragment SPIR-V pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderConfig {
    /// Path to the vertex shader SPIR-V file
    pub vertex_shader_path: String,
    /// Path to the fragment shader SPIR-V file
    pub fragment_shader_path: String,
}

impl ShaderConfig {
    /// Create a new shader configuration
    pub fn new(vertex_path: impl Into<String>, fragment_path: impl Into<String>) -> Self {
        Self {
            vertex_shader_path: vertex_path.into(),
            fragment_shader_path: fragment_path.into(),
        }
    }

    /// Create shader config with automatic path resolution
    ///
    /// Tries each of [`SHADER_SEARCH_DIRS`] so the binary can be started from
    /// the workspace root or from its own crate directory.
    pub fn with_path_resolution(base_vertex: &str, base_fragment: &str) -> Self {
        let resolve = |file: &str| {
            SHADER_SEARCH_DIRS
                .iter()
                .map(|dir| format!("{dir}{file}"))
                .find(|candidate| Path::new(candidate).exists())
                .unwrap_or_else(|| format!("{}{file}", SHADER_SEARCH_DIRS[0]))
        };

        Self {
            vertex_shader_path: resolve(base_vertex),
            fragment_shader_path: resolve(base_fragment),
        }
    }

    /// Validate that shader files exist
    pub fn validate(&self) -> Result<(), ConfigError> {
        for path in [&self.vertex_shader_path, &self.fragment_shader_path] {
            if !Path::new(path).exists() {
                return Err(ConfigError::Invalid(format!("Shader not found: {path}")));
            }
        }
        Ok(())
    }
}

/// # Renderer Configuration
///
/// Application metadata, validation and the shader pairs of the two render
/// systems. The number of frames in flight is fixed at
/// [`crate::render::vulkan::MAX_FRAMES_IN_FLIGHT`] and is not configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Application version (major, minor, patch)
    pub application_version: (u32, u32, u32),
    /// Shaders of the geometry pass
    pub geometry_shaders: ShaderConfig,
    /// Shaders of the point-light pass
    pub point_light_shaders: ShaderConfig,
    /// Whether to enable Vulkan validation layers; `None` follows the build type
    pub enable_validation: Option<bool>,
}

impl RendererConfig {
    /// Create a new renderer configuration
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            application_name: app_name.into(),
            application_version: (1, 0, 0),
            geometry_shaders: ShaderConfig::with_path_resolution(
                "simple_shader.vert.spv",
                "simple_shader.frag.spv",
            ),
            point_light_shaders: ShaderConfig::with_path_resolution(
                "point_light.vert.spv",
                "point_light.frag.spv",
            ),
            enable_validation: None,
        }
    }

    /// Set application version
    #[must_use]
    pub const fn with_version(mut self, major: u32, minor: u32, patch: u32) -> Self {
        self.application_version = (major, minor, patch);
        self
    }

    /// Set the geometry pass shaders
    #[must_use]
    pub fn with_geometry_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.geometry_shaders = shaders;
        self
    }

    /// Set the point-light pass shaders
    #[must_use]
    pub fn with_point_light_shaders(mut self, shaders: ShaderConfig) -> Self {
        self.point_light_shaders = shaders;
        self
    }

    /// Enable or disable validation layers
    #[must_use]
    pub const fn with_validation(mut self, enabled: bool) -> Self {
        self.enable_validation = Some(enabled);
        self
    }

    /// Whether validation layers should be requested
    pub fn validation_enabled(&self) -> bool {
        self.enable_validation.unwrap_or(cfg!(debug_assertions))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("Application name cannot be empty".to_string()));
        }
        self.geometry_shaders.validate()?;
        self.point_light_shaders.validate()
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self::new("Lantern Application")
    }
}

/// # Scene Configuration
///
/// Inputs of the demo scene built by the application driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneConfig {
    /// OBJ files placed side by side in front of the camera
    pub model_paths: Vec<String>,
    /// Initial camera position
    pub camera_start: [f32; 3],
    /// Number of point lights arranged in a ring
    pub light_count: usize,
    /// Orbit speed of the point lights in radians per second
    pub light_orbit_speed: f32,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            model_paths: vec![
                "resources/models/smooth_vase.obj".to_string(),
                "resources/models/flat_vase.obj".to_string(),
            ],
            camera_start: [0.0, -0.5, -2.5],
            light_count: 6,
            light_orbit_speed: 0.5,
        }
    }
}

impl SceneConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let max = crate::render::frame::MAX_LIGHTS;
        if self.light_count > max {
            return Err(ConfigError::Invalid(format!(
                "light_count {} exceeds the uniform block capacity of {max}",
                self.light_count
            )));
        }
        if !self.light_orbit_speed.is_finite() {
            return Err(ConfigError::Invalid("light_orbit_speed must be finite".to_string()));
        }
        Ok(())
    }
}

/// # Complete Application Configuration
///
/// Top-level configuration read by the application driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Window settings
    pub window: WindowConfig,
    /// Rendering system configuration
    pub renderer: RendererConfig,
    /// Demo scene
    pub scene: SceneConfig,
}

impl ApplicationConfig {
    /// Create a new application configuration with defaults
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            window: WindowConfig::default(),
            renderer: RendererConfig::new(app_name),
            scene: SceneConfig::default(),
        }
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::Invalid("Window size must be non-zero".to_string()));
        }
        self.renderer.validate()?;
        self.scene.validate()
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self::new("Lantern Application")
    }
}

impl Config for ApplicationConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigFormat;

    #[test]
    fn test_default_window_config() {
        let window = WindowConfig::default();
        assert_eq!((window.width, window.height), (800, 600));
    }

    #[test]
    fn test_unresolved_shader_falls_back_to_first_search_dir() {
        let shaders = ShaderConfig::with_path_resolution("missing_a.spv", "missing_b.spv");
        assert_eq!(shaders.vertex_shader_path, "target/shaders/missing_a.spv");
        assert_eq!(shaders.fragment_shader_path, "target/shaders/missing_b.spv");
        assert!(matches!(shaders.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_renderer_builder_methods() {
        let config = RendererConfig::new("test")
            .with_version(2, 1, 0)
            .with_validation(false)
            .with_point_light_shaders(ShaderConfig::new("a.spv", "b.spv"));

        assert_eq!(config.application_version, (2, 1, 0));
        assert!(!config.validation_enabled());
        assert_eq!(config.point_light_shaders.vertex_shader_path, "a.spv");
    }

    #[test]
    fn test_empty_application_name_is_rejected() {
        let config = RendererConfig::new("");
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_scene_light_count_is_capped() {
        let mut scene = SceneConfig::default();
        assert!(scene.validate().is_ok());

        scene.light_count = crate::render::frame::MAX_LIGHTS + 1;
        assert!(matches!(scene.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_application_config_toml_roundtrip() {
        let mut config = ApplicationConfig::new("roundtrip");
        config.scene.light_count = 3;

        let text = config.to_string_as(ConfigFormat::Toml).unwrap();
        let parsed = ApplicationConfig::from_str_as(&text, ConfigFormat::Toml).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let mut config = ApplicationConfig::default();
        config.window.width = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
