//! Configuration system
//!
//! Scene parameters load from `.toml` or `.ron` files through the [`Config`]
//! trait; every field has a default so partial files are accepted.

pub use serde::{Deserialize, Serialize};

use crate::foundation::math::Vec3;
use crate::scene::{Camera, Projection, SceneError, SceneResult};
use crate::spatial::SpatialTileIndex;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: &str) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str_with_format(&contents, path)
    }

    /// Parse configuration text; the format is picked from `path`'s extension
    fn from_str_with_format(contents: &str, path: &str) -> Result<Self, ConfigError> {
        if path.ends_with(".toml") {
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Serialize to text in the format picked from `path`'s extension
    fn to_string_with_format(&self, path: &str) -> Result<String, ConfigError> {
        if path.ends_with(".toml") {
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))
        } else if path.ends_with(".ron") {
            ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))
        } else {
            Err(ConfigError::UnsupportedFormat(path.to_string()))
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: &str) -> Result<(), ConfigError> {
        let contents = self.to_string_with_format(path)?;
        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Initial camera placement and projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// World position
    pub position: Vec3,
    /// Euler rotation in degrees
    pub rotation: Vec3,
    /// Projection parameters
    pub projection: Projection,
    /// Half extent of the box used for camera collision checks
    pub collision_radius: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            rotation: Vec3::zeros(),
            projection: Projection::default(),
            collision_radius: 0.5,
        }
    }
}

impl CameraConfig {
    /// Build the camera
    pub fn build(&self) -> Camera {
        Camera::new(self.position, self.rotation, self.projection)
    }
}

/// Scene parameters
///
/// # Example
///
/// ```
/// use tiled_scene::config::SceneConfig;
/// use tiled_scene::foundation::math::Vec3;
///
/// let config = SceneConfig::default()
///     .with_world(Vec3::zeros(), Vec3::repeat(200.0))
///     .with_tile_size(Vec3::repeat(50.0))
///     .with_worker_threads(2);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.tile_grid().unwrap().tile_count(), 64);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SceneConfig {
    /// Minimum corner of the world volume
    pub origin: Vec3,
    /// Extent of the world volume
    pub size: Vec3,
    /// Extent of one tile
    pub tile_size: Vec3,
    /// Depth of each tile's subtile tree, 1 for no subtiles
    pub tile_levels: u32,
    /// Secondaries kept for nodes that left the visible set
    pub cache_size: usize,
    /// Grid steps around the visible set to record ahead, 0 disables
    pub cache_depth: u32,
    /// Recording threads, 0 records on the calling thread
    pub worker_threads: usize,
    /// Upper bound on dynamic objects across all categories
    pub max_dynamic_objects: u32,
    /// Initial camera
    pub camera: CameraConfig,
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            origin: Vec3::zeros(),
            size: Vec3::repeat(100.0),
            tile_size: Vec3::repeat(25.0),
            tile_levels: 2,
            cache_size: 64,
            cache_depth: 0,
            worker_threads: 0,
            max_dynamic_objects: 256,
            camera: CameraConfig::default(),
        }
    }
}

impl Config for SceneConfig {}

impl SceneConfig {
    /// Builder-style world volume
    pub fn with_world(mut self, origin: Vec3, size: Vec3) -> Self {
        self.origin = origin;
        self.size = size;
        self
    }

    /// Builder-style tile size
    pub fn with_tile_size(mut self, tile_size: Vec3) -> Self {
        self.tile_size = tile_size;
        self
    }

    /// Builder-style subtile depth
    pub fn with_tile_levels(mut self, levels: u32) -> Self {
        self.tile_levels = levels;
        self
    }

    /// Builder-style tile cache
    pub fn with_cache(mut self, size: usize, depth: u32) -> Self {
        self.cache_size = size;
        self.cache_depth = depth;
        self
    }

    /// Builder-style recording threads
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Builder-style dynamic object limit
    pub fn with_max_dynamic_objects(mut self, max: u32) -> Self {
        self.max_dynamic_objects = max;
        self
    }

    /// Builder-style camera
    pub fn with_camera(mut self, camera: CameraConfig) -> Self {
        self.camera = camera;
        self
    }

    /// Check the parameters
    pub fn validate(&self) -> SceneResult<()> {
        if self.size.iter().any(|&s| !(s > 0.0)) {
            return Err(SceneError::InvalidConfig(format!("world size must be positive, got {:?}", self.size)));
        }
        if self.tile_size.iter().any(|&s| !(s > 0.0)) {
            return Err(SceneError::InvalidConfig(format!(
                "tile size must be positive, got {:?}",
                self.tile_size
            )));
        }
        if self.tile_levels == 0 {
            return Err(SceneError::InvalidConfig("tile_levels must be at least 1".to_string()));
        }
        if self.tile_levels > 8 {
            return Err(SceneError::InvalidConfig(format!(
                "tile_levels of {} is too deep (at most 8)",
                self.tile_levels
            )));
        }
        if self.cache_depth > 0 && self.cache_size == 0 {
            return Err(SceneError::InvalidConfig("cache_depth requires a non-zero cache_size".to_string()));
        }
        let projection = &self.camera.projection;
        if !(projection.near > 0.0) || projection.far <= projection.near {
            return Err(SceneError::InvalidConfig(format!(
                "camera depth range [{}, {}] is invalid",
                projection.near, projection.far
            )));
        }
        Ok(())
    }

    /// Tile grid over the world volume
    pub fn tile_grid(&self) -> SceneResult<SpatialTileIndex> {
        SpatialTileIndex::new(self.origin, self.size, self.tile_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_default_is_valid() {
        assert!(SceneConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(SceneConfig::default().with_tile_levels(0).validate().is_err());
        assert!(SceneConfig::default().with_tile_size(Vec3::new(10.0, 0.0, 10.0)).validate().is_err());
        assert!(SceneConfig::default().with_world(Vec3::zeros(), Vec3::new(-1.0, 1.0, 1.0)).validate().is_err());
        assert!(SceneConfig::default().with_cache(0, 2).validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let text = r#"
            size = [400.0, 50.0, 400.0]
            tile_size = [20.0, 50.0, 20.0]
            worker_threads = 4

            [camera]
            position = [10.0, 5.0, 10.0]
        "#;
        let config = SceneConfig::from_str_with_format(text, "scene.toml").unwrap();
        assert_eq!(config.worker_threads, 4);
        assert_eq!(config.tile_levels, SceneConfig::default().tile_levels);
        assert_relative_eq!(config.camera.position.y, 5.0);
        assert_eq!(config.tile_grid().unwrap().dims(), [20, 1, 20]);
    }

    #[test]
    fn test_ron_round_trip() {
        let config = SceneConfig::default().with_cache(16, 1).with_max_dynamic_objects(12);
        let text = config.to_string_with_format("scene.ron").unwrap();
        let parsed = SceneConfig::from_str_with_format(&text, "scene.ron").unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_unknown_extension_rejected() {
        let result = SceneConfig::from_str_with_format("", "scene.json");
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
