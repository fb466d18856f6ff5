//! Pipeline configuration.
//!
//! Every numeric parameter of the scene pipeline lives here, grouped per stage.
//! All sections default individually, so a TOML file only needs the values it
//! changes:
//!
//! ```toml
//! seed = 42
//!
//! [camera]
//! num_poses = 4
//!
//! [render]
//! max_samples = 8
//! ```

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;

use crate::bop::writer::BopWriterConfig;
use crate::camera::CameraSamplingConfig;
use crate::physics::PhysicsConfig;
use crate::render::RenderConfig;
use crate::sampler::{PlacementConfig, ShellConfig};

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// Top-level configuration of one pipeline run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// RNG seed. `None` seeds from system entropy.
    pub seed: Option<u64>,
    pub ground: GroundConfig,
    pub textures: TextureConfig,
    pub objects: ObjectConfig,
    pub lighting: LightingConfig,
    pub placement: PlacementConfig,
    pub physics: PhysicsConfig,
    pub camera: CameraSamplingConfig,
    pub render: RenderConfig,
    pub writer: BopWriterConfig,
}

impl PipelineConfig {
    /// Small, fast settings for smoke tests and quick looks.
    ///
    /// Keeps the scene composition (object count, pose count, obstacle distance)
    /// and only cuts simulation time and render quality.
    pub fn preview() -> Self {
        Self {
            physics: PhysicsConfig {
                min_simulation_time: 1.0,
                max_simulation_time: 2.0,
                substeps_per_frame: 4,
                solver_iterations: 8,
                ..Default::default()
            },
            render: RenderConfig::preview(),
            writer: BopWriterConfig {
                jpg_quality: 80,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Load a configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !has_toml_extension(path) {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()));
        }
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Save the configuration as pretty-printed TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if !has_toml_extension(path) {
            return Err(ConfigError::UnsupportedFormat(path.display().to_string()));
        }
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

fn has_toml_extension(path: &Path) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case("toml"))
        .unwrap_or(false)
}

/// Ground plane setup.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroundConfig {
    /// Material whose base color drives the displacement
    pub material_name: String,
    pub displacement_strength: f32,
    /// XYZ Euler rotation applied to the loaded ground, radians
    pub rotation_euler: [f32; 3],
    pub friction: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            material_name: "Material.001".to_string(),
            displacement_strength: 1.5,
            rotation_euler: [PI, 0.0, 0.0],
            friction: 100.0,
            linear_damping: 0.99,
            angular_damping: 0.99,
        }
    }
}

/// Texture search in the image directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextureConfig {
    /// File name pattern; `*` and `?` are wildcards
    pub pattern: String,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            pattern: "material_manipulation_sample_texture2.jpg".to_string(),
        }
    }
}

/// BOP object sampling and per-object randomization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    pub num_objects: usize,
    /// Sample object ids with replacement
    pub replacement: bool,
    /// Convert model units from millimeters to meters
    pub mm2m: bool,
    /// Datasets whose objects get a uniform grey base color
    pub grey_datasets: Vec<String>,
    pub grey_range: [f32; 2],
    pub roughness_range: [f32; 2],
    pub specular_range: [f32; 2],
    pub mass: f32,
    pub friction: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub collision_margin: f32,
    pub auto_smooth_angle_deg: f32,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            num_objects: 10,
            replacement: true,
            mm2m: true,
            grey_datasets: vec!["itodd".to_string(), "tless".to_string()],
            grey_range: [0.1, 0.9],
            roughness_range: [0.0, 1.0],
            specular_range: [0.0, 1.0],
            mass: 1.0,
            friction: 100.0,
            linear_damping: 0.99,
            angular_damping: 0.99,
            collision_margin: 0.0005,
            auto_smooth_angle_deg: 30.0,
        }
    }
}

/// Emissive ceiling plane and point light.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingConfig {
    pub plane_location: [f32; 3],
    pub plane_scale: [f32; 3],
    pub emission_strength_range: [f32; 2],
    pub emission_color_range: [f32; 2],
    pub point_energy: f32,
    pub point_color_range: [f32; 2],
    pub point_shell: ShellConfig,
}

impl Default for LightingConfig {
    fn default() -> Self {
        Self {
            plane_location: [0.0, 0.0, 10.0],
            plane_scale: [3.0, 3.0, 1.0],
            emission_strength_range: [3.0, 6.0],
            emission_color_range: [0.5, 1.0],
            point_energy: 100.0,
            point_color_range: [0.5, 1.0],
            point_shell: ShellConfig {
                center: [0.0, 0.0, 0.0],
                radius_min: 1.0,
                radius_max: 1.5,
                elevation_min: 5.0,
                elevation_max: 89.0,
                uniform_volume: false,
                ..Default::default()
            },
        }
    }
}
