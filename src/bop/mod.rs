//! BOP benchmark datasets: loading object models and writing/reading frames.
//!
//! On-disk layout of a written dataset:
//!
//! ```text
//! <output>/bop_data/<dataset>/
//! ├── camera.json
//! └── train_pbr/
//!     └── 000000/
//!         ├── rgb/000000.jpg
//!         ├── depth/000000.png
//!         ├── mask/000000_000000.png
//!         ├── mask_visib/000000_000000.png
//!         ├── scene_camera.json
//!         ├── scene_gt.json
//!         ├── scene_gt_info.json
//!         └── scene_gt_coco.json
//! ```
//!
//! Masks are named `<frame>_<annotation index>`, the index being the position of
//! the object in the frame's `scene_gt.json` list.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::bvh::BvhError;
use crate::cache::AssetError;
use crate::scene::SceneError;

pub mod dataset;
pub mod masks;
pub mod reader;
pub mod writer;

pub use dataset::{load_bop_objects, BopDataset};
pub use reader::BopScene;
pub use writer::{write_bop, BopWriterConfig, ColorFormat, WriteSummary};

#[derive(Error, Debug)]
pub enum BopError {
    #[error("BOP dataset directory not found: {}", .0.display())]
    DatasetNotFound(PathBuf),

    #[error("no object models found in {}", .0.display())]
    NoModels(PathBuf),

    #[error("no camera.json found in {}", .0.display())]
    CameraNotFound(PathBuf),

    #[error("cannot sample {requested} distinct objects from {available} models")]
    NotEnoughModels { requested: usize, available: usize },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("image error on {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error(transparent)]
    Asset(#[from] AssetError),

    #[error(transparent)]
    Scene(#[from] SceneError),

    #[error("mask BVH: {0}")]
    Bvh(#[from] BvhError),

    #[error(
        "frame count mismatch: {poses} poses, {colors} color images, {depths} depth maps, {instances} instance maps"
    )]
    FrameMismatch {
        poses: usize,
        colors: usize,
        depths: usize,
        instances: usize,
    },

    #[error("invalid chunk {}: {reason}", path.display())]
    InvalidChunk { path: PathBuf, reason: String },
}

/// Dataset-level `camera.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CameraJson {
    pub cx: f64,
    pub cy: f64,
    #[serde(default = "default_depth_scale")]
    pub depth_scale: f64,
    pub fx: f64,
    pub fy: f64,
    pub height: u32,
    pub width: u32,
}

fn default_depth_scale() -> f64 {
    1.0
}

/// One entry of `scene_camera.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneCameraEntry {
    #[serde(rename = "cam_K")]
    pub cam_k: [f64; 9],
    pub depth_scale: f64,
    #[serde(rename = "cam_R_w2c", default, skip_serializing_if = "Option::is_none")]
    pub cam_r_w2c: Option<[f64; 9]>,
    #[serde(rename = "cam_t_w2c", default, skip_serializing_if = "Option::is_none")]
    pub cam_t_w2c: Option<[f64; 3]>,
}

/// One object annotation of `scene_gt.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneGtEntry {
    #[serde(rename = "cam_R_m2c")]
    pub cam_r_m2c: [f64; 9],
    #[serde(rename = "cam_t_m2c")]
    pub cam_t_m2c: [f64; 3],
    pub obj_id: u32,
}

/// One object entry of `scene_gt_info.json`, in the order of `scene_gt.json`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SceneGtInfoEntry {
    /// Box of the full silhouette, `[x, y, width, height]`
    pub bbox_obj: [i32; 4],
    /// Box of the visible part
    pub bbox_visib: [i32; 4],
    pub px_count_all: u64,
    /// Silhouette pixels with a valid depth value
    pub px_count_valid: u64,
    pub px_count_visib: u64,
    pub visib_fract: f64,
}

pub(crate) fn read_json<T: serde::de::DeserializeOwned>(
    path: &std::path::Path,
) -> Result<T, BopError> {
    let text = std::fs::read_to_string(path).map_err(|source| BopError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| BopError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn write_json<T: Serialize>(path: &std::path::Path, value: &T) -> Result<(), BopError> {
    let text = serde_json::to_string_pretty(value).map_err(|source| BopError::Json {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, text).map_err(|source| BopError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_json_default_depth_scale() {
        let cam: CameraJson = serde_json::from_str(
            r#"{"cx": 325.2, "cy": 242.0, "fx": 572.4, "fy": 573.6, "height": 480, "width": 640}"#,
        )
        .unwrap();
        assert_eq!(cam.depth_scale, 1.0);
        assert_eq!(cam.width, 640);
    }

    #[test]
    fn test_scene_gt_field_names() {
        let entry = SceneGtEntry {
            cam_r_m2c: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            cam_t_m2c: [0.0, 0.0, 500.0],
            obj_id: 3,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"cam_R_m2c\""));
        assert!(json.contains("\"cam_t_m2c\""));
        assert!(json.contains("\"obj_id\":3"));
    }

    #[test]
    fn test_scene_camera_skips_missing_extrinsics() {
        let entry = SceneCameraEntry {
            cam_k: [1.0; 9],
            depth_scale: 1.0,
            cam_r_w2c: None,
            cam_t_w2c: None,
        };
        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"cam_K\""));
        assert!(!json.contains("cam_R_w2c"));
    }
}
