//! Loading a written BOP chunk back from disk.
//!
//! Used by `bop-inspect` and by tests to verify what the writer produced.
//!
//! # Usage
//!
//! ```ignore
//! use bop_synth::bop::BopScene;
//!
//! let chunk = BopScene::load("output/bop_data/lm/train_pbr/000000")?;
//! for frame in chunk.frame_ids() {
//!     let output = chunk.get_frame(frame)?;
//!     println!("{}: {} objects", frame, chunk.annotations(frame).len());
//! }
//! ```

use image::{GrayImage, RgbImage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::writer::pose_from_scene_camera;
use super::{read_json, BopError, SceneCameraEntry, SceneGtEntry, SceneGtInfoEntry};
use crate::render::RenderOutput;
use crate::CameraIntrinsics;

/// One `train_pbr/<chunk>` directory.
pub struct BopScene {
    root: PathBuf,
    pub cameras: BTreeMap<u32, SceneCameraEntry>,
    pub gt: BTreeMap<u32, Vec<SceneGtEntry>>,
    /// Mask statistics, empty when the chunk was written without masks
    pub gt_info: BTreeMap<u32, Vec<SceneGtInfoEntry>>,
}

impl BopScene {
    /// Load the annotations of a chunk directory.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, BopError> {
        let root = path.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(BopError::DatasetNotFound(root));
        }

        let camera_path = root.join("scene_camera.json");
        if !camera_path.is_file() {
            return Err(BopError::InvalidChunk {
                path: root,
                reason: "scene_camera.json not found".to_string(),
            });
        }
        let cameras: BTreeMap<u32, SceneCameraEntry> = read_json(&camera_path)?;

        let gt_path = root.join("scene_gt.json");
        let gt = if gt_path.is_file() {
            read_json(&gt_path)?
        } else {
            BTreeMap::new()
        };

        let info_path = root.join("scene_gt_info.json");
        let gt_info = if info_path.is_file() {
            read_json(&info_path)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            root,
            cameras,
            gt,
            gt_info,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn frame_ids(&self) -> Vec<u32> {
        self.cameras.keys().copied().collect()
    }

    pub fn frame_count(&self) -> usize {
        self.cameras.len()
    }

    pub fn camera(&self, frame: u32) -> Option<&SceneCameraEntry> {
        self.cameras.get(&frame)
    }

    /// Object annotations of a frame (empty if none).
    pub fn annotations(&self, frame: u32) -> &[SceneGtEntry] {
        self.gt.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Mask statistics of a frame, parallel to [`annotations`](Self::annotations).
    pub fn gt_info(&self, frame: u32) -> &[SceneGtInfoEntry] {
        self.gt_info.get(&frame).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Path of the full (`visible == false`) or visible silhouette of annotation `index`.
    pub fn mask_path(&self, frame: u32, index: usize, visible: bool) -> PathBuf {
        let dir = if visible { "mask_visib" } else { "mask" };
        self.root.join(dir).join(format!("{frame:06}_{index:06}.png"))
    }

    pub fn load_mask(&self, frame: u32, index: usize, visible: bool) -> Result<GrayImage, BopError> {
        let path = self.mask_path(frame, index, visible);
        let img = image::open(&path).map_err(|source| BopError::Image { path, source })?;
        Ok(img.to_luma8())
    }

    /// Color image path, whichever of JPEG or PNG was written.
    pub fn color_path(&self, frame: u32) -> Result<PathBuf, BopError> {
        ["jpg", "png"]
            .iter()
            .map(|ext| self.root.join("rgb").join(format!("{frame:06}.{ext}")))
            .find(|p| p.is_file())
            .ok_or_else(|| BopError::InvalidChunk {
                path: self.root.clone(),
                reason: format!("no color image for frame {frame}"),
            })
    }

    pub fn depth_path(&self, frame: u32) -> PathBuf {
        self.root.join("depth").join(format!("{frame:06}.png"))
    }

    pub fn load_color(&self, frame: u32) -> Result<RgbImage, BopError> {
        let path = self.color_path(frame)?;
        let img = image::open(&path).map_err(|source| BopError::Image { path, source })?;
        Ok(img.to_rgb8())
    }

    /// Depth in meters; invalid pixels (stored as 0) become `f32::INFINITY`.
    pub fn load_depth(&self, frame: u32) -> Result<(Vec<f32>, u32, u32), BopError> {
        let path = self.depth_path(frame);
        let depth_scale = self.camera(frame).map(|c| c.depth_scale).unwrap_or(1.0);
        let img = image::open(&path)
            .map_err(|source| BopError::Image { path, source })?
            .to_luma16();
        let (width, height) = img.dimensions();
        let depth = img
            .into_raw()
            .into_iter()
            .map(|v| {
                if v == 0 {
                    f32::INFINITY
                } else {
                    (v as f64 * depth_scale / 1000.0) as f32
                }
            })
            .collect();
        Ok((depth, width, height))
    }

    /// Load a frame as a [`RenderOutput`].
    pub fn get_frame(&self, frame: u32) -> Result<RenderOutput, BopError> {
        let camera = self.camera(frame).ok_or_else(|| BopError::InvalidChunk {
            path: self.root.clone(),
            reason: format!("frame {frame} not in scene_camera.json"),
        })?;
        let pose = pose_from_scene_camera(camera, true).ok_or_else(|| BopError::InvalidChunk {
            path: self.root.clone(),
            reason: format!("frame {frame} has no camera extrinsics"),
        })?;

        let color = self.load_color(frame)?;
        let (depth, width, height) = self.load_depth(frame)?;
        if color.dimensions() != (width, height) {
            return Err(BopError::InvalidChunk {
                path: self.root.clone(),
                reason: format!("frame {frame}: color and depth sizes differ"),
            });
        }

        let k = camera.cam_k;
        Ok(RenderOutput {
            rgb: color.into_raw(),
            depth,
            width,
            height,
            intrinsics: CameraIntrinsics {
                focal_length: [k[0], k[4]],
                principal_point: [k[2], k[5]],
                image_size: [width, height],
            },
            camera: pose,
            instances: Vec::new(),
        })
    }

    /// Iterate over all frames in id order
    pub fn iter_frames(&self) -> impl Iterator<Item = Result<(u32, RenderOutput), BopError>> + '_ {
        self.cameras
            .keys()
            .map(move |&frame| self.get_frame(frame).map(|output| (frame, output)))
    }
}
