//! Per-object masks and the visibility annotations derived from them.
//!
//! For every annotated object the writer needs two masks per frame:
//!
//! - the **silhouette** (`mask/`): pixels whose center ray hits the object when
//!   it is alone in the scene;
//! - the **visible mask** (`mask_visib/`): silhouette pixels where the object is
//!   the first surface hit in the full scene.
//!
//! `scene_gt_info.json` and `scene_gt_coco.json` are computed from these.

use image::{GrayImage, Luma};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use super::SceneGtInfoEntry;
use crate::bvh::SceneBvh;
use crate::camera::CameraPose;
use crate::CameraIntrinsics;

/// Binary per-pixel mask, row-major.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<bool>,
}

impl Mask {
    /// Build a mask from a predicate on the row-major pixel index.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(usize) -> bool) -> Self {
        Self {
            width,
            height,
            pixels: (0..(width * height) as usize).map(f).collect(),
        }
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        x < self.width
            && y < self.height
            && self.pixels.get((y * self.width + x) as usize).copied().unwrap_or(false)
    }

    pub fn count(&self) -> u64 {
        self.pixels.iter().filter(|&&p| p).count() as u64
    }

    /// Tight `[x, y, width, height]` box around the set pixels;
    /// `[-1, -1, -1, -1]` for an empty mask.
    pub fn bbox(&self) -> [i32; 4] {
        let mut min = (u32::MAX, u32::MAX);
        let mut max = (0u32, 0u32);
        let mut any = false;
        for y in 0..self.height {
            for x in 0..self.width {
                if self.get(x, y) {
                    any = true;
                    min = (min.0.min(x), min.1.min(y));
                    max = (max.0.max(x), max.1.max(y));
                }
            }
        }
        if !any {
            return [-1, -1, -1, -1];
        }
        [
            min.0 as i32,
            min.1 as i32,
            (max.0 - min.0 + 1) as i32,
            (max.1 - min.1 + 1) as i32,
        ]
    }

    /// 8-bit image with 255 inside the mask.
    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { 255 } else { 0 }])
        })
    }

    /// Uncompressed COCO run-length encoding (column-major, starting with a
    /// run of unset pixels).
    pub fn to_rle(&self) -> Rle {
        let mut counts = Vec::new();
        let mut current = false;
        let mut run = 0u64;
        for x in 0..self.width {
            for y in 0..self.height {
                let value = self.get(x, y);
                if value != current {
                    counts.push(run);
                    run = 0;
                    current = value;
                }
                run += 1;
            }
        }
        counts.push(run);
        Rle {
            counts,
            size: [self.height, self.width],
        }
    }
}

/// Pixels whose center ray hits anything in `bvh`.
///
/// With a BVH over a single object this is the object's unoccluded silhouette.
pub fn silhouette(bvh: &SceneBvh, pose: &CameraPose, intrinsics: &CameraIntrinsics) -> Mask {
    let (width, height) = (intrinsics.width(), intrinsics.height());
    let origin = pose.location();
    let pixels = (0..height)
        .into_par_iter()
        .flat_map_iter(|y| {
            (0..width).map(move |x| {
                let ray = pose.pixel_ray(intrinsics, [x as f64 + 0.5, y as f64 + 0.5]);
                bvh.occluded(origin, ray, f32::MAX)
            })
        })
        .collect();
    Mask {
        width,
        height,
        pixels,
    }
}

/// Visibility statistics of one object.
///
/// `valid_depth` marks pixels with a usable depth value. `visible` is clipped to
/// the silhouette, so `visib_fract` never exceeds 1.
pub fn gt_info(silhouette: &Mask, visible: &Mask, valid_depth: &Mask) -> SceneGtInfoEntry {
    let visible = Mask::from_fn(silhouette.width, silhouette.height, |i| {
        silhouette.pixels[i] && visible.pixels.get(i).copied().unwrap_or(false)
    });
    let px_count_all = silhouette.count();
    let px_count_valid = silhouette
        .pixels
        .iter()
        .zip(&valid_depth.pixels)
        .filter(|(&s, &v)| s && v)
        .count() as u64;
    let px_count_visib = visible.count();
    let visib_fract = if px_count_all > 0 {
        px_count_visib as f64 / px_count_all as f64
    } else {
        0.0
    };
    SceneGtInfoEntry {
        bbox_obj: silhouette.bbox(),
        bbox_visib: visible.bbox(),
        px_count_all,
        px_count_valid,
        px_count_visib,
        visib_fract,
    }
}

/// COCO run-length encoded segmentation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Rle {
    pub counts: Vec<u64>,
    /// `[height, width]`
    pub size: [u32; 2],
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoInfo {
    pub description: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u32,
    pub name: String,
    pub supercategory: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u32,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u32,
    pub category_id: u32,
    /// 1 for RLE segmentations
    pub iscrowd: u8,
    pub area: u64,
    /// Visible box, `[x, y, width, height]`
    pub bbox: [i32; 4],
    pub segmentation: Rle,
    pub width: u32,
    pub height: u32,
}

/// Contents of `scene_gt_coco.json`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoDataset {
    pub info: CocoInfo,
    pub categories: Vec<CocoCategory>,
    pub images: Vec<CocoImage>,
    pub annotations: Vec<CocoAnnotation>,
}

impl CocoDataset {
    pub fn new(dataset: &str) -> Self {
        Self {
            info: CocoInfo {
                description: format!("{dataset} train_pbr"),
                version: "1.0".to_string(),
            },
            ..Default::default()
        }
    }

    /// Register a category once per object id.
    pub fn add_category(&mut self, obj_id: u32, dataset: &str) {
        if self.categories.iter().all(|c| c.id != obj_id) {
            self.categories.push(CocoCategory {
                id: obj_id,
                name: obj_id.to_string(),
                supercategory: dataset.to_string(),
            });
            self.categories.sort_by_key(|c| c.id);
        }
    }

    /// Add the annotation of a visible object mask. Empty masks are skipped.
    pub fn add_annotation(&mut self, image_id: u32, obj_id: u32, visible: &Mask) {
        let area = visible.count();
        if area == 0 {
            return;
        }
        let id = self.annotations.last().map(|a| a.id + 1).unwrap_or(0);
        self.annotations.push(CocoAnnotation {
            id,
            image_id,
            category_id: obj_id,
            iscrowd: 1,
            area,
            bbox: visible.bbox(),
            segmentation: visible.to_rle(),
            width: visible.width,
            height: visible.height,
        });
    }
}
