//! Writing rendered frames in the BOP layout.

use bevy::math::{DMat3, DMat4, Mat4};
use image::codecs::jpeg::JpegEncoder;
use image::{ImageBuffer, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use super::masks::{self, CocoDataset, CocoImage, Mask};
use super::{
    read_json, write_json, BopError, CameraJson, SceneCameraEntry, SceneGtEntry,
    SceneGtInfoEntry,
};
use crate::batch::RenderData;
use crate::bvh::SceneBvh;
use crate::camera::CameraPose;
use crate::scene::{ObjectId, Scene};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorFormat {
    Jpeg,
    Png,
}

impl ColorFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ColorFormat::Jpeg => "jpg",
            ColorFormat::Png => "png",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BopWriterConfig {
    pub color_file_format: ColorFormat,
    pub jpg_quality: u8,
    /// Depth unit of the written PNGs is `depth_scale` millimeters
    pub depth_scale: f64,
    /// Write translations and depth in millimeters
    pub m2mm: bool,
    /// Objects farther than this from the camera are not annotated and
    /// depth beyond it is written as 0 (meters)
    pub ignore_dist_thres: f64,
    pub frames_per_chunk: u32,
    /// Continue numbering after the frames already present in the output
    pub append_to_existing_output: bool,
    /// Write `mask/`, `mask_visib/`, `scene_gt_info.json` and `scene_gt_coco.json`
    pub calc_mask_info_coco: bool,
}

impl Default for BopWriterConfig {
    fn default() -> Self {
        Self {
            color_file_format: ColorFormat::Jpeg,
            jpg_quality: 95,
            depth_scale: 1.0,
            m2mm: true,
            ignore_dist_thres: 10.0,
            frames_per_chunk: 1000,
            append_to_existing_output: true,
            calc_mask_info_coco: true,
        }
    }
}

/// Location of one written frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRef {
    pub chunk: u32,
    pub frame: u32,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WriteSummary {
    pub dataset_dir: PathBuf,
    /// In the order of the input frames
    pub frames: Vec<FrameRef>,
    /// Object annotations dropped by the distance threshold
    pub ignored_objects: usize,
    /// Depth pixels saturated at the 16-bit limit
    pub clipped_depth_pixels: usize,
    /// Mask pairs written to `mask/` and `mask_visib/`
    pub masks: usize,
}

impl WriteSummary {
    pub fn chunk_dir(&self, chunk: u32) -> PathBuf {
        self.dataset_dir.join("train_pbr").join(format!("{chunk:06}"))
    }
}

/// Write all frames of `data` to `<output_dir>/bop_data/<dataset>/`.
///
/// Annotates every object in `targets` that carries a `category_id`. With
/// `calc_mask_info_coco`, every annotation also gets its masks, a
/// `scene_gt_info.json` entry and a COCO annotation if any of it is visible.
pub fn write_bop(
    output_dir: &Path,
    dataset: &str,
    scene: &Scene,
    targets: &[ObjectId],
    data: &RenderData,
    config: &BopWriterConfig,
) -> Result<WriteSummary, BopError> {
    let frames = data.poses.len();
    if data.colors.len() != frames || data.depths.len() != frames || data.instances.len() != frames {
        return Err(BopError::FrameMismatch {
            poses: frames,
            colors: data.colors.len(),
            depths: data.depths.len(),
            instances: data.instances.len(),
        });
    }

    // One single-object index per annotated target, for the full silhouettes
    let mut silhouette_bvhs: BTreeMap<ObjectId, SceneBvh> = BTreeMap::new();
    if config.calc_mask_info_coco {
        for &id in targets {
            if scene.object(id)?.property_u64("category_id").is_some() {
                silhouette_bvhs.insert(id, SceneBvh::build(scene, &[id])?);
            }
        }
    }

    let dataset_dir = output_dir.join("bop_data").join(dataset);
    let chunks_dir = dataset_dir.join("train_pbr");
    create_dir(&chunks_dir)?;

    let intrinsics = &data.intrinsics;
    write_json(
        &dataset_dir.join("camera.json"),
        &CameraJson {
            cx: intrinsics.principal_point[0],
            cy: intrinsics.principal_point[1],
            depth_scale: config.depth_scale,
            fx: intrinsics.focal_length[0],
            fy: intrinsics.focal_length[1],
            height: intrinsics.height(),
            width: intrinsics.width(),
        },
    )?;

    let mut summary = WriteSummary {
        dataset_dir,
        ..Default::default()
    };
    let unit = if config.m2mm { 1000.0 } else { 1.0 };
    let frames_per_chunk = config.frames_per_chunk.max(1);

    let (mut chunk, mut frame) = if config.append_to_existing_output {
        next_free_slot(&chunks_dir, frames_per_chunk)?
    } else {
        (0, 0)
    };
    let mut chunk_data = ChunkData::open(&chunks_dir, chunk, dataset, config)?;

    for i in 0..frames {
        if frame >= frames_per_chunk {
            chunk_data.flush()?;
            chunk += 1;
            frame = 0;
            chunk_data = ChunkData::open(&chunks_dir, chunk, dataset, config)?;
        }

        let color_path = chunk_data
            .dir
            .join("rgb")
            .join(format!("{frame:06}.{}", config.color_file_format.extension()));
        save_color(&data.colors[i], &color_path, config)?;
        if let Some(coco) = chunk_data.coco.as_mut() {
            coco.images.retain(|image| image.id != frame);
            coco.annotations.retain(|annotation| annotation.image_id != frame);
            coco.images.push(CocoImage {
                id: frame,
                file_name: format!("rgb/{frame:06}.{}", config.color_file_format.extension()),
                width: intrinsics.width(),
                height: intrinsics.height(),
            });
        }

        let (depth_img, clipped) = depth_to_u16(
            &data.depths[i],
            intrinsics.width(),
            intrinsics.height(),
            config,
        );
        if clipped > 0 {
            log::warn!(
                "Frame {}: {} depth values exceed the 16-bit range and were clipped",
                i,
                clipped
            );
        }
        summary.clipped_depth_pixels += clipped;
        let depth_path = chunk_data.dir.join("depth").join(format!("{frame:06}.png"));
        depth_img.save(&depth_path).map_err(|source| BopError::Image {
            path: depth_path.clone(),
            source,
        })?;

        let world2cam = data.poses[i].world2cam_opencv().as_dmat4();
        chunk_data.cameras.insert(
            frame,
            SceneCameraEntry {
                cam_k: intrinsics.k_matrix(),
                depth_scale: config.depth_scale,
                cam_r_w2c: Some(row_major(DMat3::from_mat4(world2cam))),
                cam_t_w2c: Some((world2cam.w_axis.truncate() * unit).to_array()),
            },
        );

        let valid_depth = Mask::from_fn(intrinsics.width(), intrinsics.height(), |p| {
            data.depths[i]
                .get(p)
                .is_some_and(|&d| is_valid_depth(d as f64, config))
        });
        let mut annotations = Vec::new();
        let mut infos = Vec::new();
        for &id in targets {
            let object = scene.object(id)?;
            let Some(obj_id) = object.property_u64("category_id") else {
                continue;
            };
            let model2world =
                Mat4::from_rotation_translation(object.transform.rotation, object.transform.translation)
                    .as_dmat4();
            let model2cam = world2cam * model2world;
            let t = model2cam.w_axis.truncate();
            if t.length() > config.ignore_dist_thres {
                log::warn!(
                    "Frame {}: ignoring {} at {:.2} m (threshold {} m)",
                    i,
                    object.name,
                    t.length(),
                    config.ignore_dist_thres
                );
                summary.ignored_objects += 1;
                continue;
            }

            if let Some(bvh) = silhouette_bvhs.get(&id) {
                let silhouette = masks::silhouette(bvh, &data.poses[i], intrinsics);
                let visible = Mask::from_fn(intrinsics.width(), intrinsics.height(), |p| {
                    silhouette.pixels[p]
                        && data.instances[i].get(p).copied().flatten() == Some(id)
                });
                let name = format!("{frame:06}_{:06}.png", annotations.len());
                save_mask(&silhouette, &chunk_data.dir.join("mask").join(&name))?;
                save_mask(&visible, &chunk_data.dir.join("mask_visib").join(&name))?;
                summary.masks += 1;

                infos.push(masks::gt_info(&silhouette, &visible, &valid_depth));
                if let Some(coco) = chunk_data.coco.as_mut() {
                    coco.add_category(obj_id as u32, dataset);
                    coco.add_annotation(frame, obj_id as u32, &visible);
                }
            }

            annotations.push(SceneGtEntry {
                cam_r_m2c: row_major(DMat3::from_mat4(model2cam)),
                cam_t_m2c: (t * unit).to_array(),
                obj_id: obj_id as u32,
            });
        }
        chunk_data.gt.insert(frame, annotations);
        if config.calc_mask_info_coco {
            chunk_data.gt_info.insert(frame, infos);
        }

        summary.frames.push(FrameRef { chunk, frame });
        frame += 1;
    }
    chunk_data.flush()?;

    log::info!(
        "Wrote {} frames to {}",
        summary.frames.len(),
        summary.dataset_dir.display()
    );
    Ok(summary)
}

/// Per-chunk annotations, merged with what is already on disk.
struct ChunkData {
    dir: PathBuf,
    cameras: BTreeMap<u32, SceneCameraEntry>,
    gt: BTreeMap<u32, Vec<SceneGtEntry>>,
    gt_info: BTreeMap<u32, Vec<SceneGtInfoEntry>>,
    /// Only kept when masks are written
    coco: Option<CocoDataset>,
}

impl ChunkData {
    fn open(
        chunks_dir: &Path,
        chunk: u32,
        dataset: &str,
        config: &BopWriterConfig,
    ) -> Result<Self, BopError> {
        let dir = chunks_dir.join(format!("{chunk:06}"));
        create_dir(&dir.join("rgb"))?;
        create_dir(&dir.join("depth"))?;

        let cameras = read_json_or_default(&dir.join("scene_camera.json"))?;
        let gt = read_json_or_default(&dir.join("scene_gt.json"))?;
        let (gt_info, coco) = if config.calc_mask_info_coco {
            create_dir(&dir.join("mask"))?;
            create_dir(&dir.join("mask_visib"))?;
            let coco_path = dir.join("scene_gt_coco.json");
            let coco = if coco_path.is_file() {
                read_json(&coco_path)?
            } else {
                CocoDataset::new(dataset)
            };
            (read_json_or_default(&dir.join("scene_gt_info.json"))?, Some(coco))
        } else {
            (BTreeMap::new(), None)
        };
        Ok(Self {
            dir,
            cameras,
            gt,
            gt_info,
            coco,
        })
    }

    fn flush(&self) -> Result<(), BopError> {
        write_json(&self.dir.join("scene_camera.json"), &self.cameras)?;
        write_json(&self.dir.join("scene_gt.json"), &self.gt)?;
        if let Some(coco) = &self.coco {
            write_json(&self.dir.join("scene_gt_info.json"), &self.gt_info)?;
            write_json(&self.dir.join("scene_gt_coco.json"), coco)?;
        }
        Ok(())
    }
}

fn read_json_or_default<T: serde::de::DeserializeOwned + Default>(path: &Path) -> Result<T, BopError> {
    if path.is_file() {
        read_json(path)
    } else {
        Ok(T::default())
    }
}

/// First unused (chunk, frame) slot after the existing output.
fn next_free_slot(chunks_dir: &Path, frames_per_chunk: u32) -> Result<(u32, u32), BopError> {
    let entries = fs::read_dir(chunks_dir).map_err(|source| BopError::Io {
        path: chunks_dir.to_path_buf(),
        source,
    })?;
    let last_chunk = entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str()?.parse::<u32>().ok())
        .max();
    let Some(last_chunk) = last_chunk else {
        return Ok((0, 0));
    };

    let gt_path = chunks_dir
        .join(format!("{last_chunk:06}"))
        .join("scene_gt.json");
    let next_frame = if gt_path.is_file() {
        let gt: BTreeMap<u32, serde_json::Value> = read_json(&gt_path)?;
        gt.keys().next_back().map(|last| last + 1).unwrap_or(0)
    } else {
        0
    };

    if next_frame >= frames_per_chunk {
        Ok((last_chunk + 1, 0))
    } else {
        Ok((last_chunk, next_frame))
    }
}

fn save_mask(mask: &Mask, path: &Path) -> Result<(), BopError> {
    mask.to_image().save(path).map_err(|source| BopError::Image {
        path: path.to_path_buf(),
        source,
    })
}

fn save_color(color: &RgbImage, path: &Path, config: &BopWriterConfig) -> Result<(), BopError> {
    let image_err = |source| BopError::Image {
        path: path.to_path_buf(),
        source,
    };
    match config.color_file_format {
        ColorFormat::Png => color.save(path).map_err(image_err),
        ColorFormat::Jpeg => {
            let file = File::create(path).map_err(|source| BopError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut writer = BufWriter::new(file);
            JpegEncoder::new_with_quality(&mut writer, config.jpg_quality)
                .encode_image(color)
                .map_err(image_err)
        }
    }
}

/// Convert metric depth to the 16-bit BOP encoding.
///
/// Misses and values beyond the distance threshold become 0. Returns the image and
/// the number of saturated pixels.
pub fn depth_to_u16(
    depth_m: &[f32],
    width: u32,
    height: u32,
    config: &BopWriterConfig,
) -> (ImageBuffer<Luma<u16>, Vec<u16>>, usize) {
    let unit = if config.m2mm { 1000.0 } else { 1.0 };
    let mut clipped = 0;
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        let d = depth_m
            .get((y * width + x) as usize)
            .copied()
            .unwrap_or(f32::INFINITY) as f64;
        if !is_valid_depth(d, config) {
            return Luma([0u16]);
        }
        let scaled = d * unit / config.depth_scale;
        if scaled > u16::MAX as f64 {
            clipped += 1;
            Luma([u16::MAX])
        } else {
            Luma([scaled.round() as u16])
        }
    });
    (img, clipped)
}

/// Depth that is written as a non-zero value.
fn is_valid_depth(d: f64, config: &BopWriterConfig) -> bool {
    d.is_finite() && d > 0.0 && d <= config.ignore_dist_thres
}

fn row_major(m: DMat3) -> [f64; 9] {
    m.transpose().to_cols_array()
}

fn create_dir(path: &Path) -> Result<(), BopError> {
    fs::create_dir_all(path).map_err(|source| BopError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Camera-to-world pose from a written `scene_camera.json` entry (OpenCV convention
/// converted back to the -Z forward convention).
pub fn pose_from_scene_camera(entry: &SceneCameraEntry, m2mm: bool) -> Option<CameraPose> {
    let r = entry.cam_r_w2c?;
    let t = entry.cam_t_w2c?;
    let unit = if m2mm { 1000.0 } else { 1.0 };
    let rot = DMat3::from_cols_array(&r).transpose();
    let w2c = DMat4::from_cols(
        rot.x_axis.extend(0.0),
        rot.y_axis.extend(0.0),
        rot.z_axis.extend(0.0),
        (bevy::math::DVec3::from_array(t) / unit).extend(1.0),
    );
    Some(CameraPose::from_world2cam_opencv(w2c.as_mat4()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::SceneObject;
    use crate::CameraIntrinsics;
    use bevy::math::Vec3;
    use bevy::prelude::Transform;
    use image::Rgb;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics {
            focal_length: [50.0, 50.0],
            principal_point: [4.0, 3.0],
            image_size: [8, 6],
        }
    }

    /// Camera one meter above the origin looking straight down.
    fn top_down_pose() -> CameraPose {
        CameraPose::new(Mat4::from_translation(Vec3::new(0.0, 0.0, 1.0)))
    }

    fn render_data(frames: usize, depth: f32) -> RenderData {
        RenderData {
            colors: vec![RgbImage::from_pixel(8, 6, Rgb([200, 100, 50])); frames],
            depths: vec![vec![depth; 48]; frames],
            instances: vec![vec![None; 48]; frames],
            poses: vec![top_down_pose(); frames],
            intrinsics: intrinsics(),
        }
    }

    fn scene_with_object(location: Vec3) -> (Scene, Vec<ObjectId>) {
        let mut scene = Scene::new();
        let mut object = SceneObject::new("obj_000005", Arc::new(Mesh::plane("p")));
        object.transform = Transform::from_translation(location);
        object.set_property("category_id", 5u64);
        object.set_property("bop_dataset_name", "lm");
        let id = scene.add_object(object);
        (scene, vec![id])
    }

    #[test]
    fn test_layout_and_pose_convention() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let summary = write_bop(
            dir.path(),
            "lm",
            &scene,
            &targets,
            &render_data(1, 0.5),
            &BopWriterConfig::default(),
        )
        .unwrap();

        let dataset_dir = dir.path().join("bop_data/lm");
        assert_eq!(summary.dataset_dir, dataset_dir);
        assert!(dataset_dir.join("camera.json").is_file());
        let chunk = dataset_dir.join("train_pbr/000000");
        assert!(chunk.join("rgb/000000.jpg").is_file());
        assert!(chunk.join("depth/000000.png").is_file());

        let gt: BTreeMap<u32, Vec<SceneGtEntry>> =
            read_json_or_default(&chunk.join("scene_gt.json")).unwrap();
        let entry = &gt[&0][0];
        assert_eq!(entry.obj_id, 5);
        // Object one meter in front of the camera along the OpenCV +Z axis
        assert!((entry.cam_t_m2c[2] - 1000.0).abs() < 1e-3);
        assert!(entry.cam_t_m2c[0].abs() < 1e-3);
        assert!((entry.cam_r_m2c[4] + 1.0).abs() < 1e-6);
        assert!((entry.cam_r_m2c[8] + 1.0).abs() < 1e-6);

        let cams: BTreeMap<u32, SceneCameraEntry> =
            read_json_or_default(&chunk.join("scene_camera.json")).unwrap();
        assert_eq!(cams[&0].cam_k, intrinsics().k_matrix());
        let t = cams[&0].cam_t_w2c.unwrap();
        assert!((t[2] - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn test_chunking_and_append() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let config = BopWriterConfig {
            frames_per_chunk: 2,
            color_file_format: ColorFormat::Png,
            ..Default::default()
        };

        let first = write_bop(dir.path(), "lm", &scene, &targets, &render_data(3, 0.5), &config)
            .unwrap();
        assert_eq!(
            first.frames,
            vec![
                FrameRef { chunk: 0, frame: 0 },
                FrameRef { chunk: 0, frame: 1 },
                FrameRef { chunk: 1, frame: 0 },
            ]
        );
        assert!(first.chunk_dir(1).join("rgb/000000.png").is_file());

        let second = write_bop(dir.path(), "lm", &scene, &targets, &render_data(2, 0.5), &config)
            .unwrap();
        assert_eq!(
            second.frames,
            vec![FrameRef { chunk: 1, frame: 1 }, FrameRef { chunk: 2, frame: 0 }]
        );
        let gt: BTreeMap<u32, Vec<SceneGtEntry>> =
            read_json(&second.chunk_dir(1).join("scene_gt.json")).unwrap();
        assert_eq!(gt.keys().copied().collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn test_no_append_restarts_numbering() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let config = BopWriterConfig {
            append_to_existing_output: false,
            ..Default::default()
        };
        write_bop(dir.path(), "lm", &scene, &targets, &render_data(2, 0.5), &config).unwrap();
        let again =
            write_bop(dir.path(), "lm", &scene, &targets, &render_data(1, 0.5), &config).unwrap();
        assert_eq!(again.frames, vec![FrameRef { chunk: 0, frame: 0 }]);
    }

    #[test]
    fn test_far_objects_are_not_annotated() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::new(0.0, 0.0, -20.0));
        let summary = write_bop(
            dir.path(),
            "lm",
            &scene,
            &targets,
            &render_data(1, 0.5),
            &BopWriterConfig::default(),
        )
        .unwrap();
        assert_eq!(summary.ignored_objects, 1);
        let gt: BTreeMap<u32, Vec<SceneGtEntry>> =
            read_json(&summary.chunk_dir(0).join("scene_gt.json")).unwrap();
        assert!(gt[&0].is_empty());
    }

    #[test]
    fn test_masks_and_gt_info() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let mut data = render_data(1, 0.5);
        // The plane fills the view; only the top three rows see it first
        for p in 0..24 {
            data.instances[0][p] = Some(targets[0]);
        }
        let summary = write_bop(
            dir.path(),
            "lm",
            &scene,
            &targets,
            &data,
            &BopWriterConfig::default(),
        )
        .unwrap();
        assert_eq!(summary.masks, 1);

        let chunk = summary.chunk_dir(0);
        let mask = image::open(chunk.join("mask/000000_000000.png")).unwrap().to_luma8();
        let visib = image::open(chunk.join("mask_visib/000000_000000.png"))
            .unwrap()
            .to_luma8();
        assert_eq!(mask.dimensions(), (8, 6));
        assert!(mask.pixels().all(|p| p[0] == 255));
        assert_eq!(visib.get_pixel(0, 0)[0], 255);
        assert_eq!(visib.get_pixel(7, 5)[0], 0);

        let info: BTreeMap<u32, Vec<SceneGtInfoEntry>> =
            read_json_or_default(&chunk.join("scene_gt_info.json")).unwrap();
        let entry = &info[&0][0];
        assert_eq!(entry.px_count_all, 48);
        assert_eq!(entry.px_count_valid, 48);
        assert_eq!(entry.px_count_visib, 24);
        assert!((entry.visib_fract - 0.5).abs() < 1e-12);
        assert_eq!(entry.bbox_obj, [0, 0, 8, 6]);
        assert_eq!(entry.bbox_visib, [0, 0, 8, 3]);

        let coco: CocoDataset = read_json_or_default(&chunk.join("scene_gt_coco.json")).unwrap();
        assert_eq!(coco.categories.len(), 1);
        assert_eq!(coco.categories[0].id, 5);
        assert_eq!(coco.images.len(), 1);
        assert_eq!(coco.images[0].file_name, "rgb/000000.jpg");
        assert_eq!(coco.annotations.len(), 1);
        assert_eq!(coco.annotations[0].area, 24);
        assert_eq!(coco.annotations[0].bbox, [0, 0, 8, 3]);
    }

    #[test]
    fn test_mask_output_can_be_disabled() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let config = BopWriterConfig {
            calc_mask_info_coco: false,
            ..Default::default()
        };
        let summary =
            write_bop(dir.path(), "lm", &scene, &targets, &render_data(1, 0.5), &config).unwrap();
        assert_eq!(summary.masks, 0);
        let chunk = summary.chunk_dir(0);
        assert!(chunk.join("scene_gt.json").is_file());
        assert!(!chunk.join("mask").exists());
        assert!(!chunk.join("scene_gt_info.json").exists());
        assert!(!chunk.join("scene_gt_coco.json").exists());
    }

    #[test]
    fn test_depth_encoding() {
        let config = BopWriterConfig::default();
        let depth = vec![0.5, 12.0, f32::INFINITY, 9.9];
        let (img, clipped) = depth_to_u16(&depth, 2, 2, &config);
        assert_eq!(clipped, 0);
        assert_eq!(img.get_pixel(0, 0)[0], 500);
        assert_eq!(img.get_pixel(1, 0)[0], 0);
        assert_eq!(img.get_pixel(0, 1)[0], 0);
        assert_eq!(img.get_pixel(1, 1)[0], 9900);

        let scaled = BopWriterConfig {
            depth_scale: 0.1,
            ignore_dist_thres: 100.0,
            ..Default::default()
        };
        let (img, clipped) = depth_to_u16(&[1.0, 50.0], 2, 1, &scaled);
        assert_eq!(img.get_pixel(0, 0)[0], 10000);
        assert_eq!(img.get_pixel(1, 0)[0], u16::MAX);
        assert_eq!(clipped, 1);
    }

    #[test]
    fn test_frame_mismatch() {
        let dir = TempDir::new().unwrap();
        let (scene, targets) = scene_with_object(Vec3::ZERO);
        let mut data = render_data(2, 0.5);
        data.depths.pop();
        let result = write_bop(
            dir.path(),
            "lm",
            &scene,
            &targets,
            &data,
            &BopWriterConfig::default(),
        );
        assert!(matches!(result, Err(BopError::FrameMismatch { depths: 1, .. })));
    }

    #[test]
    fn test_pose_from_scene_camera_roundtrip() {
        let pose = CameraPose::new(
            Mat4::from_rotation_translation(
                bevy::math::Quat::from_rotation_x(0.4),
                Vec3::new(0.2, -0.3, 0.9),
            ),
        );
        let w2c = pose.world2cam_opencv().as_dmat4();
        let entry = SceneCameraEntry {
            cam_k: intrinsics().k_matrix(),
            depth_scale: 1.0,
            cam_r_w2c: Some(row_major(DMat3::from_mat4(w2c))),
            cam_t_w2c: Some((w2c.w_axis.truncate() * 1000.0).to_array()),
        };
        let restored = pose_from_scene_camera(&entry, true).unwrap();
        assert!(restored.cam2world.abs_diff_eq(pose.cam2world, 1e-4));
    }
}
