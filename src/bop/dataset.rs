//! Reading a BOP dataset directory: model ids, model files and intrinsics.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use super::{read_json, BopError, CameraJson};
use crate::cache::AssetCache;
use crate::config::ObjectConfig;
use crate::scene::{BaseColor, Material, ObjectId, Scene, SceneObject};
use crate::CameraIntrinsics;

/// Model directories in lookup order.
const MODEL_DIRS: [&str; 2] = ["models", "models_cad"];

/// A BOP dataset on disk (e.g. `<bop_parent>/lm`).
#[derive(Clone, Debug, PartialEq)]
pub struct BopDataset {
    pub name: String,
    pub root: PathBuf,
    pub models_dir: PathBuf,
    /// Sorted object ids
    pub model_ids: Vec<u32>,
}

impl BopDataset {
    /// Open `<bop_parent_path>/<name>` and index its object models.
    pub fn open(bop_parent_path: &Path, name: &str) -> Result<Self, BopError> {
        let root = bop_parent_path.join(name);
        if !root.is_dir() {
            return Err(BopError::DatasetNotFound(root));
        }

        for dir_name in MODEL_DIRS {
            let models_dir = root.join(dir_name);
            if !models_dir.is_dir() {
                continue;
            }
            let model_ids = model_ids_in(&models_dir)?;
            if !model_ids.is_empty() {
                log::info!(
                    "Opened BOP dataset '{}' with {} models in {}",
                    name,
                    model_ids.len(),
                    models_dir.display()
                );
                return Ok(Self {
                    name: name.to_string(),
                    root,
                    models_dir,
                    model_ids,
                });
            }
        }

        Err(BopError::NoModels(root))
    }

    pub fn model_path(&self, obj_id: u32) -> PathBuf {
        self.models_dir.join(format!("obj_{obj_id:06}.ply"))
    }

    /// Path of the dataset's `camera.json`, falling back to the first `camera_*.json`.
    pub fn camera_path(&self) -> Result<PathBuf, BopError> {
        let default = self.root.join("camera.json");
        if default.is_file() {
            return Ok(default);
        }

        let entries = std::fs::read_dir(&self.root).map_err(|source| BopError::Io {
            path: self.root.clone(),
            source,
        })?;
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with("camera_") && n.ends_with(".json"))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();
        candidates
            .into_iter()
            .next()
            .ok_or_else(|| BopError::CameraNotFound(self.root.clone()))
    }

    pub fn load_camera(&self) -> Result<CameraJson, BopError> {
        read_json(&self.camera_path()?)
    }

    pub fn load_intrinsics(&self) -> Result<CameraIntrinsics, BopError> {
        let cam = self.load_camera()?;
        Ok(CameraIntrinsics {
            focal_length: [cam.fx, cam.fy],
            principal_point: [cam.cx, cam.cy],
            image_size: [cam.width, cam.height],
        })
    }

    /// Draw `count` object ids.
    pub fn sample_ids<R: Rng + ?Sized>(
        &self,
        count: usize,
        replacement: bool,
        rng: &mut R,
    ) -> Result<Vec<u32>, BopError> {
        if replacement {
            return Ok((0..count)
                .map(|_| self.model_ids[rng.gen_range(0..self.model_ids.len())])
                .collect());
        }
        if count > self.model_ids.len() {
            return Err(BopError::NotEnoughModels {
                requested: count,
                available: self.model_ids.len(),
            });
        }
        Ok(self
            .model_ids
            .choose_multiple(rng, count)
            .copied()
            .collect())
    }
}

/// Object ids from `models_info.json`, or from `obj_*.ply` file names.
fn model_ids_in(models_dir: &Path) -> Result<Vec<u32>, BopError> {
    let info_path = models_dir.join("models_info.json");
    if info_path.is_file() {
        let info: BTreeMap<String, Value> = read_json(&info_path)?;
        let mut ids: Vec<u32> = info.keys().filter_map(|k| k.parse().ok()).collect();
        ids.sort_unstable();
        return Ok(ids);
    }

    let entries = std::fs::read_dir(models_dir).map_err(|source| BopError::Io {
        path: models_dir.to_path_buf(),
        source,
    })?;
    let mut ids: Vec<u32> = entries
        .filter_map(Result::ok)
        .filter_map(|e| {
            let name = e.file_name().to_str()?.to_string();
            name.strip_prefix("obj_")?.strip_suffix(".ply")?.parse().ok()
        })
        .collect();
    ids.sort_unstable();
    Ok(ids)
}

/// Load a random sample of the dataset's objects into the scene.
///
/// Every object is tagged with
/// `bop_dataset_name` and `category_id` and starts hidden. Repeated ids are
/// duplicates of the first instance and share its mesh and material.
pub fn load_bop_objects<R: Rng + ?Sized>(
    scene: &mut Scene,
    dataset: &BopDataset,
    config: &ObjectConfig,
    cache: &mut AssetCache,
    rng: &mut R,
) -> Result<Vec<ObjectId>, BopError> {
    let ids = dataset.sample_ids(config.num_objects, config.replacement, rng)?;
    let scale = if config.mm2m { 0.001 } else { 1.0 };

    let mut first_instance: HashMap<u32, ObjectId> = HashMap::new();
    let mut loaded = Vec::with_capacity(ids.len());

    for obj_id in ids {
        let id = match first_instance.get(&obj_id) {
            Some(&original) => scene.duplicate(original)?,
            None => {
                let mesh = cache.mesh(&dataset.model_path(obj_id), scale)?;
                let base_color = if mesh.has_colors() {
                    BaseColor::VertexColor
                } else {
                    BaseColor::Rgba([0.8, 0.8, 0.8, 1.0])
                };
                let material = scene.add_material(Material::new(
                    format!("bop_{}_{:06}", dataset.name, obj_id),
                    base_color,
                ));

                let mut object = SceneObject::new(format!("obj_{obj_id:06}"), mesh);
                object.materials.push(material);
                object.hidden = true;
                object.set_property("bop_dataset_name", dataset.name.as_str());
                object.set_property("category_id", obj_id);

                let id = scene.add_object(object);
                first_instance.insert(obj_id, id);
                id
            }
        };
        log::debug!("Loaded BOP object obj_{:06} as {:?}", obj_id, id);
        loaded.push(id);
    }

    log::info!(
        "Loaded {} objects ({} distinct) from '{}'",
        loaded.len(),
        first_instance.len(),
        dataset.name
    );
    Ok(loaded)
}
