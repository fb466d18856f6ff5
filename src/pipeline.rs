//! The end-to-end scene pipeline.
//!
//! [`run`] builds one scene and writes its frames:
//!
//! 1. ground mesh with a fixed box collider and a displaced, retextured material
//! 2. a random sample of BOP objects with convex-hull bodies and randomized materials
//! 3. an emissive ceiling plane and a point light
//! 4. collision-free initial poses, then a physics drop until everything rests
//! 5. camera poses around the objects that keep clear of every obstacle
//! 6. color and depth for every pose, exported in the BOP layout

use bevy::math::{EulerRot, Quat};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::batch::{BatchRenderConfig, BatchRenderer};
use crate::bop::{load_bop_objects, write_bop, BopDataset, WriteSummary};
use crate::bvh::SceneBvh;
use crate::cache::{AssetCache, AssetError};
use crate::camera::{sample_camera_poses, CameraPose};
use crate::config::{GroundConfig, ObjectConfig, PipelineConfig};
use crate::error::PipelineError;
use crate::lighting::create_lights;
use crate::mesh::{self, ShadingMode};
use crate::physics::{simulate_physics_and_fix_final_poses, OverlapChecker, SimulationReport};
use crate::render::RenderConfig;
use crate::sampler::{sample_poses, uniform};
use crate::scene::{
    BaseColor, CollisionShape, Material, MaterialId, ObjectId, RigidBodySettings, Scene,
    SceneObject,
};
use crate::textures::{choose_texture, find_textures, TextureError};

pub const DEFAULT_SCENE: &str = "exp/physics_positioning/plane.obj";
pub const DEFAULT_BOP_PARENT_PATH: &str = "exp/physics_positioning/bop_path";
pub const DEFAULT_DATASET: &str = "lm";
pub const DEFAULT_IMAGE_DIR: &str = "exp/physics_positioning/images";

/// Input and output locations of one run.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineArgs {
    /// Ground plane OBJ file
    pub scene: PathBuf,
    /// Directory containing the BOP datasets
    pub bop_parent_path: PathBuf,
    pub bop_dataset_name: String,
    /// Directory searched for ground textures
    pub image_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl PipelineArgs {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            scene: PathBuf::from(DEFAULT_SCENE),
            bop_parent_path: PathBuf::from(DEFAULT_BOP_PARENT_PATH),
            bop_dataset_name: DEFAULT_DATASET.to_string(),
            image_dir: PathBuf::from(DEFAULT_IMAGE_DIR),
            output_dir: output_dir.into(),
        }
    }

    pub fn with_scene(mut self, scene: impl Into<PathBuf>) -> Self {
        self.scene = scene.into();
        self
    }

    pub fn with_bop_parent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.bop_parent_path = path.into();
        self
    }

    pub fn with_dataset(mut self, name: impl Into<String>) -> Self {
        self.bop_dataset_name = name.into();
        self
    }

    pub fn with_image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.image_dir = dir.into();
        self
    }
}

/// What one run produced.
#[derive(Clone, Debug)]
pub struct PipelineReport {
    /// Accepted camera poses, in frame order
    pub camera_poses: Vec<CameraPose>,
    pub sampled_objects: Vec<ObjectId>,
    /// BOP object ids of the sampled objects, in the same order
    pub category_ids: Vec<u32>,
    pub placement_draws: usize,
    pub simulation: SimulationReport,
    pub camera_attempts: usize,
    pub written: WriteSummary,
}

/// Load the ground mesh and set it up as a fixed, textured surface.
///
/// Every object of the OBJ file is added; the first one is the ground. Returns the
/// added objects, ground first.
pub fn build_ground(
    scene: &mut Scene,
    path: &Path,
    config: &GroundConfig,
    cache: &mut AssetCache,
) -> Result<Vec<ObjectId>, PipelineError> {
    let loaded = mesh::load_obj(path).map_err(AssetError::from)?;
    if loaded.is_empty() {
        return Err(PipelineError::EmptyGround(path.display().to_string()));
    }

    let mut materials_by_name: HashMap<String, MaterialId> = HashMap::new();
    let mut ids = Vec::with_capacity(loaded.len());
    for obj in loaded {
        let mut object = SceneObject::new(obj.mesh.name.clone(), Arc::new(obj.mesh));
        if let Some(mtl) = obj.material {
            let id = match materials_by_name.get(&mtl.name) {
                Some(&id) => id,
                None => {
                    let base_color = match &mtl.diffuse_texture {
                        Some(texture) => BaseColor::Texture(cache.texture(texture)?),
                        None => BaseColor::Rgba([mtl.diffuse[0], mtl.diffuse[1], mtl.diffuse[2], 1.0]),
                    };
                    let id = scene.add_material(Material::new(mtl.name.clone(), base_color));
                    materials_by_name.insert(mtl.name, id);
                    id
                }
            };
            object.materials.push(id);
        }
        ids.push(scene.add_object(object));
    }

    let ground = ids[0];
    let object = scene.object_mut(ground)?;
    let [x, y, z] = config.rotation_euler;
    object.transform.rotation = Quat::from_euler(EulerRot::ZYX, z, y, x);
    object.rigid_body = Some(RigidBodySettings {
        friction: config.friction,
        linear_damping: config.linear_damping,
        angular_damping: config.angular_damping,
        ..RigidBodySettings::passive(CollisionShape::Box)
    });

    let displaced = scene.material_by_name(&config.material_name)?;
    scene.material_mut(displaced).displacement = Some(config.displacement_strength);

    log::info!(
        "Loaded ground '{}' ({} objects, {} materials)",
        scene.object(ground)?.name,
        ids.len(),
        materials_by_name.len()
    );
    Ok(ids)
}

/// Give each material a base-color texture chosen at random from `textures`.
pub fn randomize_textures<R: Rng + ?Sized>(
    scene: &mut Scene,
    materials: &[MaterialId],
    textures: &[PathBuf],
    cache: &mut AssetCache,
    rng: &mut R,
) -> Result<(), PipelineError> {
    for &id in materials {
        let Some(path) = choose_texture(textures, rng) else {
            break;
        };
        let image = cache.texture(path)?;
        let material = scene.material_mut(id);
        log::debug!("Texture {} -> material '{}'", path.display(), material.name);
        material.base_color = BaseColor::Texture(image);
    }
    Ok(())
}

/// Rigid body, shading and material randomization for sampled BOP objects.
///
/// Duplicates share their material, so the last duplicate's draw wins.
pub fn configure_bop_objects<R: Rng + ?Sized>(
    scene: &mut Scene,
    objects: &[ObjectId],
    config: &ObjectConfig,
    dataset_name: &str,
    rng: &mut R,
) -> Result<(), PipelineError> {
    let grey = config.grey_datasets.iter().any(|d| d == dataset_name);
    for &id in objects {
        let object = scene.object_mut(id)?;
        object.rigid_body = Some(RigidBodySettings {
            mass: config.mass,
            friction: config.friction,
            linear_damping: config.linear_damping,
            angular_damping: config.angular_damping,
            collision_margin: config.collision_margin,
            ..RigidBodySettings::active(CollisionShape::ConvexHull)
        });
        object.shading = ShadingMode::Auto {
            angle_deg: config.auto_smooth_angle_deg,
        };
        let Some(&material) = object.materials.first() else {
            continue;
        };

        let material = scene.material_mut(material);
        if grey {
            let g = uniform(rng, config.grey_range[0], config.grey_range[1]);
            material.base_color = BaseColor::Rgba([g, g, g, 1.0]);
        }
        material.roughness = uniform(rng, config.roughness_range[0], config.roughness_range[1]);
        material.specular = uniform(rng, config.specular_range[0], config.specular_range[1]);
    }
    Ok(())
}

/// Build, simulate, render and export one scene.
pub fn run(args: &PipelineArgs, config: &PipelineConfig) -> Result<PipelineReport, PipelineError> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut scene = Scene::new();
    let mut cache = AssetCache::new();

    // Ground and its textures
    let ground = build_ground(&mut scene, &args.scene, &config.ground, &mut cache)?;
    let textures = find_textures(&args.image_dir, &config.textures.pattern)?;
    if textures.is_empty() {
        return Err(TextureError::NoneFound {
            dir: args.image_dir.clone(),
            pattern: config.textures.pattern.clone(),
        }
        .into());
    }
    let ground_materials = scene.material_ids();
    randomize_textures(&mut scene, &ground_materials, &textures, &mut cache, &mut rng)?;

    // BOP objects
    let dataset = BopDataset::open(&args.bop_parent_path, &args.bop_dataset_name)?;
    let objects = load_bop_objects(&mut scene, &dataset, &config.objects, &mut cache, &mut rng)?;
    configure_bop_objects(
        &mut scene,
        &objects,
        &config.objects,
        &args.bop_dataset_name,
        &mut rng,
    )?;
    let intrinsics = dataset.load_intrinsics()?;
    log::debug!("Asset cache after loading: {:?}", cache.stats());

    create_lights(&mut scene, &config.lighting, &mut rng)?;

    // Initial poses, then let everything settle
    let mut checker = OverlapChecker::new(&scene, &ground[..1], &config.physics)?;
    let placement_draws = sample_poses(
        &mut scene,
        &objects,
        &config.placement,
        &mut rng,
        |scene, candidate, placed| checker.is_free(scene, candidate, placed),
    )?;
    for &id in &objects {
        scene.object_mut(id)?.hidden = false;
    }
    let simulation = simulate_physics_and_fix_final_poses(&mut scene, &config.physics)?;

    // Cameras
    let bvh = SceneBvh::build(&scene, &objects)?;
    let cameras = sample_camera_poses(
        &scene,
        &objects,
        &bvh,
        &intrinsics,
        &config.camera,
        &mut rng,
    )?;

    // Render and export
    let render_config = RenderConfig {
        seed: rng.gen(),
        ..config.render.clone()
    };
    let mut batch = BatchRenderer::new(
        &scene,
        intrinsics,
        &render_config,
        BatchRenderConfig {
            max_batch_size: cameras.poses.len().max(1),
        },
    )?;
    for pose in &cameras.poses {
        batch.queue_request(*pose)?;
    }
    let data = batch.render_all()?;

    let written = write_bop(
        &args.output_dir,
        &args.bop_dataset_name,
        &scene,
        &objects,
        &data,
        &config.writer,
    )?;
    log::info!(
        "Wrote {} frames to {}",
        written.frames.len(),
        written.dataset_dir.display()
    );

    let category_ids = objects
        .iter()
        .filter_map(|&id| scene.object(id).ok())
        .filter_map(|o| o.property_u64("category_id"))
        .map(|id| id as u32)
        .collect();

    Ok(PipelineReport {
        camera_poses: cameras.poses,
        sampled_objects: objects,
        category_ids,
        placement_draws,
        simulation,
        camera_attempts: cameras.attempts,
        written,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;

    fn scene_with_objects(n: usize) -> (Scene, Vec<ObjectId>, MaterialId) {
        let mut scene = Scene::new();
        let material = scene.add_material(Material::new("bop_tless_000001", BaseColor::VertexColor));
        let mesh = Arc::new(Mesh::plane("obj"));
        let ids = (0..n)
            .map(|_| {
                let mut object = SceneObject::new("obj_000001", Arc::clone(&mesh));
                object.materials.push(material);
                scene.add_object(object)
            })
            .collect();
        (scene, ids, material)
    }

    #[test]
    fn test_args_defaults_and_builders() {
        let args = PipelineArgs::new("out");
        assert_eq!(args.scene, PathBuf::from(DEFAULT_SCENE));
        assert_eq!(args.bop_dataset_name, "lm");
        assert_eq!(args.output_dir, PathBuf::from("out"));

        let args = args.with_dataset("tless").with_image_dir("imgs");
        assert_eq!(args.bop_dataset_name, "tless");
        assert_eq!(args.image_dir, PathBuf::from("imgs"));
    }

    #[test]
    fn test_grey_datasets_get_achromatic_colors() {
        let (mut scene, ids, material) = scene_with_objects(3);
        let mut rng = StdRng::seed_from_u64(1);
        configure_bop_objects(&mut scene, &ids, &ObjectConfig::default(), "tless", &mut rng).unwrap();

        match scene.material(material).base_color {
            BaseColor::Rgba([r, g, b, a]) => {
                assert_eq!(r, g);
                assert_eq!(g, b);
                assert!((0.1..=0.9).contains(&r));
                assert_eq!(a, 1.0);
            }
            ref other => panic!("expected a uniform color, got {other:?}"),
        }
        let m = scene.material(material);
        assert!((0.0..=1.0).contains(&m.roughness));
        assert!((0.0..=1.0).contains(&m.specular));

        for id in ids {
            let object = scene.object(id).unwrap();
            let body = object.rigid_body.as_ref().unwrap();
            assert_eq!(body.collision_shape, CollisionShape::ConvexHull);
            assert_eq!(body.mass, 1.0);
            assert_eq!(body.collision_margin, 0.0005);
            assert_eq!(object.shading, ShadingMode::Auto { angle_deg: 30.0 });
        }
    }

    #[test]
    fn test_other_datasets_keep_their_colors() {
        let (mut scene, ids, material) = scene_with_objects(2);
        let mut rng = StdRng::seed_from_u64(2);
        configure_bop_objects(&mut scene, &ids, &ObjectConfig::default(), "lm", &mut rng).unwrap();
        assert!(matches!(
            scene.material(material).base_color,
            BaseColor::VertexColor
        ));
    }

    #[test]
    fn test_randomize_textures_without_images_is_noop() {
        let (mut scene, _, material) = scene_with_objects(1);
        let mut rng = StdRng::seed_from_u64(3);
        randomize_textures(&mut scene, &[material], &[], &mut AssetCache::new(), &mut rng).unwrap();
        assert!(matches!(
            scene.material(material).base_color,
            BaseColor::VertexColor
        ));
    }
}
