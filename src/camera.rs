//! Camera poses and viewpoint sampling with an obstacle check.
//!
//! Poses use the Blender/OpenGL camera convention: the camera looks along its
//! local -Z axis with +Y up. [`CameraPose::to_opencv`] converts to the
//! +Z forward, +Y down frame that BOP annotations use.

use bevy::math::{Mat3, Mat4, Vec3};
use bevy::prelude::Transform;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::bvh::SceneBvh;
use crate::sampler::{uniform, SamplingError, ShellConfig};
use crate::scene::{ObjectId, Scene};
use crate::CameraIntrinsics;

/// Flips the Y and Z axes between the OpenGL and OpenCV camera frames.
const GL_TO_CV: Mat4 = Mat4::from_cols_array(&[
    1.0, 0.0, 0.0, 0.0, //
    0.0, -1.0, 0.0, 0.0, //
    0.0, 0.0, -1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
]);

/// Camera-to-world transform of one viewpoint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraPose {
    pub cam2world: Mat4,
}

impl CameraPose {
    pub fn new(cam2world: Mat4) -> Self {
        Self { cam2world }
    }

    pub fn location(&self) -> Vec3 {
        self.cam2world.w_axis.truncate()
    }

    pub fn rotation(&self) -> Mat3 {
        Mat3::from_mat4(self.cam2world)
    }

    /// Viewing direction in world space.
    pub fn forward(&self) -> Vec3 {
        -self.rotation().z_axis
    }

    pub fn transform(&self) -> Transform {
        Transform::from_matrix(self.cam2world)
    }

    /// Camera-to-world in the OpenCV convention (+Z forward, +Y down).
    pub fn to_opencv(&self) -> Mat4 {
        self.cam2world * GL_TO_CV
    }

    /// World-to-camera in the OpenCV convention, as written to BOP files.
    pub fn world2cam_opencv(&self) -> Mat4 {
        self.to_opencv().inverse()
    }

    pub fn from_world2cam_opencv(world2cam: Mat4) -> Self {
        Self::new(world2cam.inverse() * GL_TO_CV)
    }

    /// World-space direction of the ray through a pixel (not normalized).
    pub fn pixel_ray(&self, intrinsics: &CameraIntrinsics, pixel: [f64; 2]) -> Vec3 {
        Mat3::from_mat4(self.to_opencv()) * intrinsics.ray_direction(pixel)
    }
}

/// Rotation whose -Z axis points along `forward`, with the camera +Y axis as close
/// to world +Z as possible, then rotated by `inplane_rot` radians about the
/// viewing axis.
pub fn rotation_from_forward_vec(forward: Vec3, inplane_rot: f32) -> Mat3 {
    let base = Transform::IDENTITY.looking_to(forward, Vec3::Z).rotation;
    Mat3::from_quat(base) * Mat3::from_rotation_z(inplane_rot)
}

/// Homogeneous transform from a location and a rotation.
pub fn build_transformation_mat(location: Vec3, rotation: Mat3) -> Mat4 {
    let mut m = Mat4::from_mat3(rotation);
    m.w_axis = location.extend(1.0);
    m
}

/// Point of interest for a set of objects.
///
/// The bounding-box center of the object closest to the mean of all bounding-box
/// centers, so that the camera always aims at an actual object.
pub fn compute_poi(scene: &Scene, objects: &[ObjectId]) -> Result<Vec3, SamplingError> {
    let centers: Vec<Vec3> = objects
        .iter()
        .filter_map(|&id| scene.object(id).ok())
        .map(|o| o.world_bound_box().iter().copied().sum::<Vec3>() / 8.0)
        .collect();
    if centers.is_empty() {
        return Err(SamplingError::EmptySelection);
    }
    let mean = centers.iter().copied().sum::<Vec3>() / centers.len() as f32;
    centers
        .into_iter()
        .min_by(|a, b| a.distance_squared(mean).total_cmp(&b.distance_squared(mean)))
        .ok_or(SamplingError::EmptySelection)
}

/// Distance constraints on the rays of the obstacle check (meters).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProximityChecks {
    /// Every hit must be at least this far away
    pub min: Option<f32>,
    /// Every hit must be at most this far away
    pub max: Option<f32>,
    /// Mean hit distance must lie in `[avg_min, avg_max]`
    pub avg_min: Option<f32>,
    pub avg_max: Option<f32>,
    /// Every ray must hit something
    pub no_background: bool,
}

/// Cast a `sqrt_number_of_rays` x `sqrt_number_of_rays` grid of rays spanning the
/// image and test the hit distances against `checks`.
///
/// Rays that hit nothing pass unless `no_background` is set.
pub fn perform_obstacle_in_view_check(
    pose: &CameraPose,
    intrinsics: &CameraIntrinsics,
    checks: &ProximityChecks,
    bvh: &SceneBvh,
    sqrt_number_of_rays: usize,
) -> bool {
    let n = sqrt_number_of_rays.max(1);
    let origin = pose.location();
    let (w, h) = (intrinsics.width() as f64, intrinsics.height() as f64);

    let mut sum = 0.0;
    let mut hits = 0usize;
    for i in 0..n {
        for j in 0..n {
            let (fx, fy) = if n == 1 {
                (0.5, 0.5)
            } else {
                (i as f64 / (n - 1) as f64, j as f64 / (n - 1) as f64)
            };
            let direction = pose.pixel_ray(intrinsics, [fx * w, fy * h]).normalize();

            match bvh.cast_ray(origin, direction, f32::MAX) {
                None => {
                    if checks.no_background {
                        return false;
                    }
                }
                Some(hit) => {
                    if checks.min.is_some_and(|min| hit.t < min) {
                        return false;
                    }
                    if checks.max.is_some_and(|max| hit.t > max) {
                        return false;
                    }
                    sum += hit.t;
                    hits += 1;
                }
            }
        }
    }

    if hits > 0 {
        let avg = sum / hits as f32;
        if checks.avg_min.is_some_and(|min| avg < min) || checks.avg_max.is_some_and(|max| avg > max)
        {
            return false;
        }
    }
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSamplingConfig {
    pub num_poses: usize,
    pub shell: ShellConfig,
    /// In-plane rotation range, radians
    pub inplane_rot_range: [f32; 2],
    pub proximity_checks: ProximityChecks,
    pub sqrt_number_of_rays: usize,
    /// Give up after this many sampled poses; 0 samples until enough are accepted
    pub max_attempts: usize,
}

impl Default for CameraSamplingConfig {
    fn default() -> Self {
        Self {
            num_poses: 10,
            shell: ShellConfig {
                center: [0.0, 0.0, 0.0],
                radius_min: 0.8,
                radius_max: 1.2,
                elevation_min: 45.0,
                elevation_max: 89.0,
                ..Default::default()
            },
            inplane_rot_range: [-0.7854, 0.7854],
            proximity_checks: ProximityChecks {
                min: Some(0.3),
                ..Default::default()
            },
            sqrt_number_of_rays: 10,
            max_attempts: 10_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CameraSamplingReport {
    /// Accepted poses in acceptance order
    pub poses: Vec<CameraPose>,
    pub attempts: usize,
    pub poi: Vec3,
}

/// Sample camera poses on the shell, aimed at the objects' point of interest,
/// until `num_poses` pass the obstacle check.
pub fn sample_camera_poses<R: Rng + ?Sized>(
    scene: &Scene,
    objects: &[ObjectId],
    bvh: &SceneBvh,
    intrinsics: &CameraIntrinsics,
    config: &CameraSamplingConfig,
    rng: &mut R,
) -> Result<CameraSamplingReport, SamplingError> {
    let poi = compute_poi(scene, objects)?;
    log::debug!("Point of interest: {:?}", poi);

    let mut poses = Vec::with_capacity(config.num_poses);
    let mut attempts = 0;
    while poses.len() < config.num_poses {
        if config.max_attempts > 0 && attempts >= config.max_attempts {
            return Err(SamplingError::CameraPosesExhausted {
                accepted: poses.len(),
                required: config.num_poses,
                attempts,
            });
        }
        attempts += 1;

        let location = config.shell.sample(rng)?;
        let inplane = uniform(rng, config.inplane_rot_range[0], config.inplane_rot_range[1]);
        let rotation = rotation_from_forward_vec(poi - location, inplane);
        let pose = CameraPose::new(build_transformation_mat(location, rotation));

        if perform_obstacle_in_view_check(
            &pose,
            intrinsics,
            &config.proximity_checks,
            bvh,
            config.sqrt_number_of_rays,
        ) {
            log::debug!("Accepted camera pose {} at {:?}", poses.len(), location);
            poses.push(pose);
        }
    }

    log::info!(
        "Accepted {} camera poses after {} attempts",
        poses.len(),
        attempts
    );
    Ok(CameraSamplingReport {
        poses,
        attempts,
        poi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::SceneObject;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_fov(64, 48, 60f64.to_radians())
    }

    fn scene_with_block(at: Vec3) -> (Scene, ObjectId) {
        let mut scene = Scene::new();
        let mut object = SceneObject::new("block", Arc::new(Mesh::plane("block")));
        object.transform = Transform::from_translation(at).with_scale(Vec3::splat(0.1));
        let id = scene.add_object(object);
        (scene, id)
    }

    #[test]
    fn test_rotation_from_forward_vec_looks_along_forward() {
        let forward = Vec3::new(1.0, 1.0, -1.0);
        let rot = rotation_from_forward_vec(forward, 0.0);
        let pose = CameraPose::new(build_transformation_mat(Vec3::ZERO, rot));
        assert!(pose.forward().abs_diff_eq(forward.normalize(), 1e-5));
        // Up vector stays in the vertical plane through the viewing axis
        let up = rot.y_axis;
        assert!(up.z > 0.0);
        assert_relative_eq!(up.dot(forward.cross(Vec3::Z)), 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_inplane_rotation_keeps_forward() {
        let forward = Vec3::new(0.3, -0.2, -1.0);
        let a = rotation_from_forward_vec(forward, 0.0);
        let b = rotation_from_forward_vec(forward, 0.5);
        assert!((-b.z_axis).abs_diff_eq(forward.normalize(), 1e-5));
        assert_relative_eq!(a.y_axis.angle_between(b.y_axis), 0.5, epsilon = 1e-4);
    }

    #[test]
    fn test_build_transformation_mat() {
        let rot = Mat3::from_rotation_x(0.3);
        let m = build_transformation_mat(Vec3::new(1.0, 2.0, 3.0), rot);
        let pose = CameraPose::new(m);
        assert_eq!(pose.location(), Vec3::new(1.0, 2.0, 3.0));
        assert!(pose.rotation().abs_diff_eq(rot, 1e-6));
    }

    #[test]
    fn test_opencv_conversion_roundtrip() {
        let pose = CameraPose::new(build_transformation_mat(
            Vec3::new(0.5, -0.5, 1.0),
            rotation_from_forward_vec(Vec3::new(-0.5, 0.5, -1.0), 0.2),
        ));
        let back = CameraPose::from_world2cam_opencv(pose.world2cam_opencv());
        assert!(back.cam2world.abs_diff_eq(pose.cam2world, 1e-5));

        // The optical axis of the OpenCV frame is the viewing direction
        let cv_z = Mat3::from_mat4(pose.to_opencv()).z_axis;
        assert!(cv_z.abs_diff_eq(pose.forward(), 1e-5));
    }

    #[test]
    fn test_pixel_ray_through_center_is_forward() {
        let pose = CameraPose::new(build_transformation_mat(
            Vec3::ZERO,
            rotation_from_forward_vec(Vec3::X, 0.0),
        ));
        let intr = intrinsics();
        let ray = pose
            .pixel_ray(&intr, [intr.principal_point[0], intr.principal_point[1]])
            .normalize();
        assert!(ray.abs_diff_eq(Vec3::X, 1e-5));
        // Top image row looks upward
        let top = pose.pixel_ray(&intr, [32.0, 0.0]);
        assert!(top.z > 0.0);
    }

    #[test]
    fn test_compute_poi_picks_central_object() {
        let mut scene = Scene::new();
        let mesh = Arc::new(Mesh::plane("p"));
        let ids: Vec<_> = [Vec3::new(-1.0, 0.0, 0.0), Vec3::new(0.2, 0.0, 0.0), Vec3::new(1.0, 0.0, 0.0)]
            .iter()
            .map(|&at| {
                let mut o = SceneObject::new("o", Arc::clone(&mesh));
                o.transform = Transform::from_translation(at);
                scene.add_object(o)
            })
            .collect();
        let poi = compute_poi(&scene, &ids).unwrap();
        assert!(poi.abs_diff_eq(Vec3::new(0.2, 0.0, 0.0), 1e-6));
        assert!(matches!(
            compute_poi(&scene, &[]),
            Err(SamplingError::EmptySelection)
        ));
    }

    #[test]
    fn test_obstacle_check_min_distance() {
        let (scene, id) = scene_with_block(Vec3::ZERO);
        let bvh = SceneBvh::build(&scene, &[id]).unwrap();
        let checks = ProximityChecks {
            min: Some(0.3),
            ..Default::default()
        };
        let looking_down = |height: f32| {
            CameraPose::new(build_transformation_mat(
                Vec3::new(0.0, 0.0, height),
                rotation_from_forward_vec(Vec3::NEG_Z, 0.0),
            ))
        };

        assert!(perform_obstacle_in_view_check(&looking_down(1.0), &intrinsics(), &checks, &bvh, 10));
        assert!(!perform_obstacle_in_view_check(&looking_down(0.2), &intrinsics(), &checks, &bvh, 10));
    }

    #[test]
    fn test_obstacle_check_background_rules() {
        let (scene, id) = scene_with_block(Vec3::new(0.0, 0.0, -50.0));
        let bvh = SceneBvh::build(&scene, &[id]).unwrap();
        let pose = CameraPose::new(build_transformation_mat(
            Vec3::ZERO,
            rotation_from_forward_vec(Vec3::X, 0.0),
        ));

        // Nothing in view: passes by default, fails when background is forbidden
        assert!(perform_obstacle_in_view_check(&pose, &intrinsics(), &ProximityChecks::default(), &bvh, 4));
        let strict = ProximityChecks {
            no_background: true,
            ..Default::default()
        };
        assert!(!perform_obstacle_in_view_check(&pose, &intrinsics(), &strict, &bvh, 4));
    }

    #[test]
    fn test_sample_camera_poses_respects_min_distance() {
        let (scene, id) = scene_with_block(Vec3::new(0.0, 0.0, 0.05));
        let bvh = SceneBvh::build(&scene, &[id]).unwrap();
        let config = CameraSamplingConfig::default();
        let mut rng = StdRng::seed_from_u64(42);

        let report = sample_camera_poses(&scene, &[id], &bvh, &intrinsics(), &config, &mut rng).unwrap();
        assert_eq!(report.poses.len(), 10);
        assert!(report.attempts >= 10);
        for pose in &report.poses {
            let r = pose.location().length();
            assert!((0.8 - 1e-4..=1.2 + 1e-4).contains(&r));
            assert!(perform_obstacle_in_view_check(
                pose,
                &intrinsics(),
                &config.proximity_checks,
                &bvh,
                config.sqrt_number_of_rays
            ));
        }
    }

    #[test]
    fn test_sample_camera_poses_bounded_attempts() {
        let (scene, id) = scene_with_block(Vec3::new(0.0, 0.0, 0.05));
        let bvh = SceneBvh::build(&scene, &[id]).unwrap();
        // Minimum distance beyond the shell radius: nothing can pass
        let config = CameraSamplingConfig {
            proximity_checks: ProximityChecks {
                min: Some(5.0),
                ..Default::default()
            },
            max_attempts: 25,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(42);
        let err = sample_camera_poses(&scene, &[id], &bvh, &intrinsics(), &config, &mut rng).unwrap_err();
        assert!(matches!(
            err,
            SamplingError::CameraPosesExhausted {
                accepted: 0,
                required: 10,
                attempts: 25
            }
        ));
    }
}
