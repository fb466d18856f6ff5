//! Rigid-body settling on top of `rapier3d`.
//!
//! Objects with [`RigidBodySettings`] are mirrored into a rapier world, stepped
//! until every active body has come to rest (or the time budget runs out), and
//! the final poses are written back to the scene. Afterwards the rigid bodies are
//! removed so that render-time transforms stay frozen.

use bevy::math::{Quat, Vec3};
use bevy::prelude::Transform;
use rapier3d::na::{Quaternion, Translation3, UnitQuaternion};
use rapier3d::parry::query;
use rapier3d::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use thiserror::Error;

use crate::scene::{
    CollisionShape, ObjectId, RigidBodyKind, RigidBodySettings, Scene, SceneError, SceneObject,
};

#[derive(Error, Debug)]
pub enum PhysicsError {
    #[error("cannot build a {shape:?} collider for '{object}'")]
    DegenerateShape {
        object: String,
        shape: CollisionShape,
    },

    #[error("invalid physics configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Seconds simulated before the first rest check
    pub min_simulation_time: f32,
    pub max_simulation_time: f32,
    /// Seconds between rest checks
    pub check_object_interval: f32,
    /// Max movement (m) between two checks for an object to count as stopped
    pub object_stopped_location_threshold: f32,
    /// Max rotation (rad) between two checks for an object to count as stopped
    pub object_stopped_rotation_threshold: f32,
    pub fps: u32,
    pub substeps_per_frame: u32,
    pub solver_iterations: usize,
    pub gravity: [f32; 3],
    /// Minimum thickness of fixed box colliders, grown downward from the top face
    pub min_box_thickness: f32,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            min_simulation_time: 3.0,
            max_simulation_time: 10.0,
            check_object_interval: 1.0,
            object_stopped_location_threshold: 0.01,
            object_stopped_rotation_threshold: 0.1,
            fps: 24,
            substeps_per_frame: 20,
            solver_iterations: 25,
            gravity: [0.0, 0.0, -9.81],
            min_box_thickness: 0.1,
        }
    }
}

impl PhysicsConfig {
    fn validate(&self) -> Result<(), PhysicsError> {
        if self.fps == 0 || self.substeps_per_frame == 0 {
            return Err(PhysicsError::InvalidConfig(
                "fps and substeps_per_frame must be positive".to_string(),
            ));
        }
        if self.check_object_interval <= 0.0 {
            return Err(PhysicsError::InvalidConfig(
                "check_object_interval must be positive".to_string(),
            ));
        }
        if self.min_simulation_time > self.max_simulation_time {
            return Err(PhysicsError::InvalidConfig(format!(
                "min_simulation_time {} exceeds max_simulation_time {}",
                self.min_simulation_time, self.max_simulation_time
            )));
        }
        Ok(())
    }
}

/// Outcome of one settling run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SimulationReport {
    pub simulated_seconds: f32,
    pub frames: u32,
    /// All active bodies came to rest before the time budget ran out
    pub settled: bool,
    pub active_bodies: usize,
}

pub fn to_isometry(transform: &Transform) -> Isometry<Real> {
    Isometry::from_parts(
        Translation3::new(
            transform.translation.x,
            transform.translation.y,
            transform.translation.z,
        ),
        to_unit_quaternion(transform.rotation),
    )
}

pub fn to_unit_quaternion(q: Quat) -> UnitQuaternion<Real> {
    UnitQuaternion::new_normalize(Quaternion::new(q.w, q.x, q.y, q.z))
}

pub fn from_isometry(iso: &Isometry<Real>) -> (Vec3, Quat) {
    let t = iso.translation.vector;
    let r = iso.rotation;
    (
        Vec3::new(t.x, t.y, t.z),
        Quat::from_xyzw(r.i, r.j, r.k, r.w).normalize(),
    )
}

/// Blender damping is the fraction of velocity lost per second; rapier damps
/// exponentially with a rate coefficient.
fn damping_coefficient(fraction: f32) -> f32 {
    -(1.0 - fraction.clamp(0.0, 0.999)).ln()
}

/// Collider shape and its pose in world space (for fixed bodies) or relative to
/// the body (for dynamic ones).
fn collider_shape(
    object: &SceneObject,
    settings: &RigidBodySettings,
    min_box_thickness: f32,
) -> Result<(SharedShape, Isometry<Real>), PhysicsError> {
    let degenerate = || PhysicsError::DegenerateShape {
        object: object.name.clone(),
        shape: settings.collision_shape,
    };

    match (settings.collision_shape, settings.kind) {
        (CollisionShape::Box, RigidBodyKind::Passive) => {
            // World-aligned box; thin ground meshes are thickened downward
            let (min, max) = object.world_aabb();
            if !min.is_finite() || !max.is_finite() {
                return Err(degenerate());
            }
            let bottom = min.z.min(max.z - min_box_thickness);
            let half = Vec3::new(
                (max.x - min.x) / 2.0,
                (max.y - min.y) / 2.0,
                (max.z - bottom) / 2.0,
            );
            let center = Vec3::new(
                (min.x + max.x) / 2.0,
                (min.y + max.y) / 2.0,
                (max.z + bottom) / 2.0,
            );
            Ok((
                SharedShape::cuboid(half.x.max(1e-4), half.y.max(1e-4), half.z.max(1e-4)),
                Isometry::translation(center.x, center.y, center.z),
            ))
        }
        (CollisionShape::Box, RigidBodyKind::Active) => {
            let vertices = object.scaled_vertices();
            if vertices.is_empty() {
                return Err(degenerate());
            }
            let min = vertices.iter().fold(Vec3::splat(f32::INFINITY), |a, v| a.min(*v));
            let max = vertices.iter().fold(Vec3::splat(f32::NEG_INFINITY), |a, v| a.max(*v));
            let half = ((max - min) / 2.0).max(Vec3::splat(1e-4));
            let center = (min + max) / 2.0;
            Ok((
                SharedShape::cuboid(half.x, half.y, half.z),
                Isometry::translation(center.x, center.y, center.z),
            ))
        }
        (CollisionShape::ConvexHull, _) => {
            let shape = convex_hull(object).ok_or_else(degenerate)?;
            Ok((shape, Isometry::identity()))
        }
    }
}

fn convex_hull(object: &SceneObject) -> Option<SharedShape> {
    let points: Vec<Point<Real>> = object
        .scaled_vertices()
        .iter()
        .map(|v| point![v.x, v.y, v.z])
        .collect();
    SharedShape::convex_hull(&points)
}

/// Drop objects into place and freeze their final poses.
///
/// Runs at least `min_simulation_time` and at most `max_simulation_time` seconds;
/// every `check_object_interval` seconds after the minimum it stops early if no
/// active body moved more than the thresholds since the previous check. All rigid
/// bodies are removed from the scene afterwards. A zero time budget is a no-op.
pub fn simulate_physics_and_fix_final_poses(
    scene: &mut Scene,
    config: &PhysicsConfig,
) -> Result<SimulationReport, PhysicsError> {
    if config.max_simulation_time <= 0.0 {
        log::debug!("Zero simulation time, leaving poses untouched");
        return Ok(SimulationReport::default());
    }
    config.validate()?;

    let mut bodies = RigidBodySet::new();
    let mut colliders = ColliderSet::new();
    let mut active: Vec<(ObjectId, RigidBodyHandle)> = Vec::new();
    let mut with_bodies: Vec<ObjectId> = Vec::new();

    for (id, object) in scene.objects() {
        let Some(settings) = &object.rigid_body else {
            continue;
        };
        with_bodies.push(id);

        let (shape, shape_pose) = collider_shape(object, settings, config.min_box_thickness)?;
        let collider = ColliderBuilder::new(shape)
            .position(shape_pose)
            .friction(settings.friction)
            .mass(settings.mass)
            .contact_skin(settings.collision_margin)
            .build();

        match settings.kind {
            RigidBodyKind::Passive => {
                if settings.collision_shape == CollisionShape::Box {
                    colliders.insert(collider);
                } else {
                    let body = RigidBodyBuilder::fixed()
                        .position(to_isometry(&object.transform))
                        .build();
                    let handle = bodies.insert(body);
                    colliders.insert_with_parent(collider, handle, &mut bodies);
                }
            }
            RigidBodyKind::Active => {
                let body = RigidBodyBuilder::dynamic()
                    .position(to_isometry(&object.transform))
                    .linear_damping(damping_coefficient(settings.linear_damping))
                    .angular_damping(damping_coefficient(settings.angular_damping))
                    .build();
                let handle = bodies.insert(body);
                colliders.insert_with_parent(collider, handle, &mut bodies);
                active.push((id, handle));
            }
        }
    }

    let mut report = SimulationReport {
        active_bodies: active.len(),
        ..Default::default()
    };

    if !active.is_empty() {
        let mut params = IntegrationParameters {
            dt: 1.0 / (config.fps * config.substeps_per_frame) as Real,
            ..Default::default()
        };
        params.num_solver_iterations =
            NonZeroUsize::new(config.solver_iterations).unwrap_or(NonZeroUsize::MIN);

        let gravity = vector![config.gravity[0], config.gravity[1], config.gravity[2]];
        let mut pipeline = PhysicsPipeline::new();
        let mut islands = IslandManager::new();
        let mut broad_phase = DefaultBroadPhase::new();
        let mut narrow_phase = NarrowPhase::new();
        let mut impulse_joints = ImpulseJointSet::new();
        let mut multibody_joints = MultibodyJointSet::new();
        let mut ccd = CCDSolver::new();
        let mut query_pipeline = QueryPipeline::new();

        let fps = config.fps as f32;
        let max_frames = (config.max_simulation_time * fps).round() as u32;
        let min_frames = (config.min_simulation_time * fps).round() as u32;
        let check_frames = ((config.check_object_interval * fps).round() as u32).max(1);

        let snapshot = |bodies: &RigidBodySet| -> Vec<(Vec3, Quat)> {
            active
                .iter()
                .map(|(_, handle)| from_isometry(bodies[*handle].position()))
                .collect()
        };
        let mut previous = snapshot(&bodies);

        while report.frames < max_frames {
            for _ in 0..config.substeps_per_frame {
                pipeline.step(
                    &gravity,
                    &params,
                    &mut islands,
                    &mut broad_phase,
                    &mut narrow_phase,
                    &mut bodies,
                    &mut colliders,
                    &mut impulse_joints,
                    &mut multibody_joints,
                    &mut ccd,
                    Some(&mut query_pipeline),
                    &(),
                    &(),
                );
            }
            report.frames += 1;

            if report.frames % check_frames == 0 {
                let current = snapshot(&bodies);
                if report.frames >= min_frames && have_stopped(&previous, &current, config) {
                    report.settled = true;
                    break;
                }
                previous = current;
            }
        }
        report.simulated_seconds = report.frames as f32 / fps;

        for (id, handle) in &active {
            let (translation, rotation) = from_isometry(bodies[*handle].position());
            let object = scene.object_mut(*id)?;
            object.transform.translation = translation;
            object.transform.rotation = rotation;
        }
    }

    for id in with_bodies {
        scene.object_mut(id)?.rigid_body = None;
    }

    if report.settled {
        log::info!(
            "Physics settled after {:.1} s ({} active bodies)",
            report.simulated_seconds,
            report.active_bodies
        );
    } else if report.active_bodies > 0 {
        log::warn!(
            "Objects still moving after {:.1} s, using final poses",
            report.simulated_seconds
        );
    }
    Ok(report)
}

fn have_stopped(previous: &[(Vec3, Quat)], current: &[(Vec3, Quat)], config: &PhysicsConfig) -> bool {
    previous.iter().zip(current).all(|((p0, r0), (p1, r1))| {
        p0.distance(*p1) < config.object_stopped_location_threshold
            && r0.angle_between(*r1) < config.object_stopped_rotation_threshold
    })
}

/// Overlap test used while sampling initial poses.
///
/// Checks a candidate's collision shape against fixed obstacles (e.g. the ground)
/// and against objects that were already placed.
pub struct OverlapChecker {
    obstacles: Vec<(SharedShape, Isometry<Real>)>,
    hulls: HashMap<ObjectId, SharedShape>,
}

impl OverlapChecker {
    /// Obstacle colliders are built once from their rigid-body settings
    /// (a fixed convex hull if they have none).
    pub fn new(
        scene: &Scene,
        obstacles: &[ObjectId],
        config: &PhysicsConfig,
    ) -> Result<Self, PhysicsError> {
        let mut shapes = Vec::with_capacity(obstacles.len());
        for &id in obstacles {
            let object = scene.object(id)?;
            let settings = object
                .rigid_body
                .clone()
                .unwrap_or_else(|| RigidBodySettings::passive(CollisionShape::ConvexHull));
            let (shape, offset) = collider_shape(object, &settings, config.min_box_thickness)?;
            let pose = match (settings.collision_shape, settings.kind) {
                (CollisionShape::Box, RigidBodyKind::Passive) => offset,
                _ => to_isometry(&object.transform) * offset,
            };
            shapes.push((shape, pose));
        }
        Ok(Self {
            obstacles: shapes,
            hulls: HashMap::new(),
        })
    }

    fn hull(&mut self, scene: &Scene, id: ObjectId) -> Option<SharedShape> {
        if let Some(shape) = self.hulls.get(&id) {
            return Some(shape.clone());
        }
        let shape = convex_hull(scene.object(id).ok()?)?;
        self.hulls.insert(id, shape.clone());
        Some(shape)
    }

    /// True if the candidate intersects neither an obstacle nor a placed object.
    /// Objects whose hull cannot be built are treated as colliding.
    pub fn is_free(&mut self, scene: &Scene, candidate: ObjectId, placed: &[ObjectId]) -> bool {
        let (Some(shape), Ok(object)) = (self.hull(scene, candidate), scene.object(candidate)) else {
            return false;
        };
        let pose = to_isometry(&object.transform);

        let hits_obstacle = self.obstacles.iter().any(|(other, other_pose)| {
            query::intersection_test(&pose, &*shape, other_pose, &**other).unwrap_or(true)
        });
        if hits_obstacle {
            return false;
        }

        for &other_id in placed {
            let (Some(other), Ok(other_object)) = (self.hull(scene, other_id), scene.object(other_id))
            else {
                continue;
            };
            let other_pose = to_isometry(&other_object.transform);
            if query::intersection_test(&pose, &*shape, &other_pose, &*other).unwrap_or(true)
            {
                return false;
            }
        }
        true
    }
}
