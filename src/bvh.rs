//! World-space BVH over a set of scene objects.
//!
//! All triangles of the selected objects are merged into one parry `TriMesh`,
//! whose internal BVH answers the ray queries of the obstacle check and the
//! renderer. The index is built once after the simulation and never updated.

use bevy::math::Vec3;
use rapier3d::parry::query::{Ray, RayCast};
use rapier3d::parry::shape::{FeatureId, TriMesh, TriMeshFlags};
use rapier3d::prelude::*;
use thiserror::Error;

use crate::scene::{ObjectId, Scene, SceneError};

#[derive(Error, Debug)]
pub enum BvhError {
    #[error("cannot build a BVH without triangles")]
    Empty,

    #[error("BVH construction failed: {0}")]
    Build(String),

    #[error(transparent)]
    Scene(#[from] SceneError),
}

/// Closest intersection along a ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    /// Ray parameter: `origin + t * direction` is the hit point
    pub t: f32,
    pub point: Vec3,
    /// Geometric normal facing the ray origin
    pub normal: Vec3,
    pub object: ObjectId,
    /// Triangle index within the object's mesh
    pub triangle: u32,
    /// Barycentric weights of the triangle corners
    pub barycentric: Vec3,
}

pub struct SceneBvh {
    mesh: TriMesh,
    owners: Vec<(ObjectId, u32)>,
}

impl SceneBvh {
    /// Build the index over the given objects in their current world pose.
    pub fn build(scene: &Scene, objects: &[ObjectId]) -> Result<Self, BvhError> {
        let mut vertices: Vec<Point<Real>> = Vec::new();
        let mut indices: Vec<[u32; 3]> = Vec::new();
        let mut owners = Vec::new();

        for &id in objects {
            let object = scene.object(id)?;
            let matrix = object.world_matrix();
            let base = vertices.len() as u32;
            vertices.extend(object.mesh.positions.iter().map(|p| {
                let w = matrix.transform_point3(*p);
                point![w.x, w.y, w.z]
            }));
            for (t, tri) in object.mesh.triangles.iter().enumerate() {
                indices.push(tri.map(|i| i + base));
                owners.push((id, t as u32));
            }
        }

        if indices.is_empty() {
            return Err(BvhError::Empty);
        }

        let mesh = TriMesh::with_flags(vertices, indices, TriMeshFlags::empty())
            .map_err(|e| BvhError::Build(format!("{e:?}")))?;
        log::debug!(
            "Built BVH over {} objects, {} triangles",
            objects.len(),
            owners.len()
        );
        Ok(Self { mesh, owners })
    }

    pub fn triangle_count(&self) -> usize {
        self.owners.len()
    }

    /// Nearest hit with `t` in `(0, max_t]`. Both triangle sides are hit.
    pub fn cast_ray(&self, origin: Vec3, direction: Vec3, max_t: f32) -> Option<RayHit> {
        let ray = Ray::new(
            point![origin.x, origin.y, origin.z],
            vector![direction.x, direction.y, direction.z],
        );
        let hit = self
            .mesh
            .cast_local_ray_and_get_normal(&ray, max_t, false)?;
        let n = self.owners.len() as u32;
        let tri = match hit.feature {
            FeatureId::Face(f) => f % n,
            _ => return None,
        };

        let t = hit.time_of_impact;
        let point = origin + direction * t;
        let triangle = self.mesh.triangle(tri);
        let (a, b, c) = (to_vec3(&triangle.a), to_vec3(&triangle.b), to_vec3(&triangle.c));

        let mut normal = (b - a).cross(c - a).normalize_or_zero();
        if normal.dot(direction) > 0.0 {
            normal = -normal;
        }

        let (object, local) = self.owners[tri as usize];
        Some(RayHit {
            t,
            point,
            normal,
            object,
            triangle: local,
            barycentric: barycentric(point, a, b, c),
        })
    }

    /// True if anything is hit with `t` in `(0, max_t)`.
    pub fn occluded(&self, origin: Vec3, direction: Vec3, max_t: f32) -> bool {
        let ray = Ray::new(
            point![origin.x, origin.y, origin.z],
            vector![direction.x, direction.y, direction.z],
        );
        self.mesh.intersects_local_ray(&ray, max_t)
    }
}

fn to_vec3(p: &Point<Real>) -> Vec3 {
    Vec3::new(p.x, p.y, p.z)
}

fn barycentric(p: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Vec3 {
    let v0 = b - a;
    let v1 = c - a;
    let v2 = p - a;
    let d00 = v0.dot(v0);
    let d01 = v0.dot(v1);
    let d11 = v1.dot(v1);
    let d20 = v2.dot(v0);
    let d21 = v2.dot(v1);
    let denom = d00 * d11 - d01 * d01;
    if denom.abs() < f32::EPSILON {
        return Vec3::new(1.0, 0.0, 0.0);
    }
    let v = (d11 * d20 - d01 * d21) / denom;
    let w = (d00 * d21 - d01 * d20) / denom;
    Vec3::new(1.0 - v - w, v, w)
}
