//! In-memory scene: objects, shared materials and point lights.
//!
//! Objects reference their mesh through an `Arc` and their materials through
//! [`MaterialId`]s into the scene's material arena, so duplicated objects share
//! both without copying.

use bevy::math::{Mat4, Vec3};
use bevy::prelude::Transform;
use image::RgbImage;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::mesh::{Mesh, ShadingMode};

#[derive(Error, Debug)]
pub enum SceneError {
    #[error("no material named '{0}'")]
    MaterialNotFound(String),

    #[error("material name '{name}' is ambiguous ({count} matches)")]
    AmbiguousMaterial { name: String, count: usize },

    #[error("unknown object id {0}")]
    UnknownObject(usize),
}

/// Index of an object in its [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub usize);

/// Index of a material in its [`Scene`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub usize);

/// Source of a material's base color.
#[derive(Clone, Debug)]
pub enum BaseColor {
    /// Constant linear RGBA
    Rgba([f32; 4]),
    /// sRGB image sampled with the mesh UVs
    Texture(Arc<RgbImage>),
    /// sRGB colors stored on the mesh vertices
    VertexColor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Emission {
    /// Linear RGBA
    pub color: [f32; 4],
    pub strength: f32,
}

#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,
    pub base_color: BaseColor,
    pub roughness: f32,
    pub specular: f32,
    pub emission: Option<Emission>,
    /// Bump strength derived from the base color luminance
    pub displacement: Option<f32>,
}

impl Material {
    pub fn new(name: impl Into<String>, base_color: BaseColor) -> Self {
        Self {
            name: name.into(),
            base_color,
            roughness: 0.5,
            specular: 0.5,
            emission: None,
            displacement: None,
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emission
            .as_ref()
            .map(|e| e.strength > 0.0)
            .unwrap_or(false)
    }
}

/// Simulation role of a rigid body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RigidBodyKind {
    /// Moved by the simulation
    Active,
    /// Fixed collider
    Passive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollisionShape {
    Box,
    ConvexHull,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RigidBodySettings {
    pub kind: RigidBodyKind,
    pub collision_shape: CollisionShape,
    pub mass: f32,
    pub friction: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub collision_margin: f32,
}

impl RigidBodySettings {
    pub fn passive(collision_shape: CollisionShape) -> Self {
        Self {
            kind: RigidBodyKind::Passive,
            collision_shape,
            mass: 1.0,
            friction: 0.5,
            linear_damping: 0.04,
            angular_damping: 0.1,
            collision_margin: 0.001,
        }
    }

    pub fn active(collision_shape: CollisionShape) -> Self {
        Self {
            kind: RigidBodyKind::Active,
            ..Self::passive(collision_shape)
        }
    }
}

#[derive(Clone, Debug)]
pub struct SceneObject {
    pub name: String,
    pub mesh: Arc<Mesh>,
    pub transform: Transform,
    pub materials: Vec<MaterialId>,
    pub rigid_body: Option<RigidBodySettings>,
    pub hidden: bool,
    pub shading: ShadingMode,
    /// Free-form tags such as `bop_dataset_name` or `category_id`
    pub properties: BTreeMap<String, Value>,
}

impl SceneObject {
    pub fn new(name: impl Into<String>, mesh: Arc<Mesh>) -> Self {
        Self {
            name: name.into(),
            mesh,
            transform: Transform::IDENTITY,
            materials: Vec::new(),
            rigid_body: None,
            hidden: false,
            shading: ShadingMode::Flat,
            properties: BTreeMap::new(),
        }
    }

    pub fn set_property(&mut self, key: &str, value: impl Into<Value>) {
        self.properties.insert(key.to_string(), value.into());
    }

    pub fn property(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.property(key).and_then(Value::as_str)
    }

    pub fn property_u64(&self, key: &str) -> Option<u64> {
        self.property(key).and_then(Value::as_u64)
    }

    /// Local-to-world matrix.
    pub fn world_matrix(&self) -> Mat4 {
        self.transform.compute_matrix()
    }

    /// The eight corners of the local bounding box, in world space.
    pub fn world_bound_box(&self) -> [Vec3; 8] {
        let (min, max) = self.mesh.aabb();
        let m = self.world_matrix();
        std::array::from_fn(|i| {
            let corner = Vec3::new(
                if i & 1 == 0 { min.x } else { max.x },
                if i & 2 == 0 { min.y } else { max.y },
                if i & 4 == 0 { min.z } else { max.z },
            );
            m.transform_point3(corner)
        })
    }

    /// Axis-aligned box around the transformed vertices, as (min, max).
    pub fn world_aabb(&self) -> (Vec3, Vec3) {
        let m = self.world_matrix();
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in &self.mesh.positions {
            let w = m.transform_point3(*p);
            min = min.min(w);
            max = max.max(w);
        }
        (min, max)
    }

    /// Mesh vertices with the object scale applied, still in local axes.
    pub fn scaled_vertices(&self) -> Vec<Vec3> {
        let s = self.transform.scale;
        self.mesh.positions.iter().map(|p| *p * s).collect()
    }
}

/// Omnidirectional light.
#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    pub name: String,
    pub location: Vec3,
    /// Radiant power in watts
    pub energy: f32,
    /// Linear RGB
    pub color: [f32; 3],
}

/// Arena of everything that gets simulated and rendered.
#[derive(Clone, Debug, Default)]
pub struct Scene {
    objects: Vec<SceneObject>,
    materials: Vec<Material>,
    pub point_lights: Vec<PointLight>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, object: SceneObject) -> ObjectId {
        self.objects.push(object);
        ObjectId(self.objects.len() - 1)
    }

    pub fn object(&self, id: ObjectId) -> Result<&SceneObject, SceneError> {
        self.objects.get(id.0).ok_or(SceneError::UnknownObject(id.0))
    }

    pub fn object_mut(&mut self, id: ObjectId) -> Result<&mut SceneObject, SceneError> {
        self.objects
            .get_mut(id.0)
            .ok_or(SceneError::UnknownObject(id.0))
    }

    pub fn objects(&self) -> impl Iterator<Item = (ObjectId, &SceneObject)> {
        self.objects.iter().enumerate().map(|(i, o)| (ObjectId(i), o))
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    /// Material by id. Ids are only created by [`Scene::add_material`], so lookups cannot miss.
    pub fn material(&self, id: MaterialId) -> &Material {
        &self.materials[id.0]
    }

    pub fn material_mut(&mut self, id: MaterialId) -> &mut Material {
        &mut self.materials[id.0]
    }

    pub fn material_ids(&self) -> Vec<MaterialId> {
        (0..self.materials.len()).map(MaterialId).collect()
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    /// Find the single material with exactly this name.
    pub fn material_by_name(&self, name: &str) -> Result<MaterialId, SceneError> {
        let matches: Vec<usize> = self
            .materials
            .iter()
            .enumerate()
            .filter(|(_, m)| m.name == name)
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [] => Err(SceneError::MaterialNotFound(name.to_string())),
            [single] => Ok(MaterialId(*single)),
            _ => Err(SceneError::AmbiguousMaterial {
                name: name.to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Add a 2x2 primitive plane with a fresh default material.
    pub fn create_plane(&mut self, name: &str) -> ObjectId {
        let material = self.add_material(Material::new(
            format!("{name}_material"),
            BaseColor::Rgba([0.8, 0.8, 0.8, 1.0]),
        ));
        let mut object = SceneObject::new(name, Arc::new(Mesh::plane(name)));
        object.materials.push(material);
        self.add_object(object)
    }

    /// Copy an object; the copy shares mesh and materials with the source.
    pub fn duplicate(&mut self, id: ObjectId) -> Result<ObjectId, SceneError> {
        let copy = self.object(id)?.clone();
        Ok(self.add_object(copy))
    }

    pub fn add_point_light(&mut self, light: PointLight) {
        self.point_lights.push(light);
    }

    /// Ids of objects that take part in rendering and ray queries.
    pub fn visible_objects(&self) -> Vec<ObjectId> {
        self.objects()
            .filter(|(_, o)| !o.hidden)
            .map(|(id, _)| id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy::math::Quat;

    fn cube_mesh() -> Arc<Mesh> {
        let positions = vec![
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, 1.0, 1.0),
        ];
        Arc::new(Mesh::new("cube", positions, vec![[0, 1, 2], [0, 2, 3]]))
    }

    #[test]
    fn test_material_by_name_exact_match() {
        let mut scene = Scene::new();
        scene.add_material(Material::new("Material", BaseColor::Rgba([1.0; 4])));
        let target = scene.add_material(Material::new("Material.001", BaseColor::Rgba([1.0; 4])));

        assert_eq!(scene.material_by_name("Material.001").unwrap(), target);
        assert!(matches!(
            scene.material_by_name("Material.00"),
            Err(SceneError::MaterialNotFound(_))
        ));
    }

    #[test]
    fn test_material_by_name_ambiguous() {
        let mut scene = Scene::new();
        scene.add_material(Material::new("wood", BaseColor::VertexColor));
        scene.add_material(Material::new("wood", BaseColor::VertexColor));

        let err = scene.material_by_name("wood").unwrap_err();
        assert!(matches!(err, SceneError::AmbiguousMaterial { count: 2, .. }));
    }

    #[test]
    fn test_duplicate_shares_mesh_and_material() {
        let mut scene = Scene::new();
        let material = scene.add_material(Material::new("m", BaseColor::VertexColor));
        let mut object = SceneObject::new("obj", cube_mesh());
        object.materials.push(material);
        let original = scene.add_object(object);

        let copy = scene.duplicate(original).unwrap();
        assert_ne!(copy, original);

        let a = scene.object(original).unwrap();
        let b = scene.object(copy).unwrap();
        assert!(Arc::ptr_eq(&a.mesh, &b.mesh));
        assert_eq!(a.materials, b.materials);
        let b_material = b.materials[0];

        scene.material_mut(material).roughness = 0.1;
        assert_eq!(scene.material(b_material).roughness, 0.1);
    }

    #[test]
    fn test_world_bound_box_follows_transform() {
        let mut object = SceneObject::new("obj", cube_mesh());
        object.transform = Transform::from_xyz(1.0, 2.0, 3.0);
        let corners = object.world_bound_box();
        let center = corners.iter().copied().sum::<Vec3>() / 8.0;
        assert!((center - Vec3::new(1.0, 2.0, 3.0)).length() < 1e-5);

        object.transform.rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let (min, max) = object.world_aabb();
        assert!(((max - min) - Vec3::splat(2.0)).length() < 1e-5);
    }

    #[test]
    fn test_properties() {
        let mut object = SceneObject::new("obj", cube_mesh());
        object.set_property("bop_dataset_name", "lm");
        object.set_property("category_id", 5u64);
        assert_eq!(object.property_str("bop_dataset_name"), Some("lm"));
        assert_eq!(object.property_u64("category_id"), Some(5));
        assert_eq!(object.property_str("missing"), None);
    }

    #[test]
    fn test_create_plane_and_visibility() {
        let mut scene = Scene::new();
        let plane = scene.create_plane("light_plane");
        let hidden = scene.add_object(SceneObject {
            hidden: true,
            ..SceneObject::new("hidden", cube_mesh())
        });

        assert_eq!(scene.object(plane).unwrap().materials.len(), 1);
        assert_eq!(scene.visible_objects(), vec![plane]);
        assert!(scene.visible_objects().iter().all(|id| *id != hidden));
        assert!(matches!(
            scene.object(ObjectId(42)),
            Err(SceneError::UnknownObject(42))
        ));
    }
}
