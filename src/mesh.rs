//! Triangle meshes and the OBJ/PLY loaders feeding them.
//!
//! Ground planes come in as OBJ/MTL (parsed by `tobj`), BOP object models as PLY
//! (parsed by `ply-rs`). Both end up as an indexed [`Mesh`] with optional
//! per-vertex normals, UVs and colors.

use bevy::math::{Vec2, Vec3};
use ply_rs::parser::Parser;
use ply_rs::ply::{DefaultElement, Property};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("mesh file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse OBJ {}: {source}", path.display())]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("invalid PLY {}: {reason}", path.display())]
    Ply { path: PathBuf, reason: String },

    #[error("unsupported mesh format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    #[error("mesh {0} has no triangles")]
    Empty(String),
}

/// How shading normals are derived from the geometry.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ShadingMode {
    /// One normal per face
    Flat,
    /// Normals averaged over every face sharing a vertex
    Smooth,
    /// Smooth across edges whose dihedral angle is below the threshold, flat otherwise
    Auto { angle_deg: f32 },
}

impl Default for ShadingMode {
    fn default() -> Self {
        ShadingMode::Auto { angle_deg: 30.0 }
    }
}

/// Indexed triangle mesh in its local frame.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vec3>,
    /// Per-vertex texture coordinates (OBJ convention: v grows upward). May be empty.
    pub uvs: Vec<Vec2>,
    /// Per-vertex sRGB colors in [0, 1]. May be empty.
    pub colors: Vec<[f32; 3]>,
    pub triangles: Vec<[u32; 3]>,
}

impl Mesh {
    pub fn new(name: impl Into<String>, positions: Vec<Vec3>, triangles: Vec<[u32; 3]>) -> Self {
        Self {
            name: name.into(),
            positions,
            uvs: Vec::new(),
            colors: Vec::new(),
            triangles,
        }
    }

    /// Blender's default primitive plane: 2x2 in the XY plane, facing +Z.
    pub fn plane(name: impl Into<String>) -> Self {
        let positions = vec![
            Vec3::new(-1.0, -1.0, 0.0),
            Vec3::new(1.0, -1.0, 0.0),
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::new(-1.0, 1.0, 0.0),
        ];
        let mut mesh = Self::new(name, positions, vec![[0, 1, 2], [0, 2, 3]]);
        mesh.uvs = vec![
            Vec2::new(0.0, 0.0),
            Vec2::new(1.0, 0.0),
            Vec2::new(1.0, 1.0),
            Vec2::new(0.0, 1.0),
        ];
        mesh
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn has_uvs(&self) -> bool {
        !self.uvs.is_empty() && self.uvs.len() == self.positions.len()
    }

    pub fn has_colors(&self) -> bool {
        !self.colors.is_empty() && self.colors.len() == self.positions.len()
    }

    /// Uniformly scale all vertices (used for the millimeter to meter conversion).
    pub fn scale(&mut self, factor: f32) {
        for p in &mut self.positions {
            *p *= factor;
        }
    }

    /// Local axis-aligned bounding box as (min, max).
    pub fn aabb(&self) -> (Vec3, Vec3) {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in &self.positions {
            min = min.min(*p);
            max = max.max(*p);
        }
        if self.positions.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            (min, max)
        }
    }

    pub fn triangle_vertices(&self, tri: usize) -> [Vec3; 3] {
        self.triangles[tri].map(|i| self.positions[i as usize])
    }

    /// Unit face normal following the counter-clockwise winding.
    pub fn face_normal(&self, tri: usize) -> Vec3 {
        let [a, b, c] = self.triangle_vertices(tri);
        (b - a).cross(c - a).normalize_or_zero()
    }

    /// Per-corner shading normals for every triangle.
    pub fn shading_normals(&self, mode: ShadingMode) -> Vec<[Vec3; 3]> {
        match mode {
            ShadingMode::Flat => (0..self.triangle_count())
                .map(|t| [self.face_normal(t); 3])
                .collect(),
            ShadingMode::Smooth => self.smoothed_normals(-1.0),
            ShadingMode::Auto { angle_deg } => self.smoothed_normals(angle_deg.to_radians().cos()),
        }
    }

    fn smoothed_normals(&self, cos_limit: f32) -> Vec<[Vec3; 3]> {
        // Area-weighted face normals (cross product length is twice the area)
        let face_cross: Vec<Vec3> = (0..self.triangle_count())
            .map(|t| {
                let [a, b, c] = self.triangle_vertices(t);
                (b - a).cross(c - a)
            })
            .collect();
        let face_normals: Vec<Vec3> = face_cross.iter().map(|n| n.normalize_or_zero()).collect();

        // Weld vertices by position so UV seams do not break smoothing
        let mut weld: HashMap<[u32; 3], usize> = HashMap::new();
        let welded: Vec<usize> = self
            .positions
            .iter()
            .map(|p| {
                let next = weld.len();
                *weld.entry(p.to_array().map(f32::to_bits)).or_insert(next)
            })
            .collect();

        let mut adjacency: Vec<Vec<usize>> = vec![Vec::new(); weld.len()];
        for (t, tri) in self.triangles.iter().enumerate() {
            for &v in tri {
                adjacency[welded[v as usize]].push(t);
            }
        }

        self.triangles
            .iter()
            .enumerate()
            .map(|(t, tri)| {
                let own = face_normals[t];
                tri.map(|v| {
                    let sum: Vec3 = adjacency[welded[v as usize]]
                        .iter()
                        .filter(|&&other| face_normals[other].dot(own) >= cos_limit)
                        .map(|&other| face_cross[other])
                        .sum();
                    let n = sum.normalize_or_zero();
                    if n == Vec3::ZERO {
                        own
                    } else {
                        n
                    }
                })
            })
            .collect()
    }
}

/// Material definition read from an MTL library.
#[derive(Clone, Debug, PartialEq)]
pub struct ObjMaterial {
    pub name: String,
    pub diffuse: [f32; 3],
    pub diffuse_texture: Option<PathBuf>,
}

/// One object of an OBJ file together with its material, if any.
#[derive(Clone, Debug)]
pub struct ObjObject {
    pub mesh: Mesh,
    pub material: Option<ObjMaterial>,
}

/// Load all objects of an OBJ file, triangulated and single-indexed.
pub fn load_obj(path: &Path) -> Result<Vec<ObjObject>, MeshError> {
    if !path.exists() {
        return Err(MeshError::NotFound(path.to_path_buf()));
    }

    let (models, materials) =
        tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|source| MeshError::Obj {
            path: path.to_path_buf(),
            source,
        })?;

    let materials = match materials {
        Ok(materials) => materials,
        Err(e) => {
            log::warn!("No usable material library for {}: {}", path.display(), e);
            Vec::new()
        }
    };
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let mut objects = Vec::with_capacity(models.len());
    for model in models {
        let m = model.mesh;
        let positions: Vec<Vec3> = m
            .positions
            .chunks_exact(3)
            .map(|p| Vec3::new(p[0], p[1], p[2]))
            .collect();
        let triangles: Vec<[u32; 3]> = m
            .indices
            .chunks_exact(3)
            .map(|t| [t[0], t[1], t[2]])
            .collect();
        if triangles.is_empty() {
            log::debug!("Skipping empty OBJ object '{}'", model.name);
            continue;
        }

        let mut mesh = Mesh::new(model.name, positions, triangles);
        if m.texcoords.len() / 2 == mesh.vertex_count() {
            mesh.uvs = m
                .texcoords
                .chunks_exact(2)
                .map(|uv| Vec2::new(uv[0], uv[1]))
                .collect();
        }
        if m.vertex_color.len() / 3 == mesh.vertex_count() {
            mesh.colors = m
                .vertex_color
                .chunks_exact(3)
                .map(|c| [c[0], c[1], c[2]])
                .collect();
        }

        let material = m
            .material_id
            .and_then(|id| materials.get(id))
            .map(|mat| ObjMaterial {
                name: mat.name.clone(),
                diffuse: mat.diffuse.unwrap_or([0.8, 0.8, 0.8]),
                diffuse_texture: mat.diffuse_texture.as_ref().map(|t| base_dir.join(t)),
            });

        objects.push(ObjObject { mesh, material });
    }

    Ok(objects)
}

/// Load a PLY model (ASCII or binary) with optional vertex colors and UVs.
pub fn load_ply(path: &Path) -> Result<Mesh, MeshError> {
    if !path.exists() {
        return Err(MeshError::NotFound(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|source| MeshError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut reader = BufReader::new(file);
    let parser = Parser::<DefaultElement>::new();
    let ply = parser.read_ply(&mut reader).map_err(|source| MeshError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let invalid = |reason: &str| MeshError::Ply {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let vertices = ply
        .payload
        .get("vertex")
        .ok_or_else(|| invalid("missing vertex element"))?;
    let faces = ply
        .payload
        .get("face")
        .ok_or_else(|| invalid("missing face element"))?;

    let mut positions = Vec::with_capacity(vertices.len());
    for v in vertices {
        let (Some(x), Some(y), Some(z)) = (scalar(v, "x"), scalar(v, "y"), scalar(v, "z")) else {
            return Err(invalid("vertex without x/y/z"));
        };
        positions.push(Vec3::new(x, y, z));
    }

    let colors: Option<Vec<[f32; 3]>> = vertices
        .iter()
        .map(|v| {
            Some([
                scalar(v, "red")? / 255.0,
                scalar(v, "green")? / 255.0,
                scalar(v, "blue")? / 255.0,
            ])
        })
        .collect();

    let uvs: Option<Vec<Vec2>> = vertices
        .iter()
        .map(|v| {
            let u = scalar(v, "texture_u").or_else(|| scalar(v, "s"))?;
            let w = scalar(v, "texture_v").or_else(|| scalar(v, "t"))?;
            Some(Vec2::new(u, w))
        })
        .collect();

    let mut triangles = Vec::with_capacity(faces.len());
    for f in faces {
        let indices = list(f, "vertex_indices")
            .or_else(|| list(f, "vertex_index"))
            .ok_or_else(|| invalid("face without vertex_indices"))?;
        if indices.iter().any(|&i| i as usize >= positions.len()) {
            return Err(invalid("face index out of range"));
        }
        // Fan triangulation for polygons
        for k in 1..indices.len().saturating_sub(1) {
            triangles.push([indices[0], indices[k], indices[k + 1]]);
        }
    }

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if triangles.is_empty() {
        return Err(MeshError::Empty(name));
    }

    let mut mesh = Mesh::new(name, positions, triangles);
    if let Some(colors) = colors.filter(|c| !c.is_empty()) {
        mesh.colors = colors;
    }
    if let Some(uvs) = uvs.filter(|u| !u.is_empty()) {
        mesh.uvs = uvs;
    }
    Ok(mesh)
}

/// Load a mesh by extension. OBJ files yield their first object.
pub fn load_mesh(path: &Path) -> Result<Mesh, MeshError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ply" => load_ply(path),
        "obj" => load_obj(path)?
            .into_iter()
            .next()
            .map(|o| o.mesh)
            .ok_or_else(|| MeshError::Empty(path.display().to_string())),
        _ => Err(MeshError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn scalar(element: &DefaultElement, key: &str) -> Option<f32> {
    match element.get(key)? {
        Property::Char(v) => Some(*v as f32),
        Property::UChar(v) => Some(*v as f32),
        Property::Short(v) => Some(*v as f32),
        Property::UShort(v) => Some(*v as f32),
        Property::Int(v) => Some(*v as f32),
        Property::UInt(v) => Some(*v as f32),
        Property::Float(v) => Some(*v),
        Property::Double(v) => Some(*v as f32),
        _ => None,
    }
}

fn list(element: &DefaultElement, key: &str) -> Option<Vec<u32>> {
    match element.get(key)? {
        Property::ListChar(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUChar(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListShort(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUShort(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListInt(v) => Some(v.iter().map(|&i| i as u32).collect()),
        Property::ListUInt(v) => Some(v.clone()),
        _ => None,
    }
}
