//! Asset cache for meshes and texture images.
//!
//! BOP objects are sampled with replacement, so the same model file is usually
//! requested several times per scene. The cache loads each file once and hands
//! out shared `Arc`s, which is also what makes duplicated objects share their
//! geometry.
//!
//! # Example
//!
//! ```rust,no_run
//! use bop_synth::cache::AssetCache;
//! use std::path::Path;
//!
//! let mut cache = AssetCache::new();
//! let model = Path::new("bop_path/lm/models/obj_000001.ply");
//!
//! // First request: loads from disk
//! let first = cache.mesh(model, 0.001).unwrap();
//! // Second request: cache hit, same allocation
//! let second = cache.mesh(model, 0.001).unwrap();
//! assert!(std::sync::Arc::ptr_eq(&first, &second));
//! ```

use image::RgbImage;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

use crate::mesh::{self, Mesh, MeshError};

#[derive(Error, Debug)]
pub enum AssetError {
    #[error(transparent)]
    Mesh(#[from] MeshError),

    #[error("failed to load image {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// Cache for loaded mesh and texture assets, keyed by file path.
#[derive(Debug, Clone, Default)]
pub struct AssetCache {
    /// Meshes by path and applied scale (as `f32` bits)
    meshes: HashMap<(PathBuf, u32), Arc<Mesh>>,
    textures: HashMap<PathBuf, Arc<RgbImage>>,
    hits: usize,
    misses: usize,
}

impl AssetCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a mesh (PLY or OBJ) uniformly scaled by `scale`, or return the cached copy.
    pub fn mesh(&mut self, path: &Path, scale: f32) -> Result<Arc<Mesh>, AssetError> {
        let key = (path.to_path_buf(), scale.to_bits());
        if let Some(mesh) = self.meshes.get(&key) {
            self.hits += 1;
            return Ok(Arc::clone(mesh));
        }

        self.misses += 1;
        log::debug!("Loading mesh {}", path.display());
        let mut loaded = mesh::load_mesh(path)?;
        if scale != 1.0 {
            loaded.scale(scale);
        }
        let loaded = Arc::new(loaded);
        self.meshes.insert(key, Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Load an image as 8-bit RGB, or return the cached copy.
    pub fn texture(&mut self, path: &Path) -> Result<Arc<RgbImage>, AssetError> {
        if let Some(texture) = self.textures.get(path) {
            self.hits += 1;
            return Ok(Arc::clone(texture));
        }

        self.misses += 1;
        log::debug!("Loading texture {}", path.display());
        let img = image::open(path).map_err(|source| AssetError::Image {
            path: path.to_path_buf(),
            source,
        })?;
        let texture = Arc::new(img.to_rgb8());
        self.textures.insert(path.to_path_buf(), Arc::clone(&texture));
        Ok(texture)
    }

    pub fn stats(&self) -> AssetCacheStats {
        AssetCacheStats {
            cached_meshes: self.meshes.len(),
            cached_textures: self.textures.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetCacheStats {
    /// Number of unique meshes in cache
    pub cached_meshes: usize,
    /// Number of unique textures in cache
    pub cached_textures: usize,
    pub hits: usize,
    pub misses: usize,
}
