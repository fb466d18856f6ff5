//! bop-synth: physics-settled synthetic RGB-D scenes in BOP format
//!
//! This library builds one randomized scene from a ground-plane mesh, a folder of
//! textures and a random sample of BOP benchmark objects, lets the objects fall into
//! place with a rigid-body simulation, samples camera viewpoints that keep a minimum
//! distance to every obstacle, renders color and depth, and writes the frames in the
//! BOP dataset layout.
//!
//! # Running the pipeline
//!
//! ```ignore
//! use bop_synth::{pipeline, PipelineArgs, PipelineConfig};
//!
//! let args = PipelineArgs::new("output")
//!     .with_scene("exp/physics_positioning/plane.obj")
//!     .with_bop_parent_path("exp/physics_positioning/bop_path")
//!     .with_dataset("lm")
//!     .with_image_dir("exp/physics_positioning/images");
//!
//! let config = PipelineConfig { seed: Some(7), ..Default::default() };
//! let report = pipeline::run(&args, &config)?;
//! assert_eq!(report.camera_poses.len(), 10);
//! ```
//!
//! # Engine
//!
//! The heavy lifting is delegated to ecosystem crates: `rapier3d` settles the
//! objects, its `parry3d` re-export provides the BVH and ray queries, `tobj` and
//! `ply-rs` read meshes and `image` encodes the frames. The renderer in [`render`]
//! is a thin shading loop over the parry BVH.

use bevy::math::Vec3;

pub mod batch;
pub mod bop;
pub mod bvh;
pub mod cache;
pub mod camera;
pub mod config;
pub mod error;
pub mod lighting;
pub mod mesh;
pub mod physics;
pub mod pipeline;
pub mod render;
pub mod sampler;
pub mod scene;
pub mod textures;

pub use batch::{BatchRenderer, RenderData};
pub use camera::CameraPose;
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use pipeline::{PipelineArgs, PipelineReport};
pub use render::{RenderConfig, RenderOutput};
pub use scene::{MaterialId, ObjectId, Scene};

// Re-export the math types consumers need to build poses
pub use bevy::math::{Mat3, Mat4, Quat};
pub use bevy::prelude::Transform;

/// Camera intrinsic parameters in the pinhole (OpenCV) convention.
///
/// Pixel `(u, v)` has its origin at the top-left image corner; the optical axis
/// points along +Z of the camera frame and +Y points down.
#[derive(Clone, Debug, PartialEq)]
pub struct CameraIntrinsics {
    /// Focal length in pixels (fx, fy)
    pub focal_length: [f64; 2],
    /// Principal point (cx, cy)
    pub principal_point: [f64; 2],
    /// Image dimensions (width, height)
    pub image_size: [u32; 2],
}

impl CameraIntrinsics {
    /// Build intrinsics for a centered principal point and a vertical field of view.
    pub fn from_fov(width: u32, height: u32, fov_y_radians: f64) -> Self {
        let fy = (height as f64 / 2.0) / (fov_y_radians / 2.0).tan();
        Self {
            focal_length: [fy, fy],
            principal_point: [width as f64 / 2.0, height as f64 / 2.0],
            image_size: [width, height],
        }
    }

    pub fn width(&self) -> u32 {
        self.image_size[0]
    }

    pub fn height(&self) -> u32 {
        self.image_size[1]
    }

    /// Row-major 3x3 camera matrix, as stored in BOP `cam_K` fields.
    pub fn k_matrix(&self) -> [f64; 9] {
        [
            self.focal_length[0],
            0.0,
            self.principal_point[0],
            0.0,
            self.focal_length[1],
            self.principal_point[1],
            0.0,
            0.0,
            1.0,
        ]
    }

    /// Project a point given in the OpenCV camera frame to pixel coordinates.
    pub fn project(&self, point: Vec3) -> Option<[f64; 2]> {
        if point.z <= 0.0 {
            return None;
        }
        let x = (point.x as f64 / point.z as f64) * self.focal_length[0] + self.principal_point[0];
        let y = (point.y as f64 / point.z as f64) * self.focal_length[1] + self.principal_point[1];
        Some([x, y])
    }

    /// Unproject a pixel to a point at the given depth in the OpenCV camera frame.
    pub fn unproject(&self, pixel: [f64; 2], depth: f64) -> [f64; 3] {
        let x = (pixel[0] - self.principal_point[0]) / self.focal_length[0] * depth;
        let y = (pixel[1] - self.principal_point[1]) / self.focal_length[1] * depth;
        [x, y, depth]
    }

    /// Direction of the ray through a pixel in the OpenCV camera frame, scaled so
    /// that its z component is 1 (a ray parameter then equals planar depth).
    pub fn ray_direction(&self, pixel: [f64; 2]) -> Vec3 {
        let [x, y, z] = self.unproject(pixel, 1.0);
        Vec3::new(x as f32, y as f32, z as f32)
    }
}
