//! CPU ray-cast rendering of color and depth.
//!
//! This is a small shading loop over the parry BVH, enough to produce plausible
//! RGB-D frames without a GPU:
//!
//! - **Depth**: one ray through each pixel center, planar z-depth in meters,
//!   `f32::INFINITY` where nothing is hit (no antialiasing). The same ray gives
//!   the object visible at each pixel.
//! - **Color**: jittered rays per pixel with adaptive sampling. Sampling stops
//!   once at least `min_samples` were taken and the standard error of the pixel
//!   luminance drops below `noise_threshold`, or at `max_samples`.
//! - **Shading**: Lambert diffuse plus a GGX specular lobe driven by the material
//!   roughness and specular values, lit by point lights and by emissive objects
//!   (sampled as two-sided area lights), both with hard shadow rays, plus a
//!   constant ambient term.
//!
//! Image rows are rendered in parallel with rayon. Every row has its own RNG
//! seeded from the frame seed and the row index, so the output does not depend
//! on thread scheduling.

use bevy::math::{Mat3, Mat4, Vec2, Vec3};
use image::{Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::sync::Arc;
use thiserror::Error;

use crate::bvh::{BvhError, RayHit, SceneBvh};
use crate::camera::CameraPose;
use crate::mesh::Mesh;
use crate::scene::{BaseColor, Material, ObjectId, Scene};
use crate::CameraIntrinsics;

/// Offset along the normal for shadow ray origins.
const SHADOW_EPSILON: f32 = 1e-4;

/// Base color used for objects without a material.
const DEFAULT_ALBEDO: Vec3 = Vec3::splat(0.8);

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("invalid render config: {0}")]
    InvalidConfig(String),

    #[error("nothing to render: {0}")]
    EmptyScene(#[from] BvhError),

    #[error("image size {width}x{height} is empty")]
    EmptyImage { width: u32, height: u32 },
}

/// Sampling and shading parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Upper bound of color samples per pixel (default: 50)
    pub max_samples: u32,
    /// Samples taken before the noise test may stop a pixel (default: 4)
    pub min_samples: u32,
    /// Standard error of pixel luminance below which sampling stops (default: 0.01)
    pub noise_threshold: f32,
    /// Area light samples per shading point and emissive object (default: 2)
    pub light_samples: u32,
    /// Constant ambient radiance, linear RGB (default: 0.05 grey)
    pub ambient: [f32; 3],
    /// Radiance of rays that leave the scene, linear RGB
    pub background: [f32; 3],
    /// Height of the bump relief at full displacement and white base color, meters
    pub bump_height: f32,
    /// Base seed; every frame and row derives its own
    pub seed: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_samples: 50,
            min_samples: 4,
            noise_threshold: 0.01,
            light_samples: 2,
            ambient: [0.05, 0.05, 0.05],
            background: [0.05, 0.05, 0.05],
            bump_height: 0.002,
            seed: 0,
        }
    }
}

impl RenderConfig {
    /// Few samples for smoke tests and quick looks.
    pub fn preview() -> Self {
        Self {
            max_samples: 4,
            min_samples: 1,
            noise_threshold: 0.05,
            light_samples: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), RenderError> {
        if self.max_samples == 0 {
            return Err(RenderError::InvalidConfig(
                "max_samples must be at least 1".to_string(),
            ));
        }
        if self.min_samples > self.max_samples {
            return Err(RenderError::InvalidConfig(format!(
                "min_samples {} exceeds max_samples {}",
                self.min_samples, self.max_samples
            )));
        }
        if !(self.noise_threshold >= 0.0) {
            return Err(RenderError::InvalidConfig(format!(
                "noise_threshold {} must be non-negative",
                self.noise_threshold
            )));
        }
        Ok(())
    }
}

/// One rendered frame.
#[derive(Clone, Debug)]
pub struct RenderOutput {
    /// sRGB pixel data in row-major order (width * height * 3 bytes)
    pub rgb: Vec<u8>,
    /// Planar depth in meters, row-major; `f32::INFINITY` where nothing was hit
    pub depth: Vec<f32>,
    /// Object hit by each pixel-center ray, row-major. Empty for frames read
    /// back from disk.
    pub instances: Vec<Option<ObjectId>>,
    pub width: u32,
    pub height: u32,
    pub intrinsics: CameraIntrinsics,
    pub camera: CameraPose,
}

impl RenderOutput {
    /// Get RGB pixel at (x, y). Returns None if out of bounds.
    pub fn get_rgb(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = ((y * self.width + x) * 3) as usize;
        self.rgb.get(idx..idx + 3).map(|p| [p[0], p[1], p[2]])
    }

    /// Get depth at (x, y) in meters. Returns None if out of bounds.
    pub fn get_depth(&self, x: u32, y: u32) -> Option<f32> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.depth.get((y * self.width + x) as usize).copied()
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width, self.height, |x, y| {
            Rgb(self.get_rgb(x, y).unwrap_or([0, 0, 0]))
        })
    }

    /// Number of pixels with a finite depth.
    pub fn valid_depth_count(&self) -> usize {
        self.depth.iter().filter(|d| d.is_finite()).count()
    }

    /// Object visible at (x, y), if any.
    pub fn get_instance(&self, x: u32, y: u32) -> Option<ObjectId> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.instances.get((y * self.width + x) as usize).copied().flatten()
    }
}

/// Per-object data resolved once per renderer.
struct ShadedObject {
    mesh: Arc<Mesh>,
    /// World-space corner normals
    normals: Vec<[Vec3; 3]>,
    world: Mat4,
    material: Option<Material>,
}

/// Emissive triangles of one object in world space, for light sampling.
struct AreaLight {
    triangles: Vec<[Vec3; 3]>,
    /// Running sum of triangle areas
    cumulative: Vec<f32>,
    radiance: Vec3,
}

impl AreaLight {
    fn area(&self) -> f32 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }

    /// Uniform point on the light and its unit normal.
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> (Vec3, Vec3) {
        let target = rng.gen::<f32>() * self.area();
        let t = self
            .cumulative
            .partition_point(|&c| c < target)
            .min(self.triangles.len() - 1);
        let [a, b, c] = self.triangles[t];
        let (mut u, mut v) = (rng.gen::<f32>(), rng.gen::<f32>());
        if u + v > 1.0 {
            u = 1.0 - u;
            v = 1.0 - v;
        }
        let normal = (b - a).cross(c - a).normalize_or_zero();
        (a + (b - a) * u + (c - a) * v, normal)
    }
}

/// Renders frames of a frozen scene.
///
/// Construction indexes every visible object; the scene must not change while
/// the renderer is alive.
pub struct Renderer<'a> {
    scene: &'a Scene,
    bvh: SceneBvh,
    objects: Vec<Option<ShadedObject>>,
    area_lights: Vec<AreaLight>,
    config: RenderConfig,
}

impl<'a> Renderer<'a> {
    pub fn new(scene: &'a Scene, config: &RenderConfig) -> Result<Self, RenderError> {
        config.validate()?;
        let visible = scene.visible_objects();
        let bvh = SceneBvh::build(scene, &visible)?;

        let mut objects: Vec<Option<ShadedObject>> = Vec::new();
        objects.resize_with(scene.object_count(), || None);
        let mut area_lights = Vec::new();

        for (id, object) in scene.objects().filter(|(_, o)| !o.hidden) {
            let world = object.world_matrix();
            let normal_matrix = Mat3::from_mat4(world).inverse().transpose();
            let normals = object
                .mesh
                .shading_normals(object.shading)
                .into_iter()
                .map(|corners| corners.map(|n| (normal_matrix * n).normalize_or_zero()))
                .collect();
            let material = object
                .materials
                .first()
                .map(|&m| scene.material(m).clone());

            if let Some(emission) = material.as_ref().and_then(|m| m.emission.as_ref()) {
                if emission.strength > 0.0 {
                    if let Some(light) = area_light(&object.mesh, world, emission.color, emission.strength) {
                        area_lights.push(light);
                    }
                }
            }

            objects[id.0] = Some(ShadedObject {
                mesh: Arc::clone(&object.mesh),
                normals,
                world,
                material,
            });
        }

        log::debug!(
            "Renderer indexed {} visible objects, {} area lights, {} point lights",
            visible.len(),
            area_lights.len(),
            scene.point_lights.len()
        );
        Ok(Self {
            scene,
            bvh,
            objects,
            area_lights,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render one frame. `frame` selects the noise pattern.
    pub fn render(
        &self,
        pose: &CameraPose,
        intrinsics: &CameraIntrinsics,
        frame: u64,
    ) -> Result<RenderOutput, RenderError> {
        let (width, height) = (intrinsics.width(), intrinsics.height());
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyImage { width, height });
        }
        let origin = pose.location();
        let frame_seed = mix_seed(self.config.seed, frame);

        let rows: Vec<(Vec<u8>, Vec<f32>, Vec<Option<ObjectId>>)> = (0..height)
            .into_par_iter()
            .map(|y| {
                let mut rng = StdRng::seed_from_u64(mix_seed(frame_seed, y as u64));
                let mut rgb = Vec::with_capacity(width as usize * 3);
                let mut depth = Vec::with_capacity(width as usize);
                let mut instances = Vec::with_capacity(width as usize);
                for x in 0..width {
                    let (px, py) = (x as f64, y as f64);

                    let center = pose.pixel_ray(intrinsics, [px + 0.5, py + 0.5]);
                    let hit = self.bvh.cast_ray(origin, center, f32::MAX);
                    depth.push(hit.map(|hit| hit.t).unwrap_or(f32::INFINITY));
                    instances.push(hit.map(|hit| hit.object));

                    let color = self.sample_pixel(pose, intrinsics, [px, py], &mut rng);
                    rgb.extend(color::encode_srgb8(color));
                }
                (rgb, depth, instances)
            })
            .collect();

        let pixels = (width * height) as usize;
        let mut rgb = Vec::with_capacity(pixels * 3);
        let mut depth = Vec::with_capacity(pixels);
        let mut instances = Vec::with_capacity(pixels);
        for (row_rgb, row_depth, row_instances) in rows {
            rgb.extend(row_rgb);
            depth.extend(row_depth);
            instances.extend(row_instances);
        }

        Ok(RenderOutput {
            rgb,
            depth,
            instances,
            width,
            height,
            intrinsics: intrinsics.clone(),
            camera: *pose,
        })
    }

    fn sample_pixel<R: Rng + ?Sized>(
        &self,
        pose: &CameraPose,
        intrinsics: &CameraIntrinsics,
        pixel: [f64; 2],
        rng: &mut R,
    ) -> Vec3 {
        let origin = pose.location();
        let mut stats = color::RunningStats::default();
        let mut sum = Vec3::ZERO;

        for n in 1..=self.config.max_samples {
            let jitter = [pixel[0] + rng.gen::<f64>(), pixel[1] + rng.gen::<f64>()];
            let direction = pose.pixel_ray(intrinsics, jitter).normalize();
            let radiance = self.trace(origin, direction, rng);
            sum += radiance;
            stats.push(color::luminance(radiance));

            if n >= self.config.min_samples.max(2) && stats.standard_error() < self.config.noise_threshold {
                return sum / n as f32;
            }
        }
        sum / self.config.max_samples as f32
    }

    fn trace<R: Rng + ?Sized>(&self, origin: Vec3, direction: Vec3, rng: &mut R) -> Vec3 {
        let Some(hit) = self.bvh.cast_ray(origin, direction, f32::MAX) else {
            return Vec3::from_array(self.config.background);
        };
        let Some(object) = self.objects.get(hit.object.0).and_then(Option::as_ref) else {
            return Vec3::from_array(self.config.background);
        };

        if let Some(emission) = object.material.as_ref().and_then(|m| m.emission.as_ref()) {
            if emission.strength > 0.0 {
                return Vec3::new(emission.color[0], emission.color[1], emission.color[2])
                    * emission.strength;
            }
        }

        let surface = self.surface_at(object, &hit);
        let view = -direction;
        let mut radiance = surface.albedo * Vec3::from_array(self.config.ambient);
        let shadow_origin = hit.point + hit.normal * SHADOW_EPSILON;

        for light in &self.scene.point_lights {
            let to_light = light.location - hit.point;
            let distance = to_light.length();
            if distance <= SHADOW_EPSILON {
                continue;
            }
            let wi = to_light / distance;
            if surface.normal.dot(wi) <= 0.0 || self.bvh.occluded(shadow_origin, wi, distance) {
                continue;
            }
            let intensity = Vec3::from_array(light.color) * light.energy / (4.0 * PI);
            radiance += surface.brdf_cos(wi, view) * intensity / (distance * distance);
        }

        let samples = self.config.light_samples.max(1);
        for light in &self.area_lights {
            let mut acc = Vec3::ZERO;
            for _ in 0..samples {
                let (point, light_normal) = light.sample(rng);
                let to_light = point - hit.point;
                let distance = to_light.length();
                if distance <= SHADOW_EPSILON {
                    continue;
                }
                let wi = to_light / distance;
                let cos_light = light_normal.dot(wi).abs();
                if surface.normal.dot(wi) <= 0.0 || cos_light <= 0.0 {
                    continue;
                }
                if self
                    .bvh
                    .occluded(shadow_origin, wi, distance * (1.0 - 1e-3))
                {
                    continue;
                }
                acc += surface.brdf_cos(wi, view) * light.radiance * cos_light * light.area()
                    / (distance * distance);
            }
            radiance += acc / samples as f32;
        }

        radiance
    }

    fn surface_at(&self, object: &ShadedObject, hit: &RayHit) -> Surface {
        let tri = hit.triangle as usize;
        let bary = hit.barycentric;
        let corners = object.mesh.triangles[tri];

        let mut normal = object
            .normals
            .get(tri)
            .map(|n| n[0] * bary.x + n[1] * bary.y + n[2] * bary.z)
            .unwrap_or(hit.normal)
            .normalize_or_zero();
        if normal == Vec3::ZERO {
            normal = hit.normal;
        }
        if normal.dot(hit.normal) < 0.0 {
            normal = -normal;
        }

        let uv = if object.mesh.has_uvs() {
            let [a, b, c] = corners.map(|i| object.mesh.uvs[i as usize]);
            Some(a * bary.x + b * bary.y + c * bary.z)
        } else {
            None
        };

        let Some(material) = object.material.as_ref() else {
            return Surface::diffuse(DEFAULT_ALBEDO, normal);
        };

        let albedo = match &material.base_color {
            BaseColor::Rgba(c) => Vec3::new(c[0], c[1], c[2]),
            BaseColor::Texture(image) => match uv {
                Some(uv) => color::sample_texture(image, uv),
                None => DEFAULT_ALBEDO,
            },
            BaseColor::VertexColor if object.mesh.has_colors() => {
                let [a, b, c] = corners.map(|i| {
                    color::srgb_to_linear_rgb(Vec3::from_array(object.mesh.colors[i as usize]))
                });
                a * bary.x + b * bary.y + c * bary.z
            }
            BaseColor::VertexColor => DEFAULT_ALBEDO,
        };

        // Bump relief from the base color luminance
        if let (Some(strength), BaseColor::Texture(image), Some(uv)) =
            (material.displacement, &material.base_color, uv)
        {
            let [pa, pb, pc] = object
                .mesh
                .triangle_vertices(tri)
                .map(|p| object.world.transform_point3(p));
            let [ua, ub, uc] = corners.map(|i| object.mesh.uvs[i as usize]);
            if let Some((dp_du, dp_dv)) = uv_tangents([pa, pb, pc], [ua, ub, uc]) {
                let grad = color::luminance_gradient(image, uv) * strength * self.config.bump_height;
                let surface_grad = grad.x * dp_du / dp_du.length_squared().max(f32::EPSILON)
                    + grad.y * dp_dv / dp_dv.length_squared().max(f32::EPSILON);
                let bumped = (normal - (surface_grad - normal * normal.dot(surface_grad)))
                    .normalize_or_zero();
                if bumped != Vec3::ZERO {
                    normal = bumped;
                }
            }
        }

        Surface {
            albedo,
            normal,
            roughness: material.roughness.clamp(0.0, 1.0),
            specular: material.specular.clamp(0.0, 1.0),
        }
    }
}

/// Shading inputs at a hit point.
struct Surface {
    albedo: Vec3,
    normal: Vec3,
    roughness: f32,
    specular: f32,
}

impl Surface {
    fn diffuse(albedo: Vec3, normal: Vec3) -> Self {
        Self {
            albedo,
            normal,
            roughness: 1.0,
            specular: 0.0,
        }
    }

    /// BRDF times the cosine term for light arriving along `wi`.
    fn brdf_cos(&self, wi: Vec3, wo: Vec3) -> Vec3 {
        let n = self.normal;
        let n_dot_l = n.dot(wi);
        let n_dot_v = n.dot(wo).max(1e-4);
        if n_dot_l <= 0.0 {
            return Vec3::ZERO;
        }
        let h = (wi + wo).normalize_or_zero();
        let n_dot_h = n.dot(h).max(0.0);
        let v_dot_h = wo.dot(h).max(0.0);

        let f0 = 0.08 * self.specular;
        let fresnel = f0 + (1.0 - f0) * (1.0 - v_dot_h).powi(5);
        let alpha = (self.roughness * self.roughness).max(1e-3);
        let a2 = alpha * alpha;
        let d_denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
        let distribution = a2 / (PI * d_denom * d_denom);
        let k = alpha / 2.0;
        let g1 = |x: f32| x / (x * (1.0 - k) + k);
        let geometry = g1(n_dot_l) * g1(n_dot_v);
        let specular = distribution * geometry * fresnel / (4.0 * n_dot_l * n_dot_v);

        (self.albedo * (1.0 - fresnel) / PI + Vec3::splat(specular)) * n_dot_l
    }
}

fn area_light(mesh: &Mesh, world: Mat4, color: [f32; 4], strength: f32) -> Option<AreaLight> {
    let mut triangles = Vec::with_capacity(mesh.triangle_count());
    let mut cumulative = Vec::with_capacity(mesh.triangle_count());
    let mut total = 0.0;
    for t in 0..mesh.triangle_count() {
        let corners = mesh.triangle_vertices(t).map(|p| world.transform_point3(p));
        let area = 0.5 * (corners[1] - corners[0]).cross(corners[2] - corners[0]).length();
        if area <= 0.0 {
            continue;
        }
        total += area;
        triangles.push(corners);
        cumulative.push(total);
    }
    if triangles.is_empty() {
        return None;
    }
    Some(AreaLight {
        triangles,
        cumulative,
        radiance: Vec3::new(color[0], color[1], color[2]) * strength,
    })
}

/// Partial derivatives of the position with respect to u and v.
fn uv_tangents(p: [Vec3; 3], uv: [Vec2; 3]) -> Option<(Vec3, Vec3)> {
    let (e1, e2) = (p[1] - p[0], p[2] - p[0]);
    let (d1, d2) = (uv[1] - uv[0], uv[2] - uv[0]);
    let det = d1.x * d2.y - d1.y * d2.x;
    if det.abs() < 1e-12 {
        return None;
    }
    let inv = 1.0 / det;
    Some(((e1 * d2.y - e2 * d1.y) * inv, (e2 * d1.x - e1 * d2.x) * inv))
}

/// SplitMix64 step, used to derive independent seeds.
fn mix_seed(seed: u64, stream: u64) -> u64 {
    let mut z = seed
        .wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))
        .wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

// ============================================================================
// Color Helpers
// ============================================================================

mod color {
    use bevy::math::{Vec2, Vec3};
    use image::RgbImage;

    /// Rec. 709 luminance of a linear color.
    pub fn luminance(c: Vec3) -> f32 {
        0.2126 * c.x + 0.7152 * c.y + 0.0722 * c.z
    }

    pub fn srgb_to_linear(c: f32) -> f32 {
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }

    pub fn linear_to_srgb(c: f32) -> f32 {
        if c <= 0.003_130_8 {
            c * 12.92
        } else {
            1.055 * c.powf(1.0 / 2.4) - 0.055
        }
    }

    pub fn srgb_to_linear_rgb(c: Vec3) -> Vec3 {
        Vec3::new(srgb_to_linear(c.x), srgb_to_linear(c.y), srgb_to_linear(c.z))
    }

    /// Clamp a linear color and encode it as 8-bit sRGB.
    pub fn encode_srgb8(c: Vec3) -> [u8; 3] {
        c.to_array()
            .map(|v| (linear_to_srgb(v.clamp(0.0, 1.0)) * 255.0).round() as u8)
    }

    /// Texel lookup with wrap-around; image row 0 is v = 1.
    fn texel(image: &RgbImage, x: i64, y: i64) -> Vec3 {
        let (w, h) = (image.width() as i64, image.height() as i64);
        let p = image.get_pixel(x.rem_euclid(w) as u32, y.rem_euclid(h) as u32);
        Vec3::new(p[0] as f32, p[1] as f32, p[2] as f32) / 255.0
    }

    /// Bilinear sample of an sRGB texture, returned as linear color.
    pub fn sample_texture(image: &RgbImage, uv: Vec2) -> Vec3 {
        if image.width() == 0 || image.height() == 0 {
            return Vec3::ZERO;
        }
        let x = uv.x * image.width() as f32 - 0.5;
        let y = (1.0 - uv.y) * image.height() as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = texel(image, x0, y0).lerp(texel(image, x0 + 1, y0), fx);
        let bottom = texel(image, x0, y0 + 1).lerp(texel(image, x0 + 1, y0 + 1), fx);
        srgb_to_linear_rgb(top.lerp(bottom, fy))
    }

    /// Gradient of the texture luminance with respect to (u, v), by central
    /// differences one texel apart.
    pub fn luminance_gradient(image: &RgbImage, uv: Vec2) -> Vec2 {
        if image.width() < 2 || image.height() < 2 {
            return Vec2::ZERO;
        }
        let du = 1.0 / image.width() as f32;
        let dv = 1.0 / image.height() as f32;
        let h = |p: Vec2| luminance(sample_texture(image, p));
        Vec2::new(
            (h(uv + Vec2::new(du, 0.0)) - h(uv - Vec2::new(du, 0.0))) / (2.0 * du),
            (h(uv + Vec2::new(0.0, dv)) - h(uv - Vec2::new(0.0, dv))) / (2.0 * dv),
        )
    }

    /// Welford accumulator for the mean and variance of a sample stream.
    #[derive(Default)]
    pub struct RunningStats {
        n: u32,
        mean: f32,
        m2: f32,
    }

    impl RunningStats {
        pub fn push(&mut self, x: f32) {
            self.n += 1;
            let delta = x - self.mean;
            self.mean += delta / self.n as f32;
            self.m2 += delta * (x - self.mean);
        }

        /// Standard error of the mean; infinite below two samples.
        pub fn standard_error(&self) -> f32 {
            if self.n < 2 {
                return f32::INFINITY;
            }
            let variance = self.m2 / (self.n - 1) as f32;
            (variance / self.n as f32).sqrt()
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{build_transformation_mat, rotation_from_forward_vec};
    use crate::scene::{Emission, PointLight, SceneObject};
    use bevy::prelude::Transform;

    fn intrinsics() -> CameraIntrinsics {
        CameraIntrinsics::from_fov(16, 12, 60f64.to_radians())
    }

    fn looking_down(height: f32) -> CameraPose {
        CameraPose::new(build_transformation_mat(
            Vec3::new(0.0, 0.0, height),
            rotation_from_forward_vec(Vec3::NEG_Z, 0.0),
        ))
    }

    /// Large grey ground plane at z = 0 lit by one point light.
    fn ground_scene() -> Scene {
        let mut scene = Scene::new();
        let ground = scene.create_plane("ground");
        scene.object_mut(ground).unwrap().transform = Transform::from_scale(Vec3::splat(10.0));
        scene.add_point_light(PointLight {
            name: "light".to_string(),
            location: Vec3::new(0.0, 0.0, 2.0),
            energy: 100.0,
            color: [1.0, 1.0, 1.0],
        });
        scene
    }

    #[test]
    fn test_config_validation() {
        assert!(RenderConfig::default().validate().is_ok());
        assert!(RenderConfig::preview().validate().is_ok());
        let zero = RenderConfig {
            max_samples: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(RenderError::InvalidConfig(_))));
        let inverted = RenderConfig {
            min_samples: 60,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_empty_scene_is_error() {
        let scene = Scene::new();
        assert!(matches!(
            Renderer::new(&scene, &RenderConfig::preview()),
            Err(RenderError::EmptyScene(_))
        ));
    }

    #[test]
    fn test_depth_is_planar_distance() {
        let scene = ground_scene();
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let output = renderer.render(&looking_down(1.5), &intrinsics(), 0).unwrap();

        assert_eq!(output.depth.len(), 16 * 12);
        assert_eq!(output.rgb.len(), 16 * 12 * 3);
        // Planar depth is constant over a plane parallel to the image plane
        for d in &output.depth {
            assert!((d - 1.5).abs() < 1e-3, "depth {d}");
        }
        assert_eq!(output.valid_depth_count(), 16 * 12);
    }

    #[test]
    fn test_misses_have_infinite_depth_and_background_color() {
        let scene = ground_scene();
        let config = RenderConfig::preview();
        let renderer = Renderer::new(&scene, &config).unwrap();
        // Looking straight up from below the light: nothing above
        let up = CameraPose::new(build_transformation_mat(
            Vec3::new(0.0, 0.0, 3.0),
            rotation_from_forward_vec(Vec3::Z, 0.0),
        ));
        let output = renderer.render(&up, &intrinsics(), 0).unwrap();
        assert_eq!(output.get_depth(8, 6), Some(f32::INFINITY));
        assert_eq!(output.valid_depth_count(), 0);
        let expected = color::encode_srgb8(Vec3::from_array(config.background));
        assert_eq!(output.get_rgb(8, 6), Some(expected));
    }

    #[test]
    fn test_lit_ground_is_brighter_than_ambient() {
        let scene = ground_scene();
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let output = renderer.render(&looking_down(1.0), &intrinsics(), 0).unwrap();
        let ambient_only = color::encode_srgb8(Vec3::splat(0.8 * 0.05));
        let center = output.get_rgb(8, 6).unwrap();
        assert!(center[0] > ambient_only[0] + 20, "center {center:?}");
    }

    #[test]
    fn test_point_light_shadow() {
        let mut scene = ground_scene();
        // Small occluder right below the light, above the camera
        let blocker = scene.create_plane("blocker");
        scene.object_mut(blocker).unwrap().transform =
            Transform::from_xyz(0.0, 0.0, 1.8).with_scale(Vec3::splat(0.2));
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let lit = ground_scene();
        let lit_renderer = Renderer::new(&lit, &RenderConfig::preview()).unwrap();

        let pose = CameraPose::new(build_transformation_mat(
            Vec3::new(1.0, 0.0, 1.0),
            rotation_from_forward_vec(Vec3::new(-1.0, 0.0, -1.0), 0.0),
        ));
        let shadowed = renderer.render(&pose, &intrinsics(), 0).unwrap();
        let unshadowed = lit_renderer.render(&pose, &intrinsics(), 0).unwrap();
        let (x, y) = (8, 6);
        assert!(shadowed.get_rgb(x, y).unwrap()[0] < unshadowed.get_rgb(x, y).unwrap()[0]);
    }

    #[test]
    fn test_emissive_surface_is_bright() {
        let mut scene = Scene::new();
        let plane = scene.create_plane("light_plane");
        let material = scene.object(plane).unwrap().materials[0];
        scene.material_mut(material).emission = Some(Emission {
            color: [1.0, 0.5, 0.5, 1.0],
            strength: 4.0,
        });
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let output = renderer.render(&looking_down(1.0), &intrinsics(), 0).unwrap();
        assert_eq!(output.get_rgb(8, 6), Some([255, 255, 255]));
    }

    #[test]
    fn test_hidden_objects_are_not_rendered() {
        let mut scene = ground_scene();
        let hidden = scene.add_object(SceneObject {
            hidden: true,
            transform: Transform::from_xyz(0.0, 0.0, 0.5),
            ..SceneObject::new("hidden", Arc::new(Mesh::plane("hidden")))
        });
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let output = renderer.render(&looking_down(1.0), &intrinsics(), 0).unwrap();
        assert!((output.get_depth(8, 6).unwrap() - 1.0).abs() < 1e-3);
        assert!(!scene.visible_objects().contains(&hidden));
    }

    #[test]
    fn test_render_is_deterministic() {
        let scene = ground_scene();
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let a = renderer.render(&looking_down(1.0), &intrinsics(), 3).unwrap();
        let b = renderer.render(&looking_down(1.0), &intrinsics(), 3).unwrap();
        assert_eq!(a.rgb, b.rgb);
        assert_eq!(a.depth, b.depth);
    }

    #[test]
    fn test_render_output_accessors() {
        let output = RenderOutput {
            rgb: vec![10, 20, 30, 40, 50, 60],
            depth: vec![1.0, f32::INFINITY],
            instances: vec![Some(ObjectId(3)), None],
            width: 2,
            height: 1,
            intrinsics: intrinsics(),
            camera: looking_down(1.0),
        };
        assert_eq!(output.get_rgb(1, 0), Some([40, 50, 60]));
        assert_eq!(output.get_rgb(2, 0), None);
        assert_eq!(output.get_depth(0, 0), Some(1.0));
        assert_eq!(output.get_depth(0, 1), None);
        assert_eq!(output.to_rgb_image().get_pixel(0, 0).0, [10, 20, 30]);
        assert_eq!(output.valid_depth_count(), 1);
        assert_eq!(output.get_instance(0, 0), Some(ObjectId(3)));
        assert_eq!(output.get_instance(1, 0), None);
        assert_eq!(output.get_instance(0, 1), None);
    }

    #[test]
    fn test_instance_map_follows_depth_ray() {
        let mut scene = ground_scene();
        let ground = ObjectId(0);
        // Small square 0.5 m above the ground, centered under the camera
        let square = scene.add_object(SceneObject {
            transform: Transform::from_xyz(0.0, 0.0, 0.5).with_scale(Vec3::splat(0.1)),
            ..SceneObject::new("square", Arc::new(Mesh::plane("square")))
        });
        let renderer = Renderer::new(&scene, &RenderConfig::preview()).unwrap();
        let output = renderer.render(&looking_down(1.0), &intrinsics(), 0).unwrap();

        assert_eq!(output.instances.len(), 16 * 12);
        assert_eq!(output.get_instance(8, 6), Some(square));
        assert_eq!(output.get_instance(0, 0), Some(ground));
        for (depth, instance) in output.depth.iter().zip(&output.instances) {
            let expected = if *instance == Some(square) { 0.5 } else { 1.0 };
            assert!((depth - expected).abs() < 1e-3);
        }
    }
}
