//! Random position and orientation samplers.
//!
//! - [`ShellConfig::sample`]: points in a spherical shell, used for lights and cameras
//! - [`uniform_so3`]: rotations uniformly distributed on SO(3)
//! - [`sample_poses`]: rejection sampling of object poses against a validity check

use bevy::math::{Quat, Vec3};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use thiserror::Error;

use crate::scene::{ObjectId, Scene};

/// Rejection sampling budget for a single shell sample.
const MAX_SHELL_TRIES: usize = 10_000;

#[derive(Error, Debug)]
pub enum SamplingError {
    #[error("could not place object '{object}' after {tries} tries")]
    PlacementFailed { object: String, tries: usize },

    #[error("only {accepted} of {required} camera poses accepted after {attempts} attempts")]
    CameraPosesExhausted {
        accepted: usize,
        required: usize,
        attempts: usize,
    },

    #[error("invalid shell parameters: {0}")]
    InvalidShell(String),

    #[error("no objects to compute a point of interest from")]
    EmptySelection,
}

/// Uniform sample in `[low, high]`; a degenerate interval returns `low`.
pub fn uniform<R: Rng + ?Sized>(rng: &mut R, low: f32, high: f32) -> f32 {
    low + (high - low) * rng.gen::<f32>()
}

/// Componentwise uniform sample inside the box spanned by `low` and `high`.
pub fn uniform_vec3<R: Rng + ?Sized>(rng: &mut R, low: Vec3, high: Vec3) -> Vec3 {
    Vec3::new(
        uniform(rng, low.x, high.x),
        uniform(rng, low.y, high.y),
        uniform(rng, low.z, high.z),
    )
}

/// Rotation drawn uniformly from SO(3) (Shoemake's subgroup algorithm).
pub fn uniform_so3<R: Rng + ?Sized>(rng: &mut R) -> Quat {
    let u1: f32 = rng.gen();
    let u2: f32 = rng.gen();
    let u3: f32 = rng.gen();
    let a = (1.0 - u1).sqrt();
    let b = u1.sqrt();
    Quat::from_xyzw(
        a * (TAU * u2).sin(),
        a * (TAU * u2).cos(),
        b * (TAU * u3).sin(),
        b * (TAU * u3).cos(),
    )
    .normalize()
}

/// Spherical shell around a center, restricted in elevation and azimuth.
///
/// Angles are in degrees; elevation is measured from the XY plane toward +Z.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub center: [f32; 3],
    pub radius_min: f32,
    pub radius_max: f32,
    pub elevation_min: f32,
    pub elevation_max: f32,
    pub azimuth_min: f32,
    pub azimuth_max: f32,
    /// Sample uniformly in the shell volume instead of uniformly in (radius, elevation, azimuth)
    pub uniform_volume: bool,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0, 0.0],
            radius_min: 1.0,
            radius_max: 1.5,
            elevation_min: -90.0,
            elevation_max: 90.0,
            azimuth_min: -180.0,
            azimuth_max: 180.0,
            uniform_volume: false,
        }
    }
}

impl ShellConfig {
    pub fn validate(&self) -> Result<(), SamplingError> {
        if !(self.radius_min >= 0.0 && self.radius_min <= self.radius_max) {
            return Err(SamplingError::InvalidShell(format!(
                "radius range [{}, {}]",
                self.radius_min, self.radius_max
            )));
        }
        if !(-90.0..=90.0).contains(&self.elevation_min)
            || !(-90.0..=90.0).contains(&self.elevation_max)
            || self.elevation_min > self.elevation_max
        {
            return Err(SamplingError::InvalidShell(format!(
                "elevation range [{}, {}]",
                self.elevation_min, self.elevation_max
            )));
        }
        if self.azimuth_min > self.azimuth_max {
            return Err(SamplingError::InvalidShell(format!(
                "azimuth range [{}, {}]",
                self.azimuth_min, self.azimuth_max
            )));
        }
        Ok(())
    }

    /// Draw one point from the shell.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Vec3, SamplingError> {
        self.validate()?;
        let center = Vec3::from_array(self.center);

        if !self.uniform_volume {
            let el = uniform(rng, self.elevation_min, self.elevation_max).to_radians();
            let az = uniform(rng, self.azimuth_min, self.azimuth_max).to_radians();
            let direction = Vec3::new(el.cos() * az.cos(), el.cos() * az.sin(), el.sin());
            let radius = uniform(rng, self.radius_min, self.radius_max);
            return Ok(center + radius * direction);
        }

        let radius = uniform(rng, self.radius_min.powi(3), self.radius_max.powi(3)).cbrt();
        for _ in 0..MAX_SHELL_TRIES {
            let direction = random_unit_vector(rng);
            let el = direction.z.clamp(-1.0, 1.0).asin().to_degrees();
            let az = direction.y.atan2(direction.x).to_degrees();
            if (self.elevation_min..=self.elevation_max).contains(&el)
                && (self.azimuth_min..=self.azimuth_max).contains(&az)
            {
                return Ok(center + radius * direction);
            }
        }
        Err(SamplingError::InvalidShell(format!(
            "no direction within elevation [{}, {}] and azimuth [{}, {}] after {} tries",
            self.elevation_min, self.elevation_max, self.azimuth_min, self.azimuth_max, MAX_SHELL_TRIES
        )))
    }
}

fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vec3 {
    loop {
        let v = Vec3::new(
            uniform(rng, -1.0, 1.0),
            uniform(rng, -1.0, 1.0),
            uniform(rng, -1.0, 1.0),
        );
        let len_sq = v.length_squared();
        if len_sq > 1e-6 && len_sq <= 1.0 {
            return v / len_sq.sqrt();
        }
    }
}

/// Per-object pose distribution for the initial drop.
///
/// For every sample a random box is drawn first (its lower corner from
/// `[min_low, min_high]`, its upper corner from `[max_low, max_high]`), then the
/// location is drawn uniformly inside that box.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementConfig {
    pub min_low: [f32; 3],
    pub min_high: [f32; 3],
    pub max_low: [f32; 3],
    pub max_high: [f32; 3],
    pub max_tries: usize,
}

impl Default for PlacementConfig {
    fn default() -> Self {
        Self {
            min_low: [-0.3, -0.3, 0.0],
            min_high: [-0.2, -0.2, 0.0],
            max_low: [0.2, 0.2, 0.4],
            max_high: [0.3, 0.3, 0.6],
            max_tries: 1000,
        }
    }
}

impl PlacementConfig {
    pub fn sample_location<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        let min = uniform_vec3(rng, Vec3::from_array(self.min_low), Vec3::from_array(self.min_high));
        let max = uniform_vec3(rng, Vec3::from_array(self.max_low), Vec3::from_array(self.max_high));
        uniform_vec3(rng, min, max)
    }

    /// Sample a location and a uniform rotation and apply them to the object.
    pub fn apply<R: Rng + ?Sized>(&self, scene: &mut Scene, id: ObjectId, rng: &mut R) {
        let location = self.sample_location(rng);
        let rotation = uniform_so3(rng);
        if let Ok(object) = scene.object_mut(id) {
            object.transform.translation = location;
            object.transform.rotation = rotation;
        }
    }
}

/// Place every object in turn, resampling its pose until `is_valid` accepts it.
///
/// `is_valid(scene, candidate, placed)` receives the objects accepted so far in
/// this call. Returns the total number of pose draws.
pub fn sample_poses<R, F>(
    scene: &mut Scene,
    objects: &[ObjectId],
    config: &PlacementConfig,
    rng: &mut R,
    mut is_valid: F,
) -> Result<usize, SamplingError>
where
    R: Rng + ?Sized,
    F: FnMut(&Scene, ObjectId, &[ObjectId]) -> bool,
{
    let mut placed: Vec<ObjectId> = Vec::with_capacity(objects.len());
    let mut total_draws = 0;

    for &id in objects {
        let mut accepted = false;
        for attempt in 1..=config.max_tries {
            config.apply(scene, id, rng);
            total_draws += 1;
            if is_valid(scene, id, &placed) {
                log::debug!("Placed object {:?} after {} tries", id, attempt);
                accepted = true;
                break;
            }
        }
        if !accepted {
            let object = scene
                .object(id)
                .map(|o| o.name.clone())
                .unwrap_or_else(|_| format!("{:?}", id));
            return Err(SamplingError::PlacementFailed {
                object,
                tries: config.max_tries,
            });
        }
        placed.push(id);
    }

    log::info!(
        "Placed {} objects with {} pose draws",
        placed.len(),
        total_draws
    );
    Ok(total_draws)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::Mesh;
    use crate::scene::SceneObject;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn scene_with_objects(n: usize) -> (Scene, Vec<ObjectId>) {
        let mut scene = Scene::new();
        let mesh = Arc::new(Mesh::plane("p"));
        let ids = (0..n)
            .map(|i| scene.add_object(SceneObject::new(format!("obj_{i}"), Arc::clone(&mesh))))
            .collect();
        (scene, ids)
    }

    #[test]
    fn test_uniform_degenerate_interval() {
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(uniform(&mut rng, 0.0, 0.0), 0.0);
        for _ in 0..100 {
            let v = uniform(&mut rng, 0.5, 1.0);
            assert!((0.5..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_uniform_so3_is_unit_and_covers_hemispheres() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut flipped = 0;
        for _ in 0..500 {
            let q = uniform_so3(&mut rng);
            assert!((q.length() - 1.0).abs() < 1e-4);
            if (q * Vec3::Z).z < 0.0 {
                flipped += 1;
            }
        }
        // The rotated Z axis is uniform on the sphere: about half points down
        assert!(flipped > 175 && flipped < 325, "flipped = {flipped}");
    }

    #[test]
    fn test_shell_respects_bounds() {
        let shell = ShellConfig {
            center: [0.0, 0.0, 0.0],
            radius_min: 0.8,
            radius_max: 1.2,
            elevation_min: 45.0,
            elevation_max: 89.0,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(2);
        for _ in 0..500 {
            let p = shell.sample(&mut rng).unwrap();
            let r = p.length();
            assert!((0.8 - 1e-4..=1.2 + 1e-4).contains(&r), "radius {r}");
            let el = (p.z / r).asin().to_degrees();
            assert!((45.0 - 1e-2..=89.0 + 1e-2).contains(&el), "elevation {el}");
        }
    }

    #[test]
    fn test_shell_uniform_volume_respects_bounds() {
        let shell = ShellConfig {
            center: [1.0, 2.0, 3.0],
            radius_min: 1.0,
            radius_max: 1.5,
            elevation_min: 5.0,
            elevation_max: 89.0,
            uniform_volume: true,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..200 {
            let p = shell.sample(&mut rng).unwrap() - Vec3::new(1.0, 2.0, 3.0);
            assert!((1.0 - 1e-4..=1.5 + 1e-4).contains(&p.length()));
            assert!(p.z > 0.0);
        }
    }

    #[test]
    fn test_shell_invalid_ranges() {
        let mut rng = StdRng::seed_from_u64(4);
        let reversed = ShellConfig {
            radius_min: 2.0,
            radius_max: 1.0,
            ..Default::default()
        };
        assert!(matches!(
            reversed.sample(&mut rng),
            Err(SamplingError::InvalidShell(_))
        ));
        let steep = ShellConfig {
            elevation_max: 120.0,
            ..Default::default()
        };
        assert!(steep.validate().is_err());
    }

    #[test]
    fn test_placement_location_bounds() {
        let config = PlacementConfig::default();
        let mut rng = StdRng::seed_from_u64(5);
        for _ in 0..500 {
            let p = config.sample_location(&mut rng);
            assert!(p.x >= -0.3 && p.x <= 0.3);
            assert!(p.y >= -0.3 && p.y <= 0.3);
            assert!(p.z >= 0.0 && p.z <= 0.6);
        }
    }

    #[test]
    fn test_sample_poses_retries_until_valid() {
        let (mut scene, ids) = scene_with_objects(3);
        let config = PlacementConfig::default();
        let mut rng = StdRng::seed_from_u64(6);

        let mut calls = 0;
        let draws = sample_poses(&mut scene, &ids, &config, &mut rng, |scene, id, placed| {
            calls += 1;
            assert!(!placed.contains(&id));
            // Only accept poses in the upper half of the drop volume
            scene.object(id).unwrap().transform.translation.z > 0.2
        })
        .unwrap();

        assert_eq!(draws, calls);
        assert!(draws >= 3);
        for id in ids {
            assert!(scene.object(id).unwrap().transform.translation.z > 0.2);
        }
    }

    #[test]
    fn test_sample_poses_exhaustion_is_fatal() {
        let (mut scene, ids) = scene_with_objects(2);
        let config = PlacementConfig {
            max_tries: 7,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(7);

        let err = sample_poses(&mut scene, &ids, &config, &mut rng, |_, _, _| false).unwrap_err();
        match err {
            SamplingError::PlacementFailed { object, tries } => {
                assert_eq!(object, "obj_0");
                assert_eq!(tries, 7);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
