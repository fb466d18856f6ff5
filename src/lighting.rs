//! Scene lights: an emissive ceiling plane and one point light.

use bevy::math::Vec3;
use rand::Rng;

use crate::config::LightingConfig;
use crate::sampler::{uniform, SamplingError};
use crate::scene::{Emission, ObjectId, PointLight, Scene};

/// What [`create_lights`] added to the scene.
#[derive(Clone, Debug)]
pub struct Lights {
    pub plane: ObjectId,
    pub emission: Emission,
    pub point_light: PointLight,
}

/// Add the emissive plane and the point light, each sampled once.
pub fn create_lights<R: Rng + ?Sized>(
    scene: &mut Scene,
    config: &LightingConfig,
    rng: &mut R,
) -> Result<Lights, SamplingError> {
    let plane = scene.create_plane("light_plane");
    let emission = Emission {
        color: [
            uniform(rng, config.emission_color_range[0], config.emission_color_range[1]),
            uniform(rng, config.emission_color_range[0], config.emission_color_range[1]),
            uniform(rng, config.emission_color_range[0], config.emission_color_range[1]),
            1.0,
        ],
        strength: uniform(
            rng,
            config.emission_strength_range[0],
            config.emission_strength_range[1],
        ),
    };

    // Plane was created just above; the lookup cannot miss
    if let Ok(object) = scene.object_mut(plane) {
        object.transform.translation = Vec3::from_array(config.plane_location);
        object.transform.scale = Vec3::from_array(config.plane_scale);
        if let Some(&material) = object.materials.first() {
            let material = scene.material_mut(material);
            material.name = "light_material".to_string();
            material.emission = Some(emission.clone());
        }
    }

    let point_light = PointLight {
        name: "light".to_string(),
        location: config.point_shell.sample(rng)?,
        energy: config.point_energy,
        color: [
            uniform(rng, config.point_color_range[0], config.point_color_range[1]),
            uniform(rng, config.point_color_range[0], config.point_color_range[1]),
            uniform(rng, config.point_color_range[0], config.point_color_range[1]),
        ],
    };
    scene.add_point_light(point_light.clone());

    log::info!(
        "Created light plane (strength {:.2}) and point light at {:?}",
        emission.strength,
        point_light.location
    );
    Ok(Lights {
        plane,
        emission,
        point_light,
    })
}
