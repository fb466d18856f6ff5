//! Top-level error type of the scene pipeline.
//!
//! Each stage reports its own error enum; [`PipelineError`] wraps them so the
//! binary can print the full chain. Every variant is fatal for the run.

use thiserror::Error;

use crate::batch::BatchRenderError;
use crate::bop::BopError;
use crate::bvh::BvhError;
use crate::cache::AssetError;
use crate::config::ConfigError;
use crate::physics::PhysicsError;
use crate::render::RenderError;
use crate::sampler::SamplingError;
use crate::scene::SceneError;
use crate::textures::TextureError;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("scene error: {0}")]
    Scene(#[from] SceneError),

    #[error("texture error: {0}")]
    Texture(#[from] TextureError),

    #[error("BOP dataset error: {0}")]
    Bop(#[from] BopError),

    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("physics error: {0}")]
    Physics(#[from] PhysicsError),

    #[error("spatial index error: {0}")]
    Bvh(#[from] BvhError),

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("batch render error: {0}")]
    Batch(#[from] BatchRenderError),

    #[error("ground mesh {0} contains no objects")]
    EmptyGround(String),
}
