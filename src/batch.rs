//! Batch rendering of all accepted camera poses.
//!
//! One [`Renderer`] is built for the frozen scene and reused for every queued
//! pose, so the BVH and per-object shading data are prepared once per batch.
//! Results come back in queue order, which is the order the poses were accepted.
//!
//! # Example
//!
//! ```ignore
//! use bop_synth::{BatchRenderer, RenderConfig};
//!
//! let mut batch = BatchRenderer::new(&scene, intrinsics, &RenderConfig::default(), Default::default())?;
//! for pose in &poses {
//!     batch.queue_request(*pose)?;
//! }
//! let data = batch.render_all()?;
//! assert_eq!(data.len(), poses.len());
//! ```

use image::RgbImage;
use std::collections::VecDeque;
use thiserror::Error;

use crate::camera::CameraPose;
use crate::render::{RenderConfig, RenderError, RenderOutput, Renderer};
use crate::scene::{ObjectId, Scene};
use crate::CameraIntrinsics;

/// Configuration for batch rendering.
#[derive(Clone, Debug)]
pub struct BatchRenderConfig {
    /// Maximum number of queued poses
    pub max_batch_size: usize,
}

impl Default for BatchRenderConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 1024,
        }
    }
}

/// A single queued render.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchRenderRequest {
    pub pose: CameraPose,
    /// Position in the batch; also selects the frame's noise pattern
    pub frame: usize,
}

#[derive(Error, Debug)]
pub enum BatchRenderError {
    #[error("batch queue is full ({0} requests)")]
    QueueFull(usize),

    #[error("no renders queued")]
    EmptyQueue,

    #[error("frame {frame} failed: {source}")]
    Frame {
        frame: usize,
        #[source]
        source: RenderError,
    },

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Lifecycle of a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchState {
    /// Accepting requests, nothing rendered yet
    Idle,
    /// At least one frame rendered, more pending
    Rendering,
    /// Queue drained
    Finished,
}

/// Ordered color/depth sequences for a set of camera poses.
///
/// Index `i` of every sequence belongs to the same frame.
#[derive(Clone, Debug)]
pub struct RenderData {
    pub colors: Vec<RgbImage>,
    /// Planar depth in meters per frame, row-major; `f32::INFINITY` where nothing was hit
    pub depths: Vec<Vec<f32>>,
    /// Object visible at each pixel per frame, row-major
    pub instances: Vec<Vec<Option<ObjectId>>>,
    pub poses: Vec<CameraPose>,
    pub intrinsics: CameraIntrinsics,
}

impl RenderData {
    pub fn new(intrinsics: CameraIntrinsics) -> Self {
        Self {
            colors: Vec::new(),
            depths: Vec::new(),
            instances: Vec::new(),
            poses: Vec::new(),
            intrinsics,
        }
    }

    pub fn push(&mut self, output: RenderOutput) {
        self.colors.push(output.to_rgb_image());
        self.depths.push(output.depth);
        self.instances.push(output.instances);
        self.poses.push(output.camera);
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Renders queued camera poses of one scene.
pub struct BatchRenderer<'a> {
    renderer: Renderer<'a>,
    intrinsics: CameraIntrinsics,
    pending_requests: VecDeque<BatchRenderRequest>,
    config: BatchRenderConfig,
    state: BatchState,
    queued: usize,
    renders_processed: usize,
}

impl<'a> BatchRenderer<'a> {
    pub fn new(
        scene: &'a Scene,
        intrinsics: CameraIntrinsics,
        render_config: &RenderConfig,
        config: BatchRenderConfig,
    ) -> Result<Self, BatchRenderError> {
        Ok(Self {
            renderer: Renderer::new(scene, render_config)?,
            intrinsics,
            pending_requests: VecDeque::new(),
            config,
            state: BatchState::Idle,
            queued: 0,
            renders_processed: 0,
        })
    }

    /// Queue a pose; frames are numbered in queue order.
    pub fn queue_request(&mut self, pose: CameraPose) -> Result<(), BatchRenderError> {
        if self.pending_requests.len() >= self.config.max_batch_size {
            return Err(BatchRenderError::QueueFull(self.config.max_batch_size));
        }
        self.pending_requests.push_back(BatchRenderRequest {
            pose,
            frame: self.queued,
        });
        self.queued += 1;
        Ok(())
    }

    pub fn pending_count(&self) -> usize {
        self.pending_requests.len()
    }

    pub fn renders_processed(&self) -> usize {
        self.renders_processed
    }

    pub fn state(&self) -> BatchState {
        self.state
    }

    pub fn is_finished(&self) -> bool {
        self.pending_requests.is_empty()
    }

    /// Render the next queued pose, or `None` once the queue is drained.
    pub fn render_next(&mut self) -> Result<Option<RenderOutput>, BatchRenderError> {
        let Some(request) = self.pending_requests.pop_front() else {
            self.state = BatchState::Finished;
            return Ok(None);
        };

        let output = self
            .renderer
            .render(&request.pose, &self.intrinsics, request.frame as u64)
            .map_err(|source| BatchRenderError::Frame {
                frame: request.frame,
                source,
            })?;
        self.renders_processed += 1;
        self.state = if self.pending_requests.is_empty() {
            BatchState::Finished
        } else {
            BatchState::Rendering
        };
        log::debug!(
            "Rendered frame {} ({} valid depth pixels)",
            request.frame,
            output.valid_depth_count()
        );
        Ok(Some(output))
    }

    /// Drain the queue into ordered color/depth sequences.
    pub fn render_all(&mut self) -> Result<RenderData, BatchRenderError> {
        if self.pending_requests.is_empty() {
            return Err(BatchRenderError::EmptyQueue);
        }
        let total = self.pending_requests.len();
        let mut data = RenderData::new(self.intrinsics.clone());
        while let Some(output) = self.render_next()? {
            data.push(output);
            log::info!("Rendered {}/{} frames", data.len(), total);
        }
        Ok(data)
    }
}
