//! Summarize a written BOP chunk
//!
//! Usage:
//!   bop-inspect <chunk_dir> [--json]
//!
//! Example:
//!   bop-inspect output/bop_data/lm/train_pbr/000000

use anyhow::{Context, Result};
use bop_synth::bop::BopScene;
use clap::{Arg, ArgAction, Command};
use serde::Serialize;
use std::path::PathBuf;

/// Summary of one frame
#[derive(Debug, Clone, Serialize)]
struct FrameSummary {
    frame: u32,
    camera_location: [f32; 3],
    obj_ids: Vec<u32>,
    /// Empty when the chunk has no scene_gt_info.json
    visib_fract: Vec<f64>,
    valid_depth_pixels: usize,
    depth_range: Option<[f32; 2]>,
}

fn summarize(chunk: &BopScene) -> Result<Vec<FrameSummary>> {
    let mut frames = Vec::with_capacity(chunk.frame_count());
    for result in chunk.iter_frames() {
        let (frame, output) = result?;
        let valid: Vec<f32> = output.depth.iter().copied().filter(|d| d.is_finite()).collect();
        let depth_range = if valid.is_empty() {
            None
        } else {
            Some([
                valid.iter().copied().fold(f32::INFINITY, f32::min),
                valid.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            ])
        };
        frames.push(FrameSummary {
            frame,
            camera_location: output.camera.location().to_array(),
            obj_ids: chunk.annotations(frame).iter().map(|gt| gt.obj_id).collect(),
            visib_fract: chunk.gt_info(frame).iter().map(|info| info.visib_fract).collect(),
            valid_depth_pixels: valid.len(),
            depth_range,
        });
    }
    Ok(frames)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("bop-inspect")
        .about("Prints a summary of a train_pbr chunk written by bop-synth")
        .arg(
            Arg::new("chunk")
                .value_name("CHUNK_DIR")
                .required(true)
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the summary as JSON")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let Some(path) = matches.get_one::<PathBuf>("chunk") else {
        anyhow::bail!("missing chunk directory");
    };
    let chunk =
        BopScene::load(path).with_context(|| format!("failed to load chunk {}", path.display()))?;
    let frames = summarize(&chunk)?;

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&frames)?);
        return Ok(());
    }

    println!("{}: {} frames", chunk.root().display(), frames.len());
    for f in &frames {
        let range = f
            .depth_range
            .map(|[lo, hi]| format!("{lo:.3}..{hi:.3} m"))
            .unwrap_or_else(|| "no depth".to_string());
        println!(
            "  {:06}  camera [{:.3}, {:.3}, {:.3}]  {} objects {:?}  {} depth px ({})",
            f.frame,
            f.camera_location[0],
            f.camera_location[1],
            f.camera_location[2],
            f.obj_ids.len(),
            f.obj_ids,
            f.valid_depth_pixels,
            range
        );
    }
    Ok(())
}
