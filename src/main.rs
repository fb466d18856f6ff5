use anyhow::{bail, Context, Result};
use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

use bop_synth::pipeline::{
    self, PipelineArgs, DEFAULT_BOP_PARENT_PATH, DEFAULT_DATASET, DEFAULT_IMAGE_DIR, DEFAULT_SCENE,
};
use bop_synth::PipelineConfig;

/// Split the positional arguments: the last one is always the output directory,
/// the others fill scene, BOP parent path, dataset name and image directory in order.
fn parse_positionals(values: &[String]) -> Result<PipelineArgs> {
    let Some((output_dir, inputs)) = values.split_last() else {
        bail!("missing output_dir");
    };
    if inputs.len() > 4 {
        bail!("expected at most 5 positional arguments, got {}", values.len());
    }
    let input = |i: usize, default: &str| inputs.get(i).map(String::as_str).unwrap_or(default).to_string();

    Ok(PipelineArgs::new(output_dir)
        .with_scene(input(0, DEFAULT_SCENE))
        .with_bop_parent_path(input(1, DEFAULT_BOP_PARENT_PATH))
        .with_dataset(input(2, DEFAULT_DATASET))
        .with_image_dir(input(3, DEFAULT_IMAGE_DIR)))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("bop-synth")
        .about("Renders a physics-settled scene of BOP objects and writes it in BOP format")
        .arg(
            Arg::new("paths")
                .value_name("PATHS")
                .help("[scene] [bop_parent_path] [bop_dataset_name] [image_dir] output_dir")
                .num_args(1..=5)
                .required(true)
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .value_name("SEED")
                .help("Seed for every random choice of the run")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("TOML file overriding pipeline parameters")
                .value_parser(clap::value_parser!(PathBuf)),
        )
        .get_matches();

    let positionals: Vec<String> = matches
        .get_many::<String>("paths")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let args = parse_positionals(&positionals)?;

    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    if let Some(&seed) = matches.get_one::<u64>("seed") {
        config.seed = Some(seed);
    }

    log::info!(
        "Scene {}, dataset '{}' under {}, textures in {}, output {}",
        args.scene.display(),
        args.bop_dataset_name,
        args.bop_parent_path.display(),
        args.image_dir.display(),
        args.output_dir.display()
    );

    let report = pipeline::run(&args, &config).context("pipeline failed")?;
    log::info!(
        "Done: {} frames from {} camera attempts, objects {:?}",
        report.camera_poses.len(),
        report.camera_attempts,
        report.category_ids
    );
    Ok(())
}
