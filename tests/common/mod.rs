//! Synthetic inputs for the integration tests: a ground plane with its material
//! library, a texture directory and a tiny BOP dataset of colored cubes.

#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::{Path, PathBuf};

pub const DATASET: &str = "lm";
pub const IMAGE_SIZE: (u32, u32) = (64, 48);

/// Paths of a generated fixture tree.
pub struct Fixture {
    pub scene: PathBuf,
    pub bop_parent_path: PathBuf,
    pub image_dir: PathBuf,
}

/// A 2 m x 2 m plane at z = 0 using `Material.001`.
const PLANE_OBJ: &str = "mtllib plane.mtl
o Plane
v -1.0 -1.0 0.0
v 1.0 -1.0 0.0
v 1.0 1.0 0.0
v -1.0 1.0 0.0
vt 0.0 0.0
vt 1.0 0.0
vt 1.0 1.0
vt 0.0 1.0
usemtl Material.001
f 1/1 2/2 3/3
f 1/1 3/3 4/4
";

const PLANE_MTL: &str = "newmtl Material.001
Kd 0.8 0.8 0.8
";

/// Cube with 40 mm edges, in millimeters, with per-vertex colors.
fn cube_ply(color: [u8; 3]) -> String {
    let mut ply = String::from(
        "ply
format ascii 1.0
element vertex 8
property float x
property float y
property float z
property uchar red
property uchar green
property uchar blue
element face 6
property list uchar int vertex_indices
end_header
",
    );
    for i in 0..8 {
        let x = if i & 1 == 0 { -20.0 } else { 20.0 };
        let y = if i & 2 == 0 { -20.0 } else { 20.0 };
        let z = if i & 4 == 0 { -20.0 } else { 20.0 };
        ply.push_str(&format!("{x} {y} {z} {} {} {}\n", color[0], color[1], color[2]));
    }
    ply.push_str(
        "4 0 2 3 1
4 4 5 7 6
4 0 1 5 4
4 2 6 7 3
4 0 4 6 2
4 1 3 7 5
",
    );
    ply
}

/// Write the ground, textures and a BOP dataset named [`DATASET`] under `root`.
pub fn write_fixture(root: &Path) -> Fixture {
    let ground_dir = root.join("ground");
    fs::create_dir_all(&ground_dir).unwrap();
    fs::write(ground_dir.join("plane.obj"), PLANE_OBJ).unwrap();
    fs::write(ground_dir.join("plane.mtl"), PLANE_MTL).unwrap();

    let image_dir = root.join("images");
    fs::create_dir_all(image_dir.join("nested")).unwrap();
    let texture = RgbImage::from_fn(32, 32, |x, y| {
        if (x / 8 + y / 8) % 2 == 0 {
            Rgb([180, 140, 90])
        } else {
            Rgb([90, 70, 40])
        }
    });
    texture
        .save(image_dir.join("nested").join("material_manipulation_sample_texture2.jpg"))
        .unwrap();
    // Not matching the default pattern
    texture.save(image_dir.join("unrelated.png")).unwrap();

    let bop_parent_path = root.join("bop_path");
    let models_dir = bop_parent_path.join(DATASET).join("models");
    fs::create_dir_all(&models_dir).unwrap();
    fs::write(models_dir.join("obj_000001.ply"), cube_ply([200, 40, 40])).unwrap();
    fs::write(models_dir.join("obj_000002.ply"), cube_ply([40, 40, 200])).unwrap();
    fs::write(
        models_dir.join("models_info.json"),
        r#"{"1": {"diameter": 69.3}, "2": {"diameter": 69.3}}"#,
    )
    .unwrap();
    let (width, height) = IMAGE_SIZE;
    fs::write(
        bop_parent_path.join(DATASET).join("camera.json"),
        format!(
            r#"{{"cx": {}, "cy": {}, "depth_scale": 1.0, "fx": 60.0, "fy": 60.0, "height": {height}, "width": {width}}}"#,
            width as f64 / 2.0,
            height as f64 / 2.0
        ),
    )
    .unwrap();

    Fixture {
        scene: ground_dir.join("plane.obj"),
        bop_parent_path,
        image_dir,
    }
}
