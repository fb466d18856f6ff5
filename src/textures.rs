//! Texture discovery in the image directory.

use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum TextureError {
    #[error("no texture matching '{pattern}' under {}", dir.display())]
    NoneFound { dir: PathBuf, pattern: String },

    #[error("failed to scan texture directory: {0}")]
    Walk(#[from] walkdir::Error),
}

/// Recursively collect files under `dir` whose file name matches `pattern`.
///
/// The result is sorted so that a seeded choice is reproducible across platforms.
pub fn find_textures(dir: &Path, pattern: &str) -> Result<Vec<PathBuf>, TextureError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).follow_links(true) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if wildcard_match(pattern, &name) {
            found.push(entry.into_path());
        }
    }
    found.sort();
    log::debug!(
        "Found {} texture(s) matching '{}' in {}",
        found.len(),
        pattern,
        dir.display()
    );
    Ok(found)
}

/// Pick one texture uniformly at random.
pub fn choose_texture<'a, R: Rng + ?Sized>(
    textures: &'a [PathBuf],
    rng: &mut R,
) -> Option<&'a PathBuf> {
    textures.choose(rng)
}

/// Glob-style match of a whole file name: `*` matches any run, `?` one character.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    // Position of the last `*` and the name index it was tried at
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("texture.jpg", "texture.jpg"));
        assert!(!wildcard_match("texture.jpg", "texture.png"));
        assert!(wildcard_match("*.jpg", "wood.jpg"));
        assert!(wildcard_match("*", ""));
        assert!(wildcard_match("tex?.jpg", "tex1.jpg"));
        assert!(!wildcard_match("tex?.jpg", "tex10.jpg"));
        assert!(wildcard_match("*_texture*.jpg", "material_manipulation_sample_texture2.jpg"));
        assert!(!wildcard_match("*.jpg", "wood.jpg.bak"));
    }

    #[test]
    fn test_find_textures_recursive_and_sorted() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/nested")).unwrap();
        fs::create_dir_all(dir.path().join("a")).unwrap();
        fs::write(dir.path().join("b/nested/tex.jpg"), b"").unwrap();
        fs::write(dir.path().join("a/tex.jpg"), b"").unwrap();
        fs::write(dir.path().join("a/other.jpg"), b"").unwrap();

        let found = find_textures(dir.path(), "tex.jpg").unwrap();
        assert_eq!(
            found,
            vec![dir.path().join("a/tex.jpg"), dir.path().join("b/nested/tex.jpg")]
        );
    }

    #[test]
    fn test_find_textures_missing_dir_is_error() {
        let result = find_textures(Path::new("/nonexistent/images"), "*.jpg");
        assert!(matches!(result, Err(TextureError::Walk(_))));
    }

    #[test]
    fn test_choose_texture() {
        let mut rng = StdRng::seed_from_u64(1);
        assert!(choose_texture(&[], &mut rng).is_none());

        let textures = vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")];
        let chosen = choose_texture(&textures, &mut rng).unwrap();
        assert!(textures.contains(chosen));
    }
}
