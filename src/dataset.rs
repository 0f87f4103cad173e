//! Source folder handling: image discovery, sampling and ground truth lookup.

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, warn};

use crate::core::error::{BenchError, TaskError};

pub const IMAGE_EXTENSION: &str = "png";
pub const GROUND_TRUTH_SUFFIX: &str = "gt.txt";

/// Lists the `*.png` files directly inside `source`, sorted by path.
pub fn discover_images(source: &Path) -> Result<Vec<PathBuf>, BenchError> {
    let entries = fs::read_dir(source).map_err(|e| {
        BenchError::config(format!("cannot read source folder {}: {e}", source.display()))
    })?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| BenchError::config(format!("cannot list {}: {e}", source.display())))?
            .path();
        let is_png = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(IMAGE_EXTENSION))
            .unwrap_or(false);
        if is_png && path.is_file() {
            images.push(path);
        }
    }
    images.sort();

    if images.is_empty() {
        return Err(BenchError::config(format!(
            "no images found in {}",
            source.display()
        )));
    }
    debug!(count = images.len(), source = %source.display(), "discovered images");
    Ok(images)
}

/// Picks `count` distinct images at random. When fewer are available all of
/// them are used. A seed makes the choice reproducible.
pub fn select_images(mut images: Vec<PathBuf>, count: usize, seed: Option<u64>) -> Vec<PathBuf> {
    if images.len() < count {
        warn!(
            available = images.len(),
            requested = count,
            "fewer images than requested, processing all of them"
        );
    }
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    images.shuffle(&mut rng);
    images.truncate(count);
    images
}

/// Ground truth path for an image: `name.png` maps to `name.gt.txt`.
///
/// One inner extension is replaced as well, so `0001.nrm.png` also maps to
/// `0001.gt.txt`.
pub fn ground_truth_path(image: &Path) -> PathBuf {
    image
        .with_extension("")
        .with_extension("")
        .with_extension(GROUND_TRUTH_SUFFIX)
}

/// Reads the raw ground truth for `image`. Newline handling is left to
/// [`crate::metrics::score`].
pub fn read_ground_truth(image: &Path) -> Result<String, TaskError> {
    let path = ground_truth_path(image);
    fs::read_to_string(&path).map_err(|source| TaskError::MissingGroundTruth { path, source })
}

/// Output folder for a source: the source's normal path components placed
/// under `root`, so absolute and `./`-prefixed sources land in the same place.
pub fn output_folder(root: &Path, source: &Path) -> PathBuf {
    use std::path::Component;

    let mut folder = root.to_path_buf();
    for component in source.components() {
        if let Component::Normal(part) = component {
            folder.push(part);
        }
    }
    folder
}

/// Human-friendly name of a source folder, used in summaries.
pub fn source_name(source: &Path) -> String {
    source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| source.display().to_string())
}
