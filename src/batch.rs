use anyhow::{Context, Result};
use image::{DynamicImage, ImageReader};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

use crate::pipeline::{Cancellation, Cascade, ImageReport, Outcome};

/// Options for processing a directory of images
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Number of images processed concurrently
    pub jobs: usize,
    /// Per-image time limit, checked between stages
    pub timeout: Option<Duration>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            jobs: 1,
            timeout: None,
        }
    }
}

fn is_jpeg(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"))
}

/// JPEG files directly inside `dir`, sorted by path
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read input directory {}", dir.display()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && is_jpeg(&path) {
            paths.push(path);
        }
    }

    paths.sort();
    Ok(paths)
}

/// Root provenance name of an input file: its name without extension
pub fn image_name(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn load_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .decode()
        .map_err(|e| anyhow::anyhow!("Failed to decode image: {}", e))
}

fn process_path(
    cascade: &Cascade,
    path: &Path,
    options: &BatchOptions,
    cancel: &Cancellation,
) -> ImageReport {
    let name = image_name(path);
    info!("Processing {}", path.display());

    let image = match load_image(path) {
        Ok(image) => image,
        Err(e) => {
            warn!("Skipping {}: {}", path.display(), e);
            return ImageReport {
                name,
                outcome: Outcome::Failed {
                    error: e.to_string(),
                },
            };
        }
    };

    let cancel = match options.timeout {
        Some(timeout) => cancel.with_timeout(timeout),
        None => cancel.clone(),
    };

    cascade.run(&name, &image, &cancel)
}

/// Run the cascade over every path. One image failing never stops the others.
/// Reports are returned in the order of `paths`.
pub fn run_batch(
    cascade: &Cascade,
    paths: &[PathBuf],
    options: &BatchOptions,
    cancel: &Cancellation,
) -> Result<Vec<ImageReport>> {
    if options.jobs <= 1 {
        return Ok(paths
            .iter()
            .map(|path| process_path(cascade, path, options, cancel))
            .collect());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.jobs)
        .build()
        .context("Failed to build worker pool")?;

    Ok(pool.install(|| {
        paths
            .par_iter()
            .map(|path| process_path(cascade, path, options, cancel))
            .collect()
    }))
}
