use anyhow::Result;
use image::DynamicImage;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::detection::annotate::annotate;
use crate::detection::{Detector, SuppressionMode, decode, suppress_detections};
use crate::error::{self, CascadeError};
use crate::models::{BoundingBox, Crop, Detection, Token, is_processable, provenance_name};

/// One level of the cascade: a detector and the thresholds applied to its output
pub struct CascadeStage {
    pub name: String,
    pub detector: Arc<dyn Detector>,
    pub confidence: f32,
    pub overlap_threshold: f32,
}

impl CascadeStage {
    pub fn new(
        name: impl Into<String>,
        detector: Arc<dyn Detector>,
        confidence: f32,
        overlap_threshold: f32,
    ) -> Self {
        Self {
            name: name.into(),
            detector,
            confidence,
            overlap_threshold,
        }
    }

    /// Run detector, decoder and suppressor on one image.
    ///
    /// Returns the kept detections with their candidate index, in the order
    /// the suppressor selected them.
    pub fn detect(
        &self,
        image: &DynamicImage,
        mode: SuppressionMode,
    ) -> error::Result<Vec<(usize, Detection)>> {
        if !is_processable(image) {
            return Err(CascadeError::InvalidImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let outputs = self.detector.infer(image)?;
        let candidates = decode(&outputs, image.width(), image.height(), self.confidence)?;
        let kept = suppress_detections(&candidates, self.confidence, self.overlap_threshold, mode);

        debug!(
            "{}: {} candidates, {} kept",
            self.name,
            candidates.len(),
            kept.len()
        );

        Ok(kept.into_iter().map(|i| (i, candidates[i].clone())).collect())
    }
}

/// Cooperative cancellation shared by every clone, with an optional deadline.
/// Checked between stages.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Handle sharing this flag that also expires after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            flag: self.flag.clone(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// How a cascade branch ended
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "items", rename_all = "snake_case")]
pub enum Outcome {
    /// Crops produced by an intermediate stage
    Regions(Vec<Region>),
    /// Content found by the last stage, in suppressor order
    Recognized(Vec<Token>),
    /// Nothing detected; not an error
    Empty,
    Failed { error: String },
    Cancelled,
}

impl Outcome {
    pub fn failed(error: &CascadeError) -> Self {
        Self::Failed {
            error: error.to_string(),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn regions(&self) -> &[Region] {
        match self {
            Self::Regions(regions) => regions,
            _ => &[],
        }
    }

    pub fn tokens(&self) -> &[Token] {
        match self {
            Self::Recognized(tokens) => tokens,
            _ => &[],
        }
    }

    fn collect_recognized<'a>(&'a self, owner: &'a str, out: &mut Vec<(&'a str, &'a [Token])>) {
        match self {
            Self::Regions(regions) => {
                for region in regions {
                    region.outcome.collect_recognized(&region.name, out);
                }
            }
            Self::Recognized(tokens) => out.push((owner, tokens)),
            _ => {}
        }
    }
}

/// Node of the result tree: one crop and what the next stage found in it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub name: String,
    pub stage: String,
    pub bbox: BoundingBox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub outcome: Outcome,
}

/// Result tree of one input image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageReport {
    pub name: String,
    pub outcome: Outcome,
}

impl ImageReport {
    /// Every recognized sequence with the name of the crop it was read from
    pub fn recognized(&self) -> Vec<(&str, &[Token])> {
        let mut out = Vec::new();
        self.outcome.collect_recognized(&self.name, &mut out);
        out
    }
}

/// Debug configuration for cascade execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
}

/// Destination of the crops that feed the last stage
#[derive(Clone, Debug)]
pub struct LeafOutput {
    pub dir: PathBuf,
    pub prefix: String,
}

/// Settings shared by every stage invocation
#[derive(Clone, Debug, Default)]
pub struct CascadeContext {
    pub suppression: SuppressionMode,
    pub debug: Option<DebugConfig>,
    pub leaf_output: Option<LeafOutput>,
}

/// Ordered list of stages run as a recursive tree walk over crops
pub struct Cascade {
    stages: Vec<CascadeStage>,
    context: CascadeContext,
}

impl Cascade {
    /// Create a cascade without stages
    pub fn new() -> Self {
        Self {
            stages: Vec::new(),
            context: CascadeContext::default(),
        }
    }

    pub fn with_suppression(mut self, mode: SuppressionMode) -> Self {
        self.context.suppression = mode;
        self
    }

    /// Enable debug mode with output directory.
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                return Err(anyhow::anyhow!(
                    "Debug directory is not empty: {}",
                    output_dir.display()
                ));
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.context.debug = Some(DebugConfig { output_dir });
        Ok(self)
    }

    /// Write crops that feed the last stage to `dir` as `<prefix><name>.jpg`
    pub fn with_leaf_output(mut self, dir: PathBuf, prefix: impl Into<String>) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        self.context.leaf_output = Some(LeafOutput {
            dir,
            prefix: prefix.into(),
        });
        Ok(self)
    }

    /// Append a stage; it receives the crops of the previous one
    pub fn add_stage(mut self, stage: CascadeStage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[CascadeStage] {
        &self.stages
    }

    /// Run the cascade on an image, containing any failure in the report
    pub fn run(&self, name: &str, image: &DynamicImage, cancel: &Cancellation) -> ImageReport {
        let outcome = match self.process(name, image, cancel) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                Outcome::failed(&e)
            }
        };

        ImageReport {
            name: name.to_string(),
            outcome,
        }
    }

    /// Run the cascade on an image.
    ///
    /// Fails with `InvalidImage` for a zero-dimension input and with
    /// `Decode`/`Inference` if any stage fails on any crop of this image.
    pub fn process(
        &self,
        name: &str,
        image: &DynamicImage,
        cancel: &Cancellation,
    ) -> error::Result<Outcome> {
        self.descend(0, name, image, cancel)
    }

    /// Detect with stage `stage_index` and cut out the kept regions
    pub fn detect_crops(
        &self,
        stage_index: usize,
        name: &str,
        image: &DynamicImage,
    ) -> error::Result<Vec<Crop>> {
        let Some(stage) = self.stages.get(stage_index) else {
            return Ok(Vec::new());
        };
        let kept = stage.detect(image, self.context.suppression)?;
        Ok(self.cut_crops(stage_index, name, image, kept))
    }

    fn cut_crops(
        &self,
        stage_index: usize,
        parent: &str,
        image: &DynamicImage,
        kept: Vec<(usize, Detection)>,
    ) -> Vec<Crop> {
        let mut crops = Vec::new();

        for (index, detection) in kept {
            let name = provenance_name(parent, index, &detection);
            match detection.bbox.crop(image) {
                Some(region) => crops.push(Crop {
                    name,
                    stage: stage_index,
                    detection,
                    image: region,
                }),
                None => debug!("Dropping empty crop {}", name),
            }
        }

        crops
    }

    fn descend(
        &self,
        depth: usize,
        name: &str,
        image: &DynamicImage,
        cancel: &Cancellation,
    ) -> error::Result<Outcome> {
        let Some(stage) = self.stages.get(depth) else {
            return Ok(Outcome::Empty);
        };

        if cancel.is_cancelled() {
            debug!("{}: cancelled before {}", name, stage.name);
            return Ok(Outcome::Cancelled);
        }

        let kept = stage.detect(image, self.context.suppression)?;
        self.save_debug_annotation(depth, name, image, &kept);

        if kept.is_empty() {
            return Ok(Outcome::Empty);
        }

        if depth + 1 == self.stages.len() {
            let tokens = kept
                .into_iter()
                .map(|(_, detection)| Token {
                    label: stage.detector.label(detection.class_id),
                    class_id: detection.class_id,
                    confidence: detection.confidence,
                    bbox: detection.bbox,
                })
                .collect();
            return Ok(Outcome::Recognized(tokens));
        }

        let mut regions = Vec::new();

        for crop in self.cut_crops(depth, name, image, kept) {
            self.save_debug_crop(depth, &crop);
            if depth + 2 == self.stages.len() {
                self.save_leaf(&crop);
            }

            let outcome = match self.descend(depth + 1, &crop.name, &crop.image, cancel) {
                Ok(outcome) => outcome,
                Err(e) if e.is_item_level() => {
                    warn!("Skipping {}: {}", crop.name, e);
                    Outcome::failed(&e)
                }
                Err(e) => return Err(e),
            };

            regions.push(Region {
                label: stage.detector.label(crop.detection.class_id),
                stage: stage.name.clone(),
                bbox: crop.detection.bbox,
                class_id: crop.detection.class_id,
                confidence: crop.detection.confidence,
                name: crop.name,
                outcome,
            });
        }

        if regions.is_empty() {
            Ok(Outcome::Empty)
        } else {
            Ok(Outcome::Regions(regions))
        }
    }

    fn stage_dir(&self, depth: usize) -> Option<PathBuf> {
        let debug_config = self.context.debug.as_ref()?;
        let stage = self.stages.get(depth)?;
        let dir_name = format!("{:02}_{}", depth + 1, stage.name.to_lowercase().replace(' ', "_"));
        Some(debug_config.output_dir.join(dir_name))
    }

    fn save_debug_annotation(
        &self,
        depth: usize,
        name: &str,
        image: &DynamicImage,
        kept: &[(usize, Detection)],
    ) {
        let Some(stage_dir) = self.stage_dir(depth) else {
            return;
        };

        let detections: Vec<Detection> = kept.iter().map(|(_, d)| d.clone()).collect();
        let annotated = annotate(image, &detections);
        let path = stage_dir.join(format!("{}.png", name));

        let saved = std::fs::create_dir_all(&stage_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| annotated.save(&path).map_err(anyhow::Error::from));
        match saved {
            Ok(()) => debug!("Debug: saved {}", path.display()),
            Err(e) => warn!("Failed to save debug image {}: {}", path.display(), e),
        }
    }

    fn save_debug_crop(&self, depth: usize, crop: &Crop) {
        let Some(stage_dir) = self.stage_dir(depth) else {
            return;
        };

        let crops_dir = stage_dir.join("crops");
        let path = crops_dir.join(format!("{}.png", crop.name));

        let saved = std::fs::create_dir_all(&crops_dir)
            .map_err(anyhow::Error::from)
            .and_then(|_| crop.image.to_rgb8().save(&path).map_err(anyhow::Error::from));
        if let Err(e) = saved {
            warn!("Failed to save debug crop {}: {}", path.display(), e);
        }
    }

    fn save_leaf(&self, crop: &Crop) {
        let Some(leaf) = &self.context.leaf_output else {
            return;
        };

        let path = leaf.dir.join(format!("{}{}.jpg", leaf.prefix, crop.name));
        match crop.image.to_rgb8().save(&path) {
            Ok(()) => debug!("Saved {}", path.display()),
            Err(e) => warn!("Failed to save {}: {}", path.display(), e),
        }
    }
}

impl Default for Cascade {
    fn default() -> Self {
        Self::new()
    }
}
