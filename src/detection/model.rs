use image::DynamicImage;
use rten::{Model, NodeId};
use rten_tensor::prelude::*;
use rten_tensor::{NdTensor, Tensor};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

use crate::detection::preprocessing::{self, ChannelOrder};
use crate::detection::{Detector, RawOutput};
use crate::error::{CascadeError, Result};
use crate::models::is_processable;

/// Network input resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl Default for InputSize {
    fn default() -> Self {
        Self {
            width: 448,
            height: 288,
        }
    }
}

/// Files that make up one stage's model, all named after the stage
#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub labels: PathBuf,
    pub weights: PathBuf,
    pub topology: PathBuf,
}

impl ModelFiles {
    pub fn for_stage(model_dir: &Path, stage_name: &str) -> Self {
        Self {
            labels: model_dir.join(format!("{}.names", stage_name)),
            weights: model_dir.join(format!("{}.rten", stage_name)),
            topology: model_dir.join(format!("{}.cfg", stage_name)),
        }
    }
}

/// Parse class labels, one per line. Surrounding blank lines are ignored.
pub fn parse_labels(text: &str) -> Vec<String> {
    text.trim()
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path).map_err(|e| CascadeError::model_load(path, e))?;
    let labels = parse_labels(&text);
    if labels.is_empty() {
        return Err(CascadeError::model_load(path, "no class labels"));
    }
    Ok(labels)
}

/// Read the input resolution from the `[net]` section of a Darknet config.
///
/// Returns `None` if the text has no `[net]` (or `[network]`) section.
/// Missing `width`/`height` keys fall back to the default resolution.
pub fn parse_topology(text: &str) -> Option<InputSize> {
    let mut in_net = false;
    let mut found = false;
    let mut size = InputSize::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            in_net = matches!(line, "[net]" | "[network]");
            found |= in_net;
            continue;
        }

        if !in_net {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            let value = value.trim().parse::<u32>().ok().filter(|v| *v > 0);
            match (key.trim(), value) {
                ("width", Some(v)) => size.width = v,
                ("height", Some(v)) => size.height = v,
                _ => {}
            }
        }
    }

    found.then_some(size)
}

pub fn read_topology(path: &Path) -> Result<InputSize> {
    let text = std::fs::read_to_string(path).map_err(|e| CascadeError::model_load(path, e))?;
    parse_topology(&text).ok_or_else(|| CascadeError::model_load(path, "missing [net] section"))
}

/// A loaded detection network and its labels.
/// Read-only after [`DetectorModel::load`].
pub struct DetectorModel {
    name: String,
    labels: Vec<String>,
    input_size: InputSize,
    channel_order: ChannelOrder,
    model: Model,
    input_id: NodeId,
    output_ids: Vec<NodeId>,
}

impl DetectorModel {
    /// Load the model files of `stage_name` from `model_dir`
    pub fn load(model_dir: &Path, stage_name: &str) -> Result<Self> {
        let files = ModelFiles::for_stage(model_dir, stage_name);
        info!("Loading model {} from {}", stage_name, model_dir.display());

        let labels = read_labels(&files.labels)?;
        let input_size = read_topology(&files.topology)?;

        if !files.weights.exists() {
            return Err(CascadeError::model_load(&files.weights, "file not found"));
        }
        let model = Model::load_file(&files.weights)
            .map_err(|e| CascadeError::model_load(&files.weights, e))?;

        let input_id = *model
            .input_ids()
            .first()
            .ok_or_else(|| CascadeError::model_load(&files.weights, "model has no inputs"))?;
        let output_ids = model.output_ids().to_vec();
        if output_ids.is_empty() {
            return Err(CascadeError::model_load(&files.weights, "model has no outputs"));
        }

        debug!(
            "Model {}: {} labels, input {}x{}, {} outputs",
            stage_name,
            labels.len(),
            input_size.width,
            input_size.height,
            output_ids.len()
        );

        Ok(Self {
            name: stage_name.to_string(),
            labels,
            input_size,
            channel_order: ChannelOrder::Rgb,
            model,
            input_id,
            output_ids,
        })
    }

    pub fn with_channel_order(mut self, order: ChannelOrder) -> Self {
        self.channel_order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_size(&self) -> InputSize {
        self.input_size
    }
}

impl Detector for DetectorModel {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn infer(&self, image: &DynamicImage) -> Result<Vec<RawOutput>> {
        if !is_processable(image) {
            return Err(CascadeError::InvalidImage {
                width: image.width(),
                height: image.height(),
            });
        }

        let InputSize { width, height } = self.input_size;
        let data = preprocessing::to_planar_tensor(image, width, height, self.channel_order);
        let input = NdTensor::from_data([1, 3, height as usize, width as usize], data);

        let start = Instant::now();
        let outputs = self
            .model
            .run(vec![(self.input_id, input.view().into())], &self.output_ids, None)
            .map_err(|e| CascadeError::Inference(e.to_string()))?;
        debug!("{} took {:.6} seconds", self.name, start.elapsed().as_secs_f64());

        outputs
            .into_iter()
            .map(|value| {
                let tensor: Tensor<f32> = value
                    .try_into()
                    .map_err(|_| CascadeError::Decode("output is not a f32 tensor".to_string()))?;
                Ok(RawOutput::new(tensor.shape().to_vec(), tensor.to_vec()))
            })
            .collect()
    }
}
