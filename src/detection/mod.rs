pub mod annotate;
pub mod decoder;
pub mod model;
pub mod preprocessing;
pub mod suppression;

use image::DynamicImage;

use crate::error::Result;

pub use decoder::decode;
pub use model::{DetectorModel, InputSize};
pub use suppression::{SuppressionMode, suppress, suppress_detections};

/// One raw output tensor of a detection network, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl RawOutput {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Self {
        Self { shape, data }
    }

    /// Build a `[rows, cols]` output from prediction rows of equal length
    pub fn from_rows(rows: &[Vec<f32>]) -> Self {
        let cols = rows.first().map(|r| r.len()).unwrap_or(0);
        let data = rows.iter().flatten().copied().collect();
        Self {
            shape: vec![rows.len(), cols],
            data,
        }
    }
}

/// A pretrained detection model that can be run on an image.
///
/// Implementations are immutable once built so a single instance can be
/// shared between threads and stages.
pub trait Detector: Send + Sync {
    /// Ordered class labels, indexed by class id
    fn labels(&self) -> &[String];

    /// Run one forward pass, returning one tensor per output layer.
    /// Fails with `InvalidImage` for zero-dimension input without running the model.
    fn infer(&self, image: &DynamicImage) -> Result<Vec<RawOutput>>;

    /// Label for a class id, falling back to the numeric id
    fn label(&self, class_id: usize) -> String {
        self.labels()
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| class_id.to_string())
    }
}
