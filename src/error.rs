use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while running images through the cascade
#[derive(Debug, Error)]
pub enum CascadeError {
    /// Zero-width or zero-height image; the item is skipped
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidImage { width: u32, height: u32 },

    /// Missing or corrupt model file; fatal at startup
    #[error("Failed to load model file {}: {reason}", path.display())]
    ModelLoad { path: PathBuf, reason: String },

    /// Raw inference output does not have the expected shape
    #[error("Malformed detector output: {0}")]
    Decode(String),

    #[error("Inference failed: {0}")]
    Inference(String),
}

impl CascadeError {
    pub fn model_load(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::ModelLoad {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether the failure only concerns the current item and its siblings can go on
    pub fn is_item_level(&self) -> bool {
        matches!(self, Self::InvalidImage { .. })
    }
}

pub type Result<T> = std::result::Result<T, CascadeError>;
