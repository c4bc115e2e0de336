pub mod batch;
pub mod config;
pub mod detection;
pub mod error;
pub mod models;
pub mod pipeline;

pub use config::{CascadeConfig, ConfigOverrides, RawConfig, StageConfig};
pub use detection::{Detector, DetectorModel, RawOutput, SuppressionMode};
pub use error::CascadeError;
pub use models::{BoundingBox, Crop, Detection, Token};
pub use pipeline::{
    Cancellation, Cascade, CascadeContext, CascadeStage, DebugConfig, ImageReport, LeafOutput,
    Outcome, Region,
};
