use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::detection::SuppressionMode;
use crate::detection::preprocessing::ChannelOrder;

pub const DEFAULT_STAGES: [&str; 3] = [
    "vehicle-detection",
    "lp-detection-layout-classification",
    "lp-recognition",
];

pub const DEFAULT_CONFIDENCE: f32 = 0.5;
pub const DEFAULT_THRESHOLD: f32 = 0.3;
pub const DEFAULT_LEAF_PREFIX: &str = "plate";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: String, value: f32 },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("At least one stage must be configured")]
    NoStages,

    #[error("Stage {0} is configured more than once")]
    DuplicateStage(String),

    #[error("Override given for unknown stage {0}")]
    UnknownStage(String),
}

/// Settings of the `[yolo]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YoloSection {
    pub input_image_dir: Option<PathBuf>,
    pub darknet_model_dir: Option<PathBuf>,
    pub confidence: Option<f32>,
    pub threshold: Option<f32>,
    #[serde(default)]
    pub class_aware_nms: bool,
    pub stages: Option<Vec<String>>,
}

/// Settings of the `[output]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputSection {
    pub dir: Option<PathBuf>,
    pub leaf_prefix: Option<String>,
}

/// Per-stage settings of a `[stage."<name>"]` table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageOverride {
    pub confidence: Option<f32>,
    pub threshold: Option<f32>,
    pub channel_order: Option<ChannelOrder>,
}

/// Configuration as written in the file, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    /// Joined as a path, so a trailing separator is optional and an
    /// absolute directory ignores it
    #[serde(default)]
    pub prefix: PathBuf,
    #[serde(default)]
    pub yolo: YoloSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub stage: BTreeMap<String, StageOverride>,
}

/// Command line values that take precedence over the file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub prefix: Option<PathBuf>,
    pub input_image_dir: Option<PathBuf>,
    pub darknet_model_dir: Option<PathBuf>,
    pub confidence: Option<f32>,
    pub threshold: Option<f32>,
    pub class_aware_nms: bool,
    pub output_dir: Option<PathBuf>,
}

impl RawConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn apply(mut self, overrides: &ConfigOverrides) -> Self {
        if let Some(prefix) = &overrides.prefix {
            self.prefix = prefix.clone();
        }
        if let Some(dir) = &overrides.input_image_dir {
            self.yolo.input_image_dir = Some(dir.clone());
        }
        if let Some(dir) = &overrides.darknet_model_dir {
            self.yolo.darknet_model_dir = Some(dir.clone());
        }
        if overrides.confidence.is_some() {
            self.yolo.confidence = overrides.confidence;
        }
        if overrides.threshold.is_some() {
            self.yolo.threshold = overrides.threshold;
        }
        if overrides.class_aware_nms {
            self.yolo.class_aware_nms = true;
        }
        if let Some(dir) = &overrides.output_dir {
            self.output.dir = Some(dir.clone());
        }
        self
    }

    /// Validate and resolve into the configuration used for the run
    pub fn resolve(self) -> Result<CascadeConfig, ConfigError> {
        let input_dir = self
            .yolo
            .input_image_dir
            .ok_or(ConfigError::Missing("yolo.input_image_dir"))?;
        let model_dir = self
            .yolo
            .darknet_model_dir
            .ok_or(ConfigError::Missing("yolo.darknet_model_dir"))?;

        let confidence = check_range(
            "confidence",
            self.yolo.confidence.unwrap_or(DEFAULT_CONFIDENCE),
        )?;
        let threshold =
            check_range("threshold", self.yolo.threshold.unwrap_or(DEFAULT_THRESHOLD))?;

        let names = self
            .yolo
            .stages
            .unwrap_or_else(|| DEFAULT_STAGES.iter().map(|s| s.to_string()).collect());
        if names.is_empty() {
            return Err(ConfigError::NoStages);
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                return Err(ConfigError::DuplicateStage(name.clone()));
            }
        }
        if let Some(unknown) = self.stage.keys().find(|k| !seen.contains(k.as_str())) {
            return Err(ConfigError::UnknownStage(unknown.clone()));
        }

        let mut stages = Vec::with_capacity(names.len());
        for name in names {
            let stage_override = self.stage.get(&name).cloned().unwrap_or_default();
            let stage_confidence = match stage_override.confidence {
                Some(v) => check_range(&format!("stage.{}.confidence", name), v)?,
                None => confidence,
            };
            let stage_threshold = match stage_override.threshold {
                Some(v) => check_range(&format!("stage.{}.threshold", name), v)?,
                None => threshold,
            };
            stages.push(StageConfig {
                name,
                confidence: stage_confidence,
                threshold: stage_threshold,
                channel_order: stage_override.channel_order.unwrap_or_default(),
            });
        }

        Ok(CascadeConfig {
            input_image_dir: self.prefix.join(input_dir),
            model_dir: self.prefix.join(model_dir),
            stages,
            suppression: if self.yolo.class_aware_nms {
                SuppressionMode::PerClass
            } else {
                SuppressionMode::Global
            },
            output_dir: self.output.dir,
            leaf_prefix: self
                .output
                .leaf_prefix
                .unwrap_or_else(|| DEFAULT_LEAF_PREFIX.to_string()),
        })
    }
}

fn check_range(name: &str, value: f32) -> Result<f32, ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::OutOfRange {
            name: name.to_string(),
            value,
        })
    }
}

/// Settings of one cascade level
#[derive(Debug, Clone, PartialEq)]
pub struct StageConfig {
    pub name: String,
    pub confidence: f32,
    pub threshold: f32,
    /// Input channel order of this stage's network, RGB unless configured
    pub channel_order: ChannelOrder,
}

/// Validated run configuration, built once at startup
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub input_image_dir: PathBuf,
    pub model_dir: PathBuf,
    pub stages: Vec<StageConfig>,
    pub suppression: SuppressionMode,
    /// Where crops feeding the last stage are written, if anywhere
    pub output_dir: Option<PathBuf>,
    pub leaf_prefix: String,
}
