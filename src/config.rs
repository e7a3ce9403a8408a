use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub sam_e_path: String,
    pub sam_d_path: String,
    // no detector means labels come from the generic cycle
    pub yolo_path: Option<String>,
    pub class_names: Option<Vec<String>>,
    pub detector_confidence: f32,
    pub intra_threads: usize,
    pub pipeline: PipelineConfig,
}

/// Tunables of the candidate-fusion pipeline.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub min_pixels: u64,
    /// Proposals covering more than this share of the image are dropped.
    pub max_area_ratio: f64,
    /// Mask IoU above which a later proposal counts as a duplicate.
    pub duplicate_iou: f32,
    /// Box IoU a detection must exceed before its class label is taken.
    pub label_iou: f32,
    pub passes: Vec<GridPass>,
    pub bbox_mode: BboxMode,
    pub generic_labels: Vec<String>,
    pub fallback_label: String,
}

/// One sampling pass: a `grid × grid` anchor lattice inset by `margin` pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct GridPass {
    pub grid: u32,
    pub margin: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BboxMode {
    LargestContour,
    Tight,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sam_e_path: "weights/sam_b-encoder.onnx".to_string(),
            sam_d_path: "weights/sam_b-decoder.onnx".to_string(),
            yolo_path: None,
            class_names: None,
            detector_confidence: 0.1,
            intra_threads: 4,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_pixels: 30,
            max_area_ratio: 0.95,
            duplicate_iou: 0.7,
            label_iou: 0.3,
            passes: vec![
                GridPass {
                    grid: 8,
                    margin: 50.0,
                },
                GridPass {
                    grid: 12,
                    margin: 30.0,
                },
            ],
            bbox_mode: BboxMode::LargestContour,
            generic_labels: ["object", "person", "item", "thing", "entity", "thing", "stuff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            fallback_label: "object".to_string(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let json_content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;

        Self::from_json(&json_content)
    }

    pub fn from_json(json_content: &str) -> Result<Config, ConfigError> {
        let config: Config = serde_json::from_str(json_content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detector_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector_confidence must be within [0, 1], got {}",
                self.detector_confidence
            )));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be positive".into()));
        }
        self.pipeline.validate()
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("max_area_ratio", self.max_area_ratio),
            ("duplicate_iou", self.duplicate_iou as f64),
            ("label_iou", self.label_iou as f64),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within [0, 1], got {value}"
                )));
            }
        }

        if self.passes.is_empty() {
            return Err(ConfigError::Invalid("at least one sampling pass is required".into()));
        }
        let bad_pass = |p: &&GridPass| p.grid == 0 || !(p.margin.is_finite() && p.margin >= 0.0);
        if let Some(pass) = self.passes.iter().find(bad_pass) {
            return Err(ConfigError::Invalid(format!("bad sampling pass {pass:?}")));
        }
        if self.generic_labels.is_empty() {
            return Err(ConfigError::Invalid("generic_labels must not be empty".into()));
        }

        Ok(())
    }
}
