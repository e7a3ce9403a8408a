pub mod sam;
pub mod yolo;

use crate::config::Config;

use image::{GrayImage, RgbImage};
use thiserror::Error;
use tracing::info;

use std::sync::Arc;

/// Request-scoped image buffer shared with the model thread.
pub type SharedImage = Arc<RgbImage>;

/// A scored region returned by the segmentation capability. The mask must have
/// the dimensions of the queried image.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub mask: GrayImage,
    pub score: f32,
}

/// A class-labeled rectangle `[x1, y1, x2, y2]` in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedBox {
    pub label: String,
    pub confidence: f32,
    pub rect: [f32; 4],
}

/// What the segmentation capability is asked for, in source image pixels.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Point([f32; 2]),
    Box([f32; 4]),
    Text(String),
    // one sampling pass, several candidates per anchor
    Anchors(Vec<[f32; 2]>),
}

/// "Given image + query, return scored region proposals".
///
/// Implementations are not assumed to be reentrant; share one through a
/// [`crate::app::threads::ModelWorker`] instead of calling it concurrently.
pub trait Segmenter: Send {
    fn name(&self) -> &str;

    fn supports_text(&self) -> bool {
        false
    }

    fn propose(&mut self, image: &SharedImage, query: &Query) -> Result<Vec<Candidate>, ModelError>;
}

/// "Given image, return class-labeled boxes".
pub trait Detector: Send {
    fn name(&self) -> &str;

    fn detect(&mut self, image: &SharedImage) -> Result<Vec<DetectedBox>, ModelError>;
}

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model not available: {0}")]
    Unavailable(String),

    #[error("Query not supported: {0}")]
    Unsupported(&'static str),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Invalid model output: {0}")]
    InvalidOutput(String),

    #[error("Model worker has shut down")]
    WorkerGone,

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),
}

pub struct Models {
    pub segmenter: Box<dyn Segmenter>,
    pub detector: Option<Box<dyn Detector>>,
}

impl Models {
    pub fn new(segmenter: Box<dyn Segmenter>, detector: Option<Box<dyn Detector>>) -> Self {
        Self {
            segmenter,
            detector,
        }
    }

    /// Load the ONNX models named in the config. The detector is optional.
    pub fn load(config: &Config) -> Result<Self, ModelError> {
        let sam = sam::SAMmodel::new_path(&config.sam_e_path, &config.sam_d_path, config.intra_threads)?;

        let yolo = match &config.yolo_path {
            Some(path) => Some(Box::new(yolo::YOLOmodel::new_path(
                path,
                config.class_names.clone(),
                config.detector_confidence,
                config.intra_threads,
            )?) as Box<dyn Detector>),
            None => {
                info!("No detector configured, labels will use the generic cycle");
                None
            }
        };

        Ok(Self::new(Box::new(sam), yolo))
    }
}
