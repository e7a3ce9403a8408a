pub mod dedup;
pub mod error;
pub mod filter;
pub mod generator;
pub mod labels;
pub mod normalize;
pub mod persist;
pub mod result;

pub use error::{PersistenceError, SegmentError, Stage};
pub use generator::Proposal;
pub use result::{BBox, SegmentationResult, SegmentedObject};

use anyhow::Context;
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use std::path::PathBuf;

use super::model::sam::prompt::Prompt;
use super::model::{Detector, ModelError, Segmenter};
use super::threads::image_loader::SourceImage;
use crate::config::{ConfigError, PipelineConfig};
use error::model_failure;
use labels::LabelResolver;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, PartialEq)]
pub struct SegmentRequest {
    pub image_path: PathBuf,
    pub prompt: Prompt,
    /// Minimum normalized confidence, inclusive.
    pub confidence_threshold: f32,
    /// Defaults to `.segmentation_<stem>` next to the image.
    pub save_dir: Option<PathBuf>,
}

impl SegmentRequest {
    pub fn new<P: Into<PathBuf>>(image_path: P, prompt: Prompt) -> Self {
        Self {
            image_path: image_path.into(),
            prompt,
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            save_dir: None,
        }
    }

    pub fn with_threshold(mut self, confidence_threshold: f32) -> Self {
        self.confidence_threshold = confidence_threshold;
        self
    }

    pub fn with_save_dir<P: Into<PathBuf>>(mut self, save_dir: P) -> Self {
        self.save_dir = Some(save_dir.into());
        self
    }
}

/// The candidate-fusion engine. Stateless apart from its tunables; the models
/// are lent to every call.
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Rejects tunables that [`PipelineConfig::validate`] does not accept.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one request end to end.
    ///
    /// Known failures come back as their own [`SegmentError`] kind. Anything
    /// else is logged here with the stage it happened in and returned as
    /// [`SegmentError::Internal`].
    pub fn segment(
        &self,
        segmenter: &mut dyn Segmenter,
        detector: Option<&mut dyn Detector>,
        request: &SegmentRequest,
    ) -> Result<SegmentationResult, SegmentError> {
        info!(
            image = %request.image_path.display(),
            prompt = %request.prompt,
            threshold = request.confidence_threshold,
            "Segmentation started"
        );

        match self.run(segmenter, detector, request) {
            Ok(result) => {
                info!(
                    image = %request.image_path.display(),
                    objects = result.objects_count,
                    dir = %result.segmentation_dir,
                    "Segmentation finished"
                );
                Ok(result)
            }
            Err(err) => Err(Self::classify(err, request)),
        }
    }

    fn classify(err: anyhow::Error, request: &SegmentRequest) -> SegmentError {
        let stage = err.downcast_ref::<Stage>().copied();
        match err.downcast::<SegmentError>() {
            Ok(known) => {
                warn!(image = %request.image_path.display(), prompt = %request.prompt, "{known}");
                known
            }
            Err(err) => {
                // every fallible stage attaches its context, assembly is last
                let stage = stage.unwrap_or(Stage::Assemble);
                error!(
                    image = %request.image_path.display(),
                    prompt = %request.prompt,
                    %stage,
                    "Segmentation failed: {err:#}"
                );
                SegmentError::Internal { stage }
            }
        }
    }

    fn run(
        &self,
        segmenter: &mut dyn Segmenter,
        detector: Option<&mut dyn Detector>,
        request: &SegmentRequest,
    ) -> anyhow::Result<SegmentationResult> {
        let threshold = request.confidence_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(SegmentError::Validation(format!(
                "confidence_threshold must be within [0, 1], got {threshold}"
            ))
            .into());
        }
        request.prompt.check().map_err(SegmentError::Validation)?;

        let image = SourceImage::load(&request.image_path)?;
        request
            .prompt
            .check_bounds(image.width, image.height)
            .map_err(SegmentError::Validation)?;
        debug!(
            stage = %Stage::LoadImage,
            width = image.width,
            height = image.height,
            "Image loaded"
        );
        debug!(stage = %Stage::Validate, prompt = %request.prompt, "Request accepted");

        let proposals = generator::generate(segmenter, &image, &request.prompt, &self.config.passes)
            .map_err(model_failure(Stage::Generate))?;
        debug!(stage = %Stage::Generate, count = proposals.len(), "Proposals generated");

        let proposals = dedup::deduplicate(proposals, self.config.duplicate_iou);
        debug!(stage = %Stage::Dedup, kept = proposals.len(), "Duplicates removed");

        let proposals = filter::filter_by_size(
            proposals,
            self.config.min_pixels,
            self.config.max_area_ratio,
            image.width,
            image.height,
        );
        debug!(stage = %Stage::Filter, kept = proposals.len(), "Size filter applied");

        let scores: Vec<f32> = proposals.iter().map(Proposal::score).collect();
        let confidences = normalize::normalize_scores(&scores);
        let kept: Vec<(Proposal, f32)> = proposals
            .into_iter()
            .zip(confidences)
            .filter(|(_, confidence)| *confidence >= threshold)
            .collect();
        debug!(stage = %Stage::Normalize, kept = kept.len(), threshold, "Confidence threshold applied");

        let bbox_mode = self.config.bbox_mode;
        let boxes: Vec<BBox> = kept
            .par_iter()
            .map(|(proposal, _)| BBox::from_mask(proposal.mask(), bbox_mode))
            .collect();

        let detections = match detector {
            Some(detector) if !kept.is_empty() => match detector.detect(&image.data) {
                Ok(found) => {
                    debug!(stage = %Stage::Label, detector = detector.name(), boxes = found.len(), "Detections ready");
                    Some(found)
                }
                // a missing detector only costs the class names
                Err(err @ (ModelError::Unavailable(_) | ModelError::WorkerGone)) => {
                    warn!(stage = %Stage::Label, "Detector unavailable, using generic labels: {err}");
                    None
                }
                Err(err) => return Err(model_failure(Stage::Label)(err)),
            },
            _ => None,
        };

        let resolver = LabelResolver {
            min_iou: self.config.label_iou,
            fallback: request.prompt.text().unwrap_or(self.config.fallback_label.as_str()),
            generic_labels: &self.config.generic_labels,
        };
        let labels = resolver.resolve(&boxes, detections.as_deref());

        let dir = persist::prepare_dir(&request.image_path, request.save_dir.as_deref())
            .context(Stage::Persist)?;

        let mut objects = Vec::with_capacity(kept.len());
        for (i, (((proposal, confidence), bbox), label)) in
            kept.into_iter().zip(boxes).zip(labels).enumerate()
        {
            // ids follow acceptance order even when a write fails
            let object_id = i + 1;
            match persist::write_mask(&dir, object_id, proposal.mask()) {
                Ok(path) => objects.push(SegmentedObject {
                    object_id,
                    label,
                    confidence,
                    bbox,
                    mask_path: path.display().to_string(),
                    pixels_count: proposal.pixels(),
                }),
                Err(err) => warn!(object = object_id, "Object dropped: {err}"),
            }
        }

        Ok(result::assemble(
            request.image_path.display().to_string(),
            image.width,
            image.height,
            objects,
            dir.display().to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = SegmentRequest::new("a.png", Prompt::new_text("cat"))
            .with_threshold(0.2)
            .with_save_dir("/tmp/out");

        assert_eq!(request.image_path, PathBuf::from("a.png"));
        assert_eq!(request.confidence_threshold, 0.2);
        assert_eq!(request.save_dir.as_deref(), Some(std::path::Path::new("/tmp/out")));
        assert_eq!(
            SegmentRequest::new("a.png", Prompt::new_point(1.0, 1.0)).confidence_threshold,
            DEFAULT_CONFIDENCE_THRESHOLD
        );
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        assert!(Pipeline::new(PipelineConfig::default()).is_ok());

        let config = PipelineConfig {
            passes: vec![crate::config::GridPass {
                grid: 0,
                margin: 10.0,
            }],
            ..PipelineConfig::default()
        };
        assert!(matches!(Pipeline::new(config), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_classify_keeps_known_errors() {
        let request = SegmentRequest::new("a.png", Prompt::new_text("cat"));

        let err = Pipeline::classify(SegmentError::Validation("bad".into()).into(), &request);
        assert!(matches!(err, SegmentError::Validation(m) if m == "bad"));

        let err = Pipeline::classify(anyhow::anyhow!("disk on fire").context(Stage::Persist), &request);
        assert!(matches!(err, SegmentError::Internal { stage: Stage::Persist }));
    }
}
