pub mod prompt;

use super::{Candidate, ModelError, Query, Segmenter, SharedImage};

use lazy_static::lazy_static;
use ndarray::{Array2, Array3, Array4, ArrayViewD, Axis};
use ort::{inputs, CUDAExecutionProvider, GraphOptimizationLevel, Session};
use tracing::{debug, info};

use image::{imageops::FilterType, GrayImage, RgbImage};
use std::sync::{Arc, Weak};

const INPUT_W: u32 = 1024;
const INPUT_H: u32 = 684;

// decoder outputs logits
const MASK_THRESHOLD: f32 = 0.0;

lazy_static! {
    static ref MASK: ndarray::Array4<f32> = ndarray::Array4::<f32>::default((1, 1, 256, 256));
    static ref HAS_MASK_INPUT: ndarray::Array1<f32> = ndarray::Array1::from(vec![0.0f32]);
    static ref ORIG_SIZE: ndarray::Array1<f32> =
        ndarray::Array1::from(vec![INPUT_H as f32, INPUT_W as f32]);
}

/// SAM encoder/decoder pair exported to ONNX.
///
/// The image embedding is cached for the last image seen, so the anchors of
/// every sampling pass over one request reuse a single encoder run.
#[derive(Debug)]
pub struct SAMmodel {
    encoder: Session,
    decoder: Session,

    embedding: Option<Array4<f32>>,
    embedded_for: Option<Weak<RgbImage>>,
    ori_w: u32,
    ori_h: u32,
}

impl SAMmodel {
    pub fn new_path(
        encoder_path: &str,
        decoder_path: &str,
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        info!("Loading SAM encoder {encoder_path} and decoder {decoder_path}");

        let encoder = Self::session(encoder_path, intra_threads)?;
        let decoder = Self::session(decoder_path, intra_threads)?;

        info!("SAM model loaded");

        Ok(Self {
            encoder,
            decoder,
            embedding: None,
            embedded_for: None,
            ori_w: 0,
            ori_h: 0,
        })
    }

    fn session(path: &str, intra_threads: usize) -> Result<Session, ModelError> {
        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .with_intra_threads(intra_threads)?
            .commit_from_file(path)
            .map_err(|e| ModelError::Unavailable(format!("failed to load {path}: {e}")))?;

        Ok(session)
    }

    fn is_embedded(&self, img: &SharedImage) -> bool {
        self.embedded_for
            .as_ref()
            .and_then(Weak::upgrade)
            .is_some_and(|current| Arc::ptr_eq(&current, img))
    }

    pub fn embed(&mut self, img: &SharedImage) -> Result<(), ModelError> {
        if self.is_embedded(img) {
            return Ok(());
        }

        let (input, w, h) = Self::preprocess_img(img);
        self.ori_w = w;
        self.ori_h = h;

        let encoder_input = inputs!(&self.encoder.inputs[0].name => input.view())?;
        let mut encoder_output = self.encoder.run(encoder_input)?;
        let embedding = encoder_output
            .remove("image_embeddings")
            .ok_or_else(|| ModelError::InvalidOutput("missing image_embeddings".into()))?;
        self.embedding = Some(
            embedding
                .try_extract_tensor::<f32>()?
                .to_shape((1, 256, 64, 64))?
                .to_owned(),
        );
        self.embedded_for = Some(Arc::downgrade(img));

        debug!("Embedded {w}x{h} image");
        Ok(())
    }

    // points and labels in source pixels, SAM label convention
    fn generate_masks(&self, points: &[[f32; 2]], labels: &[f32]) -> Result<Vec<Candidate>, ModelError> {
        let (points, labels) = self.preprocess_prompts(points, labels)?;
        let emb = self
            .embedding
            .as_ref()
            .ok_or_else(|| ModelError::Inference("no image embedded".into()))?;

        let decoder_input = inputs!(
            &self.decoder.inputs[0].name => emb.view(),
            &self.decoder.inputs[1].name => points.view(),
            &self.decoder.inputs[2].name => labels.view(),
            &self.decoder.inputs[3].name => MASK.view(),
            &self.decoder.inputs[4].name => HAS_MASK_INPUT.view(),
            &self.decoder.inputs[5].name => ORIG_SIZE.view(),
        )?;
        let decoder_output = self.decoder.run(decoder_input)?;
        let masks = decoder_output["masks"].try_extract_tensor::<f32>()?;
        let scores = decoder_output["iou_predictions"].try_extract_tensor::<f32>()?;

        Self::postprocess(masks, scores, self.ori_w, self.ori_h)
    }

    fn preprocess_img(img: &RgbImage) -> (Array3<f32>, u32, u32) {
        let (ori_w, ori_h) = img.dimensions();
        let img = image::imageops::resize(img, INPUT_W, INPUT_H, FilterType::CatmullRom);

        let mut arr = Array3::zeros((INPUT_H as usize, INPUT_W as usize, 3));
        for (x, y, pixel) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;

            arr[[y, x, 2]] = r as f32;
            arr[[y, x, 1]] = g as f32;
            arr[[y, x, 0]] = b as f32;
        }

        (arr, ori_w, ori_h)
    }

    fn preprocess_prompts(
        &self,
        points: &[[f32; 2]],
        labels: &[f32],
    ) -> Result<(Array3<f32>, Array2<f32>), ModelError> {
        let sx = INPUT_W as f32 / self.ori_w.max(1) as f32;
        let sy = INPUT_H as f32 / self.ori_h.max(1) as f32;
        let points: Vec<f32> = points.iter().flat_map(|[x, y]| [x * sx, y * sy]).collect();

        let points = Array3::from_shape_vec((1, labels.len(), 2), points)?;
        let labels = Array2::from_shape_vec((1, labels.len()), labels.to_vec())?;

        Ok((points, labels))
    }

    fn postprocess(
        masks: ArrayViewD<f32>,
        scores: ArrayViewD<f32>,
        w: u32,
        h: u32,
    ) -> Result<Vec<Candidate>, ModelError> {
        let shape = masks.shape().to_vec();
        if shape.len() != 4 {
            return Err(ModelError::InvalidOutput(format!(
                "expected 4D masks, got {shape:?}"
            )));
        }
        let (count, mask_h, mask_w) = (shape[1], shape[2], shape[3]);
        let scores: Vec<f32> = scores.iter().copied().collect();
        if scores.len() != count {
            return Err(ModelError::InvalidOutput(format!(
                "{count} masks but {} scores",
                scores.len()
            )));
        }

        let mut candidates = Vec::with_capacity(count);
        for (mask, score) in masks.index_axis(Axis(0), 0).axis_iter(Axis(0)).zip(scores) {
            let raw: Vec<u8> = mask
                .iter()
                .map(|&v| if v > MASK_THRESHOLD { 255u8 } else { 0u8 })
                .collect();
            let mask = GrayImage::from_raw(mask_w as u32, mask_h as u32, raw)
                .ok_or_else(|| ModelError::InvalidOutput("mask buffer size mismatch".into()))?;

            candidates.push(Candidate {
                mask: Self::resize_mask(mask, w, h),
                score,
            });
        }

        Ok(candidates)
    }

    fn resize_mask(mask: GrayImage, w: u32, h: u32) -> GrayImage {
        if mask.dimensions() == (w, h) {
            return mask;
        }

        let mut resized = image::imageops::resize(&mask, w, h, FilterType::Nearest);
        for p in resized.pixels_mut() {
            p[0] = if p[0] > 127 { 255 } else { 0 };
        }
        resized
    }
}

impl Segmenter for SAMmodel {
    fn name(&self) -> &str {
        "sam"
    }

    fn propose(&mut self, image: &SharedImage, query: &Query) -> Result<Vec<Candidate>, ModelError> {
        // the padding point (label -1) keeps the decoder from expecting a box
        let prompts: Vec<(Vec<[f32; 2]>, Vec<f32>)> = match query {
            Query::Text(_) => return Err(ModelError::Unsupported("SAM decoder takes no text prompts")),
            Query::Point(p) => vec![(vec![*p, [0.0, 0.0]], vec![1.0, -1.0])],
            Query::Box([x1, y1, x2, y2]) => vec![(vec![[*x1, *y1], [*x2, *y2]], vec![2.0, 3.0])],
            Query::Anchors(anchors) => anchors
                .iter()
                .map(|a| (vec![*a, [0.0, 0.0]], vec![1.0, -1.0]))
                .collect(),
        };

        self.embed(image)?;

        let mut candidates = Vec::new();
        for (points, labels) in prompts {
            candidates.extend(self.generate_masks(&points, &labels)?);
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postprocess_thresholds_logits() {
        let masks = ndarray::Array4::from_shape_fn((1, 2, 4, 4), |(_, k, y, _)| {
            if k == 0 && y < 2 {
                3.0
            } else {
                -3.0
            }
        });
        let scores = ndarray::Array2::from_shape_vec((1, 2), vec![0.9, 0.4]).unwrap();

        let candidates =
            SAMmodel::postprocess(masks.view().into_dyn(), scores.view().into_dyn(), 4, 4).unwrap();

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].score, 0.9);
        assert_eq!(crate::utils::count_foreground(&candidates[0].mask), 8);
        assert_eq!(crate::utils::count_foreground(&candidates[1].mask), 0);
    }

    #[test]
    fn test_resize_mask_stays_binary() {
        let mask = GrayImage::from_fn(4, 4, |_, y| image::Luma([if y < 2 { 255 } else { 0 }]));
        let resized = SAMmodel::resize_mask(mask, 8, 8);

        assert_eq!(resized.dimensions(), (8, 8));
        assert!(resized.as_raw().iter().all(|&v| v == 0 || v == 255));
        assert!((0..8).all(|x| resized.get_pixel(x, 0)[0] == 255));
        assert!((0..8).all(|x| resized.get_pixel(x, 7)[0] == 0));
    }

    #[test]
    fn test_postprocess_rejects_score_mismatch() {
        let masks = ndarray::Array4::<f32>::zeros((1, 3, 2, 2));
        let scores = ndarray::Array2::<f32>::zeros((1, 2));
        let err = SAMmodel::postprocess(masks.view().into_dyn(), scores.view().into_dyn(), 2, 2)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidOutput(_)));
    }

    #[test]
    #[ignore] // Requires SAM ONNX weights under weights/
    fn test_sam_point_prompt() {
        let mut sam = SAMmodel::new_path("weights/sam_b-encoder.onnx", "weights/sam_b-decoder.onnx", 4)
            .unwrap();
        let img: SharedImage = Arc::new(RgbImage::from_pixel(320, 240, image::Rgb([90, 120, 200])));

        let candidates = sam.propose(&img, &Query::Point([160.0, 120.0])).unwrap();
        assert!(!candidates.is_empty());
        assert!(candidates.iter().all(|c| c.mask.dimensions() == (320, 240)));
    }
}
