use super::{DetectedBox, Detector, ModelError, SharedImage};
use crate::utils::box_iou;

use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, ArrayViewD, Axis, Dim};
use ort::{inputs, CUDAExecutionProvider, GraphOptimizationLevel, Session};
use tracing::{debug, info};

// the exported yolo model has a input like this, so DO NOT change this.
const INPUT_H: u32 = 640;
const INPUT_W: u32 = 640;

const NMS_IOU: f32 = 0.7;

#[derive(Debug)]
pub struct YOLOmodel {
    model: Session,
    class_names: Vec<String>,
    confidence: f32,
}

impl YOLOmodel {
    pub fn new_path(
        p: &str,
        class_names: Option<Vec<String>>,
        confidence: f32,
        intra_threads: usize,
    ) -> Result<Self, ModelError> {
        info!("Loading YOLO model from {p}");

        let model = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_execution_providers([CUDAExecutionProvider::default().build()])?
            .with_intra_threads(intra_threads)?
            .commit_from_file(p)
            .map_err(|e| ModelError::Unavailable(format!("failed to load {p}: {e}")))?;

        let class_names = class_names
            .unwrap_or_else(|| COCO_CLASSES.iter().map(|s| s.to_string()).collect());
        info!("YOLO model loaded ({} classes)", class_names.len());

        Ok(Self {
            model,
            class_names,
            confidence,
        })
    }

    fn preprocess(img: &RgbImage) -> Array<f32, Dim<[usize; 4]>> {
        let img = image::imageops::resize(img, INPUT_W, INPUT_H, FilterType::CatmullRom);
        let mut input = Array::zeros((1, 3, INPUT_H as usize, INPUT_W as usize));
        for (x, y, pixel) in img.enumerate_pixels() {
            let (x, y) = (x as usize, y as usize);
            let [r, g, b] = pixel.0;

            input[[0, 0, y, x]] = (r as f32) / 255.0;
            input[[0, 1, y, x]] = (g as f32) / 255.0;
            input[[0, 2, y, x]] = (b as f32) / 255.0;
        }

        input
    }

    fn class_name(&self, class_id: usize) -> String {
        self.class_names
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{class_id}"))
    }

    // output is (1, 4 + classes, anchors) in model input pixels
    fn postprocess(
        &self,
        output: ArrayViewD<f32>,
        ori_w: u32,
        ori_h: u32,
    ) -> Result<Vec<DetectedBox>, ModelError> {
        if output.ndim() != 3 || output.shape()[1] <= 4 {
            return Err(ModelError::InvalidOutput(format!(
                "unexpected YOLO output shape {:?}",
                output.shape()
            )));
        }
        let output = output.t().into_owned();

        let sx = ori_w as f32 / INPUT_W as f32;
        let sy = ori_h as f32 / INPUT_H as f32;

        let mut boxes = Vec::new();
        for row in output.axis_iter(Axis(0)) {
            let row: Vec<_> = row.iter().copied().collect();
            let Some((class_id, prob)) = row
                .iter()
                .skip(4)
                .copied()
                .enumerate()
                .reduce(|accum, row| if row.1 > accum.1 { row } else { accum })
            else {
                continue;
            };

            if prob < self.confidence {
                continue;
            }

            let (xc, yc, w, h) = (row[0], row[1], row[2], row[3]);
            let rect = [
                ((xc - w / 2.0) * sx).clamp(0.0, ori_w as f32),
                ((yc - h / 2.0) * sy).clamp(0.0, ori_h as f32),
                ((xc + w / 2.0) * sx).clamp(0.0, ori_w as f32),
                ((yc + h / 2.0) * sy).clamp(0.0, ori_h as f32),
            ];
            boxes.push(DetectedBox {
                label: self.class_name(class_id),
                confidence: prob,
                rect,
            });
        }

        Ok(Self::nms(boxes))
    }

    fn nms(mut boxes: Vec<DetectedBox>) -> Vec<DetectedBox> {
        boxes.sort_by(|box1, box2| box2.confidence.total_cmp(&box1.confidence));

        let mut result: Vec<DetectedBox> = Vec::new();
        for candidate in boxes {
            if result.iter().all(|kept| box_iou(kept.rect, candidate.rect) < NMS_IOU) {
                result.push(candidate);
            }
        }

        result
    }
}

impl Detector for YOLOmodel {
    fn name(&self) -> &str {
        "yolo"
    }

    fn detect(&mut self, image: &SharedImage) -> Result<Vec<DetectedBox>, ModelError> {
        let input = Self::preprocess(image);

        let outputs = self.model.run(inputs!["images" => input.view()]?)?;
        let output = outputs["output0"].try_extract_tensor::<f32>()?;

        let boxes = self.postprocess(output, image.width(), image.height())?;
        debug!("YOLO kept {} boxes", boxes.len());

        Ok(boxes)
    }
}

/// 80 COCO object classes (in order)
pub const COCO_CLASSES: &[&str] = &[
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];
