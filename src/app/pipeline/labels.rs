use tracing::debug;

use super::result::BBox;
use crate::app::model::DetectedBox;
use crate::utils::box_iou;

/// Names objects by matching their boxes against detector boxes.
pub struct LabelResolver<'a> {
    pub min_iou: f32,
    /// Used when no detection overlaps enough.
    pub fallback: &'a str,
    /// Round-robin names for when no detections are available at all.
    pub generic_labels: &'a [String],
}

impl LabelResolver<'_> {
    /// One label per box, in box order.
    ///
    /// `None` or an empty slice means there is nothing to match against, and
    /// labels cycle through the generic list by object index.
    pub fn resolve(&self, boxes: &[BBox], detections: Option<&[DetectedBox]>) -> Vec<String> {
        match detections {
            Some(detections) if !detections.is_empty() => boxes
                .iter()
                .enumerate()
                .map(|(i, bbox)| self.best_match(i, bbox, detections))
                .collect(),
            _ => (0..boxes.len()).map(|i| self.generic(i)).collect(),
        }
    }

    fn generic(&self, index: usize) -> String {
        match self.generic_labels.len() {
            0 => self.fallback.to_string(),
            n => self.generic_labels[index % n].clone(),
        }
    }

    fn best_match(&self, index: usize, bbox: &BBox, detections: &[DetectedBox]) -> String {
        let rect = bbox.as_rect();

        // strict comparison: the first detection wins ties
        let mut best: Option<(&DetectedBox, f32)> = None;
        for detection in detections {
            let iou = box_iou(rect, detection.rect);
            if best.map_or(true, |(_, b)| iou > b) {
                best = Some((detection, iou));
            }
        }

        match best {
            Some((detection, iou)) if iou > self.min_iou => {
                debug!(object = index, label = %detection.label, iou, "Matched detection");
                detection.label.clone()
            }
            _ => {
                debug!(object = index, fallback = self.fallback, "No detection overlaps enough");
                self.fallback.to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generic() -> Vec<String> {
        crate::config::PipelineConfig::default().generic_labels
    }

    fn bbox(x1: u32, y1: u32, x2: u32, y2: u32) -> BBox {
        BBox { x1, y1, x2, y2 }
    }

    fn det(label: &str, rect: [f32; 4]) -> DetectedBox {
        DetectedBox {
            label: label.to_string(),
            confidence: 0.9,
            rect,
        }
    }

    #[test]
    fn test_generic_cycle_without_detections() {
        let labels = generic();
        let resolver = LabelResolver {
            min_iou: 0.3,
            fallback: "object",
            generic_labels: &labels,
        };
        let boxes = vec![bbox(0, 0, 1, 1); 9];

        let expected = [
            "object", "person", "item", "thing", "entity", "thing", "stuff", "object", "person",
        ];
        assert_eq!(resolver.resolve(&boxes, None), expected);
        assert_eq!(resolver.resolve(&boxes, Some(&[])), expected);
    }

    #[test]
    fn test_best_overlap_above_threshold_wins() {
        let labels = generic();
        let resolver = LabelResolver {
            min_iou: 0.3,
            fallback: "cats",
            generic_labels: &labels,
        };
        let detections = vec![
            det("dog", [0.0, 0.0, 4.0, 10.0]),
            det("cat", [0.0, 0.0, 10.0, 10.0]),
            det("car", [50.0, 50.0, 60.0, 60.0]),
        ];

        let boxes = vec![bbox(0, 0, 10, 10), bbox(0, 0, 3, 10), bbox(80, 80, 90, 90)];
        assert_eq!(resolver.resolve(&boxes, Some(&detections)), ["cat", "dog", "cats"]);
    }

    #[test]
    fn test_iou_at_threshold_falls_back() {
        let labels = generic();
        let resolver = LabelResolver {
            min_iou: 0.25,
            fallback: "object",
            generic_labels: &labels,
        };
        // IoU 25/100
        let detections = vec![det("cup", [0.0, 0.0, 5.0, 5.0])];
        assert_eq!(resolver.resolve(&[bbox(0, 0, 10, 10)], Some(&detections)), ["object"]);
    }

    #[test]
    fn test_tie_keeps_first_detection() {
        let labels = generic();
        let resolver = LabelResolver {
            min_iou: 0.3,
            fallback: "object",
            generic_labels: &labels,
        };
        let detections = vec![
            det("left", [0.0, 0.0, 10.0, 10.0]),
            det("right", [0.0, 0.0, 10.0, 10.0]),
        ];
        assert_eq!(resolver.resolve(&[bbox(0, 0, 10, 10)], Some(&detections)), ["left"]);
    }
}
