use image::GrayImage;
use serde::Serialize;

use crate::config::BboxMode;
use crate::utils::{contour_bbox, tight_bbox};

/// Half-open pixel box: `x2` and `y2` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BBox {
    /// Box of the mask foreground, clamped to the mask extent. An empty mask
    /// gives the zero box at the origin.
    pub fn from_mask(mask: &GrayImage, mode: BboxMode) -> Self {
        let extent = match mode {
            BboxMode::LargestContour => contour_bbox(mask).or_else(|| tight_bbox(mask)),
            BboxMode::Tight => tight_bbox(mask),
        };
        let [x1, y1, x2, y2] = extent.unwrap_or([0; 4]);

        let (w, h) = mask.dimensions();
        Self {
            x1: x1.min(w),
            y1: y1.min(h),
            x2: x2.min(w),
            y2: y2.min(h),
        }
    }

    pub fn as_rect(&self) -> [f32; 4] {
        [self.x1 as f32, self.y1 as f32, self.x2 as f32, self.y2 as f32]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentedObject {
    pub object_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BBox,
    pub mask_path: String,
    pub pixels_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SegmentationResult {
    pub image_path: String,
    pub width: u32,
    pub height: u32,
    pub objects_count: usize,
    pub objects: Vec<SegmentedObject>,
    pub segmentation_dir: String,
}

/// Final result in acceptance order; an empty object list is still a result.
pub fn assemble(
    image_path: String,
    width: u32,
    height: u32,
    objects: Vec<SegmentedObject>,
    segmentation_dir: String,
) -> SegmentationResult {
    SegmentationResult {
        image_path,
        width,
        height,
        objects_count: objects.len(),
        objects,
        segmentation_dir,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_modes() {
        let mut mask = GrayImage::new(40, 40);
        for (x, y) in [(1, 1), (2, 1), (1, 2), (2, 2)] {
            mask.put_pixel(x, y, image::Luma([255]));
        }
        for y in 10..30 {
            for x in 12..35 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }

        let contour = BBox::from_mask(&mask, BboxMode::LargestContour);
        assert_eq!(
            contour,
            BBox {
                x1: 12,
                y1: 10,
                x2: 35,
                y2: 30
            }
        );

        let tight = BBox::from_mask(&mask, BboxMode::Tight);
        assert_eq!((tight.x1, tight.y1, tight.x2, tight.y2), (1, 1, 35, 30));
    }

    #[test]
    fn test_bbox_touching_the_border_stays_inside() {
        let mask = GrayImage::from_pixel(16, 9, image::Luma([255]));
        for mode in [BboxMode::LargestContour, BboxMode::Tight] {
            let bbox = BBox::from_mask(&mask, mode);
            assert_eq!(bbox.as_rect(), [0.0, 0.0, 16.0, 9.0]);
        }
    }

    #[test]
    fn test_empty_mask_gives_zero_box() {
        let bbox = BBox::from_mask(&GrayImage::new(8, 8), BboxMode::LargestContour);
        assert_eq!(bbox.as_rect(), [0.0; 4]);
    }

    #[test]
    fn test_assemble_counts_and_serializes() {
        let result = assemble("img.png".into(), 4, 3, Vec::new(), "/tmp/.segmentation_img".into());
        assert_eq!(result.objects_count, 0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["objects_count"], 0);
        assert_eq!(json["segmentation_dir"], "/tmp/.segmentation_img");
        assert!(json["objects"].as_array().unwrap().is_empty());
    }
}
