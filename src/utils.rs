use geo::{Area, BoundingRect, LineString, Polygon};
use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};

pub fn count_foreground(mask: &GrayImage) -> u64 {
    mask.as_raw().iter().filter(|&&v| v != 0).count() as u64
}

// both masks must have the same dimensions
pub fn mask_iou(a: &GrayImage, b: &GrayImage) -> f32 {
    debug_assert_eq!(a.dimensions(), b.dimensions());

    let (mut intersection, mut union) = (0u64, 0u64);
    for (p, q) in a.as_raw().iter().zip(b.as_raw().iter()) {
        let (p, q) = (*p != 0, *q != 0);
        if p && q {
            intersection += 1;
        }
        if p || q {
            union += 1;
        }
    }

    if union == 0 {
        0.0
    } else {
        intersection as f32 / union as f32
    }
}

/// Rectangle IoU on `[x1, y1, x2, y2]`, zero for disjoint or degenerate boxes.
pub fn box_iou(a: [f32; 4], b: [f32; 4]) -> f32 {
    let w = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let h = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let intersection = w * h;

    let area = |r: [f32; 4]| (r[2] - r[0]) * (r[3] - r[1]);
    let union = area(a) + area(b) - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Extent of all foreground pixels as a half-open `[x1, y1, x2, y2]`.
pub fn tight_bbox(mask: &GrayImage) -> Option<[u32; 4]> {
    let mut extent: Option<[u32; 4]> = None;
    for (x, y, p) in mask.enumerate_pixels() {
        if p[0] == 0 {
            continue;
        }
        extent = Some(match extent {
            None => [x, y, x + 1, y + 1],
            Some([x1, y1, x2, y2]) => [x1.min(x), y1.min(y), x2.max(x + 1), y2.max(y + 1)],
        });
    }
    extent
}

/// Bounding rect of the largest outer contour, half-open like [`tight_bbox`].
///
/// Contours are compared by the area of the polygon they trace; on equal areas
/// the first contour found wins.
pub fn contour_bbox(mask: &GrayImage) -> Option<[u32; 4]> {
    let contours = find_contours::<i32>(mask);

    let (largest, _) = contours
        .iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer))
        .map(|c| {
            let ring: Vec<(f64, f64)> = c.points.iter().map(|p| (p.x as f64, p.y as f64)).collect();
            let polygon = Polygon::new(LineString::from(ring), vec![]);
            let area = polygon.unsigned_area();
            (polygon, area)
        })
        .reduce(|best, next| if next.1 > best.1 { next } else { best })?;

    let rect = largest.bounding_rect()?;
    Some([
        rect.min().x as u32,
        rect.min().y as u32,
        rect.max().x as u32 + 1,
        rect.max().y as u32 + 1,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rect_mask(w: u32, h: u32, r: [u32; 4]) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if x >= r[0] && x < r[2] && y >= r[1] && y < r[3] {
                image::Luma([255])
            } else {
                image::Luma([0])
            }
        })
    }

    #[test]
    fn test_count_foreground() {
        let mask = rect_mask(10, 10, [2, 2, 5, 4]);
        assert_eq!(count_foreground(&mask), 6);
    }

    #[test]
    fn test_mask_iou() {
        let a = rect_mask(10, 10, [0, 0, 4, 10]);
        let b = rect_mask(10, 10, [2, 0, 6, 10]);
        // 20 shared of 60 covered
        assert!((mask_iou(&a, &b) - 1.0 / 3.0).abs() < 1e-6);
        assert_eq!(mask_iou(&a, &a), 1.0);

        let empty = GrayImage::new(10, 10);
        assert_eq!(mask_iou(&empty, &empty), 0.0);
    }

    #[test]
    fn test_box_iou() {
        assert_eq!(box_iou([0.0, 0.0, 10.0, 10.0], [0.0, 0.0, 10.0, 10.0]), 1.0);
        assert_eq!(box_iou([0.0, 0.0, 10.0, 10.0], [20.0, 20.0, 30.0, 30.0]), 0.0);
        // touching edges do not overlap
        assert_eq!(box_iou([0.0, 0.0, 10.0, 10.0], [10.0, 0.0, 20.0, 10.0]), 0.0);

        let iou = box_iou([0.0, 0.0, 10.0, 10.0], [5.0, 0.0, 15.0, 10.0]);
        assert!((iou - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_tight_bbox() {
        let mask = rect_mask(20, 20, [3, 4, 8, 9]);
        assert_eq!(tight_bbox(&mask), Some([3, 4, 8, 9]));
        assert_eq!(tight_bbox(&GrayImage::new(5, 5)), None);
    }

    #[test]
    fn test_contour_bbox_picks_largest_region() {
        let mut mask = rect_mask(40, 40, [2, 2, 6, 6]);
        for y in 10..30 {
            for x in 12..35 {
                mask.put_pixel(x, y, image::Luma([255]));
            }
        }
        assert_eq!(contour_bbox(&mask), Some([12, 10, 35, 30]));
        assert_eq!(tight_bbox(&mask), Some([2, 2, 35, 30]));
    }
}
