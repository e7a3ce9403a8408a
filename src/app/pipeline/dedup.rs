use super::generator::Proposal;
use crate::utils::mask_iou;

/// Greedy duplicate suppression in enumeration order.
///
/// A proposal is dropped when its mask IoU with any already accepted proposal
/// exceeds `max_iou`. Earlier proposals always win, whatever their score.
pub fn deduplicate(proposals: Vec<Proposal>, max_iou: f32) -> Vec<Proposal> {
    let mut accepted: Vec<Proposal> = Vec::with_capacity(proposals.len());

    for candidate in proposals {
        let duplicate = accepted
            .iter()
            .any(|kept| could_exceed(kept, &candidate, max_iou) && mask_iou(kept.mask(), candidate.mask()) > max_iou);

        if !duplicate {
            accepted.push(candidate);
        }
    }

    accepted
}

// IoU is bounded by the ratio of the smaller area to the larger one
fn could_exceed(a: &Proposal, b: &Proposal, max_iou: f32) -> bool {
    let (small, large) = if a.pixels() <= b.pixels() {
        (a.pixels(), b.pixels())
    } else {
        (b.pixels(), a.pixels())
    };

    large > 0 && small as f64 / large as f64 > max_iou as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::GrayImage;

    fn rect(x1: u32, x2: u32, score: f32) -> Proposal {
        let mask = GrayImage::from_fn(20, 10, |x, _| {
            image::Luma([if x >= x1 && x < x2 { 255 } else { 0 }])
        });
        Proposal::new(mask, score, 0)
    }

    #[test]
    fn test_later_near_duplicate_dropped() {
        // columns 0..16 vs 0..12: IoU 12/16 = 0.75
        let kept = deduplicate(vec![rect(0, 16, 0.1), rect(0, 12, 0.9)], 0.7);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].score(), 0.1);
    }

    #[test]
    fn test_iou_at_threshold_is_kept() {
        // columns 0..10 vs 0..7: IoU exactly 0.7
        let kept = deduplicate(vec![rect(0, 10, 0.5), rect(0, 7, 0.5)], 0.7);
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn test_disjoint_and_empty_masks_survive() {
        let kept = deduplicate(
            vec![rect(0, 5, 0.2), rect(5, 10, 0.3), rect(0, 0, 0.4), rect(0, 0, 0.5)],
            0.7,
        );
        assert_eq!(kept.len(), 4);
    }

    #[test]
    fn test_order_decides_not_score() {
        let kept = deduplicate(
            vec![rect(0, 10, 0.1), rect(0, 10, 0.9), rect(10, 20, 0.5), rect(10, 19, 0.8)],
            0.7,
        );
        let scores: Vec<f32> = kept.iter().map(|p| p.score()).collect();
        assert_eq!(scores, vec![0.1, 0.5]);
    }
}
