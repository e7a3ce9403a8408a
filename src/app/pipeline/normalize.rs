/// Min-max rescale raw scores within one request batch.
///
/// Equal scores all map to 0.5. Results are clamped to [0, 1] and rounded to
/// four decimals, so they only compare within the same request.
pub fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    // f64 keeps `max - min` finite for any pair of finite f32 scores
    let (min, max) = scores
        .iter()
        .map(|&s| s as f64)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s), hi.max(s)));

    scores
        .iter()
        .map(|&raw| {
            let normalized = if max > min {
                ((raw as f64 - min) / (max - min)) as f32
            } else {
                0.5
            };
            round4(normalized.clamp(0.0, 1.0))
        })
        .collect()
}

fn round4(v: f32) -> f32 {
    (v * 10_000.0).round() / 10_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_max_mapping() {
        let out = normalize_scores(&[0.2, 0.8, 0.5, 0.35]);
        assert_eq!(out, vec![0.0, 1.0, 0.5, 0.25]);
    }

    #[test]
    fn test_equal_scores_map_to_half() {
        assert_eq!(normalize_scores(&[0.3, 0.3, 0.3]), vec![0.5, 0.5, 0.5]);
        assert_eq!(normalize_scores(&[7.0]), vec![0.5]);
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_extreme_magnitudes_stay_finite() {
        let out = normalize_scores(&[f32::MAX, -f32::MAX, 0.0]);
        assert_eq!(out, vec![1.0, 0.0, 0.5]);
    }

    #[test]
    fn test_rounding() {
        let out = normalize_scores(&[0.0, 1.0, 3.0]);
        assert_eq!(out[1], 0.3333);
    }
}
