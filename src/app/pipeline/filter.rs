use super::generator::Proposal;

/// Keep proposals with `min_pixels <= pixels <= max_area_ratio * width * height`.
pub fn filter_by_size(
    proposals: Vec<Proposal>,
    min_pixels: u64,
    max_area_ratio: f64,
    width: u32,
    height: u32,
) -> Vec<Proposal> {
    let max_pixels = max_area_ratio * width as f64 * height as f64;

    proposals
        .into_iter()
        .filter(|p| p.pixels() >= min_pixels && p.pixels() as f64 <= max_pixels)
        .collect()
}
