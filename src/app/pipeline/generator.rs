use image::GrayImage;
use rayon::prelude::*;
use tracing::debug;

use crate::app::model::sam::prompt::Prompt;
use crate::app::model::{Candidate, ModelError, Query, Segmenter};
use crate::app::threads::image_loader::SourceImage;
use crate::config::GridPass;
use crate::utils::count_foreground;

/// A binarized candidate mask with its raw score and originating pass.
#[derive(Debug, Clone)]
pub struct Proposal {
    mask: GrayImage,
    score: f32,
    pass: usize,
    pixels: u64,
}

impl Proposal {
    /// Any nonzero mask byte becomes 255; the foreground count is taken once here.
    pub fn new(mut mask: GrayImage, score: f32, pass: usize) -> Self {
        for p in mask.pixels_mut() {
            if p[0] != 0 {
                p[0] = 255;
            }
        }
        let pixels = count_foreground(&mask);

        Self {
            mask,
            score,
            pass,
            pixels,
        }
    }

    pub fn mask(&self) -> &GrayImage {
        &self.mask
    }

    pub fn score(&self) -> f32 {
        self.score
    }

    pub fn pass(&self) -> usize {
        self.pass
    }

    pub fn pixels(&self) -> u64 {
        self.pixels
    }
}

/// Run every sampling pass the prompt calls for and concatenate the proposals
/// in pass order.
pub fn generate(
    segmenter: &mut dyn Segmenter,
    image: &SourceImage,
    prompt: &Prompt,
    passes: &[GridPass],
) -> Result<Vec<Proposal>, ModelError> {
    let queries = plan_queries(prompt, segmenter.supports_text(), passes, image.width, image.height);

    let mut proposals = Vec::new();
    for (pass, query) in queries.iter().enumerate() {
        let candidates = segmenter.propose(&image.data, query)?;
        debug!(pass, candidates = candidates.len(), "Sampling pass finished");

        proposals.extend(into_proposals(candidates, pass, image.width, image.height)?);
    }

    Ok(proposals)
}

/// One query per pass. A text prompt only goes to the segmenter as text when
/// it understands text; otherwise the anchor grids stand in for it.
pub fn plan_queries(
    prompt: &Prompt,
    supports_text: bool,
    passes: &[GridPass],
    width: u32,
    height: u32,
) -> Vec<Query> {
    match prompt {
        Prompt::Point { x, y } => vec![Query::Point([*x, *y])],
        Prompt::Box { x1, y1, x2, y2 } => vec![Query::Box([*x1, *y1, *x2, *y2])],
        Prompt::Text(text) if supports_text => vec![Query::Text(text.trim().to_string())],
        Prompt::Text(_) => passes
            .iter()
            .map(|pass| Query::Anchors(anchor_grid(width, height, pass)))
            .collect(),
    }
}

/// Row-major `grid × grid` anchors spaced evenly from `margin` to
/// `dim - margin` on each axis.
pub fn anchor_grid(width: u32, height: u32, pass: &GridPass) -> Vec<[f32; 2]> {
    let xs = axis_positions(width, pass.margin, pass.grid);
    let ys = axis_positions(height, pass.margin, pass.grid);

    ys.iter()
        .flat_map(|&y| xs.iter().map(move |&x| [x, y]))
        .collect()
}

fn axis_positions(dim: u32, margin: f32, n: u32) -> Vec<f32> {
    if n == 0 {
        return Vec::new();
    }

    let dim = dim as f32;
    // margins eat the whole axis: sample its centre once
    if dim <= 2.0 * margin {
        return vec![dim / 2.0];
    }

    let start = margin;
    let end = (dim - margin).min(dim - 1.0);
    if n == 1 {
        return vec![start];
    }

    let step = (end - start) / (n - 1) as f32;
    (0..n).map(|i| start + step * i as f32).collect()
}

fn into_proposals(
    candidates: Vec<Candidate>,
    pass: usize,
    width: u32,
    height: u32,
) -> Result<Vec<Proposal>, ModelError> {
    if let Some(bad) = candidates.iter().find(|c| c.mask.dimensions() != (width, height)) {
        let (w, h) = bad.mask.dimensions();
        return Err(ModelError::InvalidOutput(format!(
            "proposal mask is {w}x{h}, image is {width}x{height}"
        )));
    }
    if let Some(bad) = candidates.iter().find(|c| !c.score.is_finite()) {
        return Err(ModelError::InvalidOutput(format!(
            "proposal score {} is not finite",
            bad.score
        )));
    }

    // indexed collect keeps the capability's order
    Ok(candidates
        .into_par_iter()
        .map(|c| Proposal::new(c.mask, c.score, pass))
        .collect())
}
