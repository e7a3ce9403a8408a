use anyhow::{bail, Context as _, Result};
use clap::{Args, Parser, Subcommand};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use segma::app::model::sam::prompt::Prompt;
use segma::app::pipeline::persist::default_segmentation_dir;
use segma::app::pipeline::{SegmentRequest, SegmentationResult, DEFAULT_CONFIDENCE_THRESHOLD};
use segma::{App, Config};

const IMAGE_EXTENSIONS: [&str; 6] = ["png", "jpg", "jpeg", "bmp", "webp", "tiff"];

#[derive(Parser)]
#[command(
    name = "segma",
    version,
    about = "Prompted instance segmentation with SAM proposals and YOLO labels",
    after_help = "EXAMPLES:\n  \
                  segma segment photo.jpg --text cat\n  \
                  segma segment photo.jpg --point 320,240 --threshold 0.3\n  \
                  segma segment photo.jpg --box 10,20,300,400 --save-dir ./masks\n  \
                  segma batch ./photos --text person\n  \
                  segma status"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config.json
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment one image and print the result as JSON
    Segment {
        image: PathBuf,

        #[command(flatten)]
        prompt: PromptArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Segment every image under a directory with one text prompt.
    /// Each image gets its own mask directory, under --save-dir if given
    Batch {
        dir: PathBuf,

        #[arg(long)]
        text: String,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Print which models are loaded
    Status,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PromptArgs {
    /// Free-text prompt
    #[arg(long)]
    text: Option<String>,

    /// Point prompt in pixels, X,Y
    #[arg(long, value_parser = parse_coords::<2>)]
    point: Option<[f32; 2]>,

    /// Box prompt in pixels, X1,Y1,X2,Y2
    #[arg(long = "box", value_parser = parse_coords::<4>)]
    bbox: Option<[f32; 4]>,
}

#[derive(Args)]
struct OutputArgs {
    /// Minimum normalized confidence in [0, 1]
    #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
    threshold: f32,

    /// Mask output directory, defaults to .segmentation_<stem> next to the image
    #[arg(long)]
    save_dir: Option<PathBuf>,
}

#[derive(Serialize)]
struct BatchEntry {
    image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<SegmentationResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl PromptArgs {
    fn into_prompt(self) -> Result<Prompt> {
        match (self.text, self.point, self.bbox) {
            (Some(text), None, None) => Ok(Prompt::new_text(text)),
            (None, Some(point), None) => Ok(point.into()),
            (None, None, Some(bbox)) => Ok(bbox.into()),
            _ => bail!("exactly one of --text, --point or --box is required"),
        }
    }
}

impl OutputArgs {
    fn request(&self, image: &Path, prompt: Prompt) -> SegmentRequest {
        let request = SegmentRequest::new(image, prompt).with_threshold(self.threshold);
        match &self.save_dir {
            Some(dir) => request.with_save_dir(dir),
            None => request,
        }
    }
}

/// One mask directory per batch image, laid out like the images under `root`.
/// Images sharing a stem in one folder get `_2`, `_3`, ... suffixes.
fn batch_dirs(root: &Path, save_dir: Option<&Path>, images: &[PathBuf]) -> Vec<PathBuf> {
    let base = save_dir.unwrap_or(root);
    let mut taken = HashSet::new();

    images
        .iter()
        .map(|image| {
            let relative = image.strip_prefix(root).unwrap_or(image);
            let stem_dir = base.join(default_segmentation_dir(relative));

            let mut dir = stem_dir.clone();
            let mut n = 2;
            while !taken.insert(dir.clone()) {
                let mut name = stem_dir.clone().into_os_string();
                name.push(format!("_{n}"));
                dir = PathBuf::from(name);
                n += 1;
            }
            dir
        })
        .collect()
}

fn parse_coords<const N: usize>(s: &str) -> Result<[f32; N], String> {
    let values = s
        .split(',')
        .map(|v| v.trim().parse::<f32>().map_err(|e| format!("{v:?}: {e}")))
        .collect::<Result<Vec<f32>, String>>()?;

    values
        .try_into()
        .map_err(|v: Vec<f32>| format!("expected {N} comma-separated numbers, got {}", v.len()))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(if verbose { "debug" } else { "info" }),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set tracing subscriber: {e}"))
}

fn batch(app: &App, dir: &Path, text: &str, output: &OutputArgs) -> Result<Vec<BatchEntry>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        if entry.file_type().is_file() && is_image(entry.path()) {
            images.push(entry.into_path());
        }
    }
    info!(count = images.len(), dir = %dir.display(), "Batch started");

    let save_dirs = batch_dirs(dir, output.save_dir.as_deref(), &images);
    Ok(images
        .par_iter()
        .zip(save_dirs.par_iter())
        .map(|(image, save_dir)| {
            let request = SegmentRequest::new(image, Prompt::new_text(text))
                .with_threshold(output.threshold)
                .with_save_dir(save_dir);
            match app.segment(&request) {
                Ok(result) => BatchEntry {
                    image: image.display().to_string(),
                    result: Some(result),
                    error: None,
                },
                Err(err) => {
                    warn!(image = %image.display(), "Skipped: {err}");
                    BatchEntry {
                        image: image.display().to_string(),
                        result: None,
                        error: Some(err.to_string()),
                    }
                }
            }
        })
        .collect())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let app = App::new(config).context("Failed to load models")?;

    let outcome = match cli.command {
        Commands::Segment {
            image,
            prompt,
            output,
        } => {
            let request = output.request(&image, prompt.into_prompt()?);
            app.segment(&request)
                .map_err(anyhow::Error::from)
                .and_then(|result| print_json(&result))
        }
        Commands::Batch { dir, text, output } => {
            batch(&app, &dir, &text, &output).and_then(|entries| print_json(&entries))
        }
        Commands::Status => print_json(&app.status()),
    };

    app.shutdown();
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbImage};
    use segma::app::model::{Candidate, ModelError, Models, Query, Segmenter, SharedImage};
    use segma::app::pipeline::persist::read_mask;
    use segma::utils::count_foreground;

    /// Top-left quarter of whatever image it is given.
    struct Quarter;

    impl Segmenter for Quarter {
        fn name(&self) -> &str {
            "quarter"
        }

        fn propose(&mut self, image: &SharedImage, _query: &Query) -> Result<Vec<Candidate>, ModelError> {
            let (w, h) = image.dimensions();
            let mask = GrayImage::from_fn(w, h, |x, y| {
                image::Luma([if x < w / 2 && y < h / 2 { 255 } else { 0 }])
            });
            Ok(vec![Candidate { mask, score: 0.5 }])
        }
    }

    #[test]
    fn test_parse_coords() {
        assert_eq!(parse_coords::<2>("3, 4.5"), Ok([3.0, 4.5]));
        assert!(parse_coords::<4>("1,2,3").is_err());
        assert!(parse_coords::<2>("1,x").is_err());
    }

    #[test]
    fn test_batch_dirs_are_unique_per_image() {
        let root = Path::new("/data/photos");
        let images: Vec<PathBuf> = ["a.png", "b.png", "sub/a.png", "a.jpg"]
            .iter()
            .map(|name| root.join(name))
            .collect();

        let out = Path::new("/out");
        assert_eq!(
            batch_dirs(root, Some(out), &images),
            vec![
                out.join(".segmentation_a"),
                out.join(".segmentation_b"),
                out.join("sub/.segmentation_a"),
                out.join(".segmentation_a_2"),
            ]
        );

        let beside = batch_dirs(root, None, &images);
        assert_eq!(beside[0], root.join(".segmentation_a"));
        assert_eq!(beside[2], root.join("sub/.segmentation_a"));
    }

    #[test]
    fn test_batch_with_save_dir_keeps_each_image_masks() {
        let tmp = tempfile::tempdir().unwrap();
        let photos = tmp.path().join("photos");
        std::fs::create_dir(&photos).unwrap();
        RgbImage::new(40, 40).save(photos.join("a.png")).unwrap();
        RgbImage::new(80, 80).save(photos.join("b.png")).unwrap();

        let app = App::with_models(Config::default(), Models::new(Box::new(Quarter), None)).unwrap();
        let output = OutputArgs {
            threshold: 0.0,
            save_dir: Some(tmp.path().join("masks")),
        };
        let entries = batch(&app, &photos, "thing", &output).unwrap();
        app.shutdown();

        assert_eq!(entries.len(), 2);
        let mut seen = HashSet::new();
        for (entry, side) in entries.iter().zip([40u32, 80]) {
            let result = entry.result.as_ref().unwrap();
            assert!(seen.insert(result.segmentation_dir.clone()));

            let object = &result.objects[0];
            let mask = read_mask(Path::new(&object.mask_path), side, side).unwrap();
            assert_eq!(count_foreground(&mask), object.pixels_count);
            assert_eq!(object.pixels_count, (side as u64 / 2).pow(2));
        }
    }
}
