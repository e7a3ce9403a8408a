use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::app::model::SharedImage;
use crate::app::pipeline::SegmentError;

/// The decoded RGB source of one request.
#[derive(Clone)]
pub struct SourceImage {
    pub data: SharedImage,
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

impl SourceImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, SegmentError> {
        let path = path.as_ref();
        let load_error = |reason: String| SegmentError::ImageLoad {
            path: path.to_path_buf(),
            reason,
        };

        if !path.is_file() {
            return Err(load_error("no such file".into()));
        }

        let data = image::ImageReader::open(path)
            .map_err(|e| load_error(e.to_string()))?
            .with_guessed_format()
            .map_err(|e| load_error(e.to_string()))?
            .decode()
            .map_err(|e| load_error(e.to_string()))?
            .to_rgb8();

        let (width, height) = data.dimensions();
        if width == 0 || height == 0 {
            return Err(load_error("image has no pixels".into()));
        }

        Ok(SourceImage {
            data: Arc::new(data),
            path: path.to_path_buf(),
            width,
            height,
        })
    }
}
