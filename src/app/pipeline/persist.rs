use image::GrayImage;

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use super::error::PersistenceError;

/// `<parent>/.segmentation_<stem>` next to the image.
pub fn default_segmentation_dir(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    let parent = image_path.parent().unwrap_or_else(|| Path::new(""));

    parent.join(format!(".segmentation_{stem}"))
}

/// Resolve the output directory to an absolute path and create it if missing.
/// An existing directory is reused as is.
pub fn prepare_dir(image_path: &Path, save_dir: Option<&Path>) -> io::Result<PathBuf> {
    let dir = match save_dir {
        Some(dir) => dir.to_path_buf(),
        None => default_segmentation_dir(image_path),
    };
    let dir = std::path::absolute(dir)?;

    fs::create_dir_all(&dir)?;
    Ok(dir)
}

pub fn mask_path(dir: &Path, ordinal: usize) -> PathBuf {
    dir.join(format!("mask_{ordinal}.bin"))
}

/// Raw `width × height` bytes, row-major, no header. Overwrites.
pub fn write_mask(dir: &Path, ordinal: usize, mask: &GrayImage) -> Result<PathBuf, PersistenceError> {
    let path = mask_path(dir, ordinal);
    match fs::write(&path, mask.as_raw()) {
        Ok(()) => Ok(path),
        Err(source) => Err(PersistenceError { path, source }),
    }
}

/// Read back a file written by [`write_mask`].
pub fn read_mask(path: &Path, width: u32, height: u32) -> io::Result<GrayImage> {
    let bytes = fs::read(path)?;
    let len = bytes.len();
    GrayImage::from_raw(width, height, bytes).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} holds {len} bytes, expected {width}x{height}", path.display()),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dir() {
        assert_eq!(
            default_segmentation_dir(Path::new("/a/b/cat.png")),
            PathBuf::from("/a/b/.segmentation_cat")
        );
        assert_eq!(
            default_segmentation_dir(Path::new("/a/b/archive.tar.gz")),
            PathBuf::from("/a/b/.segmentation_archive.tar")
        );
    }

    #[test]
    fn test_prepare_dir_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let image = tmp.path().join("dog.jpg");

        let first = prepare_dir(&image, None).unwrap();
        let second = prepare_dir(&image, None).unwrap();
        assert_eq!(first, second);
        assert!(first.is_absolute());
        assert!(first.ends_with(".segmentation_dog"));

        let custom = tmp.path().join("out/nested");
        assert_eq!(prepare_dir(&image, Some(&custom)).unwrap(), custom);
        assert!(custom.is_dir());
    }

    #[test]
    fn test_mask_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let mask = GrayImage::from_fn(7, 3, |x, y| image::Luma([if (x + y) % 2 == 0 { 255 } else { 0 }]));

        let path = write_mask(tmp.path(), 3, &mask).unwrap();
        assert_eq!(path, tmp.path().join("mask_3.bin"));
        assert_eq!(fs::metadata(&path).unwrap().len(), 21);

        let back = read_mask(&path, 7, 3).unwrap();
        assert_eq!(back.as_raw(), mask.as_raw());
        assert!(read_mask(&path, 7, 4).is_err());
    }

    #[test]
    fn test_write_failure_reports_path() {
        let tmp = tempfile::tempdir().unwrap();
        // a directory where the file should go
        fs::create_dir(tmp.path().join("mask_1.bin")).unwrap();

        let err = write_mask(tmp.path(), 1, &GrayImage::new(2, 2)).unwrap_err();
        assert_eq!(err.path, tmp.path().join("mask_1.bin"));
    }
}
