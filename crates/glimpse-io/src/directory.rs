//! Frame source backed by a directory of still images.

use glimpse_core::source::{FrameSource, FrameSourceError};
use glimpse_core::Frame;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Extensions picked up as frames (compared case-insensitively).
pub const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "pgm"];

#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("frame directory not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to list {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Replays image files in name order, converting each to grayscale.
#[derive(Debug)]
pub struct DirectorySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    next: usize,
}

impl DirectorySource {
    /// Scan `dir` for image files. Subdirectories are ignored.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, DirectoryError> {
        let dir = dir.as_ref().to_path_buf();
        if !dir.is_dir() {
            return Err(DirectoryError::NotFound(dir));
        }

        let entries = std::fs::read_dir(&dir).map_err(|source| DirectoryError::Io {
            path: dir.clone(),
            source,
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_frame_file(path))
            .collect();
        files.sort();

        tracing::info!(dir = %dir.display(), frames = files.len(), "opened frame directory");
        Ok(Self {
            dir,
            files,
            next: 0,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Total number of frame files found at open time.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.files.len() - self.next
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            FRAME_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        let Some(path) = self.files.get(self.next) else {
            return Ok(None);
        };
        self.next += 1;

        let image = image::open(path).map_err(|e| FrameSourceError::Decode {
            name: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let frame = Frame::from_image(&image);
        tracing::debug!(
            file = %path.display(),
            width = frame.width,
            height = frame.height,
            "frame loaded"
        );
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};

    #[test]
    fn test_missing_directory() {
        let err = DirectorySource::open("/nonexistent/glimpse-frames").unwrap_err();
        assert!(matches!(err, DirectoryError::NotFound(_)));
    }

    #[test]
    fn test_frames_in_name_order_and_grayscale() {
        let dir = tempfile::tempdir().unwrap();
        GrayImage::from_pixel(4, 3, Luma([10]))
            .save(dir.path().join("b.png"))
            .unwrap();
        RgbImage::from_pixel(5, 2, Rgb([200, 200, 200]))
            .save(dir.path().join("a.png"))
            .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "not a frame").unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert_eq!(source.len(), 2);

        let first = source.next_frame().unwrap().unwrap();
        assert_eq!((first.width, first.height), (5, 2));
        assert_eq!(first.data.len(), 10);

        let second = source.next_frame().unwrap().unwrap();
        assert_eq!((second.width, second.height), (4, 3));
        assert!(second.data.iter().all(|&p| p == 10));

        assert!(source.next_frame().unwrap().is_none());
        assert_eq!(source.remaining(), 0);
    }

    #[test]
    fn test_undecodable_file_is_reported_then_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("0001.PNG"), b"garbage").unwrap();
        GrayImage::from_pixel(2, 2, Luma([1]))
            .save(dir.path().join("0002.png"))
            .unwrap();

        let mut source = DirectorySource::open(dir.path()).unwrap();
        assert!(matches!(
            source.next_frame(),
            Err(FrameSourceError::Decode { .. })
        ));
        assert!(source.next_frame().unwrap().is_some());
        assert!(source.next_frame().unwrap().is_none());
    }
}
