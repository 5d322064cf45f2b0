//! On-disk sample store.
//!
//! Layout: `<root>/<identity>/<NNNNNN>.png`, one directory per person. PNG is
//! lossless, so a stored patch reads back byte-identical.

use crate::patch::FacePatch;
use image::ImageFormat;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const SAMPLE_EXTENSION: &str = "png";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("unsafe identity name {0:?}")]
    UnsafeIdentity(String),
    #[error("sample bucket {0} has no free index left")]
    IndexExhausted(PathBuf),
    #[error("corrupt sample {path}: {reason}")]
    CorruptSample { path: PathBuf, reason: String },
    #[error("failed to encode sample {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reject names that would escape or hide inside the store root.
pub fn validate_identity(identity: &str) -> Result<(), StoreError> {
    let unsafe_name = identity.is_empty()
        || identity.starts_with('.')
        || identity.contains(['/', '\\'])
        || identity.chars().any(char::is_control);
    if unsafe_name {
        return Err(StoreError::UnsafeIdentity(identity.to_string()));
    }
    Ok(())
}

/// Per-identity buckets of normalised face patches.
#[derive(Debug, Clone)]
pub struct SampleStore {
    root: PathBuf,
    patch_size: u32,
}

impl SampleStore {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// Samples read back are normalised to `patch_size`.
    pub fn open(root: impl Into<PathBuf>, patch_size: u32) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(io_err(&root))?;
        Ok(Self { root, patch_size })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    fn bucket(&self, identity: &str) -> Result<PathBuf, StoreError> {
        validate_identity(identity)?;
        Ok(self.root.join(identity))
    }

    /// Append `patch` to the identity's bucket, creating it on first use.
    ///
    /// The file gets the next free index, so enrolling the same name again
    /// adds samples rather than overwriting earlier ones.
    pub fn add_sample(&self, identity: &str, patch: &FacePatch) -> Result<PathBuf, StoreError> {
        let bucket = self.bucket(identity)?;
        fs::create_dir_all(&bucket).map_err(io_err(&bucket))?;

        let next = sample_files(&bucket)?
            .iter()
            .filter_map(|p| sample_index(p))
            .max()
            .map_or(Some(0), |i| i.checked_add(1))
            .ok_or_else(|| StoreError::IndexExhausted(bucket.clone()))?;
        let path = bucket.join(format!("{next:06}.{SAMPLE_EXTENSION}"));

        patch
            .as_image()
            .save_with_format(&path, ImageFormat::Png)
            .map_err(|source| StoreError::Encode {
                path: path.clone(),
                source,
            })?;

        tracing::trace!(identity, path = %path.display(), "stored sample");
        Ok(path)
    }

    /// Identity buckets, sorted lexicographically.
    pub fn list_identities(&self) -> Result<Vec<String>, StoreError> {
        let mut identities = Vec::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(identities),
            Err(e) => return Err(io_err(&self.root)(e)),
        };

        for entry in entries {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.file_type().map_err(io_err(&entry.path()))?.is_dir() {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) if validate_identity(&name).is_ok() => identities.push(name),
                Ok(_) => {}
                Err(name) => {
                    tracing::warn!(name = ?name, "skipping non-UTF-8 identity directory");
                }
            }
        }

        identities.sort();
        Ok(identities)
    }

    /// Load every readable sample for `identity`, in file-name order.
    ///
    /// Unreadable or undecodable files are logged and skipped.
    pub fn list_samples(&self, identity: &str) -> Result<Vec<FacePatch>, StoreError> {
        let bucket = self.bucket(identity)?;
        if !bucket.is_dir() {
            return Ok(Vec::new());
        }

        let mut patches = Vec::new();
        for path in sample_files(&bucket)? {
            match self.read_sample(&path) {
                Ok(patch) => patches.push(patch),
                Err(e) => tracing::warn!(identity, error = %e, "skipping corrupt sample"),
            }
        }
        Ok(patches)
    }

    /// Number of sample files in the identity's bucket (not decoded).
    pub fn sample_count(&self, identity: &str) -> Result<usize, StoreError> {
        let bucket = self.bucket(identity)?;
        if !bucket.is_dir() {
            return Ok(0);
        }
        Ok(sample_files(&bucket)?.len())
    }

    /// Decode a single sample file as a grayscale patch.
    pub fn read_sample(&self, path: &Path) -> Result<FacePatch, StoreError> {
        let corrupt = |reason: String| StoreError::CorruptSample {
            path: path.to_path_buf(),
            reason,
        };
        let image = image::open(path).map_err(|e| corrupt(e.to_string()))?;
        let gray = image.to_luma8();
        if gray.width() == 0 || gray.height() == 0 {
            return Err(corrupt("empty image".into()));
        }
        Ok(FacePatch::normalize(gray, self.patch_size))
    }
}

/// Regular, non-hidden files in a bucket, sorted by name.
fn sample_files(bucket: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(bucket).map_err(io_err(bucket))? {
        let entry = entry.map_err(io_err(bucket))?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn sample_index(path: &Path) -> Option<u32> {
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn patch(value: u8) -> FacePatch {
        let image = GrayImage::from_fn(24, 24, |x, y| Luma([value.wrapping_add((x ^ y) as u8)]));
        FacePatch::normalize(image, 24)
    }

    #[test]
    fn test_validate_identity() {
        assert!(validate_identity("alice").is_ok());
        assert!(validate_identity("Jean Dupont").is_ok());
        for bad in ["", ".", "..", ".hidden", "a/b", "a\\b", "tab\there"] {
            assert!(validate_identity(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_add_and_list_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        store.add_sample("alice", &patch(10)).unwrap();
        store.add_sample("alice", &patch(20)).unwrap();

        let samples = store.list_samples("alice").unwrap();
        assert_eq!(samples, vec![patch(10), patch(20)]);
        assert_eq!(store.sample_count("alice").unwrap(), 2);
    }

    #[test]
    fn test_add_appends_after_existing_indices() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        let first = store.add_sample("bob", &patch(1)).unwrap();
        let second = store.add_sample("bob", &patch(2)).unwrap();
        assert!(first.ends_with("000000.png"));
        assert!(second.ends_with("000001.png"));

        // A reopened store keeps appending.
        let reopened = SampleStore::open(dir.path(), 24).unwrap();
        let third = reopened.add_sample("bob", &patch(3)).unwrap();
        assert!(third.ends_with("000002.png"));
    }

    #[test]
    fn test_list_identities_sorted_dirs_only() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        store.add_sample("carol", &patch(1)).unwrap();
        store.add_sample("alice", &patch(1)).unwrap();
        store.add_sample("bob", &patch(1)).unwrap();
        fs::write(dir.path().join("stray.txt"), b"not a bucket").unwrap();
        fs::create_dir(dir.path().join(".cache")).unwrap();

        assert_eq!(store.list_identities().unwrap(), vec!["alice", "bob", "carol"]);
    }

    #[test]
    fn test_corrupt_sample_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        store.add_sample("alice", &patch(5)).unwrap();
        fs::write(dir.path().join("alice").join("999999.png"), b"definitely not a png").unwrap();

        let samples = store.list_samples("alice").unwrap();
        assert_eq!(samples.len(), 1);

        let err = store
            .read_sample(&dir.path().join("alice").join("999999.png"))
            .unwrap_err();
        assert!(matches!(err, StoreError::CorruptSample { .. }));
    }

    #[test]
    fn test_foreign_images_are_normalised() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        fs::create_dir(dir.path().join("dave")).unwrap();
        image::RgbImage::from_pixel(40, 30, image::Rgb([10, 20, 30]))
            .save(dir.path().join("dave").join("photo.png"))
            .unwrap();

        let samples = store.list_samples("dave").unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].size(), 24);
    }

    #[test]
    fn test_unknown_identity_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        assert!(store.list_samples("nobody").unwrap().is_empty());
        assert_eq!(store.sample_count("nobody").unwrap(), 0);
    }

    #[test]
    fn test_add_rejects_unsafe_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        let err = store.add_sample("../escape", &patch(1)).unwrap_err();
        assert!(matches!(err, StoreError::UnsafeIdentity(_)));
    }

    #[test]
    fn test_add_fails_when_index_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let store = SampleStore::open(dir.path(), 24).unwrap();
        store.add_sample("carol", &patch(1)).unwrap();
        let last = dir.path().join("carol").join(format!("{}.png", u32::MAX));
        fs::write(&last, b"").unwrap();

        let err = store.add_sample("carol", &patch(2)).unwrap_err();
        assert!(matches!(err, StoreError::IndexExhausted(ref bucket) if bucket.ends_with("carol")));
        assert_eq!(store.sample_count("carol").unwrap(), 2);
    }
}
