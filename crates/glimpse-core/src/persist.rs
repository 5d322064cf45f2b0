//! Model persistence.
//!
//! Layout under the store directory:
//!
//! ```text
//! CURRENT                  generation id of the live pair
//! <generation>/model.json
//! <generation>/labels.json
//! ```
//!
//! Saving writes a complete generation directory, then publishes it by
//! renaming a new `CURRENT` over the old one. Readers resolve `CURRENT` once
//! and only read that generation's files, so a crash or a concurrent reader
//! sees either the old pair or the new pair, never a mix. The previous
//! generation is kept until the next save.

use crate::labels::{Label, LabelRegistry};
use crate::lbph::LbphParams;
use crate::model::{AppearanceModel, ModelEntry, TrainError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;
use uuid::Uuid;

const CURRENT_FILE: &str = "CURRENT";
const MODEL_FILE: &str = "model.json";
const LABELS_FILE: &str = "labels.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("no trained model in {0} (enroll at least two people first)")]
    ModelNotFound(PathBuf),
    #[error("unsupported model format version {0}")]
    UnsupportedFormat(u32),
    #[error("invalid generation pointer {path}: {reason}")]
    InvalidPointer { path: PathBuf, reason: String },
    #[error("model generation {model} does not match label registry generation {labels}")]
    GenerationMismatch { model: Uuid, labels: Uuid },
    #[error("model checksum mismatch (file is corrupt)")]
    ChecksumMismatch,
    #[error("malformed model: {0}")]
    InvalidModel(#[source] TrainError),
    #[error("model label {0} is missing from the label registry")]
    UnregisteredLabel(Label),
    #[error("model store lock poisoned")]
    LockPoisoned,
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[derive(Serialize, Deserialize)]
struct ModelFile<'a> {
    format: u32,
    generation: Uuid,
    trained_at: DateTime<Utc>,
    params: LbphParams,
    patch_size: u32,
    checksum: String,
    entries: Cow<'a, [ModelEntry]>,
}

#[derive(Serialize, Deserialize)]
struct LabelsFile<'a> {
    format: u32,
    generation: Uuid,
    labels: Cow<'a, LabelRegistry>,
}

/// A model and the registry it was trained with, ready for recognition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedModel {
    pub model: AppearanceModel,
    pub labels: LabelRegistry,
}

/// SHA-256 over the grid, patch size and every entry's label and bin
/// counts, hex encoded.
pub fn checksum(model: &AppearanceModel) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model.params().grid_x.to_le_bytes());
    hasher.update(model.params().grid_y.to_le_bytes());
    hasher.update(model.patch_size().to_le_bytes());
    for entry in model.entries() {
        hasher.update(entry.label.0.to_le_bytes());
        hasher.update(entry.histogram.cell_area().to_le_bytes());
        hasher.update((entry.histogram.len() as u64).to_le_bytes());
        for bin in entry.histogram.bins() {
            hasher.update(bin.to_le_bytes());
        }
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// Directory holding persisted model/registry generations.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
    lock: Arc<RwLock<()>>,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current_path(&self) -> PathBuf {
        self.dir.join(CURRENT_FILE)
    }

    pub fn generation_dir(&self, generation: Uuid) -> PathBuf {
        self.dir.join(generation.to_string())
    }

    pub fn model_path(&self, generation: Uuid) -> PathBuf {
        self.generation_dir(generation).join(MODEL_FILE)
    }

    pub fn labels_path(&self, generation: Uuid) -> PathBuf {
        self.generation_dir(generation).join(LABELS_FILE)
    }

    /// Generation named by `CURRENT`, or `None` before the first save.
    pub fn current_generation(&self) -> Result<Option<Uuid>, PersistError> {
        let path = self.current_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err(&path)(e)),
        };
        Uuid::parse_str(text.trim())
            .map(Some)
            .map_err(|e| PersistError::InvalidPointer {
                path,
                reason: e.to_string(),
            })
    }

    /// Whether a published pair is present.
    pub fn exists(&self) -> bool {
        match self.current_generation() {
            Ok(Some(generation)) => {
                self.model_path(generation).is_file() && self.labels_path(generation).is_file()
            }
            _ => false,
        }
    }

    /// Publish `model` and `labels` as the live pair.
    ///
    /// The live pair is only replaced by the final rename of `CURRENT`; it
    /// stays valid if serialisation or any write fails.
    pub fn save(&self, model: &AppearanceModel, labels: &LabelRegistry) -> Result<(), PersistError> {
        if let Some(label) = model.labels().into_iter().find(|l| !labels.contains(*l)) {
            return Err(PersistError::UnregisteredLabel(label));
        }

        let generation = model.generation();
        let model_bytes = serde_json::to_vec(&ModelFile {
            format: FORMAT_VERSION,
            generation,
            trained_at: model.trained_at(),
            params: *model.params(),
            patch_size: model.patch_size(),
            checksum: checksum(model),
            entries: Cow::Borrowed(model.entries()),
        })?;
        let labels_bytes = serde_json::to_vec_pretty(&LabelsFile {
            format: FORMAT_VERSION,
            generation,
            labels: Cow::Borrowed(labels),
        })?;

        let _guard = self.lock.write().map_err(|_| PersistError::LockPoisoned)?;
        let previous = self.current_generation().unwrap_or(None);

        let gen_dir = self.generation_dir(generation);
        fs::create_dir_all(&gen_dir).map_err(io_err(&gen_dir))?;
        replace_file(&self.model_path(generation), &model_bytes)?;
        replace_file(&self.labels_path(generation), &labels_bytes)?;
        sync_dir(&gen_dir)?;

        replace_file(&self.current_path(), format!("{generation}\n").as_bytes())?;
        sync_dir(&self.dir)?;

        self.prune(&[Some(generation), previous]);

        tracing::info!(
            dir = %self.dir.display(),
            %generation,
            samples = model.len(),
            identities = labels.len(),
            "saved model"
        );
        Ok(())
    }

    /// Load and validate the live pair.
    pub fn load(&self) -> Result<LoadedModel, PersistError> {
        let _guard = self.lock.read().map_err(|_| PersistError::LockPoisoned)?;
        let Some(generation) = self.current_generation()? else {
            return Err(PersistError::ModelNotFound(self.dir.clone()));
        };

        let model_path = self.model_path(generation);
        let labels_path = self.labels_path(generation);
        let model_bytes = fs::read(&model_path).map_err(io_err(&model_path))?;
        let labels_bytes = fs::read(&labels_path).map_err(io_err(&labels_path))?;
        let model_file: ModelFile<'static> = serde_json::from_slice(&model_bytes)?;
        let labels_file: LabelsFile<'static> = serde_json::from_slice(&labels_bytes)?;

        for format in [model_file.format, labels_file.format] {
            if format != FORMAT_VERSION {
                return Err(PersistError::UnsupportedFormat(format));
            }
        }
        if model_file.generation != labels_file.generation {
            return Err(PersistError::GenerationMismatch {
                model: model_file.generation,
                labels: labels_file.generation,
            });
        }

        let model = AppearanceModel::from_parts(
            model_file.generation,
            model_file.trained_at,
            model_file.params,
            model_file.patch_size,
            model_file.entries.into_owned(),
        )
        .map_err(PersistError::InvalidModel)?;
        if checksum(&model) != model_file.checksum {
            return Err(PersistError::ChecksumMismatch);
        }

        let labels = labels_file.labels.into_owned();
        if let Some(label) = model.labels().into_iter().find(|l| !labels.contains(*l)) {
            return Err(PersistError::UnregisteredLabel(label));
        }

        tracing::info!(
            dir = %self.dir.display(),
            %generation,
            trained_at = %model.trained_at(),
            samples = model.len(),
            identities = labels.len(),
            "loaded model"
        );
        Ok(LoadedModel { model, labels })
    }

    /// Remove generation directories other than `keep`. Failures are logged.
    fn prune(&self, keep: &[Option<Uuid>]) {
        let Ok(entries) = fs::read_dir(&self.dir) else {
            return;
        };
        for entry in entries.filter_map(Result::ok) {
            let Some(generation) = entry
                .file_name()
                .to_str()
                .and_then(|name| Uuid::parse_str(name).ok())
            else {
                continue;
            };
            if keep.contains(&Some(generation)) || !entry.path().is_dir() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(%generation, error = %e, "failed to prune old model generation");
            }
        }
    }
}

/// Write `bytes` to a sibling temp file, flush it, and rename it over `path`.
fn replace_file(path: &Path, bytes: &[u8]) -> Result<(), PersistError> {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    let tmp = path.with_file_name(name);

    let mut file = fs::File::create(&tmp).map_err(io_err(&tmp))?;
    file.write_all(bytes).map_err(io_err(&tmp))?;
    file.sync_all().map_err(io_err(&tmp))?;
    fs::rename(&tmp, path).map_err(io_err(path))
}

/// Flush directory entries so completed renames survive a crash.
fn sync_dir(dir: &Path) -> Result<(), PersistError> {
    #[cfg(unix)]
    {
        fs::File::open(dir)
            .and_then(|d| d.sync_all())
            .map_err(io_err(dir))?;
    }
    #[cfg(not(unix))]
    let _ = dir;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Trainer;
    use crate::patch::FacePatch;
    use image::{GrayImage, Luma};

    fn trained() -> (AppearanceModel, LabelRegistry) {
        let registry = LabelRegistry::from_identities(["alice", "bob"]);
        let checker = GrayImage::from_fn(32, 32, |x, y| Luma([if (x + y) % 2 == 0 { 220 } else { 30 }]));
        let gradient = GrayImage::from_fn(32, 32, |x, y| Luma([(x * 4 + y * 2) as u8]));
        let samples = vec![
            (FacePatch::normalize(checker, 32), Label(0)),
            (FacePatch::normalize(gradient, 32), Label(1)),
        ];
        (Trainer::default().train(&samples).unwrap(), registry)
    }

    fn edit_model_json(store: &ModelStore, generation: Uuid, edit: impl FnOnce(&mut serde_json::Value)) {
        let path = store.model_path(generation);
        let mut json: serde_json::Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        edit(&mut json);
        fs::write(&path, serde_json::to_vec(&json).unwrap()).unwrap();
    }

    fn generation_dirs(store: &ModelStore) -> usize {
        fs::read_dir(store.dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .count()
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path().join("model"));
        let (model, labels) = trained();

        store.save(&model, &labels).unwrap();
        assert_eq!(store.current_generation().unwrap(), Some(model.generation()));
        let loaded = store.load().unwrap();
        assert_eq!(loaded.model, model);
        assert_eq!(loaded.labels, labels);
    }

    #[test]
    fn test_load_missing_is_model_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(PersistError::ModelNotFound(_))));
    }

    #[test]
    fn test_save_replaces_previous_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (first, labels) = trained();
        let (second, _) = trained();
        store.save(&first, &labels).unwrap();
        store.save(&second, &labels).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded.model.generation(), second.generation());
        for d in [dir.path().to_path_buf(), store.generation_dir(second.generation())] {
            let leftovers: Vec<_> = fs::read_dir(d)
                .unwrap()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
                .collect();
            assert!(leftovers.is_empty());
        }
    }

    #[test]
    fn test_keeps_only_current_and_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (_, labels) = trained();
        let models: Vec<_> = (0..3).map(|_| trained().0).collect();
        for model in &models {
            store.save(model, &labels).unwrap();
        }

        assert_eq!(generation_dirs(&store), 2);
        assert!(!store.generation_dir(models[0].generation()).exists());
        assert!(store.generation_dir(models[1].generation()).exists());
        assert_eq!(store.load().unwrap().model.generation(), models[2].generation());
    }

    #[test]
    fn test_unpublished_generation_is_invisible() {
        // A save interrupted before CURRENT moved leaves a partial directory
        // that readers never look at.
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (first, labels) = trained();
        store.save(&first, &labels).unwrap();

        let (second, _) = trained();
        fs::create_dir_all(store.generation_dir(second.generation())).unwrap();
        fs::write(store.model_path(second.generation()), b"{\"format\":1").unwrap();
        fs::write(dir.path().join("CURRENT.tmp"), b"garbage").unwrap();

        assert_eq!(store.load().unwrap().model.generation(), first.generation());
        assert!(store.exists());
    }

    #[test]
    fn test_invalid_pointer() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        fs::write(store.current_path(), "not-a-uuid").unwrap();
        assert!(!store.exists());
        assert!(matches!(store.load(), Err(PersistError::InvalidPointer { .. })));
    }

    #[test]
    fn test_save_rejects_unregistered_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, _) = trained();
        let partial = LabelRegistry::from_identities(["alice"]);
        assert!(matches!(
            store.save(&model, &partial),
            Err(PersistError::UnregisteredLabel(Label(1)))
        ));
        assert!(!store.exists());
    }

    #[test]
    fn test_generation_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (first, labels) = trained();
        store.save(&first, &labels).unwrap();
        let old_labels = fs::read(store.labels_path(first.generation())).unwrap();

        let (second, _) = trained();
        store.save(&second, &labels).unwrap();
        fs::write(store.labels_path(second.generation()), old_labels).unwrap();

        assert!(matches!(
            store.load(),
            Err(PersistError::GenerationMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_model_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, labels) = trained();
        store.save(&model, &labels).unwrap();

        edit_model_json(&store, model.generation(), |json| {
            json["entries"][0]["label"] = serde_json::json!(1);
        });
        assert!(matches!(store.load(), Err(PersistError::ChecksumMismatch)));
    }

    #[test]
    fn test_checksum_covers_patch_size() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, labels) = trained();
        store.save(&model, &labels).unwrap();

        edit_model_json(&store, model.generation(), |json| {
            json["patch_size"] = serde_json::json!(48);
        });
        assert!(matches!(store.load(), Err(PersistError::ChecksumMismatch)));
    }

    #[test]
    fn test_zero_grid_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, labels) = trained();
        store.save(&model, &labels).unwrap();

        edit_model_json(&store, model.generation(), |json| {
            json["params"]["grid_x"] = serde_json::json!(0);
        });
        assert!(matches!(
            store.load(),
            Err(PersistError::InvalidModel(TrainError::GridDoesNotFit { grid_x: 0, .. }))
        ));
    }

    #[test]
    fn test_oversized_grid_is_rejected_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, labels) = trained();
        store.save(&model, &labels).unwrap();

        edit_model_json(&store, model.generation(), |json| {
            json["patch_size"] = serde_json::json!(6);
        });
        assert!(matches!(
            store.load(),
            Err(PersistError::InvalidModel(TrainError::GridDoesNotFit { patch_size: 6, .. }))
        ));
    }

    #[test]
    fn test_descriptor_length_is_checked_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = ModelStore::new(dir.path());
        let (model, labels) = trained();
        store.save(&model, &labels).unwrap();

        edit_model_json(&store, model.generation(), |json| {
            json["params"] = serde_json::json!({ "grid_x": 4, "grid_y": 4 });
        });
        assert!(matches!(
            store.load(),
            Err(PersistError::InvalidModel(TrainError::DescriptorLength { .. }))
        ));
    }

    #[test]
    fn test_checksum_is_stable() {
        let (model, _) = trained();
        assert_eq!(checksum(&model), checksum(&model));
        assert_eq!(checksum(&model).len(), 64);
    }
}
