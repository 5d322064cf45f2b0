//! Appearance model and its batch trainer.
//!
//! A model is the full table of (descriptor, label) pairs for every training
//! sample. It is immutable once built; adding anyone means training again
//! over the whole sample store.

use crate::labels::Label;
use crate::lbph::{self, Histogram, LbphParams};
use crate::patch::FacePatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

/// A classifier over a single class cannot tell anyone apart.
const MIN_DISTINCT_LABELS: usize = 2;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TrainError {
    #[error("insufficient training data: {samples} samples across {labels} labels (need at least 2 labels)")]
    InsufficientData { samples: usize, labels: usize },
    #[error("patch size mismatch: expected {expected}px, got {actual}px")]
    PatchSizeMismatch { expected: u32, actual: u32 },
    #[error("a {patch_size}px patch cannot hold a {grid_x}x{grid_y} LBP grid")]
    GridDoesNotFit { grid_x: u32, grid_y: u32, patch_size: u32 },
    #[error("descriptor length {actual} does not match the {expected}-bin grid")]
    DescriptorLength { expected: usize, actual: usize },
}

fn check_grid(params: &LbphParams, patch_size: u32) -> Result<(), TrainError> {
    if params.fits(patch_size) {
        Ok(())
    } else {
        Err(TrainError::GridDoesNotFit {
            grid_x: params.grid_x,
            grid_y: params.grid_y,
            patch_size,
        })
    }
}

/// One training sample's descriptor and label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEntry {
    pub label: Label,
    pub histogram: Histogram,
}

/// Trained LBPH classifier state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppearanceModel {
    generation: Uuid,
    trained_at: DateTime<Utc>,
    params: LbphParams,
    patch_size: u32,
    entries: Vec<ModelEntry>,
}

impl AppearanceModel {
    /// Reassemble a model from persisted parts, rejecting a grid that does
    /// not fit the patch size or descriptors of the wrong length.
    pub(crate) fn from_parts(
        generation: Uuid,
        trained_at: DateTime<Utc>,
        params: LbphParams,
        patch_size: u32,
        entries: Vec<ModelEntry>,
    ) -> Result<Self, TrainError> {
        check_grid(&params, patch_size)?;
        let expected = params.histogram_len();
        if let Some(bad) = entries.iter().find(|e| e.histogram.len() != expected) {
            return Err(TrainError::DescriptorLength {
                expected,
                actual: bad.histogram.len(),
            });
        }
        Ok(Self {
            generation,
            trained_at,
            params,
            patch_size,
            entries,
        })
    }

    /// Unique id of the training run that produced this model.
    pub fn generation(&self) -> Uuid {
        self.generation
    }

    pub fn trained_at(&self) -> DateTime<Utc> {
        self.trained_at
    }

    pub fn params(&self) -> &LbphParams {
        &self.params
    }

    /// Edge length of the patches this model was trained on.
    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }

    pub fn entries(&self) -> &[ModelEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Distinct labels present in the model.
    pub fn labels(&self) -> BTreeSet<Label> {
        self.entries.iter().map(|e| e.label).collect()
    }

    /// Describe `patch` exactly the way training samples were described.
    pub fn describe(&self, patch: &FacePatch) -> Histogram {
        if patch.size() == self.patch_size {
            lbph::describe(patch.as_image(), &self.params)
        } else {
            lbph::describe(patch.resized(self.patch_size).as_image(), &self.params)
        }
    }
}

/// Stateless batch trainer.
#[derive(Debug, Clone, Default)]
pub struct Trainer {
    params: LbphParams,
}

impl Trainer {
    pub fn new(params: LbphParams) -> Self {
        Self { params }
    }

    /// Describe every sample and collect the (descriptor, label) table.
    ///
    /// Fails with `InsufficientData` for zero samples or fewer than two
    /// distinct labels. All patches must share one canonical size, large
    /// enough for the grid.
    pub fn train(&self, samples: &[(FacePatch, Label)]) -> Result<AppearanceModel, TrainError> {
        let labels: BTreeSet<Label> = samples.iter().map(|(_, l)| *l).collect();
        if samples.is_empty() || labels.len() < MIN_DISTINCT_LABELS {
            return Err(TrainError::InsufficientData {
                samples: samples.len(),
                labels: labels.len(),
            });
        }

        let patch_size = samples[0].0.size();
        check_grid(&self.params, patch_size)?;
        let mut entries = Vec::with_capacity(samples.len());
        for (patch, label) in samples {
            if patch.size() != patch_size {
                return Err(TrainError::PatchSizeMismatch {
                    expected: patch_size,
                    actual: patch.size(),
                });
            }
            entries.push(ModelEntry {
                label: *label,
                histogram: lbph::describe(patch.as_image(), &self.params),
            });
        }

        let model = AppearanceModel {
            generation: Uuid::new_v4(),
            trained_at: Utc::now(),
            params: self.params,
            patch_size,
            entries,
        };

        tracing::info!(
            generation = %model.generation,
            samples = model.len(),
            labels = labels.len(),
            grid_x = self.params.grid_x,
            grid_y = self.params.grid_y,
            "trained appearance model"
        );

        Ok(model)
    }
}
