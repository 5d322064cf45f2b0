//! Enrollment: capture samples for a new identity, then retrain everyone.
//!
//! ```text
//! Idle ──name──▶ Capturing ──target reached──▶ Training ──▶ Done
//!                    │
//!                    └──stop / source failure──▶ Aborted
//! ```

use crate::config::Config;
use crate::detector::RegionDetector;
use crate::labels::LabelRegistry;
use crate::lbph::LbphParams;
use crate::model::{TrainError, Trainer};
use crate::patch::FacePatch;
use crate::persist::{ModelStore, PersistError};
use crate::source::{DisplaySink, FrameSource, StopSignal};
use crate::store::{self, SampleStore, StoreError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("invalid identity name {0:?}")]
    InvalidIdentity(String),
    #[error("frame source unavailable after {collected} samples: {reason}")]
    FrameSourceUnavailable { collected: usize, reason: String },
    #[error("training failed: {0}")]
    TrainingFailed(#[from] TrainError),
    #[error("sample store: {0}")]
    Store(#[from] StoreError),
    #[error("model store: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollState {
    Idle,
    Capturing { identity: String, collected: usize },
    Training { identity: String },
    Done,
    Aborted,
}

/// What a training run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSummary {
    pub generation: Uuid,
    pub identities: usize,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    /// Target reached and a new model was saved.
    Trained(TrainingSummary),
    /// Stopped before the target; captured samples stay on disk, no training.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollReport {
    pub identity: String,
    pub collected: usize,
    pub outcome: EnrollOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrollSettings {
    pub samples_per_person: usize,
    pub patch_size: u32,
    pub max_frame_failures: usize,
    pub lbph: LbphParams,
}

impl Default for EnrollSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EnrollSettings {
    fn from(config: &Config) -> Self {
        Self {
            samples_per_person: config.samples_per_person,
            patch_size: config.patch_size,
            max_frame_failures: config.max_frame_failures,
            lbph: config.lbph_params(),
        }
    }
}

/// Drives detector → sample store → trainer → model store for one person.
pub struct Enrollment<'a, D: RegionDetector + ?Sized> {
    detector: &'a D,
    samples: &'a SampleStore,
    models: &'a ModelStore,
    settings: EnrollSettings,
    state: EnrollState,
}

impl<'a, D: RegionDetector + ?Sized> Enrollment<'a, D> {
    pub fn new(
        detector: &'a D,
        samples: &'a SampleStore,
        models: &'a ModelStore,
        settings: EnrollSettings,
    ) -> Self {
        Self {
            detector,
            samples,
            models,
            settings,
            state: EnrollState::Idle,
        }
    }

    pub fn state(&self) -> &EnrollState {
        &self.state
    }

    /// Capture up to `samples_per_person` samples for `identity`, then retrain.
    ///
    /// The stop signal is checked between frames only.
    pub fn run(
        &mut self,
        identity: &str,
        source: &mut dyn FrameSource,
        sink: &mut dyn DisplaySink,
        stop: &StopSignal,
    ) -> Result<EnrollReport, EnrollError> {
        let name = identity.trim();
        if name.is_empty() || store::validate_identity(name).is_err() {
            self.state = EnrollState::Idle;
            return Err(EnrollError::InvalidIdentity(identity.to_string()));
        }
        let name = name.to_string();
        let target = self.settings.samples_per_person;

        tracing::info!(identity = %name, target, "enrollment: capturing");
        self.state = EnrollState::Capturing {
            identity: name.clone(),
            collected: 0,
        };

        let mut collected = 0usize;
        let mut failures = 0usize;
        while collected < target {
            if stop.is_stopped() {
                tracing::info!(identity = %name, collected, "enrollment: stopped before target");
                self.state = EnrollState::Aborted;
                return Ok(EnrollReport {
                    identity: name,
                    collected,
                    outcome: EnrollOutcome::Cancelled,
                });
            }

            let frame = match source.next_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    frame
                }
                Ok(None) => {
                    return Err(self.abort(collected, "end of stream".to_string()));
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "enrollment: no frame delivered");
                    if failures >= self.settings.max_frame_failures {
                        return Err(self.abort(collected, e.to_string()));
                    }
                    continue;
                }
            };

            let regions = self.detector.detect(&frame);
            let mut stored = Vec::with_capacity(regions.len());
            for region in &regions {
                if collected >= target {
                    break;
                }
                let Some(patch) = FacePatch::from_region(&frame, region, self.settings.patch_size) else {
                    continue;
                };
                if let Err(e) = self.samples.add_sample(&name, &patch) {
                    self.state = EnrollState::Aborted;
                    return Err(e.into());
                }
                stored.push(*region);
                collected += 1;
            }

            tracing::debug!(identity = %name, regions = regions.len(), collected, "enrollment: frame processed");
            sink.capture_progress(&frame, &stored, collected, target);
            self.state = EnrollState::Capturing {
                identity: name.clone(),
                collected,
            };
        }

        tracing::info!(identity = %name, collected, "enrollment: target reached, training");
        self.state = EnrollState::Training {
            identity: name.clone(),
        };
        match retrain(self.samples, self.models, &self.settings) {
            Ok(summary) => {
                self.state = EnrollState::Done;
                Ok(EnrollReport {
                    identity: name,
                    collected,
                    outcome: EnrollOutcome::Trained(summary),
                })
            }
            Err(e) => {
                self.state = EnrollState::Aborted;
                Err(e)
            }
        }
    }

    fn abort(&mut self, collected: usize, reason: String) -> EnrollError {
        tracing::warn!(collected, reason = %reason, "enrollment: frame source unavailable");
        self.state = EnrollState::Aborted;
        EnrollError::FrameSourceUnavailable { collected, reason }
    }
}

/// Rebuild the label registry and model from every sample in the store.
///
/// The previous model pair stays in place unless the new one trains and
/// saves successfully.
pub fn retrain(
    samples: &SampleStore,
    models: &ModelStore,
    settings: &EnrollSettings,
) -> Result<TrainingSummary, EnrollError> {
    let mut registry = LabelRegistry::new();
    let mut training = Vec::new();

    for identity in samples.list_identities()? {
        let patches = samples.list_samples(&identity)?;
        if patches.is_empty() {
            tracing::warn!(identity = %identity, "no readable samples; identity left out of model");
            continue;
        }
        let label = registry.assign(&identity);
        tracing::debug!(identity = %identity, %label, samples = patches.len(), "training identity");
        training.extend(patches.into_iter().map(|p| (p, label)));
    }

    let model = Trainer::new(settings.lbph).train(&training)?;
    models.save(&model, &registry)?;

    Ok(TrainingSummary {
        generation: model.generation(),
        identities: registry.len(),
        samples: model.len(),
    })
}
