//! Recognition: load the model once, then classify every detection in every
//! frame until told to stop.

use crate::config::Config;
use crate::detector::RegionDetector;
use crate::frame::Frame;
use crate::patch::FacePatch;
use crate::persist::{LoadedModel, ModelStore, PersistError};
use crate::recognizer::{Recognizer, RecognizerError, ThresholdPolicy};
use crate::source::{DisplaySink, FrameSource, StopSignal};
use crate::types::AnnotatedRegion;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognizeError {
    #[error("no trained model in {0} (enroll at least two people first)")]
    ModelNotFound(PathBuf),
    #[error("failed to load model: {0}")]
    Persist(#[source] PersistError),
    #[error("frame source unavailable: {0}")]
    FrameSourceUnavailable(String),
    #[error(transparent)]
    Recognizer(#[from] RecognizerError),
}

impl From<PersistError> for RecognizeError {
    fn from(e: PersistError) -> Self {
        match e {
            PersistError::ModelNotFound(path) => Self::ModelNotFound(path),
            other => Self::Persist(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RecognizeSettings {
    pub policy: ThresholdPolicy,
    pub max_frame_failures: usize,
}

impl Default for RecognizeSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RecognizeSettings {
    fn from(config: &Config) -> Self {
        Self {
            policy: ThresholdPolicy::new(config.confidence_threshold),
            max_frame_failures: config.max_frame_failures,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames: usize,
    pub detections: usize,
    pub recognized: usize,
}

/// A loaded model plus the policy it is judged by.
pub struct RecognitionSession {
    loaded: LoadedModel,
    settings: RecognizeSettings,
}

impl RecognitionSession {
    /// Load the persisted model pair. Fails before any frame is read when
    /// nothing has been trained yet.
    pub fn open(models: &ModelStore, settings: RecognizeSettings) -> Result<Self, RecognizeError> {
        let loaded = models.load()?;
        tracing::info!(
            generation = %loaded.model.generation(),
            identities = loaded.labels.len(),
            samples = loaded.model.len(),
            threshold = settings.policy.threshold(),
            "recognition session opened"
        );
        Ok(Self { loaded, settings })
    }

    pub fn model(&self) -> &LoadedModel {
        &self.loaded
    }

    pub fn recognizer(&self) -> Recognizer<'_> {
        Recognizer::new(&self.loaded, self.settings.policy)
    }

    /// Detect and classify every region in one frame.
    pub fn process_frame<D: RegionDetector + ?Sized>(
        &self,
        detector: &D,
        frame: &Frame,
    ) -> Result<Vec<AnnotatedRegion>, RecognizeError> {
        let recognizer = self.recognizer();
        let size = self.loaded.model.patch_size();
        let mut annotated = Vec::new();
        for region in detector.detect(frame) {
            let Some(patch) = FacePatch::from_region(frame, &region, size) else {
                continue;
            };
            let prediction = recognizer.predict(&patch)?;
            annotated.push(AnnotatedRegion {
                region,
                identity: prediction.identity,
                distance: prediction.distance,
            });
        }
        Ok(annotated)
    }

    /// Loop until the stop signal or end of stream.
    pub fn run<D: RegionDetector + ?Sized>(
        &self,
        detector: &D,
        source: &mut dyn FrameSource,
        sink: &mut dyn DisplaySink,
        stop: &StopSignal,
    ) -> Result<SessionSummary, RecognizeError> {
        let mut summary = SessionSummary::default();
        let mut failures = 0usize;

        while !stop.is_stopped() {
            let frame = match source.next_frame() {
                Ok(Some(frame)) => {
                    failures = 0;
                    frame
                }
                Ok(None) => break,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(error = %e, failures, "recognition: no frame delivered");
                    if failures >= self.settings.max_frame_failures {
                        return Err(RecognizeError::FrameSourceUnavailable(e.to_string()));
                    }
                    continue;
                }
            };

            let detections = self.process_frame(detector, &frame)?;
            summary.frames += 1;
            summary.detections += detections.len();
            summary.recognized += detections.iter().filter(|d| d.identity.is_known()).count();
            sink.present(&frame, &detections);
        }

        tracing::info!(
            frames = summary.frames,
            detections = summary.detections,
            recognized = summary.recognized,
            "recognition session finished"
        );
        Ok(summary)
    }
}
