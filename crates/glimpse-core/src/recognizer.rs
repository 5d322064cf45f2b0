//! Nearest-neighbour LBPH recognizer with a distance threshold.
//!
//! The score is a chi-square distance, so the scale is inverted relative to
//! a confidence: a prediction counts as a match only when its distance is
//! strictly below the threshold.

use crate::labels::{Label, LabelError};
use crate::lbph::{ChiSquare, Metric};
use crate::patch::FacePatch;
use crate::persist::LoadedModel;
use crate::types::{Identity, Prediction};
use std::collections::BTreeMap;
use thiserror::Error;

/// Maximum distance still counted as a match.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 70.0;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RecognizerError {
    #[error("model has no entries")]
    EmptyModel,
    #[error("model label has no identity: {0}")]
    UnregisteredLabel(#[from] LabelError),
}

/// Decides whether a distance is close enough to be a match.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdPolicy {
    threshold: f64,
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl ThresholdPolicy {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn accepts(&self, distance: f64) -> bool {
        distance < self.threshold
    }
}

/// Classifies face patches against a loaded model, borrowed for the session.
pub struct Recognizer<'m, M: Metric = ChiSquare> {
    loaded: &'m LoadedModel,
    policy: ThresholdPolicy,
    metric: M,
}

impl<'m> Recognizer<'m, ChiSquare> {
    pub fn new(loaded: &'m LoadedModel, policy: ThresholdPolicy) -> Self {
        Self::with_metric(loaded, policy, ChiSquare)
    }
}

impl<'m, M: Metric> Recognizer<'m, M> {
    pub fn with_metric(loaded: &'m LoadedModel, policy: ThresholdPolicy, metric: M) -> Self {
        Self {
            loaded,
            policy,
            metric,
        }
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Find the nearest stored descriptor and apply the threshold policy.
    ///
    /// Ties on distance go to the lowest label. All entries are always
    /// scanned.
    pub fn predict(&self, patch: &FacePatch) -> Result<Prediction, RecognizerError> {
        let model = &self.loaded.model;
        let probe = model.describe(patch);

        let mut best: Option<(Label, f64)> = None;
        for entry in model.entries() {
            let distance = self.metric.distance(&probe, &entry.histogram);
            let better = match best {
                None => true,
                Some((label, d)) => distance < d || (distance == d && entry.label < label),
            };
            if better {
                best = Some((entry.label, distance));
            }
        }
        let (label, distance) = best.ok_or(RecognizerError::EmptyModel)?;

        // Resolve even when rejected: an unregistered label is a broken model.
        let name = self.loaded.labels.identity(label)?;
        let identity = if self.policy.accepts(distance) {
            Identity::Known(name.to_string())
        } else {
            Identity::Unknown
        };

        tracing::trace!(%label, distance, %identity, "prediction");
        Ok(Prediction {
            label,
            distance,
            identity,
        })
    }

    /// Minimum distance from `patch` to each label's samples.
    pub fn nearest_per_label(&self, patch: &FacePatch) -> BTreeMap<Label, f64> {
        let model = &self.loaded.model;
        let probe = model.describe(patch);
        let mut nearest = BTreeMap::new();
        for entry in model.entries() {
            let distance = self.metric.distance(&probe, &entry.histogram);
            nearest
                .entry(entry.label)
                .and_modify(|d: &mut f64| *d = d.min(distance))
                .or_insert(distance);
        }
        nearest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelRegistry;
    use crate::lbph::Histogram;
    use crate::model::Trainer;
    use image::{GrayImage, Luma};

    const SIZE: u32 = 48;

    fn checker() -> FacePatch {
        FacePatch::normalize(
            GrayImage::from_fn(SIZE, SIZE, |x, y| Luma([if (x / 2 + y / 2) % 2 == 0 { 210 } else { 35 }])),
            SIZE,
        )
    }

    fn rings() -> FacePatch {
        FacePatch::normalize(
            GrayImage::from_fn(SIZE, SIZE, |x, y| {
                let dx = x as i32 - 24;
                let dy = y as i32 - 24;
                Luma([((dx * dx + dy * dy) % 97) as u8 * 2])
            }),
            SIZE,
        )
    }

    fn loaded() -> LoadedModel {
        let labels = LabelRegistry::from_identities(["alice", "bob"]);
        let model = Trainer::default()
            .train(&[(checker(), Label(0)), (rings(), Label(1))])
            .unwrap();
        LoadedModel { model, labels }
    }

    #[test]
    fn test_exact_sample_matches_with_zero_distance() {
        let loaded = loaded();
        let recognizer = Recognizer::new(&loaded, ThresholdPolicy::default());

        let p = recognizer.predict(&checker()).unwrap();
        assert_eq!(p.label, Label(0));
        assert_eq!(p.distance, 0.0);
        assert_eq!(p.identity, Identity::Known("alice".into()));

        let p = recognizer.predict(&rings()).unwrap();
        assert_eq!(p.identity, Identity::Known("bob".into()));
    }

    #[test]
    fn test_zero_threshold_rejects_everything() {
        let loaded = loaded();
        let recognizer = Recognizer::new(&loaded, ThresholdPolicy::new(0.0));
        let p = recognizer.predict(&checker()).unwrap();
        // Nearest label is still reported.
        assert_eq!(p.label, Label(0));
        assert_eq!(p.identity, Identity::Unknown);
    }

    #[test]
    fn test_threshold_monotonicity() {
        let loaded = loaded();
        let probe = FacePatch::normalize(
            GrayImage::from_fn(SIZE, SIZE, |x, y| Luma([((x * 5 + y * 3) % 256) as u8])),
            SIZE,
        );
        let d = Recognizer::new(&loaded, ThresholdPolicy::default())
            .predict(&probe)
            .unwrap()
            .distance;
        assert!(d > 0.0);

        for t in [d * 1.01, d + 1.0, d * 10.0] {
            let p = Recognizer::new(&loaded, ThresholdPolicy::new(t)).predict(&probe).unwrap();
            assert!(p.identity.is_known(), "threshold {t} above distance {d} must match");
        }
        for t in [d, d * 0.99, 0.0] {
            let p = Recognizer::new(&loaded, ThresholdPolicy::new(t)).predict(&probe).unwrap();
            assert_eq!(p.identity, Identity::Unknown, "threshold {t} at/below {d} must reject");
        }
    }

    #[test]
    fn test_policy_is_strict() {
        let policy = ThresholdPolicy::new(70.0);
        assert!(policy.accepts(69.999));
        assert!(!policy.accepts(70.0));
        assert!(!policy.accepts(f64::INFINITY));
    }

    #[test]
    fn test_tie_goes_to_lowest_label() {
        // Same histogram under two labels, listed high label first.
        let labels = LabelRegistry::from_identities(["alice", "bob"]);
        let model = Trainer::default()
            .train(&[(checker(), Label(1)), (checker(), Label(0))])
            .unwrap();
        let loaded = LoadedModel { model, labels };
        let p = Recognizer::new(&loaded, ThresholdPolicy::default())
            .predict(&checker())
            .unwrap();
        assert_eq!(p.label, Label(0));
        assert_eq!(p.identity, Identity::Known("alice".into()));
    }

    #[test]
    fn test_unregistered_label_is_an_error() {
        let labels = LabelRegistry::from_identities(["alice"]);
        let model = Trainer::default()
            .train(&[(checker(), Label(0)), (rings(), Label(1))])
            .unwrap();
        let loaded = LoadedModel { model, labels };
        let err = Recognizer::new(&loaded, ThresholdPolicy::default())
            .predict(&rings())
            .unwrap_err();
        assert_eq!(
            err,
            RecognizerError::UnregisteredLabel(LabelError::LabelNotFound(Label(1)))
        );
    }

    #[test]
    fn test_nearest_per_label() {
        let loaded = loaded();
        let recognizer = Recognizer::new(&loaded, ThresholdPolicy::default());
        let nearest = recognizer.nearest_per_label(&checker());
        assert_eq!(nearest.len(), 2);
        assert_eq!(nearest[&Label(0)], 0.0);
        assert!(nearest[&Label(1)] > 0.0);
    }

    #[test]
    fn test_custom_metric() {
        struct Constant;
        impl Metric for Constant {
            fn distance(&self, _: &Histogram, _: &Histogram) -> f64 {
                5.0
            }
        }
        let loaded = loaded();
        let p = Recognizer::with_metric(&loaded, ThresholdPolicy::new(10.0), Constant)
            .predict(&rings())
            .unwrap();
        assert_eq!(p.label, Label(0));
        assert_eq!(p.distance, 5.0);
    }

    #[test]
    fn test_rescales_foreign_patch_size() {
        let loaded = loaded();
        let big = checker().resized(96);
        let p = Recognizer::new(&loaded, ThresholdPolicy::default())
            .predict(&big)
            .unwrap();
        assert!(p.distance.is_finite());
        assert!(p.distance >= 0.0);
    }
}
