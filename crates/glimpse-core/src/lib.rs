//! glimpse-core — Face enrollment and recognition pipeline.
//!
//! Haar cascade detection, LBPH descriptors compared by chi-square distance,
//! an on-disk sample store and a versioned model/label-registry pair.

pub mod config;
pub mod detector;
pub mod enroll;
pub mod frame;
pub mod labels;
pub mod lbph;
pub mod model;
pub mod patch;
pub mod persist;
pub mod recognize;
pub mod recognizer;
pub mod source;
pub mod store;
pub mod types;

pub use config::Config;
pub use detector::{CascadeDetector, HaarCascade, RegionDetector};
pub use enroll::{EnrollOutcome, EnrollSettings, EnrollState, Enrollment};
pub use frame::Frame;
pub use labels::{Label, LabelRegistry};
pub use model::{AppearanceModel, Trainer};
pub use patch::FacePatch;
pub use persist::{LoadedModel, ModelStore};
pub use recognize::{RecognitionSession, RecognizeSettings, SessionSummary};
pub use recognizer::{Recognizer, ThresholdPolicy};
pub use source::{DisplaySink, FrameSource, NullSink, StopSignal};
pub use store::SampleStore;
pub use types::{AnnotatedRegion, Identity, Prediction, Region};
