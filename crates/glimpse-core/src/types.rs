use crate::labels::Label;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Candidate face rectangle within a frame, in pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.width)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Centre point, useful for overlays and tests.
    pub fn center(&self) -> (f32, f32) {
        (
            self.x as f32 + self.width as f32 / 2.0,
            self.y as f32 + self.height as f32 / 2.0,
        )
    }
}

/// Outcome of the threshold policy for one classified face.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Identity {
    Known(String),
    Unknown,
}

impl Identity {
    pub fn is_known(&self) -> bool {
        matches!(self, Identity::Known(_))
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            Identity::Known(name) => Some(name),
            Identity::Unknown => None,
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identity::Known(name) => f.write_str(name),
            Identity::Unknown => f.write_str("Unknown"),
        }
    }
}

/// Result of classifying a single face patch.
///
/// `distance` is a chi-square histogram distance: 0 means identical, larger
/// means less similar. It is not a probability.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    /// Nearest label in the model, reported even when `identity` is `Unknown`.
    pub label: Label,
    pub distance: f64,
    pub identity: Identity,
}

/// One detection emitted to a display sink during recognition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotatedRegion {
    pub region: Region,
    pub identity: Identity,
    pub distance: f64,
}
