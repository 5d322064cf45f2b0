//! Haar feature cascade face detector (Viola-Jones).
//!
//! Windows are slid over the frame at growing scales and pushed through a
//! cascade of boosted stages; a window survives only if it passes every
//! stage. Raw hits are then grouped, and only clusters with enough
//! overlapping hits (`min_neighbors`) are reported.

use crate::frame::Frame;
use crate::types::Region;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
pub const DEFAULT_SCALE_FACTOR: f32 = 1.3;
pub const DEFAULT_MIN_NEIGHBORS: u32 = 5;
pub const DEFAULT_MIN_SIZE: u32 = 30;
/// Relative edge tolerance when grouping raw hits into one detection.
const GROUP_EPS: f32 = 0.2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("cascade file not found: {0}")]
    CascadeNotFound(String),
    #[error("invalid cascade: {0}")]
    InvalidCascade(String),
    #[error("invalid detector parameters: {0}")]
    InvalidParams(String),
    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Locates candidate face rectangles in a grayscale frame.
///
/// Implementations must be deterministic and return an empty list for
/// degenerate frames instead of failing.
pub trait RegionDetector {
    fn detect(&self, frame: &Frame) -> Vec<Region>;
}

/// Weighted rectangle of a Haar-like feature, in base-window coordinates.
///
/// Deserialises from either `{x, y, w, h, weight}` or `[x, y, w, h, weight]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedRect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub weight: f32,
}

/// A boosted decision stump over one Haar-like feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaarFeature {
    pub rects: Vec<WeightedRect>,
    /// Split point, in units of window standard deviation.
    pub threshold: f32,
    /// Vote when the normalised response is below `threshold`.
    pub left: f32,
    /// Vote otherwise.
    pub right: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CascadeStage {
    pub threshold: f32,
    pub features: Vec<HaarFeature>,
}

/// A trained cascade: base window size plus ordered stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaarCascade {
    /// Base window (width, height).
    pub window: (u32, u32),
    pub stages: Vec<CascadeStage>,
}

impl HaarCascade {
    /// Load a JSON cascade description.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DetectorError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DetectorError::CascadeNotFound(path.display().to_string()));
        }
        let text = std::fs::read_to_string(path)?;
        let cascade: Self = serde_json::from_str(&text)?;
        cascade.validate()?;

        tracing::info!(
            path = %path.display(),
            window = ?cascade.window,
            stages = cascade.stages.len(),
            features = cascade.stages.iter().map(|s| s.features.len()).sum::<usize>(),
            "loaded Haar cascade"
        );
        Ok(cascade)
    }

    /// Check that the cascade is non-empty and every rectangle fits the window.
    pub fn validate(&self) -> Result<(), DetectorError> {
        let (ww, wh) = self.window;
        if ww == 0 || wh == 0 {
            return Err(DetectorError::InvalidCascade("zero-size window".into()));
        }
        if self.stages.is_empty() {
            return Err(DetectorError::InvalidCascade("no stages".into()));
        }
        for (s, stage) in self.stages.iter().enumerate() {
            if stage.features.is_empty() {
                return Err(DetectorError::InvalidCascade(format!("stage {s} has no features")));
            }
            for feature in &stage.features {
                for r in &feature.rects {
                    if r.w == 0 || r.h == 0 || r.x + r.w > ww || r.y + r.h > wh {
                        return Err(DetectorError::InvalidCascade(format!(
                            "stage {s}: rect {r:?} outside {ww}x{wh} window"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Summed-area tables for O(1) rectangle sums and variance.
struct Integral {
    sum: Array2<u64>,
    sq_sum: Array2<u64>,
}

impl Integral {
    fn new(frame: &Frame) -> Self {
        let w = frame.width as usize;
        let h = frame.height as usize;
        let mut sum = Array2::<u64>::zeros((h + 1, w + 1));
        let mut sq_sum = Array2::<u64>::zeros((h + 1, w + 1));

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let p = frame.data[y * w + x] as u64;
                row += p;
                row_sq += p * p;
                sum[[y + 1, x + 1]] = sum[[y, x + 1]] + row;
                sq_sum[[y + 1, x + 1]] = sq_sum[[y, x + 1]] + row_sq;
            }
        }

        Self { sum, sq_sum }
    }

    fn rect(table: &Array2<u64>, x: u32, y: u32, w: u32, h: u32) -> u64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = ((x + w) as usize, (y + h) as usize);
        table[[y1, x1]] + table[[y0, x0]] - table[[y0, x1]] - table[[y1, x0]]
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sum, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> u64 {
        Self::rect(&self.sq_sum, x, y, w, h)
    }
}

/// Sliding-window detector over a [`HaarCascade`].
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    cascade: HaarCascade,
    scale_factor: f32,
    min_neighbors: u32,
    min_size: u32,
}

impl CascadeDetector {
    /// `scale_factor` must be > 1.0 and `min_neighbors` ≥ 1.
    pub fn new(
        cascade: HaarCascade,
        scale_factor: f32,
        min_neighbors: u32,
        min_size: u32,
    ) -> Result<Self, DetectorError> {
        if scale_factor.is_nan() || scale_factor <= 1.0 {
            return Err(DetectorError::InvalidParams(format!(
                "scale factor must be > 1.0, got {scale_factor}"
            )));
        }
        if min_neighbors < 1 {
            return Err(DetectorError::InvalidParams("min neighbors must be ≥ 1".into()));
        }
        cascade.validate()?;
        Ok(Self {
            cascade,
            scale_factor,
            min_neighbors,
            min_size,
        })
    }

    /// Every window that passes all stages, before grouping.
    pub fn raw_hits(&self, frame: &Frame) -> Vec<Region> {
        if frame.is_degenerate() {
            return Vec::new();
        }
        let integral = Integral::new(frame);
        let (base_w, base_h) = self.cascade.window;
        let mut hits = Vec::new();

        let mut scale = 1.0f32;
        loop {
            let win_w = (base_w as f32 * scale).round() as u32;
            let win_h = (base_h as f32 * scale).round() as u32;
            if win_w > frame.width || win_h > frame.height {
                break;
            }
            if win_w >= self.min_size && win_h >= self.min_size {
                let step = (scale * 2.0).max(1.0) as usize;
                for y in (0..=frame.height - win_h).step_by(step) {
                    for x in (0..=frame.width - win_w).step_by(step) {
                        if self.passes(&integral, x, y, win_w, win_h, scale) {
                            hits.push(Region::new(x, y, win_w, win_h));
                        }
                    }
                }
            }
            scale *= self.scale_factor;
        }

        hits
    }

    fn passes(&self, integral: &Integral, x: u32, y: u32, win_w: u32, win_h: u32, scale: f32) -> bool {
        let area = (win_w * win_h) as f64;
        let mean = integral.sum(x, y, win_w, win_h) as f64 / area;
        let variance = integral.sq_sum(x, y, win_w, win_h) as f64 / area - mean * mean;
        // Flat windows get unit deviation so features compare raw contrast.
        let std_dev = if variance > 1.0 { variance.sqrt() } else { 1.0 };

        self.cascade.stages.iter().all(|stage| {
            let votes: f32 = stage
                .features
                .iter()
                .map(|feature| {
                    let response: f64 = feature
                        .rects
                        .iter()
                        .map(|r| {
                            let (rx, ry, rw, rh) = scale_rect(r, x, y, win_w, win_h, scale);
                            integral.sum(rx, ry, rw, rh) as f64 * r.weight as f64
                        })
                        .sum();
                    if response / area < feature.threshold as f64 * std_dev {
                        feature.left
                    } else {
                        feature.right
                    }
                })
                .sum();
            votes >= stage.threshold
        })
    }
}

/// Map a base-window rectangle into frame coordinates for the current window.
fn scale_rect(r: &WeightedRect, x: u32, y: u32, win_w: u32, win_h: u32, scale: f32) -> (u32, u32, u32, u32) {
    let rx = ((r.x as f32 * scale).round() as u32).min(win_w - 1);
    let ry = ((r.y as f32 * scale).round() as u32).min(win_h - 1);
    let rw = ((r.w as f32 * scale).round() as u32).clamp(1, win_w - rx);
    let rh = ((r.h as f32 * scale).round() as u32).clamp(1, win_h - ry);
    (x + rx, y + ry, rw, rh)
}

impl RegionDetector for CascadeDetector {
    fn detect(&self, frame: &Frame) -> Vec<Region> {
        let hits = self.raw_hits(frame);
        let regions = group_regions(&hits, self.min_neighbors);
        tracing::trace!(raw = hits.len(), grouped = regions.len(), "cascade detection");
        regions
    }
}

fn similar(a: &Region, b: &Region) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f32 * 0.5;
    let close = |p: u32, q: u32| (p as f32 - q as f32).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn find(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

/// Cluster similar raw hits, keep clusters with more than `min_neighbors`
/// members, average each, and drop averages nested inside a stronger one.
///
/// Output is sorted top-to-bottom, left-to-right.
pub fn group_regions(hits: &[Region], min_neighbors: u32) -> Vec<Region> {
    let n = hits.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&hits[i], &hits[j]) {
                let (ri, rj) = (find(&mut parent, i), find(&mut parent, j));
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    // root -> (count, Σx, Σy, Σw, Σh)
    let mut clusters: std::collections::BTreeMap<usize, (u32, u64, u64, u64, u64)> = Default::default();
    for (i, r) in hits.iter().enumerate() {
        let root = find(&mut parent, i);
        let c = clusters.entry(root).or_default();
        c.0 += 1;
        c.1 += r.x as u64;
        c.2 += r.y as u64;
        c.3 += r.width as u64;
        c.4 += r.height as u64;
    }

    let averaged: Vec<(Region, u32)> = clusters
        .into_values()
        .filter(|c| c.0 > min_neighbors)
        .map(|(count, sx, sy, sw, sh)| {
            let n = count as f64;
            let avg = |s: u64| (s as f64 / n).round() as u32;
            (Region::new(avg(sx), avg(sy), avg(sw), avg(sh)), count)
        })
        .collect();

    let mut out: Vec<Region> = averaged
        .iter()
        .enumerate()
        .filter(|(i, (inner, inner_count))| {
            !averaged.iter().enumerate().any(|(j, (outer, outer_count))| {
                if *i == j {
                    return false;
                }
                let dx = (outer.width as f32 * GROUP_EPS).round() as i64;
                let dy = (outer.height as f32 * GROUP_EPS).round() as i64;
                let nested = inner.x as i64 >= outer.x as i64 - dx
                    && inner.y as i64 >= outer.y as i64 - dy
                    && inner.right() as i64 <= outer.right() as i64 + dx
                    && inner.bottom() as i64 <= outer.bottom() as i64 + dy;
                nested && (*outer_count > (*inner_count).max(3) || *inner_count < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect();

    out.sort_by_key(|r| (r.y, r.x));
    out
}
