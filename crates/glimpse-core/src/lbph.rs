//! Local binary pattern histograms (LBPH).
//!
//! Each interior pixel is compared against its 8 neighbours (radius 1,
//! clockwise from the top-left); a neighbour at least as bright as the
//! centre sets its bit. The code map is split into a `grid_x`×`grid_y` grid
//! and every cell contributes a 256-bin histogram of codes. Cell histograms
//! are concatenated into one descriptor.

use image::GrayImage;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Number of distinct 8-neighbour patterns.
pub const LBP_BINS: usize = 256;

const DEFAULT_GRID: u32 = 8;

/// Neighbour offsets (dx, dy), clockwise from the top-left; bit 7 first.
const NEIGHBOURS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbphParams {
    pub grid_x: u32,
    pub grid_y: u32,
}

impl Default for LbphParams {
    fn default() -> Self {
        Self {
            grid_x: DEFAULT_GRID,
            grid_y: DEFAULT_GRID,
        }
    }
}

impl LbphParams {
    /// Descriptor length: one 256-bin histogram per grid cell.
    pub fn histogram_len(&self) -> usize {
        self.grid_x as usize * self.grid_y as usize * LBP_BINS
    }

    /// Smallest patch edge giving every cell at least one LBP code (the code
    /// map loses a one-pixel border).
    pub fn min_patch_size(&self) -> u32 {
        self.grid_x.max(self.grid_y).saturating_add(2)
    }

    /// Whether a `patch_size`×`patch_size` patch can be described with this grid.
    pub fn fits(&self, patch_size: u32) -> bool {
        self.grid_x > 0 && self.grid_y > 0 && patch_size >= self.min_patch_size()
    }
}

/// Concatenated per-cell LBP code counts for one face patch.
///
/// Counts are stored as integers so a persisted model reloads bit-for-bit;
/// comparisons normalise each bin by `cell_area` so every cell sums to one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Histogram {
    cell_area: u32,
    bins: Vec<u32>,
}

impl Histogram {
    pub fn from_parts(cell_area: u32, bins: Vec<u32>) -> Self {
        Self { cell_area, bins }
    }

    pub fn cell_area(&self) -> u32 {
        self.cell_area
    }

    pub fn bins(&self) -> &[u32] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// Scale factor turning a raw count into a per-cell frequency.
    fn scale(&self) -> f64 {
        if self.cell_area > 0 {
            1.0 / self.cell_area as f64
        } else {
            0.0
        }
    }
}

/// Compute the radius-1 LBP code map of `image`.
///
/// The border row and column on each side have no full neighbourhood, so the
/// map is `(height - 2) × (width - 2)`; images narrower than 3 pixels give an
/// empty map.
pub fn lbp_codes(image: &GrayImage) -> Array2<u8> {
    let (width, height) = image.dimensions();
    if width < 3 || height < 3 {
        return Array2::zeros((0, 0));
    }
    let rows = (height - 2) as usize;
    let cols = (width - 2) as usize;

    Array2::from_shape_fn((rows, cols), |(r, c)| {
        let cx = c as i32 + 1;
        let cy = r as i32 + 1;
        let center = image.get_pixel(cx as u32, cy as u32)[0];
        NEIGHBOURS
            .iter()
            .enumerate()
            .fold(0u8, |code, (bit, &(dx, dy))| {
                let neighbour = image.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0];
                if neighbour >= center {
                    code | (1 << (7 - bit))
                } else {
                    code
                }
            })
    })
}

/// Compute the spatial LBP histogram descriptor of `image`.
///
/// Cells are `code_width / grid_x` by `code_height / grid_y` pixels; the
/// remainder on the right and bottom edges is ignored.
pub fn describe(image: &GrayImage, params: &LbphParams) -> Histogram {
    let codes = lbp_codes(image);
    let (rows, cols) = codes.dim();
    let grid_x = params.grid_x as usize;
    let grid_y = params.grid_y as usize;
    if grid_x == 0 || grid_y == 0 {
        return Histogram::from_parts(0, Vec::new());
    }
    let cell_w = cols / grid_x;
    let cell_h = rows / grid_y;

    let mut bins = vec![0u32; params.histogram_len()];
    if cell_w == 0 || cell_h == 0 {
        return Histogram::from_parts(0, bins);
    }

    for gy in 0..grid_y {
        for gx in 0..grid_x {
            let offset = (gy * grid_x + gx) * LBP_BINS;
            let cell = codes.slice(ndarray::s![
                gy * cell_h..(gy + 1) * cell_h,
                gx * cell_w..(gx + 1) * cell_w
            ]);
            for &code in cell.iter() {
                bins[offset + code as usize] += 1;
            }
        }
    }

    Histogram::from_parts((cell_w * cell_h) as u32, bins)
}

/// Strategy for comparing two histogram descriptors. Lower = more similar.
pub trait Metric {
    fn distance(&self, a: &Histogram, b: &Histogram) -> f64;
}

/// Chi-square distance: Σ (a − b)² / (a + b) over normalised bins.
///
/// Bins where both sides are zero contribute nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChiSquare;

impl Metric for ChiSquare {
    fn distance(&self, a: &Histogram, b: &Histogram) -> f64 {
        let (sa, sb) = (a.scale(), b.scale());
        a.bins
            .iter()
            .zip(b.bins.iter())
            .map(|(&x, &y)| {
                let x = x as f64 * sa;
                let y = y as f64 * sb;
                let denom = x + y;
                if denom > 0.0 {
                    (x - y).powi(2) / denom
                } else {
                    0.0
                }
            })
            .sum()
    }
}
