//! Grayscale frames, borrowed per iteration.

use crate::types::Region;
use image::{DynamicImage, GrayImage};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("frame has zero width or height")]
    Empty,
}

/// A grayscale frame (row-major, one byte per pixel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Convert any decoded image (colour or not) to a grayscale frame.
    pub fn from_image(image: &DynamicImage) -> Self {
        Self::from_gray(image.to_luma8())
    }

    pub fn from_gray(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    /// True for zero-size frames or frames whose buffer is too short.
    pub fn is_degenerate(&self) -> bool {
        self.width == 0
            || self.height == 0
            || self.data.len() < self.width as usize * self.height as usize
    }

    /// Intersect `region` with the frame bounds. `None` if nothing remains.
    pub fn clamp_region(&self, region: &Region) -> Option<Region> {
        if self.is_degenerate() || region.x >= self.width || region.y >= self.height {
            return None;
        }
        let right = region.right().min(self.width);
        let bottom = region.bottom().min(self.height);
        let clamped = Region::new(region.x, region.y, right - region.x, bottom - region.y);
        (!clamped.is_empty()).then_some(clamped)
    }

    /// Copy the pixels under `region` (clamped to the frame) into a new image.
    pub fn crop(&self, region: &Region) -> Option<GrayImage> {
        let r = self.clamp_region(region)?;
        let stride = self.width as usize;
        let mut out = Vec::with_capacity(r.area() as usize);
        for y in r.y..r.bottom() {
            let start = y as usize * stride + r.x as usize;
            out.extend_from_slice(&self.data[start..start + r.width as usize]);
        }
        GrayImage::from_raw(r.width, r.height, out)
    }

    /// View the frame as an `image` buffer (copies the data).
    pub fn to_image(&self) -> Option<GrayImage> {
        if self.is_degenerate() {
            return None;
        }
        GrayImage::from_raw(self.width, self.height, self.data.clone())
    }
}
