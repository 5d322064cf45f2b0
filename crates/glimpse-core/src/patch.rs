//! Face patch normalisation.
//!
//! Every crop is resized to a square canonical size before it is stored or
//! described, so histograms from different detections line up cell for cell.

use crate::frame::{Frame, FrameError};
use crate::types::Region;
use image::imageops::{self, FilterType};
use image::GrayImage;

/// Canonical patch edge length in pixels.
pub const DEFAULT_PATCH_SIZE: u32 = 100;

/// A grayscale face crop at canonical size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacePatch {
    image: GrayImage,
}

impl FacePatch {
    /// Resize `image` to `size`×`size` with bilinear filtering.
    ///
    /// Images already at canonical size are kept byte-identical.
    pub fn normalize(image: GrayImage, size: u32) -> Self {
        if image.dimensions() == (size, size) {
            return Self { image };
        }
        let image = imageops::resize(&image, size, size, FilterType::Triangle);
        Self { image }
    }

    /// Crop `region` out of `frame` and normalise it.
    ///
    /// Returns `None` when the region does not intersect the frame.
    pub fn from_region(frame: &Frame, region: &Region, size: u32) -> Option<Self> {
        frame.crop(region).map(|crop| Self::normalize(crop, size))
    }

    /// Build a patch from raw row-major grayscale pixels.
    pub fn from_pixels(data: Vec<u8>, width: u32, height: u32, size: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Empty);
        }
        let expected = width as usize * height as usize;
        let actual = data.len();
        let image = GrayImage::from_raw(width, height, data)
            .ok_or(FrameError::InvalidLength { expected, actual })?;
        Ok(Self::normalize(image, size))
    }

    pub fn size(&self) -> u32 {
        self.image.width()
    }

    pub fn as_image(&self) -> &GrayImage {
        &self.image
    }

    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    /// Return a copy normalised to a different canonical size.
    pub fn resized(&self, size: u32) -> Self {
        Self::normalize(self.image.clone(), size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_resizes_to_square() {
        let image = GrayImage::from_pixel(64, 48, image::Luma([90]));
        let patch = FacePatch::normalize(image, DEFAULT_PATCH_SIZE);
        assert_eq!(patch.as_image().dimensions(), (100, 100));
        // Uniform input stays uniform under bilinear resize.
        assert!(patch.pixels().iter().all(|&p| p == 90));
    }

    #[test]
    fn test_normalize_keeps_canonical_bytes() {
        let data: Vec<u8> = (0..16u32 * 16).map(|i| (i * 7 % 251) as u8).collect();
        let patch = FacePatch::from_pixels(data.clone(), 16, 16, 16).unwrap();
        assert_eq!(patch.pixels(), data.as_slice());
    }

    #[test]
    fn test_from_pixels_rejects_short_buffer() {
        let result = FacePatch::from_pixels(vec![0; 10], 4, 4, 16);
        assert!(matches!(result, Err(FrameError::InvalidLength { expected: 16, actual: 10 })));
    }

    #[test]
    fn test_from_pixels_rejects_empty() {
        assert!(matches!(
            FacePatch::from_pixels(vec![], 0, 0, 16),
            Err(FrameError::Empty)
        ));
    }

    #[test]
    fn test_from_region() {
        let frame = Frame::new(vec![200; 40 * 30], 40, 30).unwrap();
        let patch = FacePatch::from_region(&frame, &Region::new(5, 5, 20, 20), 32).unwrap();
        assert_eq!(patch.size(), 32);
        assert!(FacePatch::from_region(&frame, &Region::new(50, 5, 20, 20), 32).is_none());
    }
}
