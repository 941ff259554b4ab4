use image::imageops;
use image::{GrayImage, RgbImage};
use std::sync::Arc;
use tracing::debug;

use crate::roi::{count_nonzero, RoiMask};

/// Output of [`FramePreprocessor::preprocess`].
pub struct Preprocessed {
    /// Color frame at working resolution.
    pub color: RgbImage,
    /// Luminance at working resolution, zeroed outside the ROI.
    pub gray: GrayImage,
}

/// Bounds resolution, converts to luminance and applies the ROI.
///
/// The ROI mask is resized once per input resolution and cached together
/// with its pixel count.
pub struct FramePreprocessor {
    target_height: u32,
    roi: Option<Arc<RoiMask>>,
    cached_mask: Option<CachedMask>,
}

struct CachedMask {
    mask: GrayImage,
    pixel_count: u64,
}

impl FramePreprocessor {
    pub fn new(target_height: u32, roi: Option<Arc<RoiMask>>) -> Self {
        Self {
            target_height,
            roi,
            cached_mask: None,
        }
    }

    pub fn preprocess(&mut self, frame: &RgbImage) -> Preprocessed {
        let color = self.downscale(frame);
        let mut gray = imageops::grayscale(&color);

        if let Some(mask) = self.mask_for(gray.width(), gray.height()) {
            for (p, m) in gray.iter_mut().zip(mask.as_raw().iter()) {
                if *m == 0 {
                    *p = 0;
                }
            }
        }

        Preprocessed { color, gray }
    }

    /// ROI pixels at the most recent working resolution, if a ROI is set.
    pub fn roi_pixel_count(&self) -> Option<u64> {
        self.cached_mask.as_ref().map(|c| c.pixel_count)
    }

    /// ROI mask at the most recent working resolution.
    pub fn current_mask(&self) -> Option<&GrayImage> {
        self.cached_mask.as_ref().map(|c| &c.mask)
    }

    pub fn roi(&self) -> Option<&RoiMask> {
        self.roi.as_deref()
    }

    fn downscale(&self, frame: &RgbImage) -> RgbImage {
        let (w, h) = frame.dimensions();
        if self.target_height == 0 || h <= self.target_height {
            return frame.clone();
        }
        let scale = self.target_height as f64 / h as f64;
        let new_w = ((w as f64 * scale) as u32).max(1);
        // thumbnail averages every source pixel into its target cell.
        imageops::thumbnail(frame, new_w, self.target_height)
    }

    fn mask_for(&mut self, width: u32, height: u32) -> Option<&GrayImage> {
        let roi = self.roi.as_ref()?;
        let stale = self
            .cached_mask
            .as_ref()
            .map_or(true, |c| c.mask.dimensions() != (width, height));
        if stale {
            let mask = roi.resized(width, height);
            let pixel_count = count_nonzero(&mask);
            debug!(width, height, pixel_count, "roi mask resized for working resolution");
            self.cached_mask = Some(CachedMask { mask, pixel_count });
        }
        self.cached_mask.as_ref().map(|c| &c.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn solid(width: u32, height: u32, value: u8) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([value, value, value]))
    }

    fn left_half_roi(width: u32, height: u32) -> Arc<RoiMask> {
        let mask = GrayImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        Arc::new(RoiMask::from_mask(mask))
    }

    #[test]
    fn tall_frames_are_downscaled_preserving_aspect() {
        let mut pre = FramePreprocessor::new(480, None);
        let out = pre.preprocess(&solid(1920, 1080, 100));
        assert_eq!(out.color.dimensions(), (853, 480));
        assert_eq!(out.gray.dimensions(), (853, 480));
    }

    #[test]
    fn short_frames_are_untouched() {
        let mut pre = FramePreprocessor::new(480, None);
        let out = pre.preprocess(&solid(320, 240, 100));
        assert_eq!(out.color.dimensions(), (320, 240));

        let mut disabled = FramePreprocessor::new(0, None);
        let out = disabled.preprocess(&solid(1920, 1080, 100));
        assert_eq!(out.color.dimensions(), (1920, 1080));
    }

    #[test]
    fn roi_zeroes_outside_pixels() {
        let mut pre = FramePreprocessor::new(0, Some(left_half_roi(40, 20)));
        let out = pre.preprocess(&solid(40, 20, 200));
        assert!(out.gray.get_pixel(5, 5)[0] > 0);
        assert_eq!(out.gray.get_pixel(30, 5)[0], 0);
        assert_eq!(pre.roi_pixel_count(), Some(400));
    }

    #[test]
    fn roi_mask_follows_resolution_changes() {
        let mut pre = FramePreprocessor::new(0, Some(left_half_roi(40, 20)));
        pre.preprocess(&solid(40, 20, 200));
        assert_eq!(pre.current_mask().map(|m| m.dimensions()), Some((40, 20)));

        let out = pre.preprocess(&solid(80, 40, 200));
        assert_eq!(pre.current_mask().map(|m| m.dimensions()), Some((80, 40)));
        assert_eq!(pre.roi_pixel_count(), Some(1600));
        assert_eq!(out.gray.get_pixel(70, 10)[0], 0);
    }

    #[test]
    fn no_roi_means_no_pixel_count() {
        let mut pre = FramePreprocessor::new(0, None);
        pre.preprocess(&solid(10, 10, 1));
        assert_eq!(pre.roi_pixel_count(), None);
    }
}
