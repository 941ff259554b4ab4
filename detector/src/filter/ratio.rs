use image::GrayImage;
use tracing::debug;

use super::foreground_ratio;
use super::traits::{ChangeClassifier, ChangeVerdict};

/// Legacy policy: a change is valid when the foreground ratio exceeds a
/// fixed fraction of the region.
pub struct RatioFilter {
    threshold: f64,
}

impl RatioFilter {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }
}

impl ChangeClassifier for RatioFilter {
    fn classify(&self, mask: &GrayImage, roi_pixels: Option<u64>) -> ChangeVerdict {
        let change_ratio = foreground_ratio(mask, roi_pixels);
        let is_valid_change = change_ratio > self.threshold;
        debug!(
            ratio = format!("{:.4}", change_ratio),
            threshold = format!("{:.4}", self.threshold),
            is_valid_change,
            "ratio filter"
        );
        ChangeVerdict {
            is_valid_change,
            change_ratio,
        }
    }

    fn name(&self) -> &str {
        "ratio"
    }
}
