use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use tracing::debug;

use super::foreground_ratio;
use super::traits::{ChangeClassifier, ChangeVerdict};

/// Connected-component area filter.
///
/// A change is valid only if a single 8-connected blob covers at least
/// `min_area` pixels. Many small specks never add up to a valid change,
/// however large their combined area.
pub struct AreaFilter {
    min_area: u32,
}

impl AreaFilter {
    pub fn new(min_area: u32) -> Self {
        Self { min_area }
    }

    /// Pixel area of every connected component, in label order.
    pub fn component_areas(mask: &GrayImage) -> Vec<u32> {
        let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
        let mut areas: Vec<u32> = Vec::new();
        for label in labels.pixels().map(|p| p.0[0]).filter(|&l| l != 0) {
            let idx = (label - 1) as usize;
            if idx >= areas.len() {
                areas.resize(idx + 1, 0);
            }
            areas[idx] += 1;
        }
        areas
    }

    /// `(is_valid_change, change_ratio)` for a denoised mask.
    pub fn evaluate(&self, mask: &GrayImage, roi_pixels: Option<u64>) -> (bool, f64) {
        let ratio = foreground_ratio(mask, roi_pixels);
        if ratio == 0.0 {
            return (false, 0.0);
        }
        let areas = Self::component_areas(mask);
        let largest = areas.iter().copied().max().unwrap_or(0);
        let valid = largest >= self.min_area;
        debug!(
            components = areas.len(),
            largest,
            min_area = self.min_area,
            valid,
            "area filter"
        );
        (valid, ratio)
    }
}

impl ChangeClassifier for AreaFilter {
    fn classify(&self, mask: &GrayImage, roi_pixels: Option<u64>) -> ChangeVerdict {
        let (is_valid_change, change_ratio) = self.evaluate(mask, roi_pixels);
        ChangeVerdict {
            is_valid_change,
            change_ratio,
        }
    }

    fn name(&self) -> &str {
        "area"
    }
}
