pub mod area;
pub mod ratio;
pub mod traits;

use image::GrayImage;
use scene_capture_common::config::{ClassifierKind, SessionConfig};

pub use area::AreaFilter;
pub use ratio::RatioFilter;
pub use traits::{ChangeClassifier, ChangeVerdict};

/// Build the classifier a session is configured for.
pub fn build_classifier(config: &SessionConfig) -> Box<dyn ChangeClassifier> {
    match config.classifier {
        ClassifierKind::Area => Box::new(AreaFilter::new(config.min_area)),
        ClassifierKind::Ratio => Box::new(RatioFilter::new(config.change_threshold)),
    }
}

/// Share of the region (ROI pixels when given, else all pixels) that is foreground.
pub fn foreground_ratio(mask: &GrayImage, roi_pixels: Option<u64>) -> f64 {
    let total = roi_pixels.unwrap_or(mask.width() as u64 * mask.height() as u64);
    if total == 0 {
        return 0.0;
    }
    let on = mask.as_raw().iter().filter(|&&p| p != 0).count() as f64;
    on / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn ratio_uses_roi_denominator() {
        // ROI is the top-left quarter of a 100x100 frame and fully changed.
        let mask = GrayImage::from_fn(100, 100, |x, y| {
            if x < 50 && y < 50 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        assert_eq!(foreground_ratio(&mask, Some(2500)), 1.0);
        assert_eq!(foreground_ratio(&mask, None), 0.25);
    }

    #[test]
    fn empty_region_has_zero_ratio() {
        let mask = GrayImage::new(10, 10);
        assert_eq!(foreground_ratio(&mask, Some(0)), 0.0);
        assert_eq!(foreground_ratio(&mask, None), 0.0);
    }

    #[test]
    fn classifier_follows_config() {
        let mut config = SessionConfig::default();
        assert_eq!(build_classifier(&config).name(), "area");
        config.classifier = ClassifierKind::Ratio;
        assert_eq!(build_classifier(&config).name(), "ratio");
    }
}
