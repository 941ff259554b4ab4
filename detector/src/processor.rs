use image::{GrayImage, RgbImage};
use scene_capture_common::config::{FusionMode, SessionConfig};
use std::sync::Arc;

use crate::background::BackgroundModel;
use crate::diff::{binarize, FrameDifference};
use crate::filter::{build_classifier, ChangeClassifier, ChangeVerdict};
use crate::fusion::fuse;
use crate::preprocess::FramePreprocessor;
use crate::roi::RoiMask;

/// Background-model confidence a pixel needs to count as foreground.
const GMM_FOREGROUND_CUT: u8 = 254;

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    #[error("frame is {got:?} but the background model was built for {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        got: (u32, u32),
    },
}

/// Result of running one frame through the full pipeline.
pub struct FrameAnalysis {
    /// Color frame at working resolution.
    pub color: RgbImage,
    /// Denoised foreground mask at working resolution.
    pub mask: GrayImage,
    pub verdict: ChangeVerdict,
}

/// The change-detection pipeline for a single video.
///
/// preprocess → (background model ∥ frame difference) → fusion/denoise →
/// classifier. Owns all per-video pixel state; build a new one per video.
pub struct ChangeDetector {
    preprocessor: FramePreprocessor,
    background: BackgroundModel,
    difference: FrameDifference,
    fusion: FusionMode,
    classifier: Box<dyn ChangeClassifier>,
    previous: Option<GrayImage>,
}

impl ChangeDetector {
    pub fn new(config: &SessionConfig, roi: Option<Arc<RoiMask>>) -> Self {
        Self {
            preprocessor: FramePreprocessor::new(config.target_height, roi),
            background: BackgroundModel::new(config.gmm_history, config.gmm_var_threshold),
            difference: FrameDifference::new(config.frame_diff_threshold),
            fusion: config.fusion,
            classifier: build_classifier(config),
            previous: None,
        }
    }

    /// Seed the background model and the previous-frame slot without
    /// evaluating anything.
    pub fn preheat(&mut self, frame: &RgbImage) -> Result<(), DetectError> {
        let pre = self.preprocessor.preprocess(frame);
        self.background.apply(&pre.gray)?;
        self.previous = Some(pre.gray);
        Ok(())
    }

    pub fn detect(&mut self, frame: &RgbImage) -> Result<FrameAnalysis, DetectError> {
        let pre = self.preprocessor.preprocess(frame);
        let gmm_mask = binarize(&self.background.apply(&pre.gray)?, GMM_FOREGROUND_CUT);

        let Some(previous) = self.previous.replace(pre.gray.clone()) else {
            let (w, h) = pre.gray.dimensions();
            return Ok(FrameAnalysis {
                color: pre.color,
                mask: GrayImage::new(w, h),
                verdict: ChangeVerdict::unchanged(),
            });
        };

        let diff_mask = self.difference.diff(Some(&previous), &pre.gray);
        let mask = fuse(&gmm_mask, &diff_mask, self.fusion);
        let verdict = self
            .classifier
            .classify(&mask, self.preprocessor.roi_pixel_count());

        Ok(FrameAnalysis {
            color: pre.color,
            mask,
            verdict,
        })
    }

    pub fn roi(&self) -> Option<&RoiMask> {
        self.preprocessor.roi()
    }

    pub fn classifier_name(&self) -> &str {
        self.classifier.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb};

    fn scene(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let v = ((x * 7 + y * 3) % 60 + 40) as u8;
            Rgb([v, v, v])
        })
    }

    fn with_object(base: &RgbImage, x0: u32, y0: u32, size: u32) -> RgbImage {
        let mut frame = base.clone();
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                frame.put_pixel(x, y, Rgb([250, 250, 250]));
            }
        }
        frame
    }

    fn preheated(config: &SessionConfig, frame: &RgbImage) -> ChangeDetector {
        let mut detector = ChangeDetector::new(config, None);
        for _ in 0..config.preheat_frames {
            detector.preheat(frame).unwrap();
        }
        detector
    }

    #[test]
    fn static_input_never_changes() {
        let config = SessionConfig::default();
        let base = scene(120, 90);
        let mut detector = preheated(&config, &base);
        for _ in 0..50 {
            let analysis = detector.detect(&base).unwrap();
            assert!(!analysis.verdict.is_valid_change);
            assert_eq!(analysis.verdict.change_ratio, 0.0);
        }
    }

    #[test]
    fn new_object_is_a_valid_change() {
        let config = SessionConfig::default();
        let base = scene(120, 90);
        let mut detector = preheated(&config, &base);
        let analysis = detector.detect(&with_object(&base, 30, 20, 30)).unwrap();
        assert!(analysis.verdict.is_valid_change);
        let expected = 900.0 / (120.0 * 90.0);
        assert!((analysis.verdict.change_ratio - expected).abs() < 1e-9);
        assert_eq!(analysis.mask.get_pixel(45, 35)[0], 255);
    }

    #[test]
    fn small_object_is_filtered_by_area() {
        let config = SessionConfig::default();
        let base = scene(120, 90);
        let mut detector = preheated(&config, &base);
        // 10x10 = 100 px, below the 150 px minimum.
        let analysis = detector.detect(&with_object(&base, 30, 20, 10)).unwrap();
        assert!(!analysis.verdict.is_valid_change);
        assert!(analysis.verdict.change_ratio > 0.0);
    }

    #[test]
    fn first_frame_without_preheat_reports_nothing() {
        let config = SessionConfig::default();
        let mut detector = ChangeDetector::new(&config, None);
        let analysis = detector.detect(&with_object(&scene(64, 48), 0, 0, 40)).unwrap();
        assert_eq!(analysis.verdict, ChangeVerdict::unchanged());
        assert!(analysis.mask.as_raw().iter().all(|&p| p == 0));
    }

    #[test]
    fn change_outside_roi_is_ignored() {
        let config = SessionConfig::default();
        let roi_mask = GrayImage::from_fn(120, 90, |x, _| {
            if x < 60 {
                Luma([255])
            } else {
                Luma([0])
            }
        });
        let base = scene(120, 90);
        let mut detector = ChangeDetector::new(&config, Some(Arc::new(RoiMask::from_mask(roi_mask))));
        for _ in 0..config.preheat_frames {
            detector.preheat(&base).unwrap();
        }
        let analysis = detector.detect(&with_object(&base, 75, 20, 30)).unwrap();
        assert!(!analysis.verdict.is_valid_change);
        assert_eq!(analysis.verdict.change_ratio, 0.0);

        let analysis = detector.detect(&with_object(&base, 10, 20, 30)).unwrap();
        assert!(analysis.verdict.is_valid_change);
        let expected = 900.0 / (60.0 * 90.0);
        assert!((analysis.verdict.change_ratio - expected).abs() < 1e-9);
    }
}
