use image::GrayImage;

/// Outcome of classifying one denoised foreground mask.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChangeVerdict {
    /// Whether the mask represents a real change worth capturing.
    pub is_valid_change: bool,
    /// Foreground pixels over ROI pixels (or frame pixels without a ROI).
    pub change_ratio: f64,
}

impl ChangeVerdict {
    pub fn unchanged() -> Self {
        Self {
            is_valid_change: false,
            change_ratio: 0.0,
        }
    }
}

/// Decides whether a fused foreground mask is a meaningful change.
///
/// Implementations are interchangeable strategies selected by configuration;
/// they see the denoised mask and the ROI pixel count at the mask's
/// resolution.
pub trait ChangeClassifier: Send {
    fn classify(&self, mask: &GrayImage, roi_pixels: Option<u64>) -> ChangeVerdict;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }
}
