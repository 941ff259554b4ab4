use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_polygon_mut;
use scene_capture_common::frame::SpeedLevel;
use std::time::{Duration, Instant};

use crate::roi::RoiMask;

const ROI_OUTLINE: Rgb<u8> = Rgb([0, 255, 0]);

/// Limits preview rendering to at most one per `interval` of wall time.
#[derive(Debug, Clone)]
pub struct PreviewThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl PreviewThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// Returns `true` and starts a new window if a preview is due at `now`.
    pub fn ready(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}

/// One rendered preview handed to the controlling surface.
pub struct Preview {
    /// Working-resolution frame with the foreground mask and ROI drawn on it.
    pub image: RgbImage,
    pub change_ratio: f64,
    pub speed: SpeedLevel,
    pub video: String,
    pub frame_index: u64,
}

/// Tint foreground pixels red at half strength and outline the ROI in green.
pub fn render_overlay(color: &RgbImage, mask: &GrayImage, roi: Option<&RoiMask>) -> RgbImage {
    let mut out = color.clone();
    if mask.dimensions() == color.dimensions() {
        for (pixel, m) in out.pixels_mut().zip(mask.as_raw().iter()) {
            pixel[0] = pixel[0].saturating_add(m / 2);
        }
    }

    if let Some(roi) = roi {
        let (w, h) = out.dimensions();
        let mut outline = roi.outline(w, h);
        // draw_hollow_polygon_mut rejects a closed ring.
        if outline.len() > 1 && outline.first() == outline.last() {
            outline.pop();
        }
        if outline.len() >= 3 {
            draw_hollow_polygon_mut(&mut out, &outline, ROI_OUTLINE);
        }
    }
    out
}
