use image::RgbImage;
use scene_capture_common::config::SessionConfig;
use scene_capture_common::frame::{SpeedLevel, TriggerEvent};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::processor::{ChangeDetector, DetectError, FrameAnalysis};
use crate::roi::RoiMask;
use crate::speed::next_frame_index;
use crate::trigger::DebouncePolicy;

/// What happened to one decoded frame.
pub enum FrameOutcome {
    /// Fed to the background model only.
    Preheat,
    Analysed {
        analysis: FrameAnalysis,
        event: Option<TriggerEvent>,
    },
}

/// Per-video detection state: frame cursor, preheat countdown, debounce
/// clock and the detector pipeline.
///
/// Created when a video starts and dropped when it ends or the job stops.
/// Nothing in here survives into the next video.
pub struct DetectionSession {
    video: String,
    total_frames: u64,
    cursor: Option<u64>,
    preheat_remaining: u32,
    debounce: DebouncePolicy,
    detector: ChangeDetector,
}

impl DetectionSession {
    pub fn new(
        video: impl Into<String>,
        total_frames: u64,
        config: &SessionConfig,
        roi: Option<Arc<RoiMask>>,
    ) -> Self {
        Self {
            video: video.into(),
            total_frames,
            cursor: None,
            preheat_remaining: config.preheat_frames,
            debounce: DebouncePolicy::new(config.min_interval),
            detector: ChangeDetector::new(config, roi),
        }
    }

    /// Index of the next frame to decode, or `None` once the video is done.
    ///
    /// Preheat walks frames sequentially; afterwards the speed stride applies.
    pub fn next_index(&self, speed: SpeedLevel) -> Option<u64> {
        let Some(current) = self.cursor else {
            return (self.total_frames > 0).then_some(0);
        };
        let next = if self.preheat_remaining > 0 {
            next_frame_index(current, SpeedLevel::NORMAL, self.total_frames)
        } else {
            next_frame_index(current, speed, self.total_frames)
        };
        (next > current).then_some(next)
    }

    /// Run one decoded frame through preheat or detection.
    ///
    /// `now` is the wall-clock instant used for debouncing.
    pub fn process(
        &mut self,
        index: u64,
        frame: &RgbImage,
        now: Instant,
    ) -> Result<FrameOutcome, DetectError> {
        self.cursor = Some(index);

        if self.preheat_remaining > 0 {
            self.detector.preheat(frame)?;
            self.preheat_remaining -= 1;
            if self.preheat_remaining == 0 {
                debug!(video = %self.video, frame = index, "background model preheated");
            }
            return Ok(FrameOutcome::Preheat);
        }

        let analysis = self.detector.detect(frame)?;
        let fired = self
            .debounce
            .evaluate(analysis.verdict.is_valid_change, now);
        let event = fired.then(|| {
            TriggerEvent::new(self.video.as_str(), index, analysis.verdict.change_ratio)
        });

        debug!(
            video = %self.video,
            frame = index,
            valid = analysis.verdict.is_valid_change,
            ratio = format!("{:.4}", analysis.verdict.change_ratio),
            triggered = event.is_some(),
            "frame analysed"
        );

        Ok(FrameOutcome::Analysed { analysis, event })
    }

    pub fn video(&self) -> &str {
        &self.video
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    pub fn is_preheating(&self) -> bool {
        self.preheat_remaining > 0
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }
}
