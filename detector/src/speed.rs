use scene_capture_common::frame::SpeedLevel;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Index of the next frame to decode after `current`.
///
/// Advances by the speed stride and clamps to the last frame. A result equal
/// to `current` means the video is exhausted.
pub fn next_frame_index(current: u64, speed: SpeedLevel, total_frames: u64) -> u64 {
    let last = total_frames.saturating_sub(1);
    current.saturating_add(speed.stride()).min(last).max(current)
}

/// Current speed level shared between the controller and the worker.
///
/// The worker reads it once per frame, so a change applies to the next
/// skip computation only.
#[derive(Debug, Clone)]
pub struct SpeedControl {
    level: Arc<AtomicU32>,
}

impl SpeedControl {
    pub fn new(level: SpeedLevel) -> Self {
        Self {
            level: Arc::new(AtomicU32::new(level.get())),
        }
    }

    pub fn get(&self) -> SpeedLevel {
        SpeedLevel::new(self.level.load(Ordering::Relaxed)).unwrap_or_default()
    }

    pub fn set(&self, level: SpeedLevel) {
        self.level.store(level.get(), Ordering::Relaxed);
    }
}

impl Default for SpeedControl {
    fn default() -> Self {
        Self::new(SpeedLevel::NORMAL)
    }
}
