use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speed levels a job may run at, slowest first.
pub const SPEED_LEVELS: [u32; 8] = [1, 2, 4, 8, 16, 24, 32, 64];

/// Frame-skip stride for a job.
///
/// At level 1 every frame is decoded; at level `S > 1` the driver seeks `S`
/// frames ahead and decodes only that one. Always a member of [`SPEED_LEVELS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct SpeedLevel(u32);

impl SpeedLevel {
    pub const NORMAL: SpeedLevel = SpeedLevel(1);

    pub fn new(level: u32) -> Result<Self, FrameError> {
        if SPEED_LEVELS.contains(&level) {
            Ok(Self(level))
        } else {
            Err(FrameError::UnsupportedSpeed(level))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Number of frame indices advanced per decoded frame.
    pub fn stride(self) -> u64 {
        self.0 as u64
    }

    /// Next level up, saturating at the fastest.
    pub fn faster(self) -> Self {
        SPEED_LEVELS
            .iter()
            .copied()
            .find(|&l| l > self.0)
            .map(Self)
            .unwrap_or(self)
    }

    /// Next level down, saturating at normal speed.
    pub fn slower(self) -> Self {
        SPEED_LEVELS
            .iter()
            .rev()
            .copied()
            .find(|&l| l < self.0)
            .map(Self)
            .unwrap_or(self)
    }
}

impl Default for SpeedLevel {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u32> for SpeedLevel {
    type Error = FrameError;

    fn try_from(level: u32) -> Result<Self, Self::Error> {
        Self::new(level)
    }
}

impl From<SpeedLevel> for u32 {
    fn from(level: SpeedLevel) -> u32 {
        level.0
    }
}

impl fmt::Display for SpeedLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x", self.0)
    }
}

/// A qualifying change in one video, emitted once per captured frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerEvent {
    /// Video identifier: the file stem of the source path.
    pub video: String,
    pub frame_index: u64,
    /// Foreground pixels over ROI (or frame) pixels. Telemetry only.
    pub change_ratio: f64,
    pub triggered_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(video: impl Into<String>, frame_index: u64, change_ratio: f64) -> Self {
        Self {
            video: video.into(),
            frame_index,
            change_ratio,
            triggered_at: Utc::now(),
        }
    }

    /// File name for the still capture of this event.
    /// e.g. "lobby_cam_frame_1234_20260218_093000.jpg"
    pub fn capture_file_name(&self) -> String {
        format!(
            "{video}_frame_{index}_{ts}.jpg",
            video = self.video,
            index = self.frame_index,
            ts = self.triggered_at.format("%Y%m%d_%H%M%S"),
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("unsupported speed level {0}, expected one of 1, 2, 4, 8, 16, 24, 32, 64")]
    UnsupportedSpeed(u32),
}
