use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::frame::SpeedLevel;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detection: DetectionConfig,
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub roi: Option<RoiConfig>,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectionConfig {
    #[serde(default = "default_gmm_var_threshold")]
    pub gmm_var_threshold: f32,
    #[serde(default = "default_gmm_history")]
    pub gmm_history: u32,
    #[serde(default = "default_frame_diff_threshold")]
    pub frame_diff_threshold: u8,
    #[serde(default = "default_min_area")]
    pub min_area: u32,
    #[serde(default = "default_preheat_frames")]
    pub preheat_frames: u32,
    #[serde(default = "default_target_height")]
    pub target_height: u32,
    #[serde(default = "default_min_interval_secs")]
    pub min_interval_secs: f64,
    #[serde(default)]
    pub classifier: ClassifierKind,
    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,
    #[serde(default)]
    pub fusion: FusionMode,
}

/// Which rule decides that a fused foreground mask is a real change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// At least one connected blob of `min_area` pixels.
    #[default]
    Area,
    /// Foreground ratio above `change_threshold`.
    Ratio,
}

/// How the background-model and frame-difference masks are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionMode {
    #[default]
    And,
    Or,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JobConfig {
    #[serde(default)]
    pub videos: Vec<PathBuf>,
    #[serde(default)]
    pub speed: SpeedLevel,
    #[serde(default = "default_true")]
    pub pace_unit_speed: bool,
    #[serde(default = "default_fps")]
    pub default_fps: f64,
    #[serde(default = "default_pause_poll_ms")]
    pub pause_poll_ms: u64,
}

/// Polygon region of interest, in the coordinates of a `width` x `height` frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RoiConfig {
    pub vertices: Vec<[i32; 2]>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_save_dir")]
    pub save_dir: PathBuf,
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
    #[serde(default = "default_true")]
    pub manifest: bool,
    #[serde(default)]
    pub annotate: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PreviewConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_preview_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_preview_path")]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

/// Detector settings for one video. Built once from [`Config`] and never
/// mutated while a video is being processed.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub gmm_history: u32,
    pub gmm_var_threshold: f32,
    pub frame_diff_threshold: u8,
    pub min_area: u32,
    pub preheat_frames: u32,
    pub target_height: u32,
    pub min_interval: Duration,
    pub classifier: ClassifierKind,
    pub change_threshold: f64,
    pub fusion: FusionMode,
    pub roi: Option<RoiConfig>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        DetectionConfig::default().session_config(None)
    }
}

impl DetectionConfig {
    pub fn session_config(&self, roi: Option<RoiConfig>) -> SessionConfig {
        SessionConfig {
            gmm_history: self.gmm_history,
            gmm_var_threshold: self.gmm_var_threshold,
            frame_diff_threshold: self.frame_diff_threshold,
            min_area: self.min_area,
            preheat_frames: self.preheat_frames,
            target_height: self.target_height,
            min_interval: Duration::from_secs_f64(self.min_interval_secs.max(0.0)),
            classifier: self.classifier,
            change_threshold: self.change_threshold,
            fusion: self.fusion,
            roi,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        debug!(path = %path.display(), roi = config.roi.is_some(), "config loaded");
        Ok(config)
    }

    /// Reject settings a session could not start with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let d = &self.detection;
        if d.gmm_history == 0 {
            return Err(ConfigError::Invalid("detection.gmm_history must be > 0".into()));
        }
        if !(d.gmm_var_threshold > 0.0) {
            return Err(ConfigError::Invalid(
                "detection.gmm_var_threshold must be > 0".into(),
            ));
        }
        if !d.min_interval_secs.is_finite() || d.min_interval_secs < 0.0 {
            return Err(ConfigError::Invalid(
                "detection.min_interval_secs must be a non-negative number".into(),
            ));
        }
        if !(0.0..=1.0).contains(&d.change_threshold) {
            return Err(ConfigError::Invalid(
                "detection.change_threshold must be within 0.0..=1.0".into(),
            ));
        }
        if !(self.job.default_fps > 0.0) {
            return Err(ConfigError::Invalid("job.default_fps must be > 0".into()));
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            return Err(ConfigError::Invalid(
                "output.jpeg_quality must be within 1..=100".into(),
            ));
        }
        if let Some(roi) = &self.roi {
            roi.validate()?;
        }
        if d.classifier == ClassifierKind::Area && d.min_area == 0 {
            warn!("detection.min_area is 0; every non-empty mask counts as a change");
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        self.detection.session_config(self.roi.clone())
    }
}

impl RoiConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vertices.len() < 3 {
            return Err(ConfigError::Roi(format!(
                "polygon needs at least 3 vertices, got {}",
                self.vertices.len()
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Roi(format!(
                "reference frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("invalid roi: {0}")]
    Roi(String),
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            gmm_var_threshold: default_gmm_var_threshold(),
            gmm_history: default_gmm_history(),
            frame_diff_threshold: default_frame_diff_threshold(),
            min_area: default_min_area(),
            preheat_frames: default_preheat_frames(),
            target_height: default_target_height(),
            min_interval_secs: default_min_interval_secs(),
            classifier: ClassifierKind::default(),
            change_threshold: default_change_threshold(),
            fusion: FusionMode::default(),
        }
    }
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            videos: Vec::new(),
            speed: SpeedLevel::default(),
            pace_unit_speed: default_true(),
            default_fps: default_fps(),
            pause_poll_ms: default_pause_poll_ms(),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            save_dir: default_save_dir(),
            backup_dir: default_backup_dir(),
            jpeg_quality: default_jpeg_quality(),
            manifest: default_true(),
            annotate: false,
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: default_preview_interval_ms(),
            path: default_preview_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

// Default value functions
fn default_gmm_var_threshold() -> f32 {
    15.0
}
fn default_gmm_history() -> u32 {
    100
}
fn default_frame_diff_threshold() -> u8 {
    30
}
fn default_min_area() -> u32 {
    150
}
fn default_preheat_frames() -> u32 {
    10
}
fn default_target_height() -> u32 {
    480
}
fn default_min_interval_secs() -> f64 {
    1.0
}
fn default_change_threshold() -> f64 {
    0.05
}
fn default_true() -> bool {
    true
}
fn default_fps() -> f64 {
    30.0
}
fn default_pause_poll_ms() -> u64 {
    50
}
fn default_save_dir() -> PathBuf {
    "captures".into()
}
fn default_backup_dir() -> PathBuf {
    "captures_backup".into()
}
fn default_jpeg_quality() -> u8 {
    90
}
fn default_preview_interval_ms() -> u64 {
    300
}
fn default_preview_path() -> PathBuf {
    "preview.jpg".into()
}
fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config, ConfigError> {
        let config: Config =
            toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = parse("").unwrap();
        let session = config.session_config();
        assert_eq!(session.min_area, 150);
        assert_eq!(session.preheat_frames, 10);
        assert_eq!(session.frame_diff_threshold, 30);
        assert_eq!(session.target_height, 480);
        assert_eq!(session.min_interval, Duration::from_secs(1));
        assert_eq!(session.classifier, ClassifierKind::Area);
        assert_eq!(session.fusion, FusionMode::And);
        assert!(session.roi.is_none());
        assert_eq!(config.job.speed, SpeedLevel::NORMAL);
        assert_eq!(config.preview.interval_ms, 300);
    }

    #[test]
    fn full_file_parses() {
        let config = parse(
            r#"
            [detection]
            gmm_var_threshold = 25
            classifier = "ratio"
            change_threshold = 0.1
            fusion = "or"
            min_interval_secs = 2.5

            [job]
            videos = ["a.mp4", "b.mkv"]
            speed = 8

            [roi]
            vertices = [[0, 0], [50, 0], [50, 50]]
            width = 100
            height = 100

            [output]
            save_dir = "/tmp/shots"
            annotate = true

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.job.videos.len(), 2);
        assert_eq!(config.job.speed.get(), 8);
        let session = config.session_config();
        assert_eq!(session.classifier, ClassifierKind::Ratio);
        assert_eq!(session.fusion, FusionMode::Or);
        assert_eq!(session.gmm_var_threshold, 25.0);
        assert_eq!(session.min_interval, Duration::from_millis(2500));
        assert_eq!(session.roi.as_ref().map(|r| r.vertices.len()), Some(3));
        assert!(config.output.annotate);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn unsupported_speed_is_a_parse_error() {
        let err = parse("[job]\nspeed = 5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn roi_with_two_vertices_rejected() {
        let err = parse(
            r#"
            [roi]
            vertices = [[0, 0], [10, 10]]
            width = 100
            height = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Roi(_)), "got {err:?}");
    }

    #[test]
    fn negative_interval_rejected() {
        let err = parse("[detection]\nmin_interval_secs = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)), "got {err:?}");
    }
}
