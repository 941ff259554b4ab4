use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use scene_capture_common::config::OutputConfig;
use scene_capture_common::frame::TriggerEvent;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// JSON-lines log of every capture, kept next to the images.
pub const MANIFEST_FILE: &str = "captures.jsonl";

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("failed to encode jpeg: {0}")]
    Encode(String),
    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },
    #[error("no writable capture directory: {0}")]
    NoWritableLocation(String),
}

/// Receives the frame of every trigger event.
pub trait CaptureSink: Send {
    /// Persist `frame` for `event` and return where it landed.
    fn save(&mut self, frame: &RgbImage, event: &TriggerEvent) -> Result<PathBuf, PersistenceError>;

    /// Whether any capture had to fall back to the secondary location.
    fn used_backup(&self) -> bool {
        false
    }
}

#[derive(Serialize)]
struct ManifestRecord<'a> {
    #[serde(flatten)]
    event: &'a TriggerEvent,
    path: &'a Path,
}

/// Writes JPEG captures to a primary directory, falling back to a backup
/// directory when the primary cannot be written.
pub struct DiskCaptureStore {
    primary: PathBuf,
    backup: PathBuf,
    jpeg_quality: u8,
    manifest: bool,
    used_backup: bool,
}

impl DiskCaptureStore {
    pub fn new(primary: impl Into<PathBuf>, backup: impl Into<PathBuf>, jpeg_quality: u8) -> Self {
        Self {
            primary: primary.into(),
            backup: backup.into(),
            jpeg_quality: jpeg_quality.clamp(1, 100),
            manifest: true,
            used_backup: false,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.save_dir, &config.backup_dir, config.jpeg_quality).with_manifest(config.manifest)
    }

    pub fn with_manifest(mut self, enabled: bool) -> Self {
        self.manifest = enabled;
        self
    }

    /// Find the first directory that can actually be written, creating it
    /// if needed. Called before a job starts.
    pub fn probe(&self) -> Result<PathBuf, PersistenceError> {
        let mut failures = Vec::new();
        for dir in [&self.primary, &self.backup] {
            match check_writable(dir) {
                Ok(()) => {
                    info!(dir = %dir.display(), "capture directory is writable");
                    return Ok(dir.clone());
                }
                Err(e) => {
                    warn!(dir = %dir.display(), error = %e, "capture directory not writable");
                    failures.push(format!("{}: {e}", dir.display()));
                }
            }
        }
        Err(PersistenceError::NoWritableLocation(failures.join("; ")))
    }

    fn write_into(&self, dir: &Path, jpeg: &[u8], event: &TriggerEvent) -> Result<PathBuf, PersistenceError> {
        let path = dir.join(event.capture_file_name());
        let write_err = |e: std::io::Error| PersistenceError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        fs::create_dir_all(dir).map_err(write_err)?;
        fs::write(&path, jpeg).map_err(write_err)?;

        if self.manifest {
            if let Err(e) = append_manifest(dir, event, &path) {
                warn!(dir = %dir.display(), error = %e, "failed to append capture manifest");
            }
        }
        Ok(path)
    }
}

impl CaptureSink for DiskCaptureStore {
    fn save(&mut self, frame: &RgbImage, event: &TriggerEvent) -> Result<PathBuf, PersistenceError> {
        let jpeg = encode_jpeg(frame, self.jpeg_quality)?;

        let primary_err = match self.write_into(&self.primary, &jpeg, event) {
            Ok(path) => {
                debug!(path = %path.display(), bytes = jpeg.len(), "capture written");
                return Ok(path);
            }
            Err(e) => e,
        };
        warn!(error = %primary_err, "primary capture directory failed, trying backup");

        match self.write_into(&self.backup, &jpeg, event) {
            Ok(path) => {
                self.used_backup = true;
                info!(path = %path.display(), "capture written to backup directory");
                Ok(path)
            }
            Err(backup_err) => Err(PersistenceError::NoWritableLocation(format!(
                "{primary_err}; {backup_err}"
            ))),
        }
    }

    fn used_backup(&self) -> bool {
        self.used_backup
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>, PersistenceError> {
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality)
        .encode_image(frame)
        .map_err(|e| PersistenceError::Encode(e.to_string()))?;
    Ok(buf)
}

fn check_writable(dir: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dir)?;
    let probe = dir.join(format!(".write_probe_{}", std::process::id()));
    fs::write(&probe, b"probe")?;
    fs::remove_file(&probe)
}

fn append_manifest(dir: &Path, event: &TriggerEvent, path: &Path) -> std::io::Result<()> {
    let line = serde_json::to_string(&ManifestRecord { event, path })?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(MANIFEST_FILE))?;
    writeln!(file, "{line}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use tempfile::TempDir;

    /// A path that can never be a directory: it sits under a regular file.
    fn blocked_dir(root: &Path) -> PathBuf {
        let file = root.join("not_a_dir");
        fs::write(&file, b"x").unwrap();
        file.join("captures")
    }

    fn frame() -> RgbImage {
        RgbImage::from_pixel(16, 16, Rgb([10, 200, 30]))
    }

    #[test]
    fn saves_to_primary_with_manifest() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let mut store = DiskCaptureStore::new(root.join("out"), root.join("backup"), 90);
        let event = TriggerEvent::new("lobby", 42, 0.25);

        let path = store.save(&frame(), &event).unwrap();
        assert_eq!(path, root.join("out").join(event.capture_file_name()));
        assert!(path.is_file());
        assert!(!store.used_backup());

        let bytes = fs::read(&path).unwrap();
        assert_eq!(&bytes[..2], &[0xFF, 0xD8], "expected a JPEG SOI marker");

        let manifest = fs::read_to_string(root.join("out").join(MANIFEST_FILE)).unwrap();
        let record: serde_json::Value = serde_json::from_str(manifest.lines().next().unwrap()).unwrap();
        assert_eq!(record["video"], "lobby");
        assert_eq!(record["frame_index"], 42);
    }

    #[test]
    fn falls_back_to_backup_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let mut store = DiskCaptureStore::new(blocked_dir(root), root.join("backup"), 90).with_manifest(false);

        let path = store.save(&frame(), &TriggerEvent::new("dock", 7, 0.1)).unwrap();
        assert!(path.starts_with(root.join("backup")));
        assert!(store.used_backup());
        assert!(!root.join("backup").join(MANIFEST_FILE).exists());
    }

    #[test]
    fn no_writable_location_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let blocked = blocked_dir(root);
        let mut store = DiskCaptureStore::new(&blocked, &blocked, 90);

        let err = store.save(&frame(), &TriggerEvent::new("dock", 7, 0.1)).unwrap_err();
        assert!(matches!(err, PersistenceError::NoWritableLocation(_)), "got {err:?}");
        assert!(matches!(store.probe(), Err(PersistenceError::NoWritableLocation(_))));
    }

    #[test]
    fn probe_prefers_primary_and_creates_it() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let store = DiskCaptureStore::new(root.join("a/b"), blocked_dir(root), 90);
        assert_eq!(store.probe().unwrap(), root.join("a/b"));
        assert!(root.join("a/b").is_dir());

        let store = DiskCaptureStore::new(blocked_dir(root), root.join("c"), 90);
        assert_eq!(store.probe().unwrap(), root.join("c"));
    }
}
