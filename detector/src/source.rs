use image::RgbImage;
use std::io::{self, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Forward gaps up to this many frames are decoded and dropped instead of
/// restarting the decoder at a new offset.
const MAX_DRAIN_FRAMES: u64 = 64;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to open {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("failed to probe stream: {0}")]
    Probe(String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("failed to seek to frame {index}: {reason}")]
    Seek { index: u64, reason: String },
    #[error("capture handle was released")]
    Released,
}

/// An opened, read-only video.
///
/// `read` decodes the frame at the current position and advances by one.
/// `Ok(None)` marks the end of the stream.
pub trait VideoSource: Send {
    fn frame_count(&self) -> u64;

    /// Frames per second as reported by the container, if known.
    fn fps(&self) -> Option<f64>;

    fn resolution(&self) -> (u32, u32);

    /// Index of the frame the next `read` returns.
    fn position(&self) -> u64;

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError>;

    /// Position the source so the next `read` returns frame `index`.
    fn seek(&mut self, index: u64) -> Result<(), SourceError>;
}

/// Opens video files on behalf of the job driver.
pub trait SourceOpener: Send + Sync {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError>;
}

/// Stream parameters of the handle currently held by a [`SharedCapture`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInfo {
    pub frame_count: u64,
    pub fps: Option<f64>,
    pub resolution: (u32, u32),
}

/// The single video handle shared by the worker and the controller.
///
/// Every open, read and release goes through the mutex, so the controller
/// can release the handle on stop while the worker is between reads.
#[derive(Clone, Default)]
pub struct SharedCapture {
    inner: Arc<Mutex<Option<Box<dyn VideoSource>>>>,
}

impl SharedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `path` while holding the handle lock, replacing any previous
    /// handle. On failure the capture is left empty.
    pub fn open(&self, opener: &dyn SourceOpener, path: &Path) -> Result<SourceInfo, SourceError> {
        let mut guard = self.lock();
        *guard = None;
        let source = opener.open(path)?;
        let info = SourceInfo {
            frame_count: source.frame_count(),
            fps: source.fps(),
            resolution: source.resolution(),
        };
        *guard = Some(source);
        Ok(info)
    }

    /// Replace the current handle, dropping any previous one.
    pub fn install(&self, source: Box<dyn VideoSource>) {
        *self.lock() = Some(source);
    }

    /// Drop the current handle. Returns whether one was open.
    pub fn release(&self) -> bool {
        let released = self.lock().take().is_some();
        if released {
            debug!("capture handle released");
        }
        released
    }

    pub fn is_open(&self) -> bool {
        self.lock().is_some()
    }

    /// Decode frame `index`, seeking first when it is not the next frame.
    pub fn read_at(&self, index: u64) -> Result<Option<RgbImage>, SourceError> {
        let mut guard = self.lock();
        let source = guard.as_mut().ok_or(SourceError::Released)?;
        if source.position() != index {
            source.seek(index)?;
        }
        source.read()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn VideoSource>>> {
        // A panicked holder leaves the handle usable; recover it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Stream parameters read with ffprobe.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub width: u32,
    pub height: u32,
    pub fps: Option<f64>,
    pub frame_count: u64,
}

impl StreamInfo {
    /// Parse `key=value` lines from
    /// `ffprobe -show_entries stream=... -of default=noprint_wrappers=1`.
    pub fn parse(output: &str) -> Result<Self, SourceError> {
        let mut width = None;
        let mut height = None;
        let mut fps = None;
        let mut nb_frames = None;
        let mut duration = None;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            match key {
                "width" => width = value.parse::<u32>().ok(),
                "height" => height = value.parse::<u32>().ok(),
                "avg_frame_rate" => fps = parse_rate(value).or(fps),
                "r_frame_rate" if fps.is_none() => fps = parse_rate(value),
                "nb_frames" => nb_frames = value.parse::<u64>().ok(),
                "duration" => duration = value.parse::<f64>().ok(),
                _ => {}
            }
        }

        let (Some(width), Some(height)) = (width, height) else {
            return Err(SourceError::Probe("no video stream dimensions".into()));
        };
        if width == 0 || height == 0 {
            return Err(SourceError::Probe(format!("empty frame size {width}x{height}")));
        }

        // Some containers omit nb_frames; estimate from duration.
        let frame_count = match (nb_frames, duration, fps) {
            (Some(n), _, _) if n > 0 => n,
            (_, Some(secs), Some(rate)) if secs > 0.0 => (secs * rate).round() as u64,
            _ => return Err(SourceError::Probe("frame count unavailable".into())),
        };

        Ok(Self {
            width,
            height,
            fps,
            frame_count,
        })
    }
}

/// Parse an ffprobe rational like `30000/1001`; `0/0` means unknown.
fn parse_rate(value: &str) -> Option<f64> {
    let (num, den) = match value.split_once('/') {
        Some((n, d)) => (n.parse::<f64>().ok()?, d.parse::<f64>().ok()?),
        None => (value.parse::<f64>().ok()?, 1.0),
    };
    let rate = num / den;
    (rate.is_finite() && rate > 0.0).then_some(rate)
}

/// Opens videos by shelling out to `ffprobe` and `ffmpeg`.
#[derive(Debug, Clone)]
pub struct FfmpegOpener {
    ffmpeg: String,
    ffprobe: String,
}

impl Default for FfmpegOpener {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            ffprobe: "ffprobe".into(),
        }
    }
}

impl FfmpegOpener {
    fn probe(&self, path: &Path) -> Result<StreamInfo, SourceError> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v", "error",
                "-select_streams", "v:0",
                "-show_entries", "stream=width,height,avg_frame_rate,r_frame_rate,nb_frames,duration",
                "-of", "default=noprint_wrappers=1",
            ])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| SourceError::Probe(format!("failed to run ffprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::Probe(stderr.trim().to_string()));
        }
        StreamInfo::parse(&String::from_utf8_lossy(&output.stdout))
    }
}

impl SourceOpener for FfmpegOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
        if !path.is_file() {
            return Err(SourceError::Open {
                path: path.display().to_string(),
                reason: "no such file".into(),
            });
        }
        let info = self.probe(path).map_err(|e| SourceError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        info!(
            path = %path.display(),
            width = info.width,
            height = info.height,
            fps = info.fps.unwrap_or_default(),
            frames = info.frame_count,
            "video opened"
        );

        let source = FfmpegSource::new(self.ffmpeg.clone(), path.to_path_buf(), info)?;
        Ok(Box::new(source))
    }
}

/// Decodes raw RGB frames from an `ffmpeg` child process.
pub struct FfmpegSource {
    ffmpeg: String,
    path: PathBuf,
    info: StreamInfo,
    decoder: Decoder,
    position: u64,
}

struct Decoder {
    child: Child,
    stdout: BufReader<ChildStdout>,
}

impl Drop for Decoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

impl FfmpegSource {
    fn new(ffmpeg: String, path: PathBuf, info: StreamInfo) -> Result<Self, SourceError> {
        let decoder = spawn_decoder(&ffmpeg, &path, None)?;
        Ok(Self {
            ffmpeg,
            path,
            info,
            decoder,
            position: 0,
        })
    }

    fn frame_len(&self) -> usize {
        self.info.width as usize * self.info.height as usize * 3
    }

    fn restart_at(&mut self, index: u64) -> Result<(), SourceError> {
        let offset = self.info.fps.map(|fps| index as f64 / fps);
        if offset.is_none() {
            // Without a frame rate the only way forward is to decode.
            self.decoder = spawn_decoder(&self.ffmpeg, &self.path, None)?;
            self.position = 0;
            return self.drain_to(index);
        }
        debug!(path = %self.path.display(), frame = index, "restarting decoder at offset");
        self.decoder = spawn_decoder(&self.ffmpeg, &self.path, offset)?;
        self.position = index;
        Ok(())
    }

    fn drain_to(&mut self, index: u64) -> Result<(), SourceError> {
        let mut scratch = vec![0u8; self.frame_len()];
        while self.position < index {
            if !read_frame_bytes(&mut self.decoder.stdout, &mut scratch)? {
                return Err(SourceError::Seek {
                    index,
                    reason: format!("stream ended at frame {}", self.position),
                });
            }
            self.position += 1;
        }
        Ok(())
    }
}

impl VideoSource for FfmpegSource {
    fn frame_count(&self) -> u64 {
        self.info.frame_count
    }

    fn fps(&self) -> Option<f64> {
        self.info.fps
    }

    fn resolution(&self) -> (u32, u32) {
        (self.info.width, self.info.height)
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
        let mut buf = vec![0u8; self.frame_len()];
        if !read_frame_bytes(&mut self.decoder.stdout, &mut buf)? {
            return Ok(None);
        }
        self.position += 1;
        let frame = RgbImage::from_raw(self.info.width, self.info.height, buf)
            .ok_or_else(|| SourceError::Read("frame buffer size mismatch".into()))?;
        Ok(Some(frame))
    }

    fn seek(&mut self, index: u64) -> Result<(), SourceError> {
        if index >= self.position && index - self.position <= MAX_DRAIN_FRAMES {
            self.drain_to(index)
        } else {
            self.restart_at(index)
        }
    }
}

fn spawn_decoder(ffmpeg: &str, path: &Path, offset_secs: Option<f64>) -> Result<Decoder, SourceError> {
    let mut cmd = Command::new(ffmpeg);
    cmd.args(["-v", "error", "-nostdin"]);
    if let Some(secs) = offset_secs {
        cmd.args(["-ss", &format!("{secs:.6}")]);
    }
    cmd.arg("-i")
        .arg(path)
        .args(["-map", "0:v:0", "-f", "rawvideo", "-pix_fmt", "rgb24", "pipe:1"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null());

    let mut child = cmd.spawn().map_err(|e| SourceError::Open {
        path: path.display().to_string(),
        reason: format!("failed to spawn ffmpeg: {e}"),
    })?;
    let stdout = child.stdout.take().ok_or_else(|| SourceError::Open {
        path: path.display().to_string(),
        reason: "could not get ffmpeg stdout handle".into(),
    })?;

    Ok(Decoder {
        child,
        stdout: BufReader::new(stdout),
    })
}

/// Fill `buf` with one frame. Returns `false` on a clean end of stream.
fn read_frame_bytes(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, SourceError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(SourceError::Read(e.to_string())),
    }
}

/// Check whether ffmpeg and ffprobe are on PATH. Logs a warning if not.
pub async fn check_ffmpeg_available() {
    for tool in ["ffmpeg", "ffprobe"] {
        match tokio::process::Command::new(tool).arg("-version").output().await {
            Ok(out) if out.status.success() => {
                debug!(tool, "decoder tool is available");
            }
            Ok(_) => {
                warn!(tool, "returned non-zero for -version; decoding may fail");
            }
            Err(e) => {
                warn!(
                    tool,
                    error = %e,
                    "not found on PATH; videos cannot be opened. Install ffmpeg."
                );
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;

    /// In-memory video: a list of frames, optionally failing every read.
    pub struct MemorySource {
        frames: Arc<Vec<RgbImage>>,
        position: u64,
        fail_reads: bool,
        decoded: Arc<Mutex<Vec<u64>>>,
    }

    impl VideoSource for MemorySource {
        fn frame_count(&self) -> u64 {
            self.frames.len() as u64
        }

        fn fps(&self) -> Option<f64> {
            Some(30.0)
        }

        fn resolution(&self) -> (u32, u32) {
            self.frames.first().map_or((0, 0), |f| f.dimensions())
        }

        fn position(&self) -> u64 {
            self.position
        }

        fn read(&mut self) -> Result<Option<RgbImage>, SourceError> {
            if self.fail_reads {
                return Err(SourceError::Read("corrupt stream".into()));
            }
            let frame = self.frames.get(self.position as usize).cloned();
            if frame.is_some() {
                self.decoded.lock().unwrap().push(self.position);
                self.position += 1;
            }
            Ok(frame)
        }

        fn seek(&mut self, index: u64) -> Result<(), SourceError> {
            self.position = index;
            Ok(())
        }
    }

    enum Entry {
        Frames(Arc<Vec<RgbImage>>),
        Unreadable,
    }

    /// Opener over named in-memory videos. Unknown paths fail to open.
    #[derive(Default)]
    pub struct MemoryOpener {
        videos: HashMap<PathBuf, Entry>,
        pub decoded: Arc<Mutex<Vec<u64>>>,
    }

    impl MemoryOpener {
        pub fn with_video(mut self, path: &str, frames: Vec<RgbImage>) -> Self {
            self.videos.insert(path.into(), Entry::Frames(Arc::new(frames)));
            self
        }

        pub fn with_unreadable(mut self, path: &str) -> Self {
            self.videos.insert(path.into(), Entry::Unreadable);
            self
        }

        pub fn decoded(&self) -> Vec<u64> {
            self.decoded.lock().unwrap().clone()
        }
    }

    impl SourceOpener for MemoryOpener {
        fn open(&self, path: &Path) -> Result<Box<dyn VideoSource>, SourceError> {
            let (frames, fail_reads) = match self.videos.get(path) {
                Some(Entry::Frames(frames)) => (frames.clone(), false),
                Some(Entry::Unreadable) => (Arc::new(vec![RgbImage::new(8, 8); 30]), true),
                None => {
                    return Err(SourceError::Open {
                        path: path.display().to_string(),
                        reason: "no such file".into(),
                    })
                }
            };
            Ok(Box::new(MemorySource {
                frames,
                position: 0,
                fail_reads,
                decoded: self.decoded.clone(),
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MemoryOpener;
    use super::*;
    use image::Rgb;

    #[test]
    fn stream_info_from_ffprobe_output() {
        let info = StreamInfo::parse(
            "width=1920\nheight=1080\nr_frame_rate=30/1\navg_frame_rate=30000/1001\nnb_frames=1800\nduration=60.060000\n",
        )
        .unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.frame_count, 1800);
        assert!((info.fps.unwrap() - 29.97).abs() < 0.01);
    }

    #[test]
    fn frame_count_estimated_from_duration() {
        let info =
            StreamInfo::parse("width=640\nheight=480\navg_frame_rate=25/1\nnb_frames=N/A\nduration=4.0\n")
                .unwrap();
        assert_eq!(info.frame_count, 100);
    }

    #[test]
    fn unknown_rate_falls_back_to_r_frame_rate() {
        let info = StreamInfo::parse(
            "width=64\nheight=48\navg_frame_rate=0/0\nr_frame_rate=15/1\nnb_frames=10\n",
        )
        .unwrap();
        assert_eq!(info.fps, Some(15.0));
    }

    #[test]
    fn missing_dimensions_is_a_probe_error() {
        let err = StreamInfo::parse("nb_frames=10\n").unwrap_err();
        assert!(matches!(err, SourceError::Probe(_)));
    }

    #[test]
    fn ffmpeg_opener_rejects_missing_file() {
        let err = FfmpegOpener::default()
            .open(Path::new("/definitely/not/here.mp4"))
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Open { .. }));
    }

    #[test]
    fn shared_capture_seeks_and_releases() {
        let frames = (0..5u8)
            .map(|v| RgbImage::from_pixel(2, 2, Rgb([v, v, v])))
            .collect();
        let opener = MemoryOpener::default().with_video("a.mp4", frames);
        let capture = SharedCapture::new();
        capture.install(opener.open(Path::new("a.mp4")).unwrap());

        assert_eq!(capture.read_at(0).unwrap().unwrap().get_pixel(0, 0)[0], 0);
        assert_eq!(capture.read_at(3).unwrap().unwrap().get_pixel(0, 0)[0], 3);
        assert!(capture.read_at(5).unwrap().is_none());
        assert_eq!(opener.decoded(), vec![0, 3]);

        assert!(capture.release());
        assert!(!capture.is_open());
        assert!(matches!(capture.read_at(0), Err(SourceError::Released)));
        assert!(!capture.release());
    }

    #[test]
    fn shared_capture_opens_under_lock() {
        let frames = vec![RgbImage::new(4, 3); 7];
        let opener = MemoryOpener::default().with_video("a.mp4", frames);
        let capture = SharedCapture::new();

        let info = capture.open(&opener, Path::new("a.mp4")).unwrap();
        assert_eq!(info.frame_count, 7);
        assert_eq!(info.resolution, (4, 3));
        assert!(capture.is_open());

        let err = capture.open(&opener, Path::new("gone.mp4")).unwrap_err();
        assert!(matches!(err, SourceError::Open { .. }));
        assert!(!capture.is_open(), "a failed open drops the previous handle");
    }
}
