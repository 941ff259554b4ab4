use image::RgbImage;
use scene_capture_common::config::Config;
use scene_capture_common::frame::{SpeedLevel, TriggerEvent};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use super::control::{JobControl, JobState};
use super::JobError;
use crate::preview::{render_overlay, Preview, PreviewThrottle};
use crate::processor::{DetectError, FrameAnalysis};
use crate::roi::RoiMask;
use crate::session::{DetectionSession, FrameOutcome};
use crate::source::{SourceError, SourceOpener};
use crate::storage::CaptureSink;

/// Position of the worker inside the job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    pub video_index: usize,
    pub frame_index: u64,
    pub total_frames: u64,
    pub total_videos: usize,
}

impl Progress {
    /// Overall completion across all queued videos, 0 to 100.
    pub fn percentage(&self) -> f64 {
        if self.total_videos == 0 {
            return 0.0;
        }
        let within = if self.total_frames == 0 {
            1.0
        } else {
            (self.frame_index + 1) as f64 / self.total_frames as f64
        };
        let pct = (self.video_index as f64 + within.min(1.0)) / self.total_videos as f64 * 100.0;
        pct.clamp(0.0, 100.0)
    }
}

/// Callbacks into the controlling surface. All methods default to no-ops.
pub trait JobObserver {
    fn on_progress(&mut self, _progress: &Progress) {}

    /// Called once per trigger event; `saved` is `None` when persisting failed.
    fn on_trigger(&mut self, _event: &TriggerEvent, _saved: Option<&Path>) {}

    fn on_preview(&mut self, _preview: &Preview) {}

    /// Previews are only rendered for observers that ask for them.
    fn wants_preview(&self) -> bool {
        false
    }
}

pub struct NoopObserver;

impl JobObserver for NoopObserver {}

#[derive(Debug, Clone)]
pub struct JobOptions {
    /// Sleep one frame period between frames at speed 1.
    pub pace_unit_speed: bool,
    pub default_fps: f64,
    pub pause_poll: Duration,
    pub preview_interval: Duration,
    /// Save the overlay instead of the clean frame.
    pub annotate: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            pace_unit_speed: true,
            default_fps: 30.0,
            pause_poll: Duration::from_millis(50),
            preview_interval: Duration::from_millis(300),
            annotate: false,
        }
    }
}

impl JobOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pace_unit_speed: config.job.pace_unit_speed,
            default_fps: config.job.default_fps,
            pause_poll: Duration::from_millis(config.job.pause_poll_ms.max(1)),
            preview_interval: Duration::from_millis(config.preview.interval_ms),
            annotate: config.output.annotate,
        }
    }
}

/// Summary of one call to [`JobDriver::run`].
#[derive(Debug, Clone)]
pub struct JobReport {
    pub videos_processed: usize,
    pub videos_skipped: usize,
    pub frames_decoded: u64,
    pub frames_analysed: u64,
    pub captures_saved: u64,
    pub captures_failed: u64,
    /// Whether any capture landed in the backup directory.
    pub used_backup: bool,
    pub final_state: JobState,
}

impl JobReport {
    fn new() -> Self {
        Self {
            videos_processed: 0,
            videos_skipped: 0,
            frames_decoded: 0,
            frames_analysed: 0,
            captures_saved: 0,
            captures_failed: 0,
            used_backup: false,
            final_state: JobState::Idle,
        }
    }
}

enum VideoEnd {
    Finished,
    Skipped,
    Stopped,
}

/// Walks the queued videos on a dedicated worker thread.
///
/// Each video gets its own source handle and a fresh [`DetectionSession`];
/// nothing carries over from one video to the next. Pause and stop are
/// honored between frames, never in the middle of one.
pub struct JobDriver {
    control: JobControl,
    videos: Vec<PathBuf>,
    opener: Box<dyn SourceOpener>,
    sink: Box<dyn CaptureSink>,
    options: JobOptions,
}

impl JobDriver {
    pub fn new(
        control: JobControl,
        videos: Vec<PathBuf>,
        opener: Box<dyn SourceOpener>,
        sink: Box<dyn CaptureSink>,
        options: JobOptions,
    ) -> Self {
        Self {
            control,
            videos,
            opener,
            sink,
            options,
        }
    }

    pub fn control(&self) -> &JobControl {
        &self.control
    }

    /// Process videos from the control's current index until the queue is
    /// exhausted or the job is stopped. Blocks the calling thread.
    pub fn run(&mut self, observer: &mut dyn JobObserver) -> Result<JobReport, JobError> {
        if self.videos.is_empty() {
            return Err(JobError::NothingQueued);
        }
        if !self.control.is_running() {
            self.control.start()?;
        }

        let mut report = JobReport::new();
        let first = self.control.video_index().min(self.videos.len());
        info!(
            videos = self.videos.len(),
            from = first,
            speed = %self.control.speed(),
            "job started"
        );

        let mut stopped = false;
        for index in first..self.videos.len() {
            if self.control.should_stop() {
                stopped = true;
                break;
            }
            self.control.set_video_index(index);

            match self.run_video(index, observer, &mut report) {
                Ok(VideoEnd::Finished) => report.videos_processed += 1,
                Ok(VideoEnd::Skipped) => report.videos_skipped += 1,
                Ok(VideoEnd::Stopped) => {
                    stopped = true;
                    break;
                }
                Err(e) => {
                    error!(
                        video = %self.videos[index].display(),
                        error = %e,
                        "detection failed, stopping job"
                    );
                    self.control.capture().release();
                    self.control.stop();
                    return Err(JobError::Detection(e));
                }
            }
        }

        if stopped {
            // A restart that raced the stop is dropped; the caller runs again.
            self.control.halt();
        } else if !self.control.should_stop() {
            self.control.set_video_index(self.videos.len());
            self.control.complete();
        }

        report.final_state = self.control.state();
        report.used_backup = self.sink.used_backup();
        info!(
            state = %report.final_state,
            processed = report.videos_processed,
            skipped = report.videos_skipped,
            frames = report.frames_analysed,
            saved = report.captures_saved,
            failed = report.captures_failed,
            used_backup = report.used_backup,
            "job finished"
        );
        Ok(report)
    }

    fn run_video(
        &mut self,
        video_index: usize,
        observer: &mut dyn JobObserver,
        report: &mut JobReport,
    ) -> Result<VideoEnd, DetectError> {
        let path = self.videos[video_index].clone();
        let name = video_name(&path);
        info!(
            video = %name,
            position = video_index + 1,
            of = self.videos.len(),
            "processing video"
        );

        let capture = self.control.capture().clone();
        let info = match capture.open(self.opener.as_ref(), &path) {
            Ok(info) => info,
            Err(e) => {
                warn!(video = %path.display(), error = %e, "failed to open video, skipping");
                return Ok(VideoEnd::Skipped);
            }
        };
        let total_frames = info.frame_count;
        let fps = info.fps.filter(|f| *f > 0.0).unwrap_or(self.options.default_fps);
        let (width, height) = info.resolution;
        debug!(video = %name, width, height, total_frames, fps, "source ready");

        if total_frames == 0 {
            warn!(video = %name, "video reports no frames, skipping");
            capture.release();
            return Ok(VideoEnd::Skipped);
        }
        if self.control.should_stop() {
            capture.release();
            return Ok(VideoEnd::Stopped);
        }

        let active = self.control.config();
        let mut session =
            DetectionSession::new(name.clone(), total_frames, &active.session, active.roi.clone());
        debug!(
            video = %name,
            classifier = session.detector().classifier_name(),
            "session ready"
        );
        let mut throttle = PreviewThrottle::new(self.options.preview_interval);
        let mut decoded = 0u64;

        loop {
            while self.control.is_paused() {
                std::thread::sleep(self.options.pause_poll);
            }
            if self.control.should_stop() {
                capture.release();
                debug!(video = %name, frame = ?session.cursor(), "abandoning video on stop");
                return Ok(VideoEnd::Stopped);
            }

            let speed = self.control.speed();
            let Some(frame_index) = session.next_index(speed) else {
                break;
            };

            let frame = match capture.read_at(frame_index) {
                Ok(Some(frame)) => frame,
                Ok(None) if decoded == 0 => {
                    warn!(video = %name, "video has no readable frames, skipping");
                    capture.release();
                    return Ok(VideoEnd::Skipped);
                }
                Ok(None) => {
                    debug!(video = %name, frame = frame_index, "end of stream");
                    break;
                }
                Err(SourceError::Released) => return Ok(VideoEnd::Stopped),
                Err(e) if decoded == 0 => {
                    warn!(video = %name, error = %e, "failed to read first frame, skipping");
                    capture.release();
                    return Ok(VideoEnd::Skipped);
                }
                Err(e) => {
                    warn!(video = %name, frame = frame_index, error = %e, "frame read failed, ending video");
                    break;
                }
            };
            decoded += 1;
            report.frames_decoded += 1;

            let outcome = session.process(frame_index, &frame, Instant::now())?;
            if let FrameOutcome::Analysed { analysis, event } = outcome {
                report.frames_analysed += 1;
                let roi = session.detector().roi();
                if let Some(event) = event {
                    self.persist(&frame, &analysis, roi, &event, observer, report);
                }
                if observer.wants_preview() && throttle.ready(Instant::now()) {
                    observer.on_preview(&Preview {
                        image: render_overlay(&analysis.color, &analysis.mask, roi),
                        change_ratio: analysis.verdict.change_ratio,
                        speed,
                        video: name.clone(),
                        frame_index,
                    });
                }
            }

            observer.on_progress(&Progress {
                video_index,
                frame_index,
                total_frames,
                total_videos: self.videos.len(),
            });

            if speed == SpeedLevel::NORMAL && self.options.pace_unit_speed {
                std::thread::sleep(Duration::from_secs_f64(1.0 / fps));
            }
        }

        capture.release();
        info!(video = %name, frames = decoded, "video finished");
        Ok(VideoEnd::Finished)
    }

    fn persist(
        &mut self,
        frame: &RgbImage,
        analysis: &FrameAnalysis,
        roi: Option<&RoiMask>,
        event: &TriggerEvent,
        observer: &mut dyn JobObserver,
        report: &mut JobReport,
    ) {
        let saved = if self.options.annotate {
            let overlay = render_overlay(&analysis.color, &analysis.mask, roi);
            self.sink.save(&overlay, event)
        } else {
            self.sink.save(frame, event)
        };

        match saved {
            Ok(path) => {
                report.captures_saved += 1;
                info!(
                    video = %event.video,
                    frame = event.frame_index,
                    ratio = format!("{:.2}%", event.change_ratio * 100.0),
                    path = %path.display(),
                    "capture saved"
                );
                observer.on_trigger(event, Some(&path));
            }
            Err(e) => {
                report.captures_failed += 1;
                error!(
                    video = %event.video,
                    frame = event.frame_index,
                    error = %e,
                    "failed to save capture"
                );
                observer.on_trigger(event, None);
            }
        }
    }
}

/// Video identifier used in capture names: the file stem.
pub fn video_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
