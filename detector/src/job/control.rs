use scene_capture_common::config::{ConfigError, SessionConfig};
use scene_capture_common::frame::SpeedLevel;
use std::fmt;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

use super::JobError;
use crate::roi::RoiMask;
use crate::source::SharedCapture;
use crate::speed::SpeedControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    Stopped = 3,
    Completed = 4,
}

impl JobState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Stopped,
            4 => Self::Completed,
            _ => Self::Idle,
        }
    }

    /// Stopped and Completed end a run.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Completed)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        };
        f.write_str(name)
    }
}

/// Detector settings handed to each new video.
#[derive(Clone)]
pub struct ActiveConfig {
    pub session: Arc<SessionConfig>,
    pub roi: Option<Arc<RoiMask>>,
}

impl ActiveConfig {
    /// Build the settings and rasterize the ROI polygon, if any.
    pub fn new(session: SessionConfig) -> Result<Self, ConfigError> {
        let roi = session
            .roi
            .as_ref()
            .map(RoiMask::from_config)
            .transpose()?
            .map(Arc::new);
        Ok(Self {
            session: Arc::new(session),
            roi,
        })
    }
}

struct Inner {
    state: AtomicU8,
    video_index: AtomicUsize,
    speed: SpeedControl,
    capture: SharedCapture,
    config: Mutex<ActiveConfig>,
}

/// Cooperative flags shared by the controller and the worker.
///
/// The worker polls these at every frame boundary; the controller flips them
/// without blocking on the worker. Cheap to clone.
#[derive(Clone)]
pub struct JobControl {
    inner: Arc<Inner>,
}

impl JobControl {
    pub fn new(config: ActiveConfig, speed: SpeedLevel) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: AtomicU8::new(JobState::Idle as u8),
                video_index: AtomicUsize::new(0),
                speed: SpeedControl::new(speed),
                capture: SharedCapture::new(),
                config: Mutex::new(config),
            }),
        }
    }

    pub fn state(&self) -> JobState {
        JobState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: JobState) {
        self.inner.state.store(state as u8, Ordering::Release);
    }

    fn transition(&self, from: JobState, to: JobState) -> bool {
        self.inner
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Begin a run from the current video index, or resume a paused one.
    pub fn start(&self) -> Result<(), JobError> {
        match self.state() {
            JobState::Running => Err(JobError::Busy),
            JobState::Paused => {
                self.resume();
                Ok(())
            }
            JobState::Completed => {
                self.inner.video_index.store(0, Ordering::Release);
                self.set_state(JobState::Running);
                Ok(())
            }
            JobState::Idle | JobState::Stopped => {
                self.set_state(JobState::Running);
                Ok(())
            }
        }
    }

    pub fn pause(&self) -> bool {
        let paused = self.transition(JobState::Running, JobState::Paused);
        if paused {
            info!("processing paused");
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.transition(JobState::Paused, JobState::Running);
        if resumed {
            info!("processing resumed");
        }
        resumed
    }

    /// Request a stop and release the video handle immediately.
    ///
    /// The worker finishes the frame it is on, then tears down.
    pub fn stop(&self) -> bool {
        let stopped = self.transition(JobState::Running, JobState::Stopped)
            || self.transition(JobState::Paused, JobState::Stopped);
        if stopped {
            self.inner.capture.release();
            info!(video_index = self.video_index(), "processing stopped");
        }
        stopped
    }

    /// Force the Stopped state once the worker has abandoned its run.
    pub(crate) fn halt(&self) {
        self.set_state(JobState::Stopped);
    }

    pub(crate) fn complete(&self) {
        self.set_state(JobState::Completed);
    }

    pub fn is_running(&self) -> bool {
        self.state() == JobState::Running
    }

    pub fn is_paused(&self) -> bool {
        self.state() == JobState::Paused
    }

    /// Whether the worker should abandon the current run.
    pub fn should_stop(&self) -> bool {
        self.state() == JobState::Stopped
    }

    pub fn video_index(&self) -> usize {
        self.inner.video_index.load(Ordering::Acquire)
    }

    pub(crate) fn set_video_index(&self, index: usize) {
        self.inner.video_index.store(index, Ordering::Release);
    }

    pub fn speed(&self) -> SpeedLevel {
        self.inner.speed.get()
    }

    pub fn set_speed(&self, level: SpeedLevel) {
        let previous = self.inner.speed.get();
        self.inner.speed.set(level);
        if previous != level {
            info!(from = %previous, to = %level, "speed changed");
        }
    }

    pub fn capture(&self) -> &SharedCapture {
        &self.inner.capture
    }

    /// Settings for the next video to start.
    pub fn config(&self) -> ActiveConfig {
        self.lock_config().clone()
    }

    /// Replace detector settings. Refused while frames are being processed;
    /// a paused job picks them up at its next video.
    pub fn update_config(&self, config: ActiveConfig) -> Result<(), JobError> {
        if self.is_running() {
            return Err(JobError::Busy);
        }
        *self.lock_config() = config;
        info!("detector configuration updated");
        Ok(())
    }

    fn lock_config(&self) -> MutexGuard<'_, ActiveConfig> {
        self.inner.config.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
