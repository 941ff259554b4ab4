pub mod control;
pub mod driver;

pub use control::{ActiveConfig, JobControl, JobState};
pub use driver::{JobDriver, JobObserver, JobOptions, JobReport, NoopObserver, Progress};

use crate::processor::DetectError;

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("detection failed: {0}")]
    Detection(#[from] DetectError),
    #[error("a job is already running")]
    Busy,
    #[error("no videos queued")]
    NothingQueued,
}
