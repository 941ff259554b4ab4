use scene_capture_common::frame::{FrameError, SpeedLevel};
use std::str::FromStr;

/// A line typed on stdin while a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    Stop,
    Speed(SpeedLevel),
    Faster,
    Slower,
    Status,
    Quit,
}

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`; try start, pause, resume, stop, speed <n>, faster, slower, status, quit")]
    Unknown(String),
    #[error("`speed` needs a level, e.g. `speed 8`")]
    MissingSpeed,
    #[error("`{0}` is not a number")]
    NotANumber(String),
    #[error(transparent)]
    Speed(#[from] FrameError),
}

impl FromStr for ControlCommand {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(CommandError::Empty);
        };
        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => Self::Start,
            "pause" | "p" => Self::Pause,
            "resume" | "r" => Self::Resume,
            "stop" => Self::Stop,
            "faster" | "+" => Self::Faster,
            "slower" | "-" => Self::Slower,
            "status" | "s" => Self::Status,
            "quit" | "q" | "exit" => Self::Quit,
            "speed" => {
                let raw = words.next().ok_or(CommandError::MissingSpeed)?;
                let level = raw
                    .trim_end_matches(['x', 'X'])
                    .parse::<u32>()
                    .map_err(|_| CommandError::NotANumber(raw.to_string()))?;
                Self::Speed(SpeedLevel::new(level)?)
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }
}
