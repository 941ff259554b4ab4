mod commands;

use commands::ControlCommand;
use scene_capture::job::{
    ActiveConfig, JobControl, JobDriver, JobObserver, JobOptions, JobState, Progress,
};
use scene_capture::preview::Preview;
use scene_capture::source::{check_ffmpeg_available, FfmpegOpener};
use scene_capture::storage::DiskCaptureStore;
use scene_capture_common::config::Config;
use scene_capture_common::frame::TriggerEvent;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Requests that only make sense once the worker has returned.
enum Request {
    Restart,
    Quit,
}

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let extra_videos: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    let mut videos = config.job.videos.clone();
    videos.extend(extra_videos);

    info!(
        config = %config_path.display(),
        videos = videos.len(),
        speed = %config.job.speed,
        classifier = ?config.detection.classifier,
        fusion = ?config.detection.fusion,
        min_area = config.detection.min_area,
        min_interval_secs = config.detection.min_interval_secs,
        roi = config.roi.is_some(),
        save_dir = %config.output.save_dir.display(),
        "starting scene-capture"
    );

    if videos.is_empty() {
        error!("no videos queued; set job.videos or pass paths after the config file");
        std::process::exit(1);
    }

    check_ffmpeg_available().await;

    let active = match ActiveConfig::new(config.session_config()) {
        Ok(a) => a,
        Err(e) => {
            error!(error = %e, "invalid detector configuration");
            std::process::exit(1);
        }
    };

    let store = DiskCaptureStore::from_config(&config.output);
    if let Err(e) = store.probe() {
        error!(error = %e, "no writable capture directory; refusing to start");
        std::process::exit(1);
    }

    let control = JobControl::new(active, config.job.speed);
    let progress = Arc::new(Mutex::new(None));
    let (requests_tx, mut requests) = mpsc::channel(4);

    tokio::spawn(run_command_loop(
        control.clone(),
        Arc::clone(&progress),
        requests_tx.clone(),
    ));

    let interrupt_control = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, stopping");
            stop_job(&interrupt_control).await;
            let _ = requests_tx.send(Request::Quit).await;
        }
    });

    let mut driver = JobDriver::new(
        control.clone(),
        videos,
        Box::new(FfmpegOpener::default()),
        Box::new(store),
        JobOptions::from_config(&config),
    );
    let mut observer = CliObserver {
        preview_path: config.preview.enabled.then(|| config.preview.path.clone()),
        progress,
        last_logged_decile: None,
    };

    loop {
        let worker = tokio::task::spawn_blocking(move || {
            let result = driver.run(&mut observer);
            (driver, observer, result)
        });

        let (returned_driver, returned_observer, result) = match worker.await {
            Ok(done) => done,
            Err(e) => {
                error!(error = %e, "worker thread panicked");
                std::process::exit(1);
            }
        };
        driver = returned_driver;
        observer = returned_observer;

        match result {
            Ok(report) => {
                if report.used_backup {
                    warn!("some captures were written to the backup directory");
                }
                if report.final_state != JobState::Stopped {
                    break;
                }
            }
            Err(e) => {
                error!(error = %e, "job aborted");
                std::process::exit(1);
            }
        }

        info!(
            video_index = control.video_index(),
            "job stopped; type `start` to resume from this video or `quit` to exit"
        );
        match requests.recv().await {
            Some(Request::Restart) => continue,
            Some(Request::Quit) | None => break,
        }
    }

    // The blocking stdin reader would otherwise keep the runtime alive.
    std::process::exit(0);
}

/// Stop the job from a blocking thread. Releasing the handle waits on the
/// worker's lock and on the decoder process exiting.
async fn stop_job(control: &JobControl) {
    let control = control.clone();
    if let Err(e) = tokio::task::spawn_blocking(move || control.stop()).await {
        error!(error = %e, "stop task failed");
    }
}

async fn run_command_loop(
    control: JobControl,
    progress: Arc<Mutex<Option<Progress>>>,
    requests: mpsc::Sender<Request>,
) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        let command = match line.parse::<ControlCommand>() {
            Ok(c) => c,
            Err(e) => {
                warn!(input = line.trim(), "{e}");
                continue;
            }
        };
        debug!(?command, "control command");

        match command {
            ControlCommand::Start if control.state() == JobState::Stopped => {
                let _ = requests.send(Request::Restart).await;
            }
            ControlCommand::Start | ControlCommand::Resume => {
                if !control.resume() {
                    info!(state = %control.state(), "nothing to resume");
                }
            }
            ControlCommand::Pause => {
                if !control.pause() {
                    info!(state = %control.state(), "nothing to pause");
                }
            }
            ControlCommand::Stop => stop_job(&control).await,
            ControlCommand::Speed(level) => control.set_speed(level),
            ControlCommand::Faster => control.set_speed(control.speed().faster()),
            ControlCommand::Slower => control.set_speed(control.speed().slower()),
            ControlCommand::Status => {
                let current = *progress.lock().unwrap_or_else(PoisonError::into_inner);
                info!(
                    state = %control.state(),
                    speed = %control.speed(),
                    video_index = control.video_index(),
                    frame = current.map(|p| p.frame_index),
                    progress = format!("{:.1}%", current.map_or(0.0, |p| p.percentage())),
                    "status"
                );
            }
            ControlCommand::Quit => {
                stop_job(&control).await;
                let _ = requests.send(Request::Quit).await;
            }
        }
    }
}

/// Logs progress, prints saved capture paths on stdout and writes the
/// latest preview image to disk.
struct CliObserver {
    preview_path: Option<PathBuf>,
    progress: Arc<Mutex<Option<Progress>>>,
    last_logged_decile: Option<(usize, u32)>,
}

impl JobObserver for CliObserver {
    fn on_progress(&mut self, progress: &Progress) {
        *self.progress.lock().unwrap_or_else(PoisonError::into_inner) = Some(*progress);

        let decile = (progress.percentage() / 10.0) as u32;
        let key = (progress.video_index, decile);
        if self.last_logged_decile != Some(key) {
            self.last_logged_decile = Some(key);
            info!(
                video_index = progress.video_index,
                frame = progress.frame_index,
                total_frames = progress.total_frames,
                progress = format!("{:.1}%", progress.percentage()),
                "progress"
            );
        }
    }

    fn on_trigger(&mut self, _event: &TriggerEvent, saved: Option<&Path>) {
        if let Some(path) = saved {
            println!("{}", path.display());
        }
    }

    fn on_preview(&mut self, preview: &Preview) {
        let Some(path) = &self.preview_path else {
            return;
        };
        match preview.image.save(path) {
            Ok(()) => debug!(
                path = %path.display(),
                video = %preview.video,
                frame = preview.frame_index,
                ratio = format!("{:.1}%", preview.change_ratio * 100.0),
                speed = %preview.speed,
                "preview updated"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "failed to write preview"),
        }
    }

    fn wants_preview(&self) -> bool {
        self.preview_path.is_some()
    }
}
