use crate::camera_api::CameraBackend;
use crate::config::{Mode, Settings};
use crate::error::{Result, TimelapseError};
use chrono::{DateTime, Local, TimeZone};
use clock::Clock;
use encoder::VideoBackend;
use log::{debug, info};
use std::fmt::Display;
use std::path::PathBuf;

pub mod capture;
pub mod clock;
pub mod encoder;
pub mod stitch;

pub use capture::{capture_frames, CaptureSession};
pub use stitch::{stitch_frames, StitchJob};

/// `Mon-02-Jan-2006_15-04-05`
pub const SESSION_DIR_FORMAT: &str = "%a-%d-%b-%Y_%H-%M-%S";
const FRAMES_FOLDER: &str = "frames";

pub fn session_dir_name<Tz>(now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    now.format(SESSION_DIR_FORMAT).to_string()
}

/// What a run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub frame_dir: PathBuf,
    pub frames_captured: Option<usize>,
    pub video: Option<PathBuf>,
}

pub struct TimeLapseManufacturer<B, V, C> {
    settings: Settings,
    camera_backend: B,
    video_backend: V,
    clock: C,
}

impl<B, V, C> TimeLapseManufacturer<B, V, C>
where
    B: CameraBackend,
    V: VideoBackend,
    C: Clock,
{
    pub fn new(settings: Settings, camera_backend: B, video_backend: V, clock: C) -> Self {
        Self {
            settings,
            camera_backend,
            video_backend,
            clock,
        }
    }

    /// Directory the frames are written to (capture) or read from (stitch only).
    pub fn frame_dir(&self) -> Result<PathBuf> {
        match self.settings.mode {
            Mode::Stitch => self
                .settings
                .stitch_dir
                .clone()
                .ok_or(TimelapseError::MissingStitchDir),
            Mode::Capture | Mode::Both => {
                let session = session_dir_name(&self.clock.now().with_timezone(&Local));
                Ok(self
                    .settings
                    .output_root
                    .join(session)
                    .join(FRAMES_FOLDER))
            }
        }
    }

    /// Runs the selected stages one after the other. Both stages are
    /// validated before either touches the camera or the filesystem.
    pub fn run(&self) -> Result<RunReport> {
        let settings = &self.settings;
        let frame_dir = self.frame_dir()?;
        debug!(
            "Running cmd \"{}\" with frames in \"{}\"",
            settings.mode,
            frame_dir.display()
        );

        let session = if settings.mode.captures() {
            Some(
                CaptureSession::from_signed(
                    settings.device_id,
                    settings.duration,
                    settings.interval,
                    &frame_dir,
                )?
                .with_resolution(settings.cam_width, settings.cam_height),
            )
        } else {
            None
        };
        let job = if settings.mode.stitches() {
            Some(StitchJob::new(
                &frame_dir,
                settings.fps,
                settings.frame_step,
            )?)
        } else {
            None
        };

        let mut report = RunReport {
            frame_dir,
            frames_captured: None,
            video: None,
        };

        if let Some(session) = session {
            info!("> Starting timelapse frame capture.");
            let frames = capture_frames(&session, &self.camera_backend, &self.clock)?;
            info!("  Timelapse frame capture complete ({} frames).", frames);
            report.frames_captured = Some(frames);
        }

        if let Some(job) = job {
            info!("> Generating timelapse video from frames.");
            let video = stitch_frames(&job, &self.video_backend)?;
            info!(
                "  Timelapse video stitching complete: \"{}\".",
                video.display()
            );
            report.video = Some(video);
        }

        info!("> Timelapse processing complete.");
        Ok(report)
    }
}
