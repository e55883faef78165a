use super::clock::Clock;
use crate::camera_api::{write_image, Camera, CameraBackend};
use crate::error::{Result, TimelapseError};
use chrono::{Local, TimeDelta};
use log::{debug, info, warn};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub const IMAGE_FORMAT: &str = "jpg";
pub const CAM_WIDTH: u32 = 1920;
pub const CAM_HEIGHT: u32 = 1080;
/// Pause after a failed read. Not counted as capture time.
pub const READ_RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq)]
pub struct CaptureSession {
    device_id: u32,
    duration: Duration,
    interval: Duration,
    frame_dir: PathBuf,
    width: u32,
    height: u32,
}

impl CaptureSession {
    pub fn new(
        device_id: u32,
        duration: Duration,
        interval: Duration,
        frame_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        if duration.is_zero() || interval.is_zero() {
            return Err(TimelapseError::ZeroDuration);
        }
        if duration <= interval {
            return Err(TimelapseError::DurationNotAboveInterval { duration, interval });
        }
        Ok(Self {
            device_id,
            duration,
            interval,
            frame_dir: frame_dir.into(),
            width: CAM_WIDTH,
            height: CAM_HEIGHT,
        })
    }

    /// Like [`CaptureSession::new`] for durations that may come in negative
    /// from the command line.
    pub fn from_signed(
        device_id: u32,
        duration: TimeDelta,
        interval: TimeDelta,
        frame_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        match (duration.to_std(), interval.to_std()) {
            (Ok(d), Ok(i)) => Self::new(device_id, d, i, frame_dir),
            _ => Err(TimelapseError::NegativeDuration { duration, interval }),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Number of frames a run is expected to produce, counting the 0th frame.
    /// Only reported to the operator; the loop stops on elapsed time.
    pub fn frame_count(&self) -> u128 {
        self.duration.as_nanos() / self.interval.as_nanos() + 1
    }

    /// File names only resolve whole seconds.
    pub fn frames_may_share_names(&self) -> bool {
        self.interval < Duration::from_secs(1)
    }
}

pub fn frame_file_name(unix_seconds: i64) -> String {
    format!("{}.{}", unix_seconds, IMAGE_FORMAT)
}

/// Captures frames at fixed intervals until `duration` has elapsed and stores
/// them in the session's frame directory. Returns the number of frames written.
pub fn capture_frames<B, C>(session: &CaptureSession, backend: &B, clock: &C) -> Result<usize>
where
    B: CameraBackend,
    C: Clock,
{
    info!(
        "  A total of {} frames will be captured over a period of {:?}.",
        session.frame_count(),
        session.duration
    );
    if let Ok(duration) = chrono::Duration::from_std(session.duration) {
        if let Some(end) = clock.now().checked_add_signed(duration) {
            info!(
                "  Estimated completion date is {}.",
                end.with_timezone(&Local).to_rfc2822()
            );
        }
    }

    if session.frames_may_share_names() {
        warn!(
            "  Interval {:?} is below one second, frames taken within the same second overwrite each other.",
            session.interval
        );
    }

    let mut camera = backend.open(session.device_id)?;
    camera.set_resolution(session.width, session.height)?;

    info!(
        "  Writing frames to \"{}\" directory.",
        session.frame_dir.display()
    );
    fs::create_dir_all(&session.frame_dir).map_err(|source| TimelapseError::CreateFrameDir {
        path: session.frame_dir.clone(),
        source,
    })?;

    let mut elapsed = Duration::ZERO;
    let mut written = 0;
    let mut failed_reads = 0u32;
    loop {
        let frame = match camera.read_frame().map_err(TimelapseError::CameraRead)? {
            Some(frame) if !frame.is_empty() => frame,
            Some(_) => {
                debug!("Empty frame from device {}", session.device_id);
                clock.sleep(READ_RETRY_DELAY);
                continue;
            }
            None => {
                failed_reads += 1;
                if failed_reads == 1 {
                    warn!("cannot read from device {}", session.device_id);
                } else {
                    debug!(
                        "cannot read from device {} ({} attempts)",
                        session.device_id, failed_reads
                    );
                }
                clock.sleep(READ_RETRY_DELAY);
                continue;
            }
        };
        if failed_reads > 1 {
            info!(
                "Device {} readable again after {} failed reads",
                session.device_id, failed_reads
            );
        }
        failed_reads = 0;

        // frames stay on disk so they can be restitched with other parameters later
        let path = session
            .frame_dir
            .join(frame_file_name(clock.now().timestamp()));
        write_image(&path, &frame)
            .map_err(|source| TimelapseError::WriteImage { path: path.clone(), source })?;
        written += 1;
        debug!("Wrote frame {}", path.display());

        if elapsed >= session.duration {
            break;
        }
        clock.sleep(session.interval);
        elapsed += session.interval;
    }

    Ok(written)
}
