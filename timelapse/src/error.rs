use crate::camera_api::CameraError;
use crate::timelapse::encoder::EncoderError;
use chrono::TimeDelta;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, TimelapseError>;

#[derive(thiserror::Error, Debug)]
pub enum TimelapseError {
    #[error("frame_step must be greater than 0")]
    ZeroFrameStep,

    #[error("fps must be greater than 0")]
    ZeroFps,

    #[error("cmd must be either \"both\", \"capture\" or \"stitch\", got \"{0}\"")]
    UnknownCommand(String),

    #[error("stitch_dir must be set when cmd is \"stitch\"")]
    MissingStitchDir,

    #[error("duration and interval must be non-zero")]
    ZeroDuration,

    #[error("duration ({duration}) and interval ({interval}) must not be negative")]
    NegativeDuration {
        duration: TimeDelta,
        interval: TimeDelta,
    },

    #[error("timelapse duration ({duration:?}) must be greater than the interval ({interval:?})")]
    DurationNotAboveInterval {
        duration: Duration,
        interval: Duration,
    },

    #[error("failed to open video capture: {0}")]
    Camera(#[from] CameraError),

    #[error("cannot read from video capture: {0}")]
    CameraRead(CameraError),

    #[error("failed to create directory for timelapse images \"{}\": {source}", path.display())]
    CreateFrameDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write image to file \"{}\": {source}", path.display())]
    WriteImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("error collecting files in \"{}\" directory: {source}", path.display())]
    ReadDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("two or more image files are required to perform stitching, found {0}")]
    NotEnoughFrames(usize),

    #[error("error reading image file \"{}\": {source}", path.display())]
    ReadImage {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to determine dimensions of \"{}\": {source}", path.display())]
    ImageDimensions {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("error creating video writer for \"{}\": {source}", path.display())]
    CreateWriter { path: PathBuf, source: EncoderError },

    #[error("error writing image file \"{}\" to video: {source}", path.display())]
    WriteFrame { path: PathBuf, source: EncoderError },

    #[error("error finalizing video file \"{}\": {source}", path.display())]
    FinishWriter { path: PathBuf, source: EncoderError },
}

impl TimelapseError {
    /// Parameter errors caught before any device or filesystem access.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::ZeroFrameStep
                | Self::ZeroFps
                | Self::UnknownCommand(_)
                | Self::MissingStitchDir
                | Self::ZeroDuration
                | Self::NegativeDuration { .. }
                | Self::DurationNotAboveInterval { .. }
        )
    }
}
