use crate::error::{Result, TimelapseError};
use crate::timelapse::capture::{CAM_HEIGHT, CAM_WIDTH};
use chrono::TimeDelta;
use clap::Parser;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_OUTPUT_ROOT: &str = "./timelapses";

#[derive(Parser, Clone, Debug)]
#[command(name = "timelapse")]
#[command(about = "Capture webcam frames at fixed intervals and stitch them into a timelapse video")]
#[command(version)]
pub struct Args {
    /// The cmd can be either "capture", "stitch" or "both".
    #[arg(long = "cmd", default_value = "both")]
    pub cmd: String,

    /// [capture] Recording camera device ID.
    #[arg(long = "cam_device_id", default_value_t = 0)]
    pub cam_device_id: u32,

    /// [capture] Total duration of time to record a timelapse for (e.g. 1h30m).
    #[arg(long = "duration", default_value = "1h", value_parser = parse_duration, allow_hyphen_values = true)]
    pub duration: TimeDelta,

    /// [capture] Time interval between the capture of each frame.
    #[arg(long = "interval", default_value = "1m", value_parser = parse_duration, allow_hyphen_values = true)]
    pub interval: TimeDelta,

    /// [capture] Requested camera frame width.
    #[arg(long = "cam_width", default_value_t = CAM_WIDTH)]
    pub cam_width: u32,

    /// [capture] Requested camera frame height.
    #[arg(long = "cam_height", default_value_t = CAM_HEIGHT)]
    pub cam_height: u32,

    /// [stitch] Frame rate of the output timelapse video.
    #[arg(long = "fps", default_value_t = 25)]
    pub fps: u32,

    /// [stitch] The step by which to iterate over frames to be stitched/excluded.
    #[arg(long = "frame_step", default_value_t = 1)]
    pub frame_step: u32,

    /// [stitch] The path to the directory containing frames to stitch. Ignored if cmd is not "stitch".
    #[arg(long = "stitch_dir")]
    pub stitch_dir: Option<PathBuf>,

    /// Directory holding one timestamped session directory per capture run.
    #[arg(long = "output_root", default_value = DEFAULT_OUTPUT_ROOT)]
    pub output_root: PathBuf,

    /// Also write rotating log files into this directory.
    #[arg(long = "log_dir")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Capture,
    Stitch,
    Both,
}

impl Mode {
    pub fn captures(&self) -> bool {
        matches!(self, Mode::Capture | Mode::Both)
    }

    pub fn stitches(&self) -> bool {
        matches!(self, Mode::Stitch | Mode::Both)
    }
}

impl FromStr for Mode {
    type Err = TimelapseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "capture" => Ok(Mode::Capture),
            "stitch" => Ok(Mode::Stitch),
            "both" => Ok(Mode::Both),
            other => Err(TimelapseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Capture => "capture",
            Mode::Stitch => "stitch",
            Mode::Both => "both",
        };
        f.write_str(name)
    }
}

/// Validated run parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Settings {
    pub mode: Mode,
    pub device_id: u32,
    /// Signed as given; negative values are rejected by the capture stage.
    pub duration: TimeDelta,
    pub interval: TimeDelta,
    pub cam_width: u32,
    pub cam_height: u32,
    pub fps: u32,
    pub frame_step: u32,
    pub stitch_dir: Option<PathBuf>,
    pub output_root: PathBuf,
}

impl Args {
    pub fn validate(&self) -> Result<Settings> {
        if self.frame_step == 0 {
            return Err(TimelapseError::ZeroFrameStep);
        }
        if self.fps == 0 {
            return Err(TimelapseError::ZeroFps);
        }
        let mode: Mode = self.cmd.parse()?;
        let stitch_dir = match mode {
            Mode::Stitch => match &self.stitch_dir {
                Some(dir) if !dir.as_os_str().is_empty() => Some(dir.clone()),
                _ => return Err(TimelapseError::MissingStitchDir),
            },
            _ => None,
        };
        Ok(Settings {
            mode,
            device_id: self.cam_device_id,
            duration: self.duration,
            interval: self.interval,
            cam_width: self.cam_width,
            cam_height: self.cam_height,
            fps: self.fps,
            frame_step: self.frame_step,
            stitch_dir,
            output_root: self.output_root.clone(),
        })
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ParseDurationError {
    #[error("empty duration")]
    Empty,

    #[error("invalid duration \"{0}\"")]
    Invalid(String),

    #[error("missing unit in duration \"{0}\"")]
    MissingUnit(String),

    #[error("unknown unit \"{unit}\" in duration \"{input}\"")]
    UnknownUnit { unit: String, input: String },

    #[error("duration \"{0}\" is out of range")]
    Overflow(String),
}

/// Parses durations written like `1h`, `1m30s`, `1.5s` or `250ms`.
///
/// Accepted units are `ns`, `us` (`µs`), `ms`, `s`, `m` and `h`. A bare `0`
/// is the only value allowed without a unit. A leading `-` or `+` applies to
/// the whole value, so `-1m30s` is minus ninety seconds.
pub fn parse_duration(input: &str) -> std::result::Result<TimeDelta, ParseDurationError> {
    let input = input.trim();
    let (negative, body) = match input.strip_prefix('-') {
        Some(body) => (true, body),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if body.is_empty() {
        return Err(ParseDurationError::Empty);
    }
    if body == "0" {
        return Ok(TimeDelta::zero());
    }

    let is_number = |c: char| c.is_ascii_digit() || c == '.';
    let mut nanos: f64 = 0.0;
    let mut rest = body;
    while !rest.is_empty() {
        let (number, tail) = rest.split_at(rest.find(|c: char| !is_number(c)).unwrap_or(rest.len()));
        let (unit, tail) = tail.split_at(tail.find(is_number).unwrap_or(tail.len()));

        let value: f64 = number
            .parse()
            .map_err(|_| ParseDurationError::Invalid(input.to_string()))?;
        let scale = match unit {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            "" => return Err(ParseDurationError::MissingUnit(input.to_string())),
            other => {
                return Err(ParseDurationError::UnknownUnit {
                    unit: other.to_string(),
                    input: input.to_string(),
                })
            }
        };
        nanos += value * scale;
        rest = tail;
    }

    if !nanos.is_finite() || nanos >= i64::MAX as f64 {
        return Err(ParseDurationError::Overflow(input.to_string()));
    }
    let nanos = nanos.round() as i64;
    Ok(TimeDelta::nanoseconds(if negative { -nanos } else { nanos }))
}
