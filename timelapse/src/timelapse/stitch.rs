use super::capture::IMAGE_FORMAT;
use super::encoder::{Codec, VideoBackend, VideoSpec, VideoWriter};
use crate::camera_api::read_image;
use crate::error::{Result, TimelapseError};
use log::{debug, info};
use std::ffi::OsStr;
use std::fs;
use std::num::NonZeroU32;
use std::path::{Component, Path, PathBuf};

pub const VIDEO_CODEC: Codec = Codec::Mjpeg;

#[derive(Clone, Debug, PartialEq)]
pub struct StitchJob {
    frame_dir: PathBuf,
    fps: NonZeroU32,
    frame_step: NonZeroU32,
}

impl StitchJob {
    pub fn new(frame_dir: impl Into<PathBuf>, fps: u32, frame_step: u32) -> Result<Self> {
        let fps = NonZeroU32::new(fps).ok_or(TimelapseError::ZeroFps)?;
        let frame_step = NonZeroU32::new(frame_step).ok_or(TimelapseError::ZeroFrameStep)?;
        Ok(Self {
            frame_dir: frame_dir.into(),
            fps,
            frame_step,
        })
    }

    pub fn video_file_name(&self) -> String {
        video_file_name(self.fps.get(), self.frame_step.get())
    }

    /// The video goes one level above the frame directory.
    pub fn output_path(&self) -> PathBuf {
        output_dir(&self.frame_dir).join(self.video_file_name())
    }
}

pub fn video_file_name(fps: u32, frame_step: u32) -> String {
    format!(
        "fps-{}_step-{}_timelapse.{}",
        fps,
        frame_step,
        VIDEO_CODEC.extension()
    )
}

fn output_dir(frame_dir: &Path) -> PathBuf {
    match frame_dir.components().next_back() {
        Some(Component::Normal(_)) => match frame_dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        },
        _ => frame_dir.join(".."),
    }
}

/// Lists the frame images of `dir` in capture order.
///
/// Frames are sorted by the Unix timestamp in their name rather than
/// lexically, so names of differing digit counts still come out in order.
/// Names that are not timestamps sort after all timestamped ones.
pub fn list_frames(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir_err = |source: std::io::Error| TimelapseError::ReadDir {
        path: dir.to_path_buf(),
        source,
    };
    let mut frames = Vec::new();
    for entry in fs::read_dir(dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        if entry.file_type().map_err(read_dir_err)?.is_dir() {
            continue;
        }
        let path = entry.path();
        if path.extension() != Some(OsStr::new(IMAGE_FORMAT)) {
            continue;
        }
        frames.push(path);
    }
    frames.sort_by_cached_key(|path| frame_sort_key(path));
    Ok(frames)
}

fn frame_sort_key(path: &Path) -> (bool, Option<u64>, String) {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let timestamp = stem.parse::<u64>().ok();
    (timestamp.is_none(), timestamp, stem)
}

/// Keeps every `frame_step`-th frame counting from one, so the first kept
/// frame is the `frame_step`-th scanned.
pub fn select_frames<T>(frames: &[T], frame_step: NonZeroU32) -> impl Iterator<Item = &T> {
    let step = frame_step.get() as usize;
    frames.iter().skip(step - 1).step_by(step)
}

/// Stitches the frames of the job's directory into a video file and returns
/// the video's path.
pub fn stitch_frames<B: VideoBackend>(job: &StitchJob, backend: &B) -> Result<PathBuf> {
    let frames = list_frames(&job.frame_dir)?;
    if frames.len() < 2 {
        return Err(TimelapseError::NotEnoughFrames(frames.len()));
    }

    // the first frame fixes the video dimensions
    let first = &frames[0];
    let (width, height) = read_image(first)
        .map_err(|source| TimelapseError::ReadImage {
            path: first.clone(),
            source,
        })?
        .dimensions()
        .map_err(|source| TimelapseError::ImageDimensions {
            path: first.clone(),
            source,
        })?;

    let path = job.output_path();
    let spec = VideoSpec {
        codec: VIDEO_CODEC,
        fps: job.fps.get(),
        width,
        height,
    };
    let mut writer = backend
        .create_writer(&path, &spec)
        .map_err(|source| TimelapseError::CreateWriter {
            path: path.clone(),
            source,
        })?;
    info!(
        "  Timelapse video will be named \"{}\".",
        job.video_file_name()
    );

    let mut written = 0;
    for frame_path in select_frames(&frames, job.frame_step) {
        let frame = read_image(frame_path).map_err(|source| TimelapseError::ReadImage {
            path: frame_path.clone(),
            source,
        })?;
        writer
            .write_frame(&frame)
            .map_err(|source| TimelapseError::WriteFrame {
                path: frame_path.clone(),
                source,
            })?;
        written += 1;
    }
    writer
        .finish()
        .map_err(|source| TimelapseError::FinishWriter {
            path: path.clone(),
            source,
        })?;
    debug!(
        "Stitched {} of {} frames into {}",
        written,
        frames.len(),
        path.display()
    );

    Ok(path)
}
