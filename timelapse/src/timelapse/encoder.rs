use crate::camera_api::Frame;
use log::{debug, info, warn};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};

pub type EncoderResult<T> = Result<T, EncoderError>;

#[derive(thiserror::Error, Debug)]
pub enum EncoderError {
    #[error("invalid video parameters: {0}")]
    InvalidSpec(String),

    #[error("could not start ffmpeg: {0}")]
    Spawn(std::io::Error),

    #[error("frame is {actual_width}x{actual_height} but the video is {width}x{height}")]
    FrameSize {
        width: u32,
        height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    #[error("frame is not a readable image: {0}")]
    Image(#[from] image::ImageError),

    #[error("video writer is already closed")]
    Closed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ffmpeg exited with {0}")]
    Exit(ExitStatus),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Codec {
    Mjpeg,
}

impl Codec {
    pub fn fourcc(&self) -> &'static str {
        match self {
            Codec::Mjpeg => "MJPG",
        }
    }

    /// Container extension used for videos of this codec.
    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Mjpeg => "avi",
        }
    }

    fn ffmpeg_name(&self) -> &'static str {
        match self {
            Codec::Mjpeg => "mjpeg",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VideoSpec {
    pub codec: Codec,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl VideoSpec {
    fn validate(&self) -> EncoderResult<()> {
        if self.fps == 0 {
            return Err(EncoderError::InvalidSpec("fps must be greater than 0".into()));
        }
        if self.width == 0 || self.height == 0 {
            return Err(EncoderError::InvalidSpec(format!(
                "frame size {}x{} is empty",
                self.width, self.height
            )));
        }
        Ok(())
    }
}

/// An open video file. Dropping it closes the file.
pub trait VideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> EncoderResult<()>;

    /// Flushes and closes the video, reporting encoder failures.
    fn finish(self) -> EncoderResult<()>;
}

pub trait VideoBackend {
    type Writer: VideoWriter;

    fn create_writer(&self, path: &Path, spec: &VideoSpec) -> EncoderResult<Self::Writer>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct FfmpegVideoBackend;

impl VideoBackend for FfmpegVideoBackend {
    type Writer = FfmpegVideoWriter;

    fn create_writer(&self, path: &Path, spec: &VideoSpec) -> EncoderResult<FfmpegVideoWriter> {
        FfmpegVideoWriter::create(path, spec)
    }
}

/// Pipes JPEG frames into an `ffmpeg` process writing the video file.
pub struct FfmpegVideoWriter {
    path: PathBuf,
    spec: VideoSpec,
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    frames: u64,
}

impl FfmpegVideoWriter {
    pub fn create(path: &Path, spec: &VideoSpec) -> EncoderResult<Self> {
        spec.validate()?;
        let mut child = encode_command(path, spec)
            .spawn()
            .map_err(EncoderError::Spawn)?;
        let stdin = child.stdin.take();
        info!(
            "Started {} encoder for {} ({}x{} @ {} fps)",
            spec.codec.fourcc(),
            path.display(),
            spec.width,
            spec.height,
            spec.fps
        );
        Ok(Self {
            path: path.to_path_buf(),
            spec: *spec,
            child: Some(child),
            stdin,
            frames: 0,
        })
    }

    fn close(&mut self) -> EncoderResult<()> {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let status = child.wait()?;
            if !status.success() {
                return Err(EncoderError::Exit(status));
            }
            debug!("Wrote {} frames to {}", self.frames, self.path.display());
        }
        Ok(())
    }
}

impl VideoWriter for FfmpegVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> EncoderResult<()> {
        let (actual_width, actual_height) = frame.dimensions()?;
        if (actual_width, actual_height) != (self.spec.width, self.spec.height) {
            return Err(EncoderError::FrameSize {
                width: self.spec.width,
                height: self.spec.height,
                actual_width,
                actual_height,
            });
        }
        let stdin = self.stdin.as_mut().ok_or(EncoderError::Closed)?;
        stdin.write_all(frame.as_bytes())?;
        self.frames += 1;
        Ok(())
    }

    fn finish(mut self) -> EncoderResult<()> {
        self.close()
    }
}

impl Drop for FfmpegVideoWriter {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Error closing video writer for {}: {}", self.path.display(), e);
        }
    }
}

fn encode_command(path: &Path, spec: &VideoSpec) -> Command {
    let mut command = Command::new("ffmpeg");
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-y")
        .arg("-f")
        .arg("image2pipe")
        .arg("-framerate")
        .arg(spec.fps.to_string())
        .arg("-i")
        .arg("-")
        .arg("-c:v")
        .arg(spec.codec.ffmpeg_name())
        .arg("-q:v")
        .arg("2")
        .arg("-s")
        .arg(format!("{}x{}", spec.width, spec.height))
        .arg(path)
        .stdin(Stdio::piped())
        .stdout(Stdio::null());
    command
}
