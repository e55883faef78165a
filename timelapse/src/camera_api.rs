use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, info, warn};
use std::fs;
use std::io::{BufRead, BufReader, Cursor, ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStderr, ChildStdout, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

const DEVICE_PREFIX: &str = "/dev/video";
// webcams can take several seconds to deliver their first picture
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(5);
const STREAM_RATE: &str = "2";
const FRAME_QUEUE: usize = 2;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

pub type CameraResult<T> = Result<T, CameraError>;

#[derive(thiserror::Error, Debug)]
pub enum CameraError {
    #[error("camera device \"{}\" not found", .0.display())]
    DeviceNotFound(PathBuf),

    #[error("could not start ffmpeg: {0}")]
    Spawn(std::io::Error),

    #[error("camera device \"{}\" could not be opened: {reason}", device.display())]
    Open { device: PathBuf, reason: String },

    #[error("camera device \"{}\" stopped streaming", .0.display())]
    StreamEnded(PathBuf),
}

/// One encoded (JPEG) still image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
}

impl Frame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Width and height read from the image header.
    pub fn dimensions(&self) -> image::ImageResult<(u32, u32)> {
        image::ImageReader::new(Cursor::new(&self.data))
            .with_guessed_format()?
            .into_dimensions()
    }
}

/// An open capture device, held until dropped.
pub trait Camera {
    /// Requests a capture size. Sizes the device rejects fall back to the
    /// format it negotiates on its own.
    fn set_resolution(&mut self, width: u32, height: u32) -> CameraResult<()>;

    /// Grabs one frame. `Ok(None)` means this read failed and may be retried,
    /// an error means the device is gone.
    fn read_frame(&mut self) -> CameraResult<Option<Frame>>;
}

pub trait CameraBackend {
    type Camera: Camera;

    fn open(&self, device_id: u32) -> CameraResult<Self::Camera>;
}

/// Opens V4L2 devices through a long-running `ffmpeg` process.
#[derive(Clone, Debug)]
pub struct FfmpegCameraBackend {
    program: PathBuf,
}

impl Default for FfmpegCameraBackend {
    fn default() -> Self {
        Self::with_program("ffmpeg")
    }
}

impl FfmpegCameraBackend {
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl CameraBackend for FfmpegCameraBackend {
    type Camera = FfmpegCamera;

    fn open(&self, device_id: u32) -> CameraResult<FfmpegCamera> {
        let device = PathBuf::from(format!("{}{}", DEVICE_PREFIX, device_id));
        FfmpegCamera::open(&device, &self.program)
    }
}

pub struct FfmpegCamera {
    device: PathBuf,
    program: PathBuf,
    stream: Option<FrameStream>,
}

impl FfmpegCamera {
    /// Starts streaming from `device` and waits for its first frame, so a
    /// busy or unreadable device fails here rather than on every read.
    pub fn open(device: &Path, program: &Path) -> CameraResult<Self> {
        if !device.exists() {
            return Err(CameraError::DeviceNotFound(device.to_path_buf()));
        }
        let mut camera = Self {
            device: device.to_path_buf(),
            program: program.to_path_buf(),
            stream: None,
        };
        camera.stream = Some(camera.start_stream(None)?);
        info!("Opened camera device {}", device.display());
        Ok(camera)
    }

    fn start_stream(&self, size: Option<(u32, u32)>) -> CameraResult<FrameStream> {
        let mut stream = FrameStream::start(stream_command(&self.program, &self.device, size))?;
        stream.wait_for_first_frame(&self.device)?;
        Ok(stream)
    }
}

impl Camera for FfmpegCamera {
    fn set_resolution(&mut self, width: u32, height: u32) -> CameraResult<()> {
        // the device has to be released before it can be reopened at another size
        self.stream = None;
        match self.start_stream(Some((width, height))) {
            Ok(stream) => {
                info!("Capturing at {}x{}", width, height);
                self.stream = Some(stream);
            }
            Err(e) => {
                warn!(
                    "Camera rejected {}x{} ({}), keeping its default format",
                    width, height, e
                );
                self.stream = Some(self.start_stream(None)?);
            }
        }
        Ok(())
    }

    fn read_frame(&mut self) -> CameraResult<Option<Frame>> {
        let stream = match &self.stream {
            Some(stream) => stream,
            None => return Err(CameraError::StreamEnded(self.device.clone())),
        };
        // frames queued before this call are stale
        while stream.frames.try_recv().is_ok() {}
        match stream.frames.recv_timeout(READ_TIMEOUT) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CameraError::StreamEnded(self.device.clone()))
            }
        }
    }
}

impl Drop for FfmpegCamera {
    fn drop(&mut self) {
        self.stream = None;
        debug!("Closed camera device {}", self.device.display());
    }
}

/// A running ffmpeg child and the threads draining its output.
struct FrameStream {
    child: Child,
    frames: Receiver<Frame>,
    readers: Vec<JoinHandle<()>>,
}

impl FrameStream {
    fn start(mut command: Command) -> CameraResult<Self> {
        let mut child = command.spawn().map_err(CameraError::Spawn)?;
        let (sender, frames) = bounded(FRAME_QUEUE);
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(std::thread::spawn(move || read_frames(stdout, sender)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(std::thread::spawn(move || log_stderr(stderr)));
        }
        Ok(Self {
            child,
            frames,
            readers,
        })
    }

    fn wait_for_first_frame(&mut self, device: &Path) -> CameraResult<()> {
        let reason = match self.frames.recv_timeout(STARTUP_TIMEOUT) {
            Ok(_) => return Ok(()),
            Err(RecvTimeoutError::Timeout) => {
                format!("no frame within {:?}", STARTUP_TIMEOUT)
            }
            Err(RecvTimeoutError::Disconnected) => match self.child.wait() {
                Ok(status) => format!("ffmpeg exited with {}", status),
                Err(e) => format!("ffmpeg stopped: {}", e),
            },
        };
        Err(CameraError::Open {
            device: device.to_path_buf(),
            reason,
        })
    }
}

impl Drop for FrameStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        for reader in self.readers.drain(..) {
            let _ = reader.join();
        }
    }
}

fn stream_command(program: &Path, device: &Path, size: Option<(u32, u32)>) -> Command {
    let mut command = Command::new(program);
    command
        .arg("-hide_banner")
        .arg("-loglevel")
        .arg("error")
        .arg("-f")
        .arg("v4l2");
    if let Some((width, height)) = size {
        command
            .arg("-video_size")
            .arg(format!("{}x{}", width, height));
    }
    command
        .arg("-i")
        .arg(device)
        .arg("-r")
        .arg(STREAM_RATE)
        .arg("-f")
        .arg("image2pipe")
        .arg("-c:v")
        .arg("mjpeg")
        .arg("-q:v")
        .arg("2")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    command
}

fn read_frames(mut stdout: ChildStdout, sender: Sender<Frame>) {
    let mut splitter = JpegSplitter::default();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = match stdout.read(&mut chunk) {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => return,
        };
        for frame in splitter.push(&chunk[..n]) {
            // a full queue only holds older frames, so dropping this one is fine
            if let Err(TrySendError::Disconnected(_)) = sender.try_send(frame) {
                return;
            }
        }
    }
}

fn log_stderr(stderr: ChildStderr) {
    for line in BufReader::new(stderr).lines() {
        match line {
            Ok(line) if !line.trim().is_empty() => warn!("ffmpeg: {}", line.trim()),
            Ok(_) => {}
            Err(_) => return,
        }
    }
}

/// Cuts a concatenated MJPEG byte stream into single JPEG images.
#[derive(Debug, Default)]
struct JpegSplitter {
    buf: Vec<u8>,
    scanned: usize,
}

impl JpegSplitter {
    fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        loop {
            match find_marker(&self.buf, SOI) {
                Some(0) => {}
                Some(start) => {
                    self.buf.drain(..start);
                    self.scanned = 0;
                }
                None => {
                    // a trailing 0xFF may be the first half of the next marker
                    let keep = usize::from(self.buf.last() == Some(&0xFF));
                    let len = self.buf.len();
                    self.buf.drain(..len - keep);
                    self.scanned = 0;
                    break;
                }
            }
            let from = self.scanned.max(SOI.len());
            match find_marker(&self.buf[from..], EOI) {
                Some(pos) => {
                    let end = from + pos + EOI.len();
                    frames.push(Frame::new(self.buf.drain(..end).collect()));
                    self.scanned = 0;
                }
                None => {
                    self.scanned = self.buf.len().saturating_sub(1).max(SOI.len());
                    break;
                }
            }
        }
        frames
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

pub fn write_image(path: &Path, frame: &Frame) -> std::io::Result<()> {
    fs::write(path, frame.as_bytes())
}

pub fn read_image(path: &Path) -> std::io::Result<Frame> {
    fs::read(path).map(Frame::new)
}
