#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::cell::{Cell, RefCell};
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use timelapse::camera_api::{Camera, CameraBackend, CameraError, CameraResult, Frame};
use timelapse::timelapse::clock::Clock;
use timelapse::timelapse::encoder::{
    EncoderError, EncoderResult, VideoBackend, VideoSpec, VideoWriter,
};

pub const START: i64 = 1_700_000_000;

/// Clock whose sleeps only move `now` forward.
pub struct FakeClock {
    now: Cell<DateTime<Utc>>,
    pub sleeps: RefCell<Vec<Duration>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            now: Cell::new(Utc.timestamp_opt(START, 0).unwrap()),
            sleeps: RefCell::new(Vec::new()),
        }
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.get()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.borrow_mut().push(duration);
        let step = chrono::Duration::from_std(duration).unwrap();
        self.now.set(self.now.get() + step);
    }
}

pub fn jpeg(width: u32, height: u32, shade: u8) -> Frame {
    let mut buf = Cursor::new(Vec::new());
    image::RgbImage::from_pixel(width, height, image::Rgb([shade, shade, shade]))
        .write_to(&mut buf, image::ImageFormat::Jpeg)
        .unwrap();
    Frame::new(buf.into_inner())
}

#[derive(Default)]
pub struct CameraState {
    pub opened: Cell<bool>,
    pub closed: Cell<bool>,
    pub reads: Cell<usize>,
    pub resolution: Cell<Option<(u32, u32)>>,
}

/// Camera backend failing the reads listed in `failed_reads` (0-based). From
/// read `stream_ends_at` on, the device is gone.
#[derive(Default)]
pub struct FakeCameraBackend {
    pub fail_open: bool,
    pub failed_reads: Vec<usize>,
    pub stream_ends_at: Option<usize>,
    pub state: Rc<CameraState>,
}

pub struct FakeCamera {
    failed_reads: Vec<usize>,
    stream_ends_at: Option<usize>,
    state: Rc<CameraState>,
    frame: Frame,
}

impl CameraBackend for FakeCameraBackend {
    type Camera = FakeCamera;

    fn open(&self, device_id: u32) -> CameraResult<FakeCamera> {
        if self.fail_open {
            return Err(CameraError::DeviceNotFound(PathBuf::from(format!(
                "/dev/video{}",
                device_id
            ))));
        }
        self.state.opened.set(true);
        Ok(FakeCamera {
            failed_reads: self.failed_reads.clone(),
            stream_ends_at: self.stream_ends_at,
            state: self.state.clone(),
            frame: jpeg(8, 6, 128),
        })
    }
}

impl Camera for FakeCamera {
    fn set_resolution(&mut self, width: u32, height: u32) -> CameraResult<()> {
        self.state.resolution.set(Some((width, height)));
        Ok(())
    }

    fn read_frame(&mut self) -> CameraResult<Option<Frame>> {
        let read = self.state.reads.get();
        self.state.reads.set(read + 1);
        if self.stream_ends_at.is_some_and(|end| read >= end) {
            return Err(CameraError::StreamEnded(PathBuf::from("/dev/video0")));
        }
        if self.failed_reads.contains(&read) {
            Ok(None)
        } else {
            Ok(Some(self.frame.clone()))
        }
    }
}

impl Drop for FakeCamera {
    fn drop(&mut self) {
        self.state.closed.set(true);
    }
}

#[derive(Default)]
pub struct VideoState {
    pub created: RefCell<Option<(PathBuf, VideoSpec)>>,
    pub frames: RefCell<Vec<Frame>>,
    pub finished: Cell<bool>,
    pub closed: Cell<bool>,
}

/// Video backend recording every frame; fails the write at `fail_on_frame`.
#[derive(Default)]
pub struct FakeVideoBackend {
    pub fail_on_frame: Option<usize>,
    pub state: Rc<VideoState>,
}

pub struct FakeVideoWriter {
    fail_on_frame: Option<usize>,
    state: Rc<VideoState>,
}

impl VideoBackend for FakeVideoBackend {
    type Writer = FakeVideoWriter;

    fn create_writer(&self, path: &Path, spec: &VideoSpec) -> EncoderResult<FakeVideoWriter> {
        fs::write(path, b"")?;
        *self.state.created.borrow_mut() = Some((path.to_path_buf(), *spec));
        Ok(FakeVideoWriter {
            fail_on_frame: self.fail_on_frame,
            state: self.state.clone(),
        })
    }
}

impl VideoWriter for FakeVideoWriter {
    fn write_frame(&mut self, frame: &Frame) -> EncoderResult<()> {
        if self.fail_on_frame == Some(self.state.frames.borrow().len()) {
            return Err(EncoderError::Closed);
        }
        self.state.frames.borrow_mut().push(frame.clone());
        Ok(())
    }

    fn finish(self) -> EncoderResult<()> {
        self.state.finished.set(true);
        Ok(())
    }
}

impl Drop for FakeVideoWriter {
    fn drop(&mut self) {
        self.state.closed.set(true);
    }
}

pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}
