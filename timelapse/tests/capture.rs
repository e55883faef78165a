mod common;

use common::{file_names, FakeCameraBackend, FakeClock, START};
use std::fs;
use std::time::Duration;
use timelapse::timelapse::capture::{
    capture_frames, frame_file_name, CaptureSession, READ_RETRY_DELAY,
};
use timelapse::TimelapseError;

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n * 60)
}

#[test]
fn five_minutes_every_minute_writes_six_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let frame_dir = tmp.path().join("session").join("frames");
    let session = CaptureSession::new(0, minutes(5), minutes(1), &frame_dir).unwrap();
    let backend = FakeCameraBackend::default();
    let clock = FakeClock::new();

    let written = capture_frames(&session, &backend, &clock).unwrap();

    assert_eq!(written, 6);
    let expected: Vec<String> = (0..6).map(|i| frame_file_name(START + i * 60)).collect();
    assert_eq!(file_names(&frame_dir), expected);
    assert_eq!(*clock.sleeps.borrow(), vec![minutes(1); 5]);
    assert_eq!(backend.state.resolution.get(), Some((1920, 1080)));
    assert!(backend.state.closed.get());
}

#[test]
fn uneven_interval_stops_once_elapsed_reaches_duration() {
    let tmp = tempfile::tempdir().unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(2), tmp.path()).unwrap();
    let clock = FakeClock::new();

    let written = capture_frames(&session, &FakeCameraBackend::default(), &clock).unwrap();

    // frames at 0, 2, 4 and 6 minutes
    assert_eq!(written, 4);
    assert_eq!(clock.sleeps.borrow().len(), 3);
}

#[test]
fn transient_read_failures_are_retried() {
    let tmp = tempfile::tempdir().unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(1), tmp.path())
        .unwrap()
        .with_resolution(640, 480);
    let backend = FakeCameraBackend {
        failed_reads: vec![0, 2, 3],
        ..Default::default()
    };
    let clock = FakeClock::new();

    let written = capture_frames(&session, &backend, &clock).unwrap();

    assert_eq!(written, 6);
    assert_eq!(backend.state.reads.get(), 9);
    assert_eq!(
        *clock.sleeps.borrow(),
        vec![
            READ_RETRY_DELAY,
            minutes(1),
            READ_RETRY_DELAY,
            READ_RETRY_DELAY,
            minutes(1),
            minutes(1),
            minutes(1),
            minutes(1),
        ]
    );
    assert_eq!(file_names(tmp.path()).len(), 6);
    assert_eq!(backend.state.resolution.get(), Some((640, 480)));
}

#[test]
fn long_read_outage_backs_off_without_eating_capture_time() {
    let tmp = tempfile::tempdir().unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(1), tmp.path()).unwrap();
    let backend = FakeCameraBackend {
        failed_reads: (0..40).collect(),
        ..Default::default()
    };
    let clock = FakeClock::new();

    let written = capture_frames(&session, &backend, &clock).unwrap();

    assert_eq!(written, 6);
    assert_eq!(backend.state.reads.get(), 46);
    let sleeps = clock.sleeps.borrow();
    assert_eq!(sleeps.iter().filter(|s| **s == READ_RETRY_DELAY).count(), 40);
    assert_eq!(sleeps.iter().filter(|s| **s == minutes(1)).count(), 5);
    // 40 retries of half a second before the first frame
    let first = START + 20;
    let expected: Vec<String> = (0..6).map(|i| frame_file_name(first + i * 60)).collect();
    assert_eq!(file_names(tmp.path()), expected);
}

#[test]
fn lost_device_is_fatal_and_keeps_written_frames() {
    let tmp = tempfile::tempdir().unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(1), tmp.path()).unwrap();
    let backend = FakeCameraBackend {
        stream_ends_at: Some(3),
        ..Default::default()
    };

    let err = capture_frames(&session, &backend, &FakeClock::new()).unwrap_err();

    assert!(matches!(err, TimelapseError::CameraRead(_)));
    assert_eq!(file_names(tmp.path()).len(), 3);
    assert!(backend.state.closed.get());
}

#[test]
fn camera_open_failure_is_fatal_and_writes_nothing() {
    let tmp = tempfile::tempdir().unwrap();
    let frame_dir = tmp.path().join("frames");
    let session = CaptureSession::new(3, minutes(5), minutes(1), &frame_dir).unwrap();
    let backend = FakeCameraBackend {
        fail_open: true,
        ..Default::default()
    };

    let err = capture_frames(&session, &backend, &FakeClock::new()).unwrap_err();

    assert!(matches!(err, TimelapseError::Camera(_)));
    assert!(!frame_dir.exists());
}

#[test]
fn image_write_failure_aborts_and_releases_the_camera() {
    let tmp = tempfile::tempdir().unwrap();
    // a directory squatting on the first frame's name makes the write fail
    fs::create_dir(tmp.path().join(frame_file_name(START))).unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(1), tmp.path()).unwrap();
    let backend = FakeCameraBackend::default();
    let clock = FakeClock::new();

    let err = capture_frames(&session, &backend, &clock).unwrap_err();

    assert!(matches!(err, TimelapseError::WriteImage { .. }));
    assert!(clock.sleeps.borrow().is_empty());
    assert!(backend.state.closed.get());
}

#[test]
fn frame_dir_creation_failure_is_fatal() {
    let tmp = tempfile::tempdir().unwrap();
    let blocker = tmp.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();
    let session = CaptureSession::new(0, minutes(5), minutes(1), blocker.join("frames")).unwrap();
    let backend = FakeCameraBackend::default();

    let err = capture_frames(&session, &backend, &FakeClock::new()).unwrap_err();

    assert!(matches!(err, TimelapseError::CreateFrameDir { .. }));
    assert!(backend.state.closed.get());
}
