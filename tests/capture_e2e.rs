//! End-to-end capture through the synthetic platform.

use multicam::capture::{CameraError, CameraState, CaptureConfig, FileConfig, RuntimeConfig};
use multicam::coordinator::{
    CaptureCoordinator, ChannelPublisher, CoordinatorError, Phase, PublishedFrame,
};
use multicam::platform::{Facing, HostAllocator, SyntheticCamera, SyntheticPlatform, TestPattern};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const WIDTH: u32 = 32;
const HEIGHT: u32 = 24;
const FPS: u32 = 30;
const FRAMES: u64 = 100;

fn camera_configs() -> Vec<CaptureConfig> {
    vec![
        CaptureConfig::rear().with_dimensions(WIDTH, HEIGHT).with_fps(FPS),
        CaptureConfig::front().with_dimensions(WIDTH, HEIGHT).with_fps(FPS),
    ]
}

fn file_config() -> FileConfig {
    FileConfig {
        cameras: camera_configs(),
        runtime: RuntimeConfig::default(),
        ..FileConfig::default()
    }
}

/// Rear camera "0" mounted upright, front camera "1" mounted upside down.
fn sensors(allocator: &Arc<HostAllocator>, paced_frames: Option<u64>) -> Vec<SyntheticCamera> {
    [("0", Facing::Back, 0), ("1", Facing::Front, 180)]
        .into_iter()
        .map(|(id, facing, degrees)| {
            let camera = SyntheticCamera::new(id, facing, WIDTH, HEIGHT)
                .with_orientation(degrees)
                .with_pattern(TestPattern::Gradient);
            match paced_frames {
                Some(frames) => camera
                    .with_frame_limit(frames)
                    .paced_by(allocator.release_observer(id)),
                None => camera,
            }
        })
        .collect()
}

fn luma(x: u32, y: u32, frame: u64) -> u8 {
    ((u64::from(x) * 7 + u64::from(y) * 13) + frame) as u8
}

fn pixel(frame: &PublishedFrame, x: u32, y: u32) -> [u8; 3] {
    let i = ((y * frame.width + x) * 3) as usize;
    [frame.pixels[i], frame.pixels[i + 1], frame.pixels[i + 2]]
}

#[test]
fn test_two_cameras_deliver_every_frame_in_order() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, Some(FRAMES))));
    let (publisher, frames) = ChannelPublisher::unbounded();

    let mut coordinator = CaptureCoordinator::from_config(
        &file_config(),
        platform.clone(),
        allocator.clone(),
        Arc::new(publisher),
    )
    .unwrap();

    // Cancels once every camera has delivered all frames, then drains.
    let token = coordinator.cancellation_token();
    let collector = thread::spawn(move || {
        let mut by_camera: HashMap<String, Vec<PublishedFrame>> = HashMap::new();
        for frame in frames {
            by_camera.entry(frame.camera.clone()).or_default().push(frame);
            let done = by_camera.len() == 2
                && by_camera.values().all(|f| f.len() as u64 >= FRAMES);
            if done {
                token.cancel();
            }
        }
        by_camera
    });

    coordinator.init().unwrap();
    coordinator.open().unwrap();
    let report = coordinator.run().unwrap();
    assert_eq!(coordinator.phase(), Phase::Closed);
    drop(coordinator);

    let by_camera = collector.join().unwrap();
    let period = Duration::from_nanos(1_000_000_000 / u64::from(FPS));

    for name in ["rear", "front"] {
        let frames = &by_camera[name];
        assert_eq!(frames.len() as u64, FRAMES, "camera {name}");

        let ids: Vec<u64> = frames.iter().map(|f| f.metadata.frame_id).collect();
        assert_eq!(ids, (0..FRAMES).collect::<Vec<_>>(), "camera {name}");
        assert!(
            frames
                .windows(2)
                .all(|w| w[0].metadata.timestamp_ns < w[1].metadata.timestamp_ns),
            "camera {name} timestamps not increasing"
        );

        let camera = report.camera(name).unwrap();
        assert_eq!(camera.published, FRAMES);
        assert_eq!(camera.consumed, FRAMES);
        assert_eq!(camera.skipped, 0);
        assert_eq!(camera.dropped, 0);
        let latency = camera.stop_latency().unwrap();
        assert!(latency < period, "camera {name} stopped after {latency:?}");
    }

    // Upright sensor: pixels pass straight through.
    let rear = &by_camera["rear"][5];
    assert_eq!((rear.width, rear.height), (WIDTH, HEIGHT));
    for (x, y) in [(0, 0), (3, 1), (WIDTH - 1, HEIGHT - 1)] {
        let expected = luma(x, y, 5);
        assert_eq!(pixel(rear, x, y), [expected; 3]);
    }

    // Upside-down sensor: the frame comes out rotated by 180 degrees.
    let front = &by_camera["front"][5];
    for (x, y) in [(0, 0), (3, 1), (WIDTH - 1, HEIGHT - 1)] {
        let expected = luma(WIDTH - 1 - x, HEIGHT - 1 - y, 5);
        assert_eq!(pixel(front, x, y), [expected; 3]);
    }

    assert_eq!(platform.live_objects(), 0);
}

#[test]
fn test_disconnect_stops_every_camera() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, None)));
    let (publisher, _frames) = ChannelPublisher::unbounded();

    let mut coordinator = CaptureCoordinator::from_config(
        &file_config(),
        platform.clone(),
        allocator,
        Arc::new(publisher),
    )
    .unwrap();
    coordinator.init().unwrap();
    coordinator.open().unwrap();

    let unplug = platform.clone();
    let unplugger = thread::spawn(move || {
        thread::sleep(Duration::from_millis(200));
        unplug.disconnect("1");
    });

    let err = coordinator.run().unwrap_err();
    unplugger.join().unwrap();

    match err {
        CoordinatorError::Camera { camera, source } => {
            assert_eq!(camera, "front");
            assert!(matches!(source, CameraError::Disconnected));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(coordinator.cancellation_token().is_cancelled());
    assert_eq!(
        coordinator.device("front").unwrap().state(),
        CameraState::Error
    );
    assert_eq!(
        coordinator.device("rear").unwrap().state(),
        CameraState::Closed
    );
    assert_eq!(platform.live_objects(), 0);
}

#[test]
fn test_open_failure_closes_opened_cameras() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, None)));
    platform.fail_operation_for("1", "create_session");

    let (publisher, _frames) = ChannelPublisher::unbounded();
    let mut coordinator = CaptureCoordinator::from_config(
        &file_config(),
        platform.clone(),
        allocator,
        Arc::new(publisher),
    )
    .unwrap();
    coordinator.init().unwrap();

    let err = coordinator.open().unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Camera { ref camera, .. } if camera == "front"
    ));
    assert_eq!(platform.live_objects(), 0);

    let rear_calls = platform.calls_for("0");
    let opened = rear_calls.iter().position(|c| c == "open_device").unwrap();
    let closed = rear_calls.iter().position(|c| c == "close_device").unwrap();
    assert!(opened < closed);

    coordinator.close();
    assert_eq!(coordinator.phase(), Phase::Closed);
    assert!(platform.calls().iter().any(|c| c.starts_with("release_enumeration")));
}

#[test]
fn test_run_requires_open() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, None)));
    let (publisher, _frames) = ChannelPublisher::unbounded();
    let mut coordinator = CaptureCoordinator::from_config(
        &file_config(),
        platform,
        allocator,
        Arc::new(publisher),
    )
    .unwrap();

    assert!(matches!(
        coordinator.run(),
        Err(CoordinatorError::InvalidPhase { operation: "run", .. })
    ));
    assert!(matches!(
        coordinator.open(),
        Err(CoordinatorError::InvalidPhase { operation: "open", .. })
    ));
}

#[test]
fn test_frame_limit_ends_run() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, Some(FRAMES))));
    let (publisher, _frames) = ChannelPublisher::unbounded();

    let mut config = file_config();
    config.runtime.frame_limit = Some(10);
    let mut coordinator =
        CaptureCoordinator::from_config(&config, platform.clone(), allocator, Arc::new(publisher))
            .unwrap();
    coordinator.init().unwrap();
    coordinator.open().unwrap();
    let report = coordinator.run().unwrap();

    for name in ["rear", "front"] {
        let camera = report.camera(name).unwrap();
        assert_eq!(camera.consumed, 10);
        assert_eq!(camera.published, 10);
    }
    assert!(coordinator.cancellation_token().is_cancelled());
    assert_eq!(platform.live_objects(), 0);
}

#[test]
fn test_frame_limit_counts_frames_the_publisher_dropped() {
    let allocator = Arc::new(HostAllocator::new());
    let platform = Arc::new(SyntheticPlatform::new(sensors(&allocator, Some(FRAMES))));
    // Nobody reads, so the channel is full after the first frame.
    let (publisher, _frames) = ChannelPublisher::bounded(1);

    let mut config = file_config();
    config.runtime.frame_limit = Some(10);
    let mut coordinator =
        CaptureCoordinator::from_config(&config, platform.clone(), allocator, Arc::new(publisher))
            .unwrap();
    coordinator.init().unwrap();
    coordinator.open().unwrap();
    let report = coordinator.run().unwrap();

    let mut published = 0;
    for name in ["rear", "front"] {
        let camera = report.camera(name).unwrap();
        assert_eq!(camera.consumed, 10, "camera {name}");
        published += camera.published;
    }
    assert_eq!(published, 1);
    assert_eq!(platform.live_objects(), 0);
}
