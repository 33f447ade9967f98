mod common;

use alignview::{AlignConfig, WorkerEvent, WorkerHandle};
use approx::assert_abs_diff_eq;
use common::{
    connected_worker, next_frame, simulated_provider, test_config, wait_for, SERIAL,
};
use shared::camera_interface::simulated::SimulatedBeam;
use shared::camera_interface::CameraError;
use std::time::{Duration, Instant};

fn beam(center_x: f64, center_y: f64, sigma: f64) -> SimulatedBeam {
    SimulatedBeam {
        center_x,
        center_y,
        sigma,
        amplitude: 500.0,
        background: 5.0,
    }
}

#[test]
fn test_full_frame_centroid() {
    let provider = simulated_provider(1024, 1024, Some(beam(612.3, 405.7, 8.0)));
    let worker = connected_worker(provider, test_config());
    worker.start_streaming().unwrap();

    let frame = next_frame(&worker).expect("no frame processed");
    assert_eq!(frame.frame.dim(), (1024, 1024));
    assert!(frame.centroid.both_fits_converged());

    let (cx, cy) = frame.centroid.centroid;
    assert_abs_diff_eq!(cx, 612.3, epsilon = 0.1);
    assert_abs_diff_eq!(cy, 405.7, epsilon = 0.1);
    assert_abs_diff_eq!(frame.centroid.effective_x().width, 8.0, epsilon = 0.1);
    assert_abs_diff_eq!(frame.centroid.effective_y().width, 8.0, epsilon = 0.1);

    // Warm-started frames agree with the first one
    let second = next_frame(&worker).expect("no second frame");
    assert_abs_diff_eq!(second.centroid.centroid.0, cx, epsilon = 1e-3);
    assert_abs_diff_eq!(second.centroid.centroid.1, cy, epsilon = 1e-3);

    worker.shutdown();
}

#[test]
fn test_width_change_while_streaming() {
    let provider = simulated_provider(1024, 1024, Some(beam(300.0, 500.0, 20.0)));
    let worker = connected_worker(provider, test_config());
    worker.start_streaming().unwrap();
    next_frame(&worker).expect("no frame before the change");

    worker.change_parameter("width", 512usize).unwrap();

    let Some(WorkerEvent::OffsetRangeUpdated(range)) =
        wait_for(&worker, |e| matches!(e, WorkerEvent::OffsetRangeUpdated(_)))
    else {
        panic!("no offset range update");
    };
    assert_eq!(range.offset_x.value, 0);
    assert_eq!(range.offset_x.range.max, 512);
    assert_eq!(range.offset_y.range.max, 0);

    // Every frame after the update carries the narrowed geometry
    let frame = next_frame(&worker).expect("no frame after the change");
    assert_eq!(frame.frame.ncols(), 512);
    assert_eq!(frame.centroid.x.len(), 512);
    assert_eq!(frame.centroid.x_projection.len(), 512);
    assert_abs_diff_eq!(frame.centroid.centroid.0, 300.0, epsilon = 0.1);

    worker.shutdown();
}

#[test]
fn test_offset_moves_coordinates() {
    let provider = simulated_provider(512, 512, Some(beam(300.0, 200.0, 10.0)));
    let worker = connected_worker(provider, test_config());
    worker.change_parameter("width", 256usize).unwrap();
    worker.change_parameter("offsetX", 200usize).unwrap();

    let Some(WorkerEvent::ImageTransformUpdated(transform)) = wait_for(&worker, |e| {
        matches!(e, WorkerEvent::ImageTransformUpdated(t) if t.origin_x == 200)
    }) else {
        panic!("no transform update for the new offset");
    };
    assert_abs_diff_eq!(transform.index_to_x(0.0), 200.5, epsilon = 1e-12);

    worker.start_streaming().unwrap();
    let frame = next_frame(&worker).expect("no frame");
    assert_eq!(frame.transform.origin_x, 200);
    assert_abs_diff_eq!(frame.centroid.x[0], 200.5, epsilon = 1e-12);
    // Sensor position is preserved across the ROI shift
    assert_abs_diff_eq!(frame.centroid.centroid.0, 300.0, epsilon = 0.1);

    worker.shutdown();
}

#[test]
fn test_empty_frame_still_reported() {
    let provider = simulated_provider(128, 96, None);
    let worker = connected_worker(provider, test_config());
    worker.start_streaming().unwrap();

    let frame = next_frame(&worker).expect("empty frame was not reported");
    assert!(frame.centroid.fit_x.is_none());
    assert!(frame.centroid.fit_y.is_none());
    assert_eq!(
        frame.centroid.centroid,
        (frame.centroid.seed_x.center, frame.centroid.seed_y.center)
    );

    // The pipeline keeps running on fallback estimates
    next_frame(&worker).expect("stream stalled after a failed fit");
    worker.shutdown();
}

#[test]
fn test_slow_consumer_drops_frames() {
    let provider = simulated_provider(64, 64, Some(beam(32.0, 32.0, 4.0)));
    let config = AlignConfig {
        event_queue_depth: 2,
        ..test_config()
    };
    let worker = connected_worker(provider, config);
    worker.start_streaming().unwrap();

    // Capture keeps running while nobody reads
    std::thread::sleep(Duration::from_millis(400));
    let numbers: Vec<u64> = (0..4)
        .map(|_| {
            next_frame(&worker)
                .expect("stream stalled behind a full queue")
                .metadata
                .frame_number
        })
        .collect();
    assert!(numbers.windows(2).all(|w| w[1] > w[0]));
    assert!(numbers.windows(2).any(|w| w[1] - w[0] > 1));

    worker.shutdown();
}

#[test]
fn test_unknown_device_fails_to_connect() {
    let provider = simulated_provider(64, 64, None);
    let worker = WorkerHandle::spawn(provider, test_config()).unwrap();
    worker.connect("SIM-9999").unwrap();

    match wait_for(&worker, |e| {
        matches!(e, WorkerEvent::ConnectionFailed(_) | WorkerEvent::Connected(_))
    }) {
        Some(WorkerEvent::ConnectionFailed(CameraError::ConnectionFailed(msg))) => {
            assert!(msg.contains("SIM-9999"));
        }
        other => panic!("expected a connection failure, got {other:?}"),
    }

    // Idle worker still accepts a valid connection
    worker.connect(SERIAL).unwrap();
    assert!(wait_for(&worker, |e| matches!(e, WorkerEvent::Connected(_))).is_some());
    worker.shutdown();
}

#[test]
fn test_hardware_trigger_times_out() {
    let provider = simulated_provider(64, 64, Some(beam(32.0, 32.0, 4.0)));
    let config = AlignConfig {
        frame_timeout_ms: 50,
        ..test_config()
    };
    let worker = connected_worker(provider, config);
    worker.change_parameter("triggerMode", "On").unwrap();
    worker.change_parameter("triggerSource", "Line1").unwrap();
    worker.start_streaming().unwrap();

    match wait_for(&worker, |e| {
        matches!(e, WorkerEvent::FrameTimeout { .. } | WorkerEvent::FrameProcessed(_))
    }) {
        Some(WorkerEvent::FrameTimeout { waited }) => {
            assert_eq!(waited, Duration::from_millis(50));
        }
        other => panic!("expected a frame timeout, got {other:?}"),
    }

    // Back to free-running capture
    worker.change_parameter("triggerMode", "Off").unwrap();
    assert!(next_frame(&worker).is_some());
    worker.shutdown();
}

#[test]
fn test_rejected_parameter_reports_actual_state() {
    let provider = simulated_provider(64, 64, None);
    let worker = connected_worker(provider, test_config());
    worker.change_parameter("pixelFormat", "Bayer8").unwrap();

    let Some(WorkerEvent::ParametersUpdated(parameters)) =
        wait_for(&worker, |e| matches!(e, WorkerEvent::ParametersUpdated(_)))
    else {
        panic!("no parameter update");
    };
    assert_eq!(parameters.pixel_format.value, "Mono12");

    // Out of range numeric requests are clamped, not refused
    worker.change_parameter("gain", 1000.0).unwrap();
    let Some(WorkerEvent::ParametersUpdated(parameters)) =
        wait_for(&worker, |e| matches!(e, WorkerEvent::ParametersUpdated(_)))
    else {
        panic!("no parameter update");
    };
    assert_eq!(parameters.gain.value, parameters.gain.range.max);

    assert!(worker.change_parameter("brightness", 1.0).is_err());
    worker.shutdown();
}

#[test]
fn test_no_frames_after_disconnect() {
    let provider = simulated_provider(128, 128, Some(beam(64.0, 64.0, 6.0)));
    let worker = connected_worker(provider, test_config());
    worker.start_streaming().unwrap();
    next_frame(&worker).expect("no frame while streaming");

    worker.disconnect().unwrap();
    let mut saw_disconnect = false;
    let deadline = Instant::now() + Duration::from_millis(300);
    while Instant::now() < deadline {
        match worker.recv_timeout(Duration::from_millis(20)).unwrap() {
            Some(WorkerEvent::FrameProcessed(_)) => panic!("frame delivered after disconnect"),
            Some(WorkerEvent::Disconnected) => saw_disconnect = true,
            _ => {}
        }
    }
    assert!(saw_disconnect);

    // Commands on a disconnected worker are ignored
    worker.start_streaming().unwrap();
    worker.request_parameters().unwrap();
    assert!(worker.recv_timeout(Duration::from_millis(100)).unwrap().is_none());
    worker.shutdown();
}

#[test]
fn test_request_snapshots() {
    let provider = simulated_provider(200, 100, None);
    let worker = connected_worker(provider, test_config());

    worker.request_offset_range().unwrap();
    let Some(WorkerEvent::OffsetRangeUpdated(range)) =
        wait_for(&worker, |e| matches!(e, WorkerEvent::OffsetRangeUpdated(_)))
    else {
        panic!("no offset range");
    };
    assert_eq!(range.offset_x.range.max, 0);

    worker.request_parameters().unwrap();
    let Some(WorkerEvent::ParametersUpdated(parameters)) =
        wait_for(&worker, |e| matches!(e, WorkerEvent::ParametersUpdated(_)))
    else {
        panic!("no parameters");
    };
    assert_eq!(parameters.width.value, 200);
    assert_eq!(parameters.height.value, 100);
    worker.shutdown();
}
