use alignview::{AlignConfig, WorkerEvent, WorkerHandle};
use shared::camera_interface::simulated::{
    SimulatedBeam, SimulatedCameraConfig, SimulatedProvider,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const SERIAL: &str = "SIM-0001";
pub const EVENT_WAIT: Duration = Duration::from_secs(10);

/// Noiseless simulated sensor producing a frame every 20 ms
pub fn simulated_provider(width: usize, height: usize, beam: Option<SimulatedBeam>) -> Arc<SimulatedProvider> {
    let config = SimulatedCameraConfig {
        sensor_width: width,
        sensor_height: height,
        ..SimulatedCameraConfig::noiseless(beam)
    }
    .with_frame_interval(Duration::from_millis(20));
    Arc::new(SimulatedProvider::new(config))
}

pub fn test_config() -> AlignConfig {
    AlignConfig {
        frame_timeout_ms: 200,
        capture_retry_ms: 10,
        ..AlignConfig::default()
    }
}

/// Spawn a worker and wait until it has connected to the simulated device
pub fn connected_worker(provider: Arc<SimulatedProvider>, config: AlignConfig) -> WorkerHandle {
    let worker = WorkerHandle::spawn(provider, config).unwrap();
    worker.connect(SERIAL).unwrap();
    wait_for(&worker, |e| matches!(e, WorkerEvent::Connected(_)))
        .expect("worker did not connect");
    worker
}

/// Receive events until one matches, giving up after [`EVENT_WAIT`]
pub fn wait_for(
    worker: &WorkerHandle,
    mut predicate: impl FnMut(&WorkerEvent) -> bool,
) -> Option<WorkerEvent> {
    let deadline = Instant::now() + EVENT_WAIT;
    while Instant::now() < deadline {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match worker.recv_timeout(remaining) {
            Ok(Some(event)) if predicate(&event) => return Some(event),
            Ok(_) => {}
            Err(_) => return None,
        }
    }
    None
}

/// Next frame result
pub fn next_frame(worker: &WorkerHandle) -> Option<Box<alignview::ProcessedFrame>> {
    match wait_for(worker, WorkerEvent::is_frame)? {
        WorkerEvent::FrameProcessed(frame) => Some(frame),
        _ => None,
    }
}
