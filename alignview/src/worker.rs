//! Acquisition worker
//!
//! One thread owns the camera. It applies [`WorkerCommand`]s in the order they
//! were sent, pulls frames while streaming, runs the centroid estimator on each
//! and reports everything back as [`WorkerEvent`]s. The caller side is
//! [`WorkerHandle`].

use crossbeam_channel::{
    bounded, unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError,
};
use ndarray::Array2;
use shared::camera_interface::{
    CameraError, CameraInterface, CameraProvider, FrameMetadata, ParameterName, ParameterValue,
};
use shared::image_proc::{find_beam_center, fit_lineouts, FitState};
use shared::roi_transform::RoiTransform;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

use crate::config::AlignConfig;
use crate::error::AlignError;
use crate::frame_rate::FrameRateMeter;
use crate::messages::{Envelope, ProcessedFrame, WorkerCommand, WorkerEvent};

/// State owned by the acquisition thread
pub struct AcquisitionWorker {
    provider: Arc<dyn CameraProvider>,
    camera: Option<Box<dyn CameraInterface>>,
    config: AlignConfig,
    fit_state: FitState,
    frame_rate: FrameRateMeter,
    transform: Option<RoiTransform>,
    streaming: bool,
    last_seq: u64,
    events: Sender<Envelope<WorkerEvent>>,
}

/// Outcome of handing an event to the caller
enum Delivery {
    Sent,
    Dropped,
    Closed,
}

impl AcquisitionWorker {
    pub fn new(
        provider: Arc<dyn CameraProvider>,
        config: AlignConfig,
        events: Sender<Envelope<WorkerEvent>>,
    ) -> Self {
        let frame_rate = FrameRateMeter::new(config.frame_rate_window);
        Self {
            provider,
            camera: None,
            config,
            fit_state: FitState::default(),
            frame_rate,
            transform: None,
            streaming: false,
            last_seq: 0,
            events,
        }
    }

    /// Run until shut down or until either channel closes
    pub fn run(mut self, commands: Receiver<Envelope<WorkerCommand>>) {
        info!("Acquisition worker started");
        loop {
            let flow = if self.streaming {
                match self.drain_commands(&commands) {
                    // A command may have stopped the stream
                    ControlFlow::Continue(()) if self.streaming => self.capture_next(),
                    flow => flow,
                }
            } else {
                match commands.recv() {
                    Ok(envelope) => self.apply(envelope),
                    Err(_) => ControlFlow::Break(()),
                }
            };
            if flow.is_break() {
                break;
            }
        }
        self.release_camera();
        info!("Acquisition worker stopped");
    }

    fn drain_commands(&mut self, commands: &Receiver<Envelope<WorkerCommand>>) -> ControlFlow<()> {
        loop {
            match commands.try_recv() {
                Ok(envelope) => self.apply(envelope)?,
                Err(TryRecvError::Empty) => return ControlFlow::Continue(()),
                Err(TryRecvError::Disconnected) => return ControlFlow::Break(()),
            }
        }
    }

    fn emit(&self, event: WorkerEvent) -> Delivery {
        let envelope = Envelope::new(self.last_seq, event);
        if envelope.message.is_frame() {
            match self.events.try_send(envelope) {
                Ok(()) => Delivery::Sent,
                Err(TrySendError::Full(_)) => {
                    debug!("Event queue full, dropping frame");
                    Delivery::Dropped
                }
                Err(TrySendError::Disconnected(_)) => Delivery::Closed,
            }
        } else {
            match self.events.send(envelope) {
                Ok(()) => Delivery::Sent,
                Err(_) => Delivery::Closed,
            }
        }
    }

    fn emit_or_stop(&self, event: WorkerEvent) -> ControlFlow<()> {
        match self.emit(event) {
            Delivery::Closed => {
                debug!("Event receiver gone");
                ControlFlow::Break(())
            }
            Delivery::Sent | Delivery::Dropped => ControlFlow::Continue(()),
        }
    }

    fn apply(&mut self, envelope: Envelope<WorkerCommand>) -> ControlFlow<()> {
        self.last_seq = envelope.seq;
        trace!("Applying command #{}: {:?}", envelope.seq, envelope.message);
        match envelope.message {
            WorkerCommand::Connect(device_id) => self.connect(&device_id),
            WorkerCommand::Disconnect => self.disconnect(),
            WorkerCommand::StartStreaming => {
                self.start_streaming();
                ControlFlow::Continue(())
            }
            WorkerCommand::StopStreaming => {
                self.stop_streaming();
                ControlFlow::Continue(())
            }
            WorkerCommand::ChangeParameter { name, value } => self.change_parameter(name, value),
            WorkerCommand::RequestParameters => match &self.camera {
                Some(camera) => self.emit_or_stop(WorkerEvent::ParametersUpdated(camera.parameters())),
                None => ControlFlow::Continue(()),
            },
            WorkerCommand::RequestOffsetRange => match &self.camera {
                Some(camera) => {
                    self.emit_or_stop(WorkerEvent::OffsetRangeUpdated(camera.offset_range()))
                }
                None => ControlFlow::Continue(()),
            },
            WorkerCommand::Shutdown => ControlFlow::Break(()),
        }
    }

    fn connect(&mut self, device_id: &str) -> ControlFlow<()> {
        if self.camera.is_some() {
            self.disconnect()?;
        }

        match self.provider.open(device_id) {
            Ok(camera) => {
                info!("Connected to {} ({})", camera.name(), camera.get_serial());
                let parameters = camera.parameters();
                self.camera = Some(camera);
                self.fit_state.reset();
                self.transform = None;
                self.emit_or_stop(WorkerEvent::Connected(parameters))?;
                self.publish_transform()
            }
            Err(e) => {
                warn!("Failed to connect to {device_id}: {e}");
                self.emit_or_stop(WorkerEvent::ConnectionFailed(e))
            }
        }
    }

    fn release_camera(&mut self) {
        self.streaming = false;
        if let Some(mut camera) = self.camera.take() {
            if let Err(e) = camera.stop_streaming() {
                warn!("Failed to stop streaming: {e}");
            }
            if let Err(e) = camera.close() {
                warn!("Failed to close camera: {e}");
            }
            info!("Closed {}", camera.name());
        }
    }

    fn disconnect(&mut self) -> ControlFlow<()> {
        self.release_camera();
        self.fit_state.reset();
        self.frame_rate.reset();
        self.transform = None;
        self.emit_or_stop(WorkerEvent::Disconnected)
    }

    fn start_streaming(&mut self) {
        let Some(camera) = self.camera.as_mut() else {
            warn!("Cannot start streaming: no camera connected");
            return;
        };
        match camera.start_streaming() {
            Ok(()) => {
                info!("Streaming started");
                self.streaming = true;
                self.frame_rate.reset();
            }
            Err(e) => warn!("Failed to start streaming: {e}"),
        }
    }

    fn stop_streaming(&mut self) {
        self.streaming = false;
        if let Some(camera) = self.camera.as_mut() {
            match camera.stop_streaming() {
                Ok(()) => info!("Streaming stopped"),
                Err(e) => warn!("Failed to stop streaming: {e}"),
            }
        }
    }

    /// Emit the display transform if the configured geometry moved it
    fn publish_transform(&mut self) -> ControlFlow<()> {
        let Some(camera) = &self.camera else {
            return ControlFlow::Continue(());
        };
        let transform = RoiTransform::from_parameters(&camera.parameters(), self.config.pixel_size);
        if self.transform == Some(transform) {
            return ControlFlow::Continue(());
        }
        self.transform = Some(transform);
        self.emit_or_stop(WorkerEvent::ImageTransformUpdated(transform))
    }

    fn change_parameter(&mut self, name: ParameterName, value: ParameterValue) -> ControlFlow<()> {
        let streaming = self.streaming;
        let Some(camera) = self.camera.as_mut() else {
            warn!("Ignoring {name} change: no camera connected");
            return ControlFlow::Continue(());
        };

        // Geometry cannot change under a running acquisition on most devices
        let pause = streaming && name.is_structural();
        if pause {
            if let Err(e) = camera.stop_streaming() {
                warn!("Failed to pause streaming for {name} change: {e}");
            }
        }

        let result = camera.set_parameter(name, &value);

        if pause {
            if let Err(e) = camera.start_streaming() {
                warn!("Failed to resume streaming after {name} change: {e}");
                self.streaming = false;
            }
        }

        let parameters = camera.parameters();
        match result {
            Ok(()) => {
                let applied = parameters.value_of(name);
                if !same_value(&applied, &value) {
                    warn!("{name} request {value} clamped to {applied}");
                } else {
                    debug!("{name} set to {applied}");
                }
            }
            Err(e) => warn!("{name} change to {value} rejected: {e}"),
        }

        let offsets = parameters.offset_range();
        self.emit_or_stop(WorkerEvent::ParametersUpdated(parameters))?;
        if name.is_structural() {
            self.emit_or_stop(WorkerEvent::OffsetRangeUpdated(offsets))?;
            self.publish_transform()?;
        }
        ControlFlow::Continue(())
    }

    fn capture_next(&mut self) -> ControlFlow<()> {
        let timeout = self.config.frame_timeout();
        let Some(camera) = self.camera.as_mut() else {
            self.streaming = false;
            return ControlFlow::Continue(());
        };

        match camera.get_image(timeout) {
            Ok((frame, metadata)) => {
                let processed = self.process_frame(frame, metadata);
                if let Delivery::Closed = self.emit(WorkerEvent::FrameProcessed(Box::new(processed)))
                {
                    return ControlFlow::Break(());
                }
                self.report_device_changes()
            }
            Err(CameraError::Timeout(waited)) => {
                debug!("No frame within {waited:?}");
                self.emit_or_stop(WorkerEvent::FrameTimeout { waited })
            }
            Err(CameraError::NotStreaming) => {
                warn!("Camera stopped streaming unexpectedly");
                self.streaming = false;
                ControlFlow::Continue(())
            }
            Err(e) => {
                warn!("Capture failed: {e}; retrying");
                std::thread::sleep(self.config.capture_retry());
                ControlFlow::Continue(())
            }
        }
    }

    /// Run the estimator on one frame and advance the warm-start state
    pub fn process_frame(&mut self, frame: Array2<u16>, metadata: FrameMetadata) -> ProcessedFrame {
        let transform = RoiTransform::from_metadata(&metadata, self.config.pixel_size);
        let axes = transform.axes(frame.ncols(), frame.nrows());

        let centroid = find_beam_center(
            &frame.view(),
            &axes,
            &self.fit_state,
            &self.config.estimator,
        );
        self.fit_state = centroid.next_state();

        let lineouts = if self.config.fit_lineouts {
            fit_lineouts(&frame.view(), &axes, centroid.centroid, &self.config.estimator.fit)
        } else {
            None
        };

        trace!(
            "Frame {}: centroid ({:.3}, {:.3})",
            metadata.frame_number,
            centroid.centroid.0,
            centroid.centroid.1
        );

        ProcessedFrame {
            frame: Arc::new(frame),
            metadata,
            transform,
            centroid,
            lineouts,
            frame_rate: self.frame_rate.tick(Instant::now()),
        }
    }

    fn report_device_changes(&mut self) -> ControlFlow<()> {
        let Some(camera) = self.camera.as_mut() else {
            return ControlFlow::Continue(());
        };
        let changed = camera.poll_parameter_changes();
        if changed.is_empty() {
            return ControlFlow::Continue(());
        }
        debug!("Device changed {:?} on its own", changed);
        let parameters = camera.parameters();
        self.emit_or_stop(WorkerEvent::ParametersUpdated(parameters))
    }
}

fn same_value(applied: &ParameterValue, requested: &ParameterValue) -> bool {
    match (applied.as_f64(), requested.as_f64()) {
        (Some(a), Some(r)) => (a - r).abs() <= 1e-9 * a.abs().max(r.abs()).max(1.0),
        _ => applied == requested,
    }
}

/// Caller side of a running [`AcquisitionWorker`]
pub struct WorkerHandle {
    commands: Sender<Envelope<WorkerCommand>>,
    events: Receiver<Envelope<WorkerEvent>>,
    next_seq: AtomicU64,
    frame_cutoff: AtomicU64,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Start an acquisition thread using `provider` to open devices
    pub fn spawn(provider: Arc<dyn CameraProvider>, config: AlignConfig) -> Result<Self, AlignError> {
        config.validate()?;
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = bounded(config.event_queue_depth);

        let worker = AcquisitionWorker::new(provider, config, event_tx);
        let thread = std::thread::Builder::new()
            .name("acquisition".to_string())
            .spawn(move || worker.run(command_rx))
            .map_err(|e| AlignError::Spawn(e.to_string()))?;

        Ok(Self {
            commands: command_tx,
            events: event_rx,
            next_seq: AtomicU64::new(1),
            frame_cutoff: AtomicU64::new(0),
            thread: Some(thread),
        })
    }

    /// Queue a command, returning its sequence number
    pub fn send(&self, command: WorkerCommand) -> Result<u64, AlignError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let ends_stream = matches!(
            command,
            WorkerCommand::StopStreaming | WorkerCommand::Disconnect
        );
        self.commands
            .send(Envelope::new(seq, command))
            .map_err(|_| AlignError::WorkerStopped)?;
        if ends_stream {
            self.frame_cutoff.fetch_max(seq, Ordering::SeqCst);
        }
        Ok(seq)
    }

    pub fn connect(&self, device_id: &str) -> Result<u64, AlignError> {
        self.send(WorkerCommand::Connect(device_id.to_string()))
    }

    pub fn disconnect(&self) -> Result<u64, AlignError> {
        self.send(WorkerCommand::Disconnect)
    }

    pub fn start_streaming(&self) -> Result<u64, AlignError> {
        self.send(WorkerCommand::StartStreaming)
    }

    pub fn stop_streaming(&self) -> Result<u64, AlignError> {
        self.send(WorkerCommand::StopStreaming)
    }

    /// Change a parameter by its wire name (`"width"`, `"offsetX"`, ...)
    pub fn change_parameter(
        &self,
        name: &str,
        value: impl Into<ParameterValue>,
    ) -> Result<u64, AlignError> {
        let name: ParameterName = name.parse()?;
        self.send(WorkerCommand::ChangeParameter {
            name,
            value: value.into(),
        })
    }

    pub fn request_parameters(&self) -> Result<u64, AlignError> {
        self.send(WorkerCommand::RequestParameters)
    }

    pub fn request_offset_range(&self) -> Result<u64, AlignError> {
        self.send(WorkerCommand::RequestOffsetRange)
    }

    /// Frames produced before the latest stop or disconnect never surface
    fn admit(&self, envelope: Envelope<WorkerEvent>) -> Option<WorkerEvent> {
        if envelope.message.is_frame() && envelope.seq < self.frame_cutoff.load(Ordering::SeqCst)
        {
            trace!("Discarding frame stamped #{} after stop", envelope.seq);
            return None;
        }
        Some(envelope.message)
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Returns `Ok(None)` on timeout and `Err(AlignError::WorkerStopped)` once
    /// the worker has exited and its queue is drained.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerEvent>, AlignError> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(envelope) => {
                    if let Some(event) = self.admit(envelope) {
                        return Ok(Some(event));
                    }
                }
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(AlignError::WorkerStopped),
            }
        }
    }

    /// Next queued event without blocking
    pub fn try_recv(&self) -> Option<WorkerEvent> {
        while let Ok(envelope) = self.events.try_recv() {
            if let Some(event) = self.admit(envelope) {
                return Some(event);
            }
        }
        None
    }

    /// Stop the worker and wait for it to release the camera
    pub fn shutdown(mut self) {
        self.stop_thread();
    }

    fn stop_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A closed channel means the worker already exited
        let _ = self.send(WorkerCommand::Shutdown);
        // Unblock a worker waiting on a full event queue
        while !thread.is_finished() {
            while self.events.try_recv().is_ok() {}
            std::thread::sleep(Duration::from_millis(1));
        }
        if thread.join().is_err() {
            warn!("Acquisition worker panicked");
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop_thread();
    }
}
