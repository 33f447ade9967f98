//! Live beam alignment: acquisition worker, configuration and camera selection.
//!
//! A [`WorkerHandle`] owns a background thread that holds the camera, pulls
//! frames and runs the centroid estimator on each. Callers talk to it only
//! through [`WorkerCommand`]s and [`WorkerEvent`]s.

pub mod camera_init;
pub mod config;
pub mod error;
pub mod frame_rate;
pub mod messages;
pub mod worker;

pub use config::AlignConfig;
pub use error::AlignError;
pub use messages::{ProcessedFrame, WorkerCommand, WorkerEvent};
pub use worker::{AcquisitionWorker, WorkerHandle};
