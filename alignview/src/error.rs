use shared::camera_interface::CameraError;
use thiserror::Error;

/// Errors produced outside the camera itself: configuration and worker plumbing.
#[derive(Error, Debug)]
pub enum AlignError {
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration file could not be read.
    #[error("failed to read configuration: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Configuration file is not valid JSON for [`crate::config::AlignConfig`].
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    /// A parameter name or value was not understood.
    #[error(transparent)]
    Parameter(#[from] CameraError),

    /// The acquisition thread has exited.
    #[error("acquisition worker has stopped")]
    WorkerStopped,

    /// The acquisition thread could not be started.
    #[error("failed to spawn acquisition worker: {0}")]
    Spawn(String),
}
