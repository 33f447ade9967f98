//! Hardware camera adapters.
//!
//! Each adapter implements [`shared::camera_interface::CameraInterface`] and a
//! matching [`shared::camera_interface::CameraProvider`]. Adapters for real
//! devices sit behind cargo features so the workspace builds without vendor
//! libraries or kernel headers.

pub mod unpack;

#[cfg(all(feature = "v4l2", target_os = "linux"))]
pub mod v4l2;
