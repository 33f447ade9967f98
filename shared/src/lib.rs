//! Shared components for the alignview beam alignment tools.
//!
//! Contains the camera abstraction, the simulated camera, beam centroiding and
//! the ROI coordinate mapping used by both the hardware adapters and the
//! acquisition worker.

pub mod camera_interface;
pub mod image_proc;
pub mod roi_transform;
