//! Linux V4L2 capture devices
//!
//! Devices are identified by their node path (`/dev/videoN`).

pub mod camera;
pub mod controls;

pub use camera::V4l2Camera;

use shared::camera_interface::{
    CameraInterface, CameraProvider, CameraResult, DeviceDescriptor,
};

#[derive(Debug, Clone, Copy, Default)]
pub struct V4l2Provider;

impl CameraProvider for V4l2Provider {
    fn enumerate(&self) -> Vec<DeviceDescriptor> {
        v4l::context::enum_devices()
            .into_iter()
            .map(|node| {
                let path = node.path().to_string_lossy().into_owned();
                let display_name = node.name().unwrap_or_else(|| path.clone());
                DeviceDescriptor {
                    serial_number: path,
                    display_name,
                }
            })
            .collect()
    }

    fn open(&self, device_id: &str) -> CameraResult<Box<dyn CameraInterface>> {
        Ok(Box::new(V4l2Camera::from_device(device_id)?))
    }
}
