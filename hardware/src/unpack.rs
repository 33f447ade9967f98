//! Raw frame buffer unpacking
//!
//! Converts driver buffers of 8- or 16-bit monochrome pixels into `u16`
//! frames, skipping any per-row padding the driver adds.

use ndarray::Array2;

/// Pixel layout of a monochrome buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonoLayout {
    /// One byte per pixel (V4L2 `GREY`)
    Mono8,
    /// Two little-endian bytes per pixel (V4L2 `Y16 `)
    Mono16,
}

impl MonoLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            MonoLayout::Mono8 => 1,
            MonoLayout::Mono16 => 2,
        }
    }

    /// Pixel format name used by [`shared::camera_interface::CameraInterface`]
    pub fn pixel_format(&self) -> &'static str {
        match self {
            MonoLayout::Mono8 => "Mono8",
            MonoLayout::Mono16 => "Mono16",
        }
    }

    pub fn from_pixel_format(name: &str) -> Option<Self> {
        match name {
            "Mono8" => Some(MonoLayout::Mono8),
            "Mono16" => Some(MonoLayout::Mono16),
            _ => None,
        }
    }

    pub fn from_fourcc(fourcc: &[u8; 4]) -> Option<Self> {
        match fourcc {
            b"GREY" => Some(MonoLayout::Mono8),
            b"Y16 " => Some(MonoLayout::Mono16),
            _ => None,
        }
    }

    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            MonoLayout::Mono8 => *b"GREY",
            MonoLayout::Mono16 => *b"Y16 ",
        }
    }
}

/// Error returned when a frame buffer cannot be unpacked.
#[derive(Debug, thiserror::Error)]
pub enum UnpackFrameError {
    #[error(
        "frame buffer too small: need {needed_bytes} bytes for {width}x{height} frame \
         (stride={stride}), got {actual_bytes}"
    )]
    BufferTooSmall {
        width: usize,
        height: usize,
        stride: usize,
        needed_bytes: usize,
        actual_bytes: usize,
    },
    #[error("stride {stride} is shorter than a {width} pixel row of {row_bytes} bytes")]
    StrideTooShort {
        width: usize,
        stride: usize,
        row_bytes: usize,
    },
}

fn push_row(pixels: &mut Vec<u16>, row: &[u8], layout: MonoLayout) {
    match layout {
        MonoLayout::Mono8 => pixels.extend(row.iter().map(|&b| b as u16)),
        // Reinterpret in place when the row happens to be aligned
        MonoLayout::Mono16 => match bytemuck::try_cast_slice::<u8, u16>(row) {
            Ok(words) if cfg!(target_endian = "little") => pixels.extend_from_slice(words),
            _ => pixels.extend(
                row.chunks_exact(2)
                    .map(|pair| u16::from_le_bytes([pair[0], pair[1]])),
            ),
        },
    }
}

/// Unpack a raw monochrome frame buffer into a `height × width` array.
///
/// `stride` is the number of bytes between the starts of consecutive rows;
/// bytes past `width * bytes_per_pixel` in each row are padding and skipped.
pub fn unpack_mono_frame(
    frame_data: &[u8],
    width: usize,
    height: usize,
    stride: usize,
    layout: MonoLayout,
) -> Result<Array2<u16>, UnpackFrameError> {
    let row_bytes = width * layout.bytes_per_pixel();
    if stride < row_bytes {
        return Err(UnpackFrameError::StrideTooShort {
            width,
            stride,
            row_bytes,
        });
    }

    let needed = match height {
        0 => 0,
        h => (h - 1) * stride + row_bytes,
    };
    if frame_data.len() < needed {
        return Err(UnpackFrameError::BufferTooSmall {
            width,
            height,
            stride,
            needed_bytes: needed,
            actual_bytes: frame_data.len(),
        });
    }

    let mut pixels = Vec::with_capacity(width * height);
    for row in 0..height {
        let start = row * stride;
        push_row(&mut pixels, &frame_data[start..start + row_bytes], layout);
    }

    // Length is width * height by construction
    Ok(Array2::from_shape_vec((height, width), pixels)
        .unwrap_or_else(|_| Array2::zeros((height, width))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn le_bytes(pixels: &[u16]) -> Vec<u8> {
        pixels.iter().flat_map(|p| p.to_le_bytes()).collect()
    }

    #[test]
    fn unpack_mono16_no_padding() {
        let pixels: Vec<u16> = vec![1, 2, 3, 4, 5, 600];
        let frame = unpack_mono_frame(&le_bytes(&pixels), 3, 2, 6, MonoLayout::Mono16).unwrap();
        assert_eq!(frame.dim(), (2, 3));
        assert_eq!(frame[[0, 0]], 1);
        assert_eq!(frame[[1, 2]], 600);
    }

    #[test]
    fn unpack_mono16_with_stride_padding() {
        let mut bytes = le_bytes(&[10, 20, 30]);
        bytes.extend_from_slice(&[0xAA, 0xBB]);
        bytes.extend(le_bytes(&[40, 50, 60]));

        // Last row may omit its padding
        let frame = unpack_mono_frame(&bytes, 3, 2, 8, MonoLayout::Mono16).unwrap();
        assert_eq!(frame.row(0).to_vec(), vec![10, 20, 30]);
        assert_eq!(frame.row(1).to_vec(), vec![40, 50, 60]);
    }

    #[test]
    fn unpack_mono16_unaligned_buffer() {
        let mut bytes = vec![0u8];
        bytes.extend(le_bytes(&[0x1234, 0xBEEF]));
        let frame = unpack_mono_frame(&bytes[1..], 2, 1, 4, MonoLayout::Mono16).unwrap();
        assert_eq!(frame.row(0).to_vec(), vec![0x1234, 0xBEEF]);
    }

    #[test]
    fn unpack_mono8_with_padding() {
        let bytes = vec![1u8, 2, 3, 0, 4, 5, 6, 0];
        let frame = unpack_mono_frame(&bytes, 3, 2, 4, MonoLayout::Mono8).unwrap();
        assert_eq!(frame.row(1).to_vec(), vec![4, 5, 6]);
    }

    #[test]
    fn unpack_buffer_too_small() {
        let err = unpack_mono_frame(&[0u8; 4], 3, 2, 16, MonoLayout::Mono16).unwrap_err();
        match err {
            UnpackFrameError::BufferTooSmall {
                needed_bytes,
                actual_bytes,
                ..
            } => {
                assert_eq!(needed_bytes, 22);
                assert_eq!(actual_bytes, 4);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn unpack_rejects_short_stride() {
        let err = unpack_mono_frame(&[0u8; 64], 8, 2, 8, MonoLayout::Mono16).unwrap_err();
        assert!(matches!(err, UnpackFrameError::StrideTooShort { row_bytes: 16, .. }));
    }

    #[test]
    fn unpack_error_message_is_descriptive() {
        let err = unpack_mono_frame(&[0u8; 4], 100, 200, 200, MonoLayout::Mono16).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("100x200"), "missing dimensions: {msg}");
        assert!(msg.contains("stride=200"), "missing stride: {msg}");
        assert!(msg.contains("got 4"), "missing actual size: {msg}");
    }

    #[test]
    fn layout_names() {
        assert_eq!(MonoLayout::from_fourcc(b"Y16 "), Some(MonoLayout::Mono16));
        assert_eq!(MonoLayout::from_fourcc(b"RGB3"), None);
        assert_eq!(
            MonoLayout::from_pixel_format(MonoLayout::Mono8.pixel_format()),
            Some(MonoLayout::Mono8)
        );
    }
}
