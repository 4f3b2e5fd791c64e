//! Still camera interface.

use thiserror::Error;

/// Errors that can occur while taking a still image.
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device node could not be opened.
    #[error("Failed to open camera {device}: {reason}")]
    Open { device: String, reason: String },

    /// The device rejected the requested format or controls.
    #[error("Failed to configure camera: {0}")]
    Configure(String),

    /// No frame could be dequeued from the device.
    #[error("Capture failed: {0}")]
    Capture(String),

    /// A frame was captured but could not be encoded as JPEG.
    #[error("JPEG encoding failed: {0}")]
    Encode(String),
}

/// A camera that produces one JPEG still per call.
///
/// Implementations hold the physical device only for the duration of
/// [`capture_jpeg`](Self::capture_jpeg); nothing stays streaming between calls.
pub trait StillCamera {
    /// Human-readable device name for logs.
    fn name(&self) -> &str;

    /// Take one still and return it JPEG-encoded.
    fn capture_jpeg(&mut self) -> Result<Vec<u8>, CameraError>;
}

impl<T: StillCamera + ?Sized> StillCamera for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn capture_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        (**self).capture_jpeg()
    }
}

/// Encode an 8-bit grayscale buffer as JPEG.
pub fn encode_gray_jpeg(
    data: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, CameraError> {
    use image::{GrayImage, ImageBuffer};

    let img: GrayImage = ImageBuffer::from_raw(width, height, data.to_vec()).ok_or_else(|| {
        CameraError::Encode(format!(
            "buffer of {} bytes does not hold a {width}x{height} image",
            data.len()
        ))
    })?;

    let mut jpeg_bytes = Vec::new();
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg_bytes, quality);
    encoder
        .encode_image(&img)
        .map_err(|e| CameraError::Encode(e.to_string()))?;

    Ok(jpeg_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_gray_jpeg() {
        let data = vec![0u8, 64, 128, 255];
        let jpeg = encode_gray_jpeg(&data, 2, 2, 80).unwrap();
        // JPEG magic bytes
        assert_eq!(&jpeg[0..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let result = encode_gray_jpeg(&[0u8; 3], 2, 2, 80);
        assert!(matches!(result, Err(CameraError::Encode(_))));
    }
}
