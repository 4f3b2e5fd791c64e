//! V4L2 still capture for UVC cameras.
//!
//! The device is opened, configured for MJPG and streamed only for the
//! duration of one [`StillCamera::capture_jpeg`] call. Dropping the stream and
//! device at the end of the call hands the camera back to the system.

use tracing::debug;
use v4l::buffer::Type;
use v4l::io::mmap::Stream as MmapStream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;
use v4l::FourCC;

use crate::camera::{CameraError, StillCamera};

/// Number of mmap buffers requested for a capture session.
const BUFFER_COUNT: u32 = 4;

#[derive(Debug, Clone)]
pub struct StillConfig {
    pub device_path: String,
    pub width: u32,
    pub height: u32,
    /// Frames discarded before the kept one, so auto exposure can settle.
    pub warmup_frames: usize,
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            device_path: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            warmup_frames: 3,
        }
    }
}

pub struct V4l2StillCamera {
    config: StillConfig,
}

impl V4l2StillCamera {
    pub fn new(config: StillConfig) -> Self {
        Self { config }
    }

    fn open_device(&self) -> Result<Device, CameraError> {
        Device::with_path(&self.config.device_path).map_err(|e| CameraError::Open {
            device: self.config.device_path.clone(),
            reason: e.to_string(),
        })
    }

    fn configure_device(&self, device: &Device) -> Result<(), CameraError> {
        let mjpg = FourCC::new(b"MJPG");

        let mut format = device
            .format()
            .map_err(|e| CameraError::Configure(e.to_string()))?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = mjpg;

        let applied = device
            .set_format(&format)
            .map_err(|e| CameraError::Configure(e.to_string()))?;
        if applied.fourcc != mjpg {
            return Err(CameraError::Configure(format!(
                "device does not support MJPG (negotiated {})",
                applied.fourcc
            )));
        }

        debug!(
            "Configured {} for {}x{} MJPG",
            self.config.device_path, applied.width, applied.height
        );
        Ok(())
    }
}

impl StillCamera for V4l2StillCamera {
    fn name(&self) -> &str {
        &self.config.device_path
    }

    fn capture_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        let device = self.open_device()?;
        self.configure_device(&device)?;

        let mut stream = MmapStream::with_buffers(&device, Type::VideoCapture, BUFFER_COUNT)
            .map_err(|e| CameraError::Capture(e.to_string()))?;

        for _ in 0..self.config.warmup_frames {
            stream
                .next()
                .map_err(|e| CameraError::Capture(e.to_string()))?;
        }

        let (buf, meta) = stream
            .next()
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        let used = (meta.bytesused as usize).min(buf.len());
        if used == 0 {
            return Err(CameraError::Capture("device returned an empty frame".into()));
        }

        Ok(buf[..used].to_vec())
    }
}
