//! Hardware drivers for the motion sentinel.
//!
//! This crate provides the small set of devices the sentinel talks to: digital
//! input/output lines (PIR sensor, indicator LEDs) and a still camera. Each real
//! driver is feature-gated; the traits and mock devices are always available so
//! the control loop can be exercised without hardware.
//!
//! # Features
//!
//! ## Individual Drivers
//! - `gpio` - GPIO character device lines via `gpiod` (Linux only)
//! - `v4l2` - V4L2 still capture from a UVC/MJPG camera (Linux only)
//!
//! ## Convenience Features
//! - `full-linux` - All drivers for Linux deployments

pub mod camera;
pub mod mock;
pub mod pins;

#[cfg(all(target_os = "linux", feature = "gpio"))]
pub mod gpio;

#[cfg(all(target_os = "linux", feature = "v4l2"))]
pub mod v4l2_still;

pub use camera::{CameraError, StillCamera};
pub use pins::{DigitalInput, DigitalOutput, PinError};
