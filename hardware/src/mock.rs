//! Mock and simulated devices.
//!
//! These stand in for the PIR sensor, indicator LEDs and camera in tests and
//! when the sentinel runs with `--simulate` on a machine without GPIO.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::camera::{encode_gray_jpeg, CameraError, StillCamera};
use crate::pins::{DigitalInput, DigitalOutput, PinError};

/// Input that replays a fixed script of samples.
///
/// Once the script is exhausted the last successful value is repeated.
pub struct ScriptedInput {
    script: VecDeque<Result<bool, String>>,
    last: bool,
}

impl ScriptedInput {
    pub fn new(samples: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: samples.into_iter().map(Ok).collect(),
            last: false,
        }
    }

    /// Queue a read failure with the given message.
    pub fn push_error(&mut self, message: &str) {
        self.script.push_back(Err(message.to_string()));
    }

    pub fn push(&mut self, value: bool) {
        self.script.push_back(Ok(value));
    }
}

impl DigitalInput for ScriptedInput {
    fn read(&mut self) -> Result<bool, PinError> {
        match self.script.pop_front() {
            Some(Ok(value)) => {
                self.last = value;
                Ok(value)
            }
            Some(Err(message)) => {
                debug!("Scripted read failure: {message}");
                Err(PinError::Io(std::io::Error::other(message)))
            }
            None => Ok(self.last),
        }
    }
}

/// Simulated PIR sensor: `active` of motion at the start of every `period`.
pub struct PeriodicMotion {
    origin: Instant,
    period: Duration,
    active: Duration,
}

impl PeriodicMotion {
    pub fn new(period: Duration, active: Duration) -> Self {
        Self {
            origin: Instant::now(),
            period,
            active,
        }
    }

    fn motion_at(&self, now: Instant) -> bool {
        let period_ms = self.period.as_millis().max(1);
        let phase_ms = now.saturating_duration_since(self.origin).as_millis() % period_ms;
        phase_ms < self.active.as_millis()
    }
}

impl DigitalInput for PeriodicMotion {
    fn read(&mut self) -> Result<bool, PinError> {
        Ok(self.motion_at(Instant::now()))
    }
}

/// Output that records every level written to it.
///
/// Clones share the same history, so a test can keep one handle while the
/// driver owns another.
#[derive(Clone, Default)]
pub struct RecordingOutput {
    history: Arc<Mutex<Vec<bool>>>,
}

impl RecordingOutput {
    pub fn new() -> Self {
        Self::default()
    }

    /// All levels written so far, oldest first.
    pub fn history(&self) -> Vec<bool> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently written level, or `None` if never written.
    pub fn level(&self) -> Option<bool> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .copied()
    }
}

impl DigitalOutput for RecordingOutput {
    fn set(&mut self, high: bool) -> Result<(), PinError> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(high);
        Ok(())
    }
}

/// Camera that synthesises a gradient test image.
pub struct MockStillCamera {
    width: u32,
    height: u32,
    fail_with: Option<String>,
    captures: u64,
}

impl MockStillCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            fail_with: None,
            captures: 0,
        }
    }

    /// A camera whose every capture fails with a device error.
    pub fn failing(reason: &str) -> Self {
        Self {
            fail_with: Some(reason.to_string()),
            ..Self::new(16, 16)
        }
    }

    /// Number of successful captures taken.
    pub fn captures(&self) -> u64 {
        self.captures
    }

    fn gradient(&self) -> Vec<u8> {
        let shift = (self.captures % 256) as u32;
        let mut data = Vec::with_capacity((self.width * self.height) as usize);
        for y in 0..self.height {
            for x in 0..self.width {
                let v = (x + y + shift) * 255 / (self.width + self.height).max(1);
                data.push(v.min(255) as u8);
            }
        }
        data
    }
}

impl StillCamera for MockStillCamera {
    fn name(&self) -> &str {
        "mock"
    }

    fn capture_jpeg(&mut self) -> Result<Vec<u8>, CameraError> {
        if let Some(reason) = &self.fail_with {
            return Err(CameraError::Capture(reason.clone()));
        }
        let jpeg = encode_gray_jpeg(&self.gradient(), self.width, self.height, 85)?;
        self.captures += 1;
        debug!(
            "Mock still #{} ({}x{}, {} bytes)",
            self.captures,
            self.width,
            self.height,
            jpeg.len()
        );
        Ok(jpeg)
    }
}
