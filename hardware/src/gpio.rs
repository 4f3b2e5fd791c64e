//! GPIO character device lines.
//!
//! Each wrapper claims exactly one line from a `gpiochipN` device. The line is
//! released back to the kernel when the wrapper is dropped.

use gpiod::{Chip, Input, Lines, Options, Output};
use tracing::debug;

use crate::pins::{DigitalInput, DigitalOutput, PinError};

fn open_chip(chip: &str) -> Result<Chip, PinError> {
    Chip::new(chip).map_err(PinError::Io)
}

/// A claimed input line.
pub struct GpioInput {
    lines: Lines<Input>,
}

impl GpioInput {
    /// Claim `line` on `chip` as an input.
    pub fn request(chip: &str, line: u32, consumer: &str) -> Result<Self, PinError> {
        let gpio = open_chip(chip)?;
        let opts = Options::input([line]).consumer(consumer);
        let lines = gpio.request_lines(opts).map_err(|source| PinError::Request {
            chip: chip.to_string(),
            line,
            source,
        })?;
        debug!("Claimed input line {line} on {chip} for {consumer}");
        Ok(Self { lines })
    }
}

impl DigitalInput for GpioInput {
    fn read(&mut self) -> Result<bool, PinError> {
        let [value] = self.lines.get_values([false; 1])?;
        Ok(value)
    }
}

/// A claimed output line. Starts low.
pub struct GpioOutput {
    lines: Lines<Output>,
}

impl GpioOutput {
    /// Claim `line` on `chip` as an output driven low.
    pub fn request(chip: &str, line: u32, consumer: &str) -> Result<Self, PinError> {
        let gpio = open_chip(chip)?;
        let opts = Options::output([line]).values([false]).consumer(consumer);
        let lines = gpio.request_lines(opts).map_err(|source| PinError::Request {
            chip: chip.to_string(),
            line,
            source,
        })?;
        debug!("Claimed output line {line} on {chip} for {consumer}");
        Ok(Self { lines })
    }
}

impl DigitalOutput for GpioOutput {
    fn set(&mut self, high: bool) -> Result<(), PinError> {
        self.lines.set_values([high])?;
        Ok(())
    }
}
