//! Digital line traits shared by real GPIO and mock devices.

use thiserror::Error;

/// Errors raised while requesting or driving a digital line.
#[derive(Error, Debug)]
pub enum PinError {
    /// The line could not be claimed from the controller.
    #[error("Failed to request line {line} on {chip}: {source}")]
    Request {
        chip: String,
        line: u32,
        #[source]
        source: std::io::Error,
    },

    /// Reading or writing an already-claimed line failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single digital input (e.g. a PIR sensor output).
pub trait DigitalInput {
    /// Sample the line once. `true` means the line is active.
    fn read(&mut self) -> Result<bool, PinError>;
}

/// A single digital output (e.g. an indicator LED).
pub trait DigitalOutput {
    /// Drive the line high (`true`) or low (`false`).
    fn set(&mut self, high: bool) -> Result<(), PinError>;
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn read(&mut self) -> Result<bool, PinError> {
        (**self).read()
    }
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set(&mut self, high: bool) -> Result<(), PinError> {
        (**self).set(high)
    }
}
