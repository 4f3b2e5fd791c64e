//! Motion sentinel: PIR sensor to photo alert.
//!
//! A single polling loop samples a motion sensor, folds the samples into
//! detection episodes, and when an episode lasts long enough captures a still,
//! records it in the photo ledger and emails it. Three indicator LEDs report
//! motion, episode progress and alert delivery. A cooldown window keeps
//! sustained or repeated motion from producing a flood of alerts.
//!
//! # Modules
//!
//! - [`config`] - startup configuration (pins, timings, storage, email)
//! - [`detector`] - pure episode state machine
//! - [`indicator`] - cooperative LED pattern rendering
//! - [`capture`] - exclusive still capture into the content directory
//! - [`alert`] - email dispatch with the photo attached
//! - [`ledger`] - durable, append-only photo record
//! - [`ledger_api`] - read-only HTTP view of the ledger
//! - [`monitor`] - the detection loop tying it all together

pub mod alert;
pub mod capture;
pub mod config;
pub mod detector;
pub mod indicator;
pub mod ledger;
pub mod ledger_api;
pub mod monitor;

pub use alert::{AlertDispatcher, DispatchError, EmailDispatcher};
pub use capture::{CaptureError, CaptureService, CapturedPhoto, PhotoCapture};
pub use config::{ConfigError, SentinelConfig};
pub use detector::{MotionDetector, MotionState};
pub use ledger::{LedgerError, PhotoLedger};
pub use monitor::{Clock, MonitorStats, MonotonicClock, MotionMonitor};
