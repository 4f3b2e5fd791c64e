//! Still capture service.
//!
//! Wraps a [`StillCamera`] with exclusive, non-reentrant access and persists
//! each still into the flat content directory under a timestamped name that
//! never overwrites an existing file.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::sync::{Mutex, TryLockError};

use chrono::{DateTime, Local};
use hardware::{CameraError, StillCamera};
use thiserror::Error;
use tracing::info;

/// Timestamp layout used in photo file names.
pub const FILENAME_TIME_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Upper bound on collision suffixes tried for a single second.
const MAX_COLLISION_SUFFIX: u32 = 10_000;

#[derive(Error, Debug)]
pub enum CaptureError {
    /// Another capture holds the camera.
    #[error("Camera is busy with another capture")]
    DeviceBusy,

    #[error("Camera error: {0}")]
    Device(#[from] CameraError),

    /// The still was taken but could not be written to the content directory.
    #[error("Failed to store photo in {dir}: {source}")]
    Storage {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A persisted still.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedPhoto {
    pub path: PathBuf,
    pub captured_at: DateTime<Local>,
    /// Episode that produced the photo, when captured by the detection loop.
    pub episode: Option<u64>,
}

impl CapturedPhoto {
    pub fn for_episode(mut self, episode: u64) -> Self {
        self.episode = Some(episode);
        self
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Anything that can produce a persisted photo on demand.
pub trait PhotoCapture {
    fn capture(&self) -> Result<CapturedPhoto, CaptureError>;
}

pub struct CaptureService<C: StillCamera> {
    camera: Mutex<C>,
    photos_dir: PathBuf,
    prefix: String,
}

impl<C: StillCamera> CaptureService<C> {
    pub fn new(camera: C, photos_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            camera: Mutex::new(camera),
            photos_dir: photos_dir.into(),
            prefix: prefix.into(),
        }
    }

    fn storage_error(&self, source: std::io::Error) -> CaptureError {
        CaptureError::Storage {
            dir: self.photos_dir.clone(),
            source,
        }
    }

    /// Write `jpeg` under the first free name for `captured_at`.
    fn persist(&self, jpeg: &[u8], captured_at: DateTime<Local>) -> Result<PathBuf, CaptureError> {
        std::fs::create_dir_all(&self.photos_dir).map_err(|e| self.storage_error(e))?;

        let stamp = captured_at.format(FILENAME_TIME_FORMAT).to_string();
        for suffix in 0..MAX_COLLISION_SUFFIX {
            let path = self
                .photos_dir
                .join(photo_file_name(&self.prefix, &stamp, suffix));
            // create_new fails instead of truncating an existing photo
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(self.storage_error(e)),
            };
            if let Err(e) = file.write_all(jpeg).and_then(|()| file.sync_all()) {
                let _ = std::fs::remove_file(&path);
                return Err(self.storage_error(e));
            }
            return Ok(path);
        }

        Err(self.storage_error(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!("no free file name for {stamp}"),
        )))
    }
}

impl<C: StillCamera> PhotoCapture for CaptureService<C> {
    fn capture(&self) -> Result<CapturedPhoto, CaptureError> {
        // The guard is the device hold; it is released on every return path.
        let mut camera = match self.camera.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(CaptureError::DeviceBusy),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        let jpeg = camera.capture_jpeg()?;
        let captured_at = Local::now();
        let path = self.persist(&jpeg, captured_at)?;
        info!(
            "Photo saved: {} ({} bytes from {})",
            path.display(),
            jpeg.len(),
            camera.name()
        );

        Ok(CapturedPhoto {
            path,
            captured_at,
            episode: None,
        })
    }
}

/// `<prefix>_<stamp>.jpg`, or `<prefix>_<stamp>_<suffix>.jpg` for `suffix > 0`.
pub fn photo_file_name(prefix: &str, stamp: &str, suffix: u32) -> String {
    if suffix == 0 {
        format!("{prefix}_{stamp}.jpg")
    } else {
        format!("{prefix}_{stamp}_{suffix}.jpg")
    }
}
