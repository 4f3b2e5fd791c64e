//! Append-only photo ledger.
//!
//! The ledger mirrors every successfully delivered photo as a line in an
//! append log (`<file name>\t<RFC 3339 timestamp>`), and keeps an in-memory
//! copy ordered by capture time for count/recency queries. Reads take a shared
//! lock and see a consistent snapshot; an append in flight is either fully
//! visible or not at all.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::capture::CapturedPhoto;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Ledger IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LedgerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// One recorded photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// File name inside the content directory
    pub file_name: String,
    pub captured_at: DateTime<Local>,
}

impl LedgerEntry {
    fn to_log_line(&self) -> String {
        format!("{}\t{}\n", self.file_name, self.captured_at.to_rfc3339())
    }
}

pub struct PhotoLedger {
    photos_dir: PathBuf,
    log_path: PathBuf,
    entries: RwLock<Vec<LedgerEntry>>,
}

impl PhotoLedger {
    /// Open the ledger, loading prior entries.
    ///
    /// If the log does not exist yet, it is created and seeded once from the
    /// `.jpg` files already in `photos_dir`. From then on only the log counts,
    /// so photos whose alert was never delivered are not picked up later.
    pub fn open(
        photos_dir: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
    ) -> Result<Self, LedgerError> {
        let photos_dir = photos_dir.into();
        let log_path = log_path.into();

        let mut entries = if log_path.exists() {
            load_log(&log_path, &photos_dir)?
        } else {
            let seeded = scan_photos_dir(&photos_dir)?;
            write_log(&log_path, &seeded)?;
            if !seeded.is_empty() {
                info!(
                    "Seeded ledger {} with {} existing photos",
                    log_path.display(),
                    seeded.len()
                );
            }
            seeded
        };
        entries.sort_by(|a, b| {
            a.captured_at
                .cmp(&b.captured_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        info!(
            "Ledger {} holds {} photos",
            log_path.display(),
            entries.len()
        );

        Ok(Self {
            photos_dir,
            log_path,
            entries: RwLock::new(entries),
        })
    }

    pub fn photos_dir(&self) -> &Path {
        &self.photos_dir
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<LedgerEntry>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<LedgerEntry>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `photo`. The log line is written before the entry becomes
    /// visible to readers.
    pub fn append(&self, photo: &CapturedPhoto) -> Result<LedgerEntry, LedgerError> {
        let entry = LedgerEntry {
            file_name: photo.file_name(),
            captured_at: photo.captured_at,
        };

        let mut entries = self.write();

        if let Some(parent) = self.log_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
        }
        let mut log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| LedgerError::io(&self.log_path, e))?;
        log.write_all(entry.to_log_line().as_bytes())
            .map_err(|e| LedgerError::io(&self.log_path, e))?;

        let at = entries.partition_point(|e| e.captured_at <= entry.captured_at);
        entries.insert(at, entry.clone());
        info!("[LEDGER] Photo logged: {}", entry.file_name);

        Ok(entry)
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Up to `n` entries, most recent first.
    pub fn recent(&self, n: usize) -> Vec<LedgerEntry> {
        self.read().iter().rev().take(n).cloned().collect()
    }

    /// Like [`recent`](Self::recent) but skipping entries whose file has
    /// been removed from the content directory.
    pub fn recent_existing(&self, n: usize) -> Vec<LedgerEntry> {
        self.read()
            .iter()
            .rev()
            .filter(|entry| self.photos_dir.join(&entry.file_name).is_file())
            .take(n)
            .cloned()
            .collect()
    }
}

fn modified_time(path: &Path) -> Option<DateTime<Local>> {
    let modified: SystemTime = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Local>::from(modified))
}

fn load_log(log_path: &Path, photos_dir: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    let contents = std::fs::read_to_string(log_path).map_err(|e| LedgerError::io(log_path, e))?;

    let mut entries = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let entry = match line.split_once('\t') {
            Some((name, stamp)) => match DateTime::parse_from_rfc3339(stamp.trim()) {
                Ok(ts) => Some(LedgerEntry {
                    file_name: name.to_string(),
                    captured_at: ts.with_timezone(&Local),
                }),
                Err(e) => {
                    warn!(
                        "{}:{}: bad timestamp {stamp:?}: {e}",
                        log_path.display(),
                        lineno + 1
                    );
                    None
                }
            },
            // Bare file name: date it from the file itself
            None => modified_time(&photos_dir.join(line)).map(|captured_at| LedgerEntry {
                file_name: line.to_string(),
                captured_at,
            }),
        };

        match entry {
            Some(entry) => entries.push(entry),
            None => warn!(
                "{}:{}: skipping unreadable ledger line {line:?}",
                log_path.display(),
                lineno + 1
            ),
        }
    }
    Ok(entries)
}

fn scan_photos_dir(photos_dir: &Path) -> Result<Vec<LedgerEntry>, LedgerError> {
    if !photos_dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    let listing = std::fs::read_dir(photos_dir).map_err(|e| LedgerError::io(photos_dir, e))?;
    for dir_entry in listing {
        let path = dir_entry.map_err(|e| LedgerError::io(photos_dir, e))?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("jpg") {
            continue;
        }
        let (Some(name), Some(captured_at)) = (
            path.file_name().and_then(|s| s.to_str()),
            modified_time(&path),
        ) else {
            continue;
        };
        entries.push(LedgerEntry {
            file_name: name.to_string(),
            captured_at,
        });
    }
    Ok(entries)
}

fn write_log(log_path: &Path, entries: &[LedgerEntry]) -> Result<(), LedgerError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| LedgerError::io(parent, e))?;
    }
    let contents: String = entries.iter().map(LedgerEntry::to_log_line).collect();
    std::fs::write(log_path, contents).map_err(|e| LedgerError::io(log_path, e))
}
