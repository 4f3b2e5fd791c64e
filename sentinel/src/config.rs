//! Sentinel configuration.
//!
//! Loaded once at startup from an optional JSON file; every field has a default
//! so a partial file (or no file) is valid. Credentials normally arrive from the
//! environment through the CLI rather than the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// GPIO line assignments (BCM numbering on a Raspberry Pi).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinConfig {
    /// GPIO character device, e.g. `gpiochip0`
    pub chip: String,
    /// PIR sensor output
    pub sensor: u32,
    /// Red LED: motion currently present
    pub armed: u32,
    /// Yellow LED: episode accumulating toward the threshold
    pub active: u32,
    /// Green LED: alert delivered
    pub alert: u32,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            chip: "gpiochip0".to_string(),
            sensor: 4,
            armed: 17,
            active: 27,
            alert: 22,
        }
    }
}

/// Sample cadence, episode rules and indicator timings, in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub poll_interval_ms: u64,
    /// Minimum episode duration that qualifies for capture/alert
    pub reportable_threshold_ms: u64,
    /// Silence longer than this ends an episode
    pub debounce_gap_ms: u64,
    /// Spacing enforced between alert attempts
    pub cooldown_ms: u64,
    pub blink_period_ms: u64,
    pub flash_count: u32,
    pub flash_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 50,
            reportable_threshold_ms: 5_000,
            debounce_gap_ms: 300,
            cooldown_ms: 30_000,
            blink_period_ms: 1_000,
            flash_count: 3,
            flash_interval_ms: 100,
        }
    }
}

impl TimingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reportable_threshold(&self) -> Duration {
        Duration::from_millis(self.reportable_threshold_ms)
    }

    pub fn debounce_gap(&self) -> Duration {
        Duration::from_millis(self.debounce_gap_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn blink_period(&self) -> Duration {
        Duration::from_millis(self.blink_period_ms)
    }

    pub fn flash_interval(&self) -> Duration {
        Duration::from_millis(self.flash_interval_ms)
    }
}

/// Camera device and photo storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub warmup_frames: usize,
    /// Flat content directory holding the captured stills
    pub photos_dir: PathBuf,
    /// Append log backing the photo ledger
    pub ledger_file: PathBuf,
    pub filename_prefix: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            width: 640,
            height: 480,
            warmup_frames: 3,
            photos_dir: PathBuf::from("static/images"),
            ledger_file: PathBuf::from("logs/photo_logs.txt"),
            filename_prefix: "photo".to_string(),
        }
    }
}

/// Outbound email channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub smtp_host: String,
    /// Implicit-TLS submission port
    pub smtp_port: u16,
    pub sender: Option<String>,
    pub password: Option<String>,
    /// Defaults to the sender when unset
    pub receiver: Option<String>,
    pub subject: String,
    pub body: String,
    pub timeout_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            smtp_host: "smtp.gmail.com".to_string(),
            smtp_port: 465,
            sender: None,
            password: None,
            receiver: None,
            subject: "Photo from Raspberry Pi".to_string(),
            body: "Sent from Raspberry Pi".to_string(),
            timeout_secs: 30,
        }
    }
}

impl AlertConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The effective recipient: explicit receiver, else the sender.
    pub fn recipient(&self) -> Option<&str> {
        self.receiver.as_deref().or(self.sender.as_deref())
    }
}

// Keep the password out of logs.
impl std::fmt::Debug for AlertConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("sender", &self.sender)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("receiver", &self.receiver)
            .field("subject", &self.subject)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Complete process configuration, constructed once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub pins: PinConfig,
    pub timing: TimingConfig,
    pub capture: CaptureConfig,
    pub alert: AlertConfig,
}

impl SentinelConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the sample loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.timing;
        if t.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if t.reportable_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "reportable_threshold_ms must be > 0".into(),
            ));
        }
        if t.blink_period_ms == 0 {
            return Err(ConfigError::Invalid("blink_period_ms must be > 0".into()));
        }
        // Indicators are rendered once per tick, so each blink/flash phase
        // must last at least one poll interval to be visible.
        if t.poll_interval_ms > t.blink_period_ms / 2 {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) must not exceed half of blink_period_ms ({})",
                t.poll_interval_ms, t.blink_period_ms
            )));
        }
        if t.flash_count > 0 && t.poll_interval_ms > t.flash_interval_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) must not exceed flash_interval_ms ({})",
                t.poll_interval_ms, t.flash_interval_ms
            )));
        }
        if self.capture.filename_prefix.is_empty() {
            return Err(ConfigError::Invalid("filename_prefix must not be empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment() {
        let config = SentinelConfig::default();
        assert_eq!(config.pins.sensor, 4);
        assert_eq!(
            (config.pins.armed, config.pins.active, config.pins.alert),
            (17, 27, 22)
        );
        assert_eq!(config.timing.reportable_threshold(), Duration::from_secs(5));
        assert_eq!(config.timing.cooldown(), Duration::from_secs(30));
        assert_eq!(config.timing.flash_count, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        std::fs::write(
            &path,
            r#"{"timing": {"cooldown_ms": 60000}, "capture": {"photos_dir": "/tmp/shots"}}"#,
        )
        .unwrap();

        let config = SentinelConfig::load(&path).unwrap();
        assert_eq!(config.timing.cooldown(), Duration::from_secs(60));
        assert_eq!(config.timing.reportable_threshold_ms, 5_000);
        assert_eq!(config.capture.photos_dir, PathBuf::from("/tmp/shots"));
        assert_eq!(config.capture.filename_prefix, "photo");
    }

    #[test]
    fn test_load_rejects_zero_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sentinel.json");
        std::fs::write(&path, r#"{"timing": {"reportable_threshold_ms": 0}}"#).unwrap();

        assert!(matches!(
            SentinelConfig::load(&path),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_poll_interval_must_resolve_indicator_patterns() {
        let mut config = SentinelConfig::default();
        config.timing.poll_interval_ms = 200;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        // Flash limit only applies when there is a flash to render
        config.timing.flash_count = 0;
        assert!(config.validate().is_ok());

        config.timing.poll_interval_ms = 600;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.timing.poll_interval_ms = 100;
        config.timing.flash_count = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(
            SentinelConfig::load(&missing),
            Err(ConfigError::Read { .. })
        ));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "{ not json").unwrap();
        assert!(matches!(
            SentinelConfig::load(&bad),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_recipient_falls_back_to_sender() {
        let mut alert = AlertConfig {
            sender: Some("pi@example.com".into()),
            ..AlertConfig::default()
        };
        assert_eq!(alert.recipient(), Some("pi@example.com"));

        alert.receiver = Some("owner@example.com".into());
        assert_eq!(alert.recipient(), Some("owner@example.com"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let alert = AlertConfig {
            password: Some("hunter2".into()),
            ..AlertConfig::default()
        };
        let rendered = format!("{alert:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }
}
