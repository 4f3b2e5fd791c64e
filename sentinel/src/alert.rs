//! Email alert dispatch.
//!
//! One message per qualifying episode: a plain text body plus the captured
//! still as an `image/jpeg` attachment, submitted over implicit-TLS SMTP with
//! password authentication. Sends are blocking and bounded by the configured
//! transport timeout.

use std::path::PathBuf;

use lettre::message::header::ContentType;
use lettre::message::{Attachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use thiserror::Error;
use tracing::info;

use crate::capture::CapturedPhoto;
use crate::config::AlertConfig;

#[derive(Error, Debug)]
pub enum DispatchError {
    /// Credentials or addresses missing or malformed; retrying will not help.
    #[error("Alert configuration error: {0}")]
    Config(String),

    #[error("Failed to read attachment {path}: {source}")]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Connection, TLS, authentication or submission failure.
    #[error("SMTP transport error: {0}")]
    Transport(String),
}

/// Delivers an alert carrying a captured photo.
pub trait AlertDispatcher {
    fn send(&self, photo: &CapturedPhoto) -> Result<(), DispatchError>;
}

pub struct EmailDispatcher {
    config: AlertConfig,
}

impl EmailDispatcher {
    pub fn new(config: AlertConfig) -> Self {
        Self { config }
    }

    fn mailbox(role: &str, address: Option<&str>) -> Result<Mailbox, DispatchError> {
        let address = address
            .filter(|a| !a.trim().is_empty())
            .ok_or_else(|| DispatchError::Config(format!("no {role} address configured")))?;
        address
            .trim()
            .parse()
            .map_err(|e| DispatchError::Config(format!("invalid {role} address {address:?}: {e}")))
    }

    fn password(&self) -> Result<&str, DispatchError> {
        self.config
            .password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| DispatchError::Config("no sender password configured".into()))
    }

    /// Build the message for `photo` without sending it.
    pub fn compose(&self, photo: &CapturedPhoto) -> Result<Message, DispatchError> {
        let from = Self::mailbox("sender", self.config.sender.as_deref())?;
        let to = Self::mailbox("recipient", self.config.recipient())?;

        let bytes = std::fs::read(&photo.path).map_err(|source| DispatchError::Attachment {
            path: photo.path.clone(),
            source,
        })?;
        let jpeg = ContentType::parse("image/jpeg")
            .map_err(|e| DispatchError::Config(format!("attachment content type: {e}")))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(self.config.subject.clone())
            .multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(self.config.body.clone()))
                    .singlepart(Attachment::new(photo.file_name()).body(bytes, jpeg)),
            )
            .map_err(|e| DispatchError::Config(format!("failed to build message: {e}")))
    }

    fn transport(&self) -> Result<SmtpTransport, DispatchError> {
        let user = self.config.sender.clone().unwrap_or_default();
        let password = self.password()?.to_string();
        let builder = SmtpTransport::relay(&self.config.smtp_host)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        Ok(builder
            .port(self.config.smtp_port)
            .credentials(Credentials::new(user, password))
            .timeout(Some(self.config.timeout()))
            .build())
    }
}

impl AlertDispatcher for EmailDispatcher {
    fn send(&self, photo: &CapturedPhoto) -> Result<(), DispatchError> {
        self.password()?;
        let message = self.compose(photo)?;
        let transport = self.transport()?;

        info!(
            "Sending alert for {} via {}:{}",
            photo.file_name(),
            self.config.smtp_host,
            self.config.smtp_port
        );
        transport
            .send(&message)
            .map_err(|e| DispatchError::Transport(e.to_string()))?;
        info!("[EMAIL] Sent {}", photo.file_name());
        Ok(())
    }
}
