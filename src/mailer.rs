//! Mail transport seam.
//!
//! Actual delivery (SMTP, a provider API, OAuth) is an external collaborator;
//! the engine only needs `send -> delivery id | failure`. The file-backed
//! outbox makes the tool usable end-to-end without network access and leaves
//! an inspectable artifact per message.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;

pub trait MailTransport {
    /// Delivers one message, returning a transport-assigned delivery id.
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<String>;
}

/// Writes each message as a file under a directory instead of sending it.
pub struct OutboxMailer {
    dir: PathBuf,
}

impl OutboxMailer {
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create outbox directory {}", dir.display()))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl MailTransport for OutboxMailer {
    fn send(&self, to: &str, subject: &str, body: &str) -> Result<String> {
        let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3f");
        let recipient: String = to
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        let name = format!("{stamp}-{recipient}.eml");
        let path = self.dir.join(&name);

        let message = format!("To: {to}\nSubject: {subject}\n\n{body}\n");
        std::fs::write(&path, message)
            .with_context(|| format!("failed to write outbox message {}", path.display()))?;
        Ok(name)
    }
}
