//! The inbound listener: turns chat messages into files in the watched
//! directory.
//!
//! Messages are handled one at a time, in arrival order:
//! - messages from any chat other than the authorized one are dropped
//! - `/clear` wipes the watched directory and replies with the count
//! - a document with the recognized extension is downloaded and followed by a
//!   lifecycle cycle
//!
//! Per-message failures are logged and never stop the loop. Only the channel
//! itself failing (start error, error item, closed stream) ends it with an
//! error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use txtpool_core::channel::{Attachment, Channel, ChannelMessage};
use txtpool_core::error::{ChannelError, Result};
use txtpool_lifecycle::Lifecycle;

/// The administrative command that empties the watched directory.
pub const CLEAR_COMMAND: &str = "clear";

/// What the listener did with one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The message came from a chat other than the authorized one.
    Unauthorized,
    /// Nothing to do: plain text, unknown command, or a non-text document.
    Ignored,
    /// `/clear` ran.
    Cleared { removed: usize, failed: usize },
    /// `/clear` could not run at all.
    ClearFailed { reason: String },
    /// A document was stored and a lifecycle cycle ran.
    Saved { path: PathBuf, bytes: u64 },
    /// The document could not be downloaded or moved into place.
    DownloadFailed { reason: String },
}

/// Consumes one channel and maintains one watched directory.
pub struct Listener {
    channel: Arc<dyn Channel>,
    lifecycle: Arc<Lifecycle>,
}

impl Listener {
    pub fn new(channel: Arc<dyn Channel>, lifecycle: Arc<Lifecycle>) -> Self {
        Self { channel, lifecycle }
    }

    /// Consume messages until `cancel` fires.
    ///
    /// Returns an error when the channel cannot start, reports an error, or
    /// closes its stream on its own.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut rx = self.channel.start().await?;
        info!(channel = self.channel.name(), "Listener started");

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Listener stopping");
                    if let Err(e) = self.channel.stop().await {
                        warn!(error = %e, "Channel did not stop cleanly");
                    }
                    return Ok(());
                }
                next = rx.recv() => next,
            };

            match next {
                Some(Ok(msg)) => {
                    let outcome = self.handle(msg).await;
                    debug!(?outcome, "Message handled");
                }
                Some(Err(e)) => {
                    error!(error = %e, "Channel failed");
                    return Err(e.into());
                }
                None => {
                    error!("Channel stream closed unexpectedly");
                    return Err(ChannelError::ConnectionLost("update stream closed".into()).into());
                }
            }
        }
    }

    /// Handle a single inbound message.
    pub async fn handle(&self, msg: ChannelMessage) -> Outcome {
        if !self.channel.is_allowed(&msg.chat_id) {
            debug!(chat_id = %msg.chat_id, "Ignoring message from unauthorized chat");
            return Outcome::Unauthorized;
        }

        if msg.command() == Some(CLEAR_COMMAND) {
            return self.clear(&msg).await;
        }

        match msg.document() {
            Some(doc) => self.save_document(doc).await,
            None => {
                debug!(message_id = %msg.message_id, "Ignoring message without document");
                Outcome::Ignored
            }
        }
    }

    async fn clear(&self, msg: &ChannelMessage) -> Outcome {
        info!(chat_id = %msg.chat_id, "Clear requested");

        let (reply, outcome) = match self.lifecycle.clear().await {
            Ok(report) => {
                let reply = match &report.first_error {
                    None => format!("Deleted {} file(s)", report.removed),
                    Some(e) => format!(
                        "Deleted {} file(s), {} failed: {e}",
                        report.removed, report.failed
                    ),
                };
                let outcome = Outcome::Cleared {
                    removed: report.removed,
                    failed: report.failed,
                };
                (reply, outcome)
            }
            Err(e) => {
                warn!(error = %e, "Clear failed");
                (
                    format!("Failed to clear files: {e}"),
                    Outcome::ClearFailed {
                        reason: e.to_string(),
                    },
                )
            }
        };

        if let Err(e) = self
            .channel
            .send(&msg.chat_id, &reply, Some(&msg.message_id))
            .await
        {
            warn!(error = %e, "Failed to send clear reply");
        }

        outcome
    }

    async fn save_document(&self, doc: &Attachment) -> Outcome {
        let policy = self.lifecycle.policy();

        let Some(name) = doc
            .filename
            .as_deref()
            .filter(|n| n.ends_with(policy.extension.as_str()))
        else {
            debug!(filename = ?doc.filename, "Ignoring document without text extension");
            return Outcome::Ignored;
        };

        let file_name = upload_file_name(Utc::now().timestamp(), &doc.remote_id, &policy.extension);
        let dest = policy.dir.join(&file_name);
        // Hidden and without the text extension until complete, so a cycle
        // running meanwhile never merges a partial download.
        let staging = policy.dir.join(format!(".{file_name}.partial"));

        let bytes = match self.channel.download(doc, &staging).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to download file");
                discard(&staging).await;
                return Outcome::DownloadFailed {
                    reason: e.to_string(),
                };
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &dest).await {
            warn!(file = %name, error = %e, "Failed to move download into place");
            discard(&staging).await;
            return Outcome::DownloadFailed {
                reason: format!("Failed to move {file_name} into place: {e}"),
            };
        }
        info!(file = %name, path = %dest.display(), bytes, "File saved");

        if let Err(e) = self.lifecycle.run_cycle().await {
            warn!(error = %e, "Lifecycle cycle after upload failed");
        }

        Outcome::Saved { path: dest, bytes }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!(path = %path.display(), error = %e, "Failed to remove partial download");
    }
}

/// Local name for an upload: `<unix-seconds>_<remote id><extension>`.
///
/// Characters outside `[A-Za-z0-9_-]` in the remote id are replaced with `_`
/// so the name stays inside the watched directory.
pub fn upload_file_name(timestamp: i64, remote_id: &str, extension: &str) -> String {
    let id: String = remote_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{timestamp}_{id}{extension}")
}
