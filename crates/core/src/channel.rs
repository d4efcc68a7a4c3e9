//! Channel trait: the abstraction over chat platforms.
//!
//! A Channel connects txtpool to a messaging platform. It yields inbound
//! messages (optionally carrying a document), downloads attachments into the
//! watched directory, and sends short replies back to a chat.

use crate::error::ChannelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unique identifier for a channel instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message received from a channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// The channel this message belongs to
    pub channel_id: ChannelId,

    /// Platform-specific message identifier, used for replies
    pub message_id: String,

    /// Sender identifier (platform-specific user ID)
    pub sender_id: String,

    /// Human-readable sender name (if available)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,

    /// The text content (empty for pure document messages)
    #[serde(default)]
    pub content: String,

    /// The chat/group/DM identifier within the channel
    pub chat_id: String,

    /// Attachments (documents, images, ...)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl ChannelMessage {
    /// The first document attachment, if any.
    pub fn document(&self) -> Option<&Attachment> {
        self.attachments
            .iter()
            .find(|a| a.kind == AttachmentKind::Document)
    }

    /// The bot command in this message, without the leading `/` and any
    /// `@botname` suffix. `"/clear@txtpool_bot now"` yields `Some("clear")`.
    pub fn command(&self) -> Option<&str> {
        let first = self.content.split_whitespace().next()?;
        let command = first.strip_prefix('/')?;
        let command = command.split('@').next().unwrap_or(command);
        (!command.is_empty()).then_some(command)
    }
}

/// An attachment in a channel message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// Type of attachment
    pub kind: AttachmentKind,

    /// Platform reference used to resolve the content (Telegram `file_id`)
    pub remote_id: String,

    /// Original filename as sent by the user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,

    /// MIME type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    /// File size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Document,
    Other,
}

/// The core Channel trait.
///
/// Implementations handle platform-specific connection logic, attachment
/// resolution and reply formatting.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name (e.g., "telegram").
    fn name(&self) -> &str;

    /// Unique ID for this channel instance.
    fn id(&self) -> &ChannelId;

    /// Start listening for incoming messages.
    ///
    /// Returns a receiver that yields incoming messages. An `Err` item means
    /// the transport cannot make further progress; the receiver closing
    /// without [`Channel::stop`] means the same.
    async fn start(
        &self,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<ChannelMessage, ChannelError>>,
        ChannelError,
    >;

    /// Send a text message to a specific chat.
    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> std::result::Result<(), ChannelError>;

    /// Download an attachment's content into `dest`, returning the number of
    /// bytes written. `dest` is created or truncated.
    async fn download(
        &self,
        attachment: &Attachment,
        dest: &Path,
    ) -> std::result::Result<u64, ChannelError>;

    /// Check if a chat is allowed to upload files and issue commands.
    fn is_allowed(&self, chat_id: &str) -> bool;

    /// Stop the channel gracefully.
    async fn stop(&self) -> std::result::Result<(), ChannelError> {
        Ok(())
    }

    /// Health check: is the channel connected and operational?
    async fn health_check(&self) -> std::result::Result<bool, ChannelError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(content: &str) -> ChannelMessage {
        ChannelMessage {
            channel_id: ChannelId("telegram".into()),
            message_id: "1".into(),
            sender_id: "12345".into(),
            sender_name: Some("Alice".into()),
            content: content.into(),
            chat_id: "67890".into(),
            attachments: vec![],
        }
    }

    #[test]
    fn command_parsing() {
        assert_eq!(message("/clear").command(), Some("clear"));
        assert_eq!(message("/clear@txtpool_bot").command(), Some("clear"));
        assert_eq!(message("  /clear please").command(), Some("clear"));
        assert_eq!(message("clear").command(), None);
        assert_eq!(message("/").command(), None);
        assert_eq!(message("").command(), None);
    }

    #[test]
    fn document_lookup_skips_other_attachments() {
        let mut msg = message("");
        msg.attachments.push(Attachment {
            kind: AttachmentKind::Other,
            remote_id: "photo-1".into(),
            filename: None,
            mime_type: Some("image/jpeg".into()),
            size_bytes: None,
        });
        assert!(msg.document().is_none());

        msg.attachments.push(Attachment {
            kind: AttachmentKind::Document,
            remote_id: "doc-1".into(),
            filename: Some("notes.txt".into()),
            mime_type: Some("text/plain".into()),
            size_bytes: Some(5),
        });
        assert_eq!(msg.document().map(|a| a.remote_id.as_str()), Some("doc-1"));
    }

    #[test]
    fn attachment_serialization() {
        let attachment = Attachment {
            kind: AttachmentKind::Document,
            remote_id: "BQACAgIAAxkBAAI".into(),
            filename: Some("list.txt".into()),
            mime_type: None,
            size_bytes: Some(1024),
        };
        let json = serde_json::to_string(&attachment).unwrap();
        assert!(json.contains("document"));
        assert!(!json.contains("mime_type"));
    }
}
