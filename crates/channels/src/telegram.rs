//! Telegram channel adapter.
//!
//! Implements the Channel trait on top of `teloxide`:
//! - `getUpdates` long polling for inbound messages
//! - `getFile` + file download for document attachments
//! - `sendMessage` for replies
//!
//! The bot token is part of every Bot API URL, so URLs are never logged.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::payloads::{GetUpdatesSetters, SendMessageSetters};
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, ChatId, MediaKind, MessageId, MessageKind, ReplyParameters, UpdateKind,
};
use teloxide::{ApiError, RequestError};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use txtpool_config::TelegramCredentials;
use txtpool_core::channel::{Attachment, AttachmentKind, Channel, ChannelId, ChannelMessage};
use txtpool_core::error::ChannelError;

/// Slack added on top of the long-polling timeout for the HTTP request.
const POLL_SLACK: Duration = Duration::from_secs(15);

/// Telegram channel configuration.
#[derive(Clone)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub bot_token: String,
    /// The single chat whose messages are processed.
    pub chat_id: i64,
    /// Bot API base URL, without trailing slash.
    pub api_base: String,
    /// Long-polling timeout for `getUpdates`.
    pub poll_timeout: Duration,
    /// Pause after a failed `getUpdates` before polling again.
    pub retry_delay: Duration,
}

impl TelegramConfig {
    pub fn from_app_config(
        credentials: TelegramCredentials,
        settings: &txtpool_config::TelegramConfig,
    ) -> Self {
        Self {
            bot_token: credentials.bot_token,
            chat_id: credentials.chat_id,
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            poll_timeout: Duration::from_secs(settings.poll_timeout_secs),
            retry_delay: Duration::from_secs(3),
        }
    }
}

impl std::fmt::Debug for TelegramConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramConfig")
            .field("bot_token", &"[REDACTED]")
            .field("chat_id", &self.chat_id)
            .field("api_base", &self.api_base)
            .field("poll_timeout", &self.poll_timeout)
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

/// Errors polling can never recover from: a revoked token, a wrong API base
/// or another process polling the same bot.
fn is_fatal(error: &RequestError) -> bool {
    match error {
        RequestError::Api(ApiError::InvalidToken | ApiError::TerminatedByOtherGetUpdates) => true,
        RequestError::Api(ApiError::Unknown(description)) => description.starts_with("Not Found"),
        _ => false,
    }
}

fn request_error(method: &str, error: RequestError) -> ChannelError {
    match error {
        RequestError::Network(_) | RequestError::Io(_) => {
            ChannelError::ConnectionLost(format!("{method}: {error}"))
        }
        other => ChannelError::Api {
            method: method.to_string(),
            description: other.to_string(),
        },
    }
}

/// Convert a teloxide message into the channel-neutral form.
fn to_channel_message(channel_id: &ChannelId, msg: &Message) -> ChannelMessage {
    let (sender_id, sender_name) = match msg.from.as_ref() {
        Some(user) => (
            user.id.0.to_string(),
            Some(
                user.username
                    .clone()
                    .unwrap_or_else(|| user.first_name.clone()),
            ),
        ),
        None => (msg.chat.id.0.to_string(), None),
    };

    let attachments = match &msg.kind {
        MessageKind::Common(common) => match &common.media_kind {
            MediaKind::Document(d) => vec![Attachment {
                kind: AttachmentKind::Document,
                remote_id: d.document.file.id.clone(),
                filename: d.document.file_name.clone(),
                mime_type: d.document.mime_type.as_ref().map(ToString::to_string),
                size_bytes: Some(u64::from(d.document.file.size)),
            }],
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    ChannelMessage {
        channel_id: channel_id.clone(),
        message_id: msg.id.0.to_string(),
        sender_id,
        sender_name,
        content: msg.text().or(msg.caption()).unwrap_or_default().to_string(),
        chat_id: msg.chat.id.0.to_string(),
        attachments,
    }
}

/// Long-polling loop feeding `tx` until cancelled, the receiver is dropped,
/// or the API reports a fatal error.
async fn poll_updates(
    bot: Bot,
    channel_id: ChannelId,
    tx: mpsc::Sender<Result<ChannelMessage, ChannelError>>,
    cancel: CancellationToken,
    poll_timeout: Duration,
    retry_delay: Duration,
) {
    let timeout_secs = u32::try_from(poll_timeout.as_secs()).unwrap_or(u32::MAX);
    let mut offset: i32 = 0;

    loop {
        let request = bot
            .get_updates()
            .offset(offset)
            .timeout(timeout_secs)
            .allowed_updates(vec![AllowedUpdate::Message]);

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            r = request.send() => r,
        };

        match result {
            Ok(updates) => {
                for update in updates {
                    offset = update.id.as_offset();
                    let UpdateKind::Message(message) = update.kind else {
                        continue;
                    };
                    let msg = to_channel_message(&channel_id, &message);
                    if tx.send(Ok(msg)).await.is_err() {
                        debug!("Telegram receiver dropped, stopping poller");
                        return;
                    }
                }
            }
            Err(e) if is_fatal(&e) => {
                error!(error = %e, "getUpdates failed permanently");
                let _ = tx.send(Err(request_error("getUpdates", e))).await;
                return;
            }
            Err(e) => {
                let wait = match &e {
                    RequestError::RetryAfter(wait) => wait.duration(),
                    _ => retry_delay,
                };
                warn!(error = %e, retry_in_secs = wait.as_secs(), "getUpdates failed, retrying");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
        }
    }

    info!("Telegram poller stopped");
}

/// Telegram channel adapter.
pub struct TelegramChannel {
    config: TelegramConfig,
    channel_id: ChannelId,
    bot: Bot,
    /// Cancels the polling task started by `start`.
    poll_cancel: tokio::sync::Mutex<Option<CancellationToken>>,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Result<Self, ChannelError> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(config.poll_timeout + POLL_SLACK)
            .build()
            .map_err(|e| ChannelError::NotConfigured(format!("HTTP client: {e}")))?;

        let api_url = reqwest::Url::parse(&format!("{}/", config.api_base.trim_end_matches('/')))
            .map_err(|e| ChannelError::NotConfigured(format!("Bot API URL: {e}")))?;

        let bot = Bot::with_client(config.bot_token.clone(), client).set_api_url(api_url);

        Ok(Self {
            config,
            channel_id: ChannelId("telegram".into()),
            bot,
            poll_cancel: tokio::sync::Mutex::new(None),
        })
    }
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    fn id(&self) -> &ChannelId {
        &self.channel_id
    }

    async fn start(
        &self,
    ) -> Result<mpsc::Receiver<Result<ChannelMessage, ChannelError>>, ChannelError> {
        if self.config.bot_token.trim().is_empty() {
            return Err(ChannelError::NotConfigured("bot token is empty".into()));
        }

        let me = self
            .bot
            .get_me()
            .send()
            .await
            .map_err(|e| request_error("getMe", e))?;

        // Long polling is refused while a webhook is set.
        if let Err(e) = self.bot.delete_webhook().send().await {
            warn!(error = %e, "Failed to clear webhook");
        }

        info!(
            bot_id = me.id.0,
            username = ?me.username,
            chat_id = self.config.chat_id,
            "Telegram channel connected"
        );

        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        if let Some(previous) = self.poll_cancel.lock().await.replace(cancel.clone()) {
            previous.cancel();
        }

        tokio::spawn(poll_updates(
            self.bot.clone(),
            self.channel_id.clone(),
            tx,
            cancel,
            self.config.poll_timeout,
            self.config.retry_delay,
        ));

        Ok(rx)
    }

    async fn send(
        &self,
        chat_id: &str,
        content: &str,
        reply_to: Option<&str>,
    ) -> Result<(), ChannelError> {
        let failed = |reason: String| ChannelError::DeliveryFailed {
            channel: "telegram".into(),
            reason,
        };

        let chat = chat_id
            .parse::<i64>()
            .map_err(|_| failed(format!("invalid chat id '{chat_id}'")))?;

        let mut request = self.bot.send_message(ChatId(chat), content);
        if let Some(message_id) = reply_to.and_then(|id| id.parse::<i32>().ok()) {
            request = request.reply_parameters(
                ReplyParameters::new(MessageId(message_id)).allow_sending_without_reply(),
            );
        }

        request.send().await.map_err(|e| failed(e.to_string()))?;

        debug!(chat_id = %chat_id, content_len = content.len(), "Telegram message sent");
        Ok(())
    }

    async fn download(&self, attachment: &Attachment, dest: &Path) -> Result<u64, ChannelError> {
        let failed = |reason: String| ChannelError::DownloadFailed {
            remote_id: attachment.remote_id.clone(),
            reason,
        };

        let file = self
            .bot
            .get_file(attachment.remote_id.as_str())
            .send()
            .await
            .map_err(|e| failed(format!("getFile: {e}")))?;

        let result = async {
            let mut out = tokio::fs::File::create(dest)
                .await
                .map_err(|e| e.to_string())?;
            self.bot
                .download_file(&file.path, &mut out)
                .await
                .map_err(|e| e.to_string())?;
            out.flush().await.map_err(|e| e.to_string())?;
            out.metadata()
                .await
                .map(|meta| meta.len())
                .map_err(|e| e.to_string())
        }
        .await;

        match result {
            Ok(written) => {
                debug!(remote_id = %attachment.remote_id, bytes = written, "Attachment downloaded");
                Ok(written)
            }
            Err(reason) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!(path = %dest.display(), error = %rm, "Failed to remove partial download");
                }
                Err(failed(reason))
            }
        }
    }

    fn is_allowed(&self, chat_id: &str) -> bool {
        chat_id
            .parse::<i64>()
            .is_ok_and(|id| id == self.config.chat_id)
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        info!("Telegram channel stopping");
        if let Some(cancel) = self.poll_cancel.lock().await.take() {
            cancel.cancel();
        }
        Ok(())
    }

    async fn health_check(&self) -> Result<bool, ChannelError> {
        Ok(self.bot.get_me().send().await.is_ok())
    }
}
