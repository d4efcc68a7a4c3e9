//! Chat channel implementations for txtpool.
//!
//! Each channel connects to a chat platform, yields inbound messages to the
//! listener and resolves document attachments to bytes on disk.
//!
//! Available channels:
//! - **Telegram**: Bot API long polling via `teloxide`

pub mod telegram;

pub use telegram::{TelegramChannel, TelegramConfig};
