//! # txtpool core
//!
//! Domain types, traits, and error definitions shared by every txtpool crate.
//! This crate has **no framework dependencies**: the chat transport, the
//! lifecycle manager and the HTTP gateway all depend inward on it.
//!
//! ## Design Philosophy
//!
//! The chat transport is a trait here; the Telegram implementation lives in
//! `txtpool-channels`. This keeps the listener testable with a scripted
//! channel and leaves room for other platforms.

pub mod channel;
pub mod error;

// Re-export key types at crate root for ergonomics
pub use channel::{Attachment, AttachmentKind, Channel, ChannelId, ChannelMessage};
pub use error::{ChannelError, Error, LifecycleError, Result};
