//! Chat application module.
//!
//! This module holds the conversation logic the `parley-chat` REPL is built
//! on.  It is independent of the terminal so it can be driven from tests or
//! another front-end.
//!
//! # Architecture
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`view`]: conversations, the send flow, and message editing
//! - [`persist`]: background persistence of exchanges
//! - [`attachments`]: files waiting to be sent
//! - [`commands`]: slash command parsing

mod attachments;
mod commands;
mod config;
mod persist;
mod view;

pub use crate::render::{PlainTextRenderer, Renderer};
pub use attachments::{AttachmentKind, PendingAttachment};
pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{
    ChatArgs, ChatConfig, DEFAULT_ERROR_TEXT, DEFAULT_GREETING, DEFAULT_SYSTEM_PROMPT,
};
pub use view::{
    ChatView, Confirm, Notice, NoticeLevel, RejectReason, SendOutcome, UNTITLED_CHAT,
    WELCOME_TITLE,
};
