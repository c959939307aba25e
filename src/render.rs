//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction so the REPL
//! can print conversations, notices, and lists without knowing where the
//! output goes.  The default implementation writes to stdout with optional
//! ANSI styling.

use std::io::{self, Stdout, Write};

use crate::chat::{Notice, NoticeLevel, PendingAttachment};
use crate::client::Route;
use crate::types::{Conversation, Message, Role};

/// ANSI escape code for dim text (used for metadata).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code for bold text (used for the speaker).
const ANSI_BOLD: &str = "\x1b[1m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the assistant).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for yellow text (used for informational notices).
const ANSI_YELLOW: &str = "\x1b[33m";

/// ANSI escape code for green text (used for success notices).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// Trait for rendering chat output.
pub trait Renderer: Send {
    /// Print message `index` (0-based) of the current conversation.
    fn print_message(&mut self, index: usize, message: &Message);

    /// Print every message of a conversation under its label.
    fn print_conversation(&mut self, conversation: &Conversation) {
        self.print_info(&format!("== {} ==", conversation.label()));
        for (index, message) in conversation.messages.iter().enumerate() {
            self.print_message(index, message);
        }
    }

    /// Print a conversation list, marking `current`.
    fn print_conversations(&mut self, entries: &[(usize, String)], current: usize);

    /// Print the attachments waiting for the next send.
    fn print_attachments(&mut self, attachments: &[PendingAttachment]);

    /// Print a notice raised by the chat view.
    fn print_notice(&mut self, notice: &Notice);

    /// Print a navigation request.
    fn print_route(&mut self, route: Route) {
        self.print_info(&format!("-> {route}"));
    }

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            out: io::stdout(),
            use_color,
        }
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self { out, use_color }
    }

    /// Consumes the renderer, returning its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn paint(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn print_message(&mut self, index: usize, message: &Message) {
        let speaker = match message.role {
            Role::User => self.paint(ANSI_BOLD, "you"),
            Role::Bot => self.paint(ANSI_CYAN, "gemini"),
        };
        let number = self.paint(ANSI_DIM, &format!("[{}]", index + 1));
        self.line(&format!("{number} {speaker}: {}", message.text));
        for file in &message.files {
            let size = format!("{:.2} MB", file.size as f64 / (1024.0 * 1024.0));
            let detail = self.paint(ANSI_DIM, &format!("    + {} ({size})", file.name));
            self.line(&detail);
        }
    }

    fn print_conversations(&mut self, entries: &[(usize, String)], current: usize) {
        if entries.is_empty() {
            self.line("No chats found");
            return;
        }
        for (index, label) in entries {
            let marker = if *index == current { "*" } else { " " };
            self.line(&format!("{marker} {:>3}. {label}", index + 1));
        }
    }

    fn print_attachments(&mut self, attachments: &[PendingAttachment]) {
        if attachments.is_empty() {
            self.line("No attachments");
            return;
        }
        for attachment in attachments {
            let id = self.paint(ANSI_DIM, &attachment.id);
            self.line(&format!(
                "{} ({}) {id}",
                attachment.name,
                attachment.size_label()
            ));
        }
    }

    fn print_notice(&mut self, notice: &Notice) {
        let style = match notice.level {
            NoticeLevel::Info => ANSI_YELLOW,
            NoticeLevel::Success => ANSI_GREEN,
            NoticeLevel::Error => ANSI_RED,
        };
        let text = self.paint(style, &format!("[{}] {}", notice.level, notice.message));
        self.line(&text);
    }

    fn print_error(&mut self, error: &str) {
        let text = self.paint(ANSI_RED, &format!("Error: {error}"));
        self.line(&text);
    }

    fn print_info(&mut self, info: &str) {
        self.line(info);
    }
}
