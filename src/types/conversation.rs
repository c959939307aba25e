use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::types::{Message, Role};
use crate::utils::time::{now, unix_millis};

/// Sidebar label for a conversation with neither a title nor messages.
pub const UNTITLED_LABEL: &str = "New chat";

/// Whether, and how, a conversation is stored on the backend.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Persistence {
    /// Created in temporary mode; never sent to the backend until flushed.
    Temporary,
    /// Local id only; the backend copy is created lazily on first send.
    Pending,
    /// Stored on the backend under a durable id.
    Saved,
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

/// A titled, ordered sequence of messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    /// Local numeric id until promoted, then the server-assigned id.
    pub id: String,

    /// Display title.
    #[serde(default)]
    pub title: Option<String>,

    /// Messages in order.
    #[serde(default)]
    pub messages: Vec<Message>,

    /// Backend persistence state.
    pub persistence: Persistence,

    #[serde(skip, default = "next_key")]
    key: u64,

    #[serde(skip)]
    generation: u64,
}

fn next_key() -> u64 {
    NEXT_KEY.fetch_add(1, Ordering::Relaxed)
}

impl Conversation {
    /// Create a conversation that only exists on this client.
    ///
    /// The id is the current time in milliseconds, the convention the
    /// backend uses to recognize ids it has not assigned.
    pub fn local(persistence: Persistence) -> Self {
        Self::with_id(unix_millis(now()).to_string(), persistence)
    }

    /// Create a conversation the backend already knows about.
    pub fn saved(id: impl Into<String>, title: Option<String>) -> Self {
        let mut conversation = Self::with_id(id.into(), Persistence::Saved);
        conversation.title = title;
        conversation
    }

    fn with_id(id: String, persistence: Persistence) -> Self {
        Self {
            id,
            title: None,
            messages: Vec::new(),
            persistence,
            key: next_key(),
            generation: 0,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Append an initial message.
    pub fn with_message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Stable key that identifies this conversation for its whole lifetime
    /// in this process, across promotion and list reordering.
    pub fn key(&self) -> u64 {
        self.key
    }

    /// Counter bumped whenever the message list is rewritten.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Bump the generation and return the new value.
    pub fn bump_generation(&mut self) -> u64 {
        self.generation += 1;
        self.generation
    }

    /// Returns true once the backend holds this conversation.
    pub fn is_saved(&self) -> bool {
        self.persistence == Persistence::Saved
    }

    /// Returns true for conversations created in temporary mode.
    pub fn is_temporary(&self) -> bool {
        self.persistence == Persistence::Temporary
    }

    /// Replace the local id with the server-assigned one.
    ///
    /// Messages, title, and key are untouched.
    pub fn promote(&mut self, server_id: impl Into<String>) {
        self.id = server_id.into();
        self.persistence = Persistence::Saved;
    }

    /// Drop the message at `index` and everything after it.
    pub fn truncate(&mut self, index: usize) {
        self.messages.truncate(index);
        self.bump_generation();
    }

    /// Index of the nearest user message strictly before `index`.
    pub fn nearest_user_before(&self, index: usize) -> Option<usize> {
        let end = index.min(self.messages.len());
        self.messages[..end]
            .iter()
            .rposition(|message| message.role == Role::User)
    }

    /// Derive a title from the first user message (or the first message).
    ///
    /// Whitespace is collapsed and only the first `words` words are kept.
    pub fn derive_title(&self, words: usize) -> Option<String> {
        let first = self
            .messages
            .iter()
            .find(|message| message.is_user())
            .or_else(|| self.messages.first())?;
        let title = first
            .text
            .split_whitespace()
            .take(words)
            .collect::<Vec<_>>()
            .join(" ");
        if title.is_empty() { None } else { Some(title) }
    }

    /// Label shown in the conversation list.
    pub fn label(&self) -> String {
        if let Some(title) = self.title.as_deref().filter(|t| !t.is_empty()) {
            return title.to_string();
        }
        match self.messages.first() {
            Some(message) if !message.text.is_empty() => message.text.chars().take(40).collect(),
            _ => UNTITLED_LABEL.to_string(),
        }
    }

    /// Case-insensitive match against the title and every message body.
    ///
    /// A blank query matches everything.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return true;
        }
        self.title
            .as_deref()
            .is_some_and(|title| title.to_lowercase().contains(&query))
            || self
                .messages
                .iter()
                .any(|message| message.text.to_lowercase().contains(&query))
    }
}
