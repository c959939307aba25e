//! Request and response bodies exchanged with the chat endpoints.

use serde::{Deserialize, Serialize};

use crate::types::Message;

/// One turn of conversation history as the model endpoint expects it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConversationTurn {
    /// `user` or `assistant`.
    pub role: String,
    /// Message text.
    pub content: String,
}

impl From<&Message> for ConversationTurn {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.as_turn_role().to_string(),
            content: message.text.clone(),
        }
    }
}

/// Body of a model request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRequest {
    /// Instructions prepended to the conversation.
    pub system_prompt: String,
    /// The full ordered history, newest last.
    pub conversation: Vec<ConversationTurn>,
}

/// Body of a successful model reply.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ModelReply {
    #[serde(default)]
    pub response: Option<String>,
}

/// Body of a successful question-with-files reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAnswer {
    /// The model's answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,

    /// Text extracted from the files, when no answer was produced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<String>,
}

impl FileAnswer {
    /// Text to show for this answer.
    pub fn into_text(self) -> String {
        self.answer
            .filter(|a| !a.is_empty())
            .or(self.extracted.filter(|e| !e.is_empty()))
            .unwrap_or_else(|| "(No response received)".to_string())
    }
}

/// A message being appended to a stored conversation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    /// The message itself.
    #[serde(flatten)]
    pub message: Message,
    /// Conversation the message belongs to.
    pub chat_id: String,
    /// Conversation title at the time of saving.
    pub title: Option<String>,
}

impl NewMessage {
    /// Create a new `NewMessage`.
    pub fn new(message: Message, chat_id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            message,
            chat_id: chat_id.into(),
            title,
        }
    }
}
