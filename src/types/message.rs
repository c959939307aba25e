use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::utils::time::{now, unix_millis};

/// Who authored a message in a conversation.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person using the client.
    User,
    /// The assistant.
    Bot,
}

impl Role {
    /// The role name used by the model endpoint's conversation payload.
    pub fn as_turn_role(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Bot => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Bot => write!(f, "bot"),
        }
    }
}

/// A reference to a file attached to a message.
///
/// Only the metadata survives into a persisted message; the contents are
/// uploaded once with the question that referenced them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRef {
    /// File name as chosen by the user.
    pub name: String,

    /// Lower-case extension, or a MIME-derived type when no extension exists.
    #[serde(rename = "type", default)]
    pub kind: String,

    /// Size in bytes.
    #[serde(default)]
    pub size: u64,

    /// Where the file can be fetched from, if anywhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl FileRef {
    /// Create a new `FileRef`.
    pub fn new(name: impl Into<String>, kind: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            size,
            url: None,
        }
    }

    /// Set the URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Client-generated or server-assigned identifier.
    #[serde(default, alias = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Author of the message.
    pub role: Role,

    /// Message body.
    #[serde(default)]
    pub text: String,

    /// Attached files, in the order they were attached.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileRef>,

    /// When the message was composed or stored.
    #[serde(
        default,
        with = "crate::utils::time::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<OffsetDateTime>,
}

impl Message {
    /// Create a message without an id or timestamp.
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: None,
            role,
            text: text.into(),
            files: Vec::new(),
            timestamp: None,
        }
    }

    /// Create a user message with a fresh local id and the current time.
    pub fn user(text: impl Into<String>) -> Self {
        Self::stamped(Role::User, text)
    }

    /// Create a bot message with a fresh local id and the current time.
    pub fn bot(text: impl Into<String>) -> Self {
        Self::stamped(Role::Bot, text)
    }

    fn stamped(role: Role, text: impl Into<String>) -> Self {
        let at = now();
        Self {
            id: Some(local_message_id(role, at)),
            role,
            text: text.into(),
            files: Vec::new(),
            timestamp: Some(at),
        }
    }

    /// Set the attached files.
    pub fn with_files(mut self, files: Vec<FileRef>) -> Self {
        self.files = files;
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: OffsetDateTime) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Returns true if the user wrote this message.
    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }

    /// Returns true if the assistant wrote this message.
    pub fn is_bot(&self) -> bool {
        self.role == Role::Bot
    }

    /// Returns true if `other` is the same utterance as `self` composed
    /// within `window` of it.
    ///
    /// A message with no timestamp on either side never matches.
    pub fn same_utterance(&self, other: &Message, window: std::time::Duration) -> bool {
        if self.role != other.role || self.text != other.text {
            return false;
        }
        match (self.timestamp, other.timestamp) {
            (Some(a), Some(b)) => {
                let delta = (unix_millis(a) - unix_millis(b)).unsigned_abs();
                delta < window.as_millis()
            }
            _ => false,
        }
    }
}

/// Generate a locally unique message id such as `1718000000000-u-3fa9c1`.
fn local_message_id(role: Role, at: OffsetDateTime) -> String {
    let tag = match role {
        Role::User => "u",
        Role::Bot => "b",
    };
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}-{tag}-{}", unix_millis(at), &suffix[..6])
}
