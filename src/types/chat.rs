use serde::{Deserialize, Deserializer, Serialize};

/// A conversation as listed or returned by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSummary {
    /// Server-assigned identifier.
    #[serde(rename = "_id", alias = "id", deserialize_with = "string_or_number")]
    pub id: String,

    /// Title, if one was ever set.
    #[serde(default)]
    pub title: Option<String>,
}

impl ChatSummary {
    /// Create a new `ChatSummary`.
    pub fn new(id: impl Into<String>, title: Option<String>) -> Self {
        Self {
            id: id.into(),
            title,
        }
    }
}

/// Accept ids encoded either as strings or as bare numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}
