//! Typed wrappers over the chat backend's REST endpoints.
//!
//! Reads and model calls propagate failures.  Writes whose loss the chat
//! view can tolerate (saving a message, creating, renaming, or deleting a
//! chat) log the failure and return `None`.  Account operations report
//! failure in an [`AccountResult`].

use std::path::Path;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::client::ApiClient;
use crate::error::{Error, Result};
use crate::transport::{
    ApiRequest, ApiResponse, FormPart, Method, encode_segment, query_string,
};
use crate::types::{
    AccountResult, AuthStatus, ChatSummary, ConversationTurn, FileAnswer, Message, ModelRequest,
    NewMessage, User,
};
use crate::types::payload::ModelReply;

/// Number of messages fetched per conversation unless asked otherwise.
pub const DEFAULT_MESSAGE_LIMIT: usize = 100;

/// A file to upload in a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    /// File name reported to the server.
    pub name: String,
    /// MIME type, when known.
    pub mime: Option<String>,
    /// File contents.
    pub bytes: Bytes,
}

impl Upload {
    /// Create a new `Upload`.
    pub fn new(name: impl Into<String>, mime: Option<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime,
            bytes: bytes.into(),
        }
    }

    /// Read `path` into an upload, guessing the MIME type from its extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let mime = mime_for_name(&name).map(String::from);
        Ok(Self::new(name, mime, bytes))
    }

    /// Returns true if the MIME type is `image/*`.
    pub fn is_image(&self) -> bool {
        self.mime.as_deref().is_some_and(|mime| mime.starts_with("image/"))
    }

    fn into_part(self, field: &str) -> FormPart {
        FormPart::File {
            name: field.to_string(),
            file_name: self.name,
            mime: self.mime,
            bytes: self.bytes,
        }
    }
}

/// Guess a MIME type from a file name's extension.
pub fn mime_for_name(name: &str) -> Option<&'static str> {
    let (_, ext) = name.rsplit_once('.')?;
    let mime = match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "md" => "text/markdown",
        "csv" => "text/csv",
        "json" => "application/json",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => return None,
    };
    Some(mime)
}

impl ApiClient {
    /// Ask the model to continue `history`.
    ///
    /// Every message is sent, bot messages with the `assistant` role.
    pub async fn get_gemini_response(&self, system_prompt: &str, history: &[Message]) -> Result<String> {
        log::debug!("[api] forwarding {} turns to the model", history.len());
        let body = ModelRequest {
            system_prompt: system_prompt.to_string(),
            conversation: history.iter().map(ConversationTurn::from).collect(),
        };
        let request = ApiRequest::json(Method::Post, "/api/gemini", &body)?;
        let response = self.authenticated_request(request).await?;
        if !response.is_success() {
            log::error!("[api] model error body: {}", response.text());
            return Err(backend_error(&response, "Backend error"));
        }
        let reply: ModelReply = response.json()?;
        Ok(reply.response.unwrap_or_default())
    }

    /// Ask `question` about `files`.
    pub async fn ask_with_files(&self, question: &str, files: Vec<Upload>) -> Result<FileAnswer> {
        let mut parts = vec![FormPart::Text {
            name: "question".to_string(),
            value: question.to_string(),
        }];
        parts.extend(files.into_iter().map(|file| file.into_part("files")));
        let request = ApiRequest::multipart(Method::Post, "/api/ask-with-files", parts);
        let response = self.authenticated_request(request).await?;
        if !response.is_success() {
            log::error!("[api] askWithFiles failed: {}", response.text());
            return Err(backend_error(&response, "askWithFiles failed"));
        }
        response.json()
    }

    /// Append a message to a stored conversation.
    ///
    /// Returns the stored message, or `None` if it could not be saved.
    pub async fn save_message(&self, message: &NewMessage) -> Option<Message> {
        let result: Result<Message> = async {
            let request = ApiRequest::json(Method::Post, "/api/messages", message)?;
            let response = self.authenticated_request(request).await?;
            success(response, "Failed to save message")?.json::<Message>()
        }
        .await;
        swallow("save message", result)
    }

    /// Fetch up to [`DEFAULT_MESSAGE_LIMIT`] messages of a conversation.
    pub async fn get_messages(&self, chat_id: &str) -> Result<Vec<Message>> {
        self.get_messages_with_limit(chat_id, DEFAULT_MESSAGE_LIMIT).await
    }

    /// Fetch up to `limit` messages of a conversation.
    pub async fn get_messages_with_limit(&self, chat_id: &str, limit: usize) -> Result<Vec<Message>> {
        let limit = limit.to_string();
        let endpoint = format!(
            "/api/messages{}",
            query_string(&[("chatId", chat_id), ("limit", &limit)])
        );
        let response = self.authenticated_request(ApiRequest::get(endpoint)).await?;
        parse_list(success(response, "Failed to fetch messages")?)
    }

    /// Fetch the most recent message of a conversation.
    ///
    /// This endpoint is public and sent without credentials.
    pub async fn get_latest_message(&self, chat_id: &str) -> Result<Message> {
        let endpoint = format!("/api/messages/latest/{}", encode_segment(chat_id));
        let response = self.request(&ApiRequest::get(endpoint)).await?;
        success(response, "Failed to fetch latest message")?.json()
    }

    /// List the signed-in user's conversations, most recent first.
    pub async fn get_chats(&self) -> Result<Vec<ChatSummary>> {
        let response = self.authenticated_request(ApiRequest::get("/api/chats")).await?;
        if !response.is_success() {
            log::error!("[api] getChats failed: {}", response.text());
        }
        parse_list(success(response, "Failed to fetch chats")?)
    }

    /// Create a conversation on the backend.
    pub async fn create_chat(&self, title: &str) -> Option<ChatSummary> {
        let result: Result<ChatSummary> = async {
            let request = ApiRequest::json(Method::Post, "/api/chats", &json!({ "title": title }))?;
            let response = self.authenticated_request(request).await?;
            success(response, "Failed to create chat")?.json::<ChatSummary>()
        }
        .await;
        swallow("create chat", result)
    }

    /// Rename a conversation on the backend.
    pub async fn update_chat(&self, chat_id: &str, title: &str) -> Option<ChatSummary> {
        let result: Result<ChatSummary> = async {
            let endpoint = format!("/api/chats/{}", encode_segment(chat_id));
            let request = ApiRequest::json(Method::Patch, endpoint, &json!({ "title": title }))?;
            let response = self.authenticated_request(request).await?;
            success(response, "Failed to update chat")?.json::<ChatSummary>()
        }
        .await;
        swallow("update chat", result)
    }

    /// Delete a conversation on the backend.
    pub async fn delete_chat(&self, chat_id: &str) -> Option<Value> {
        let result: Result<Value> = async {
            let endpoint = format!("/api/chats/{}", encode_segment(chat_id));
            let response = self.authenticated_request(ApiRequest::delete(endpoint)).await?;
            Ok(success(response, "Failed to delete chat")?.json_or_empty())
        }
        .await;
        swallow("delete chat", result)
    }

    /// Ask the backend whether the stored credentials are valid.
    ///
    /// Any failure, including an unreachable backend, reads as signed out.
    pub async fn check_auth_status(&self) -> AuthStatus {
        #[derive(serde::Deserialize)]
        struct Me {
            #[serde(default)]
            user: Option<User>,
        }

        let result: Result<Me> = async {
            let response = self.authenticated_request(ApiRequest::get("/api/auth/me")).await?;
            success(response, "Not authenticated")?.json::<Me>()
        }
        .await;
        match result {
            Ok(me) => AuthStatus {
                authenticated: true,
                user: me.user,
            },
            Err(err) => {
                log::info!("[api] auth status check failed: {err}");
                AuthStatus::default()
            }
        }
    }

    /// Replace the display name and, optionally, the profile picture.
    pub async fn update_profile(&self, name: &str, picture: Option<Upload>) -> AccountResult {
        let mut parts = vec![FormPart::Text {
            name: "name".to_string(),
            value: name.to_string(),
        }];
        if let Some(picture) = picture {
            parts.push(picture.into_part("profilePicture"));
        }
        let request = ApiRequest::multipart(Method::Put, "/api/auth/profile", parts);
        self.account_request(request, "Failed to update profile").await
    }

    /// Delete the signed-in user's account.
    pub async fn delete_account(&self) -> AccountResult {
        let request = ApiRequest::delete("/api/auth/account");
        self.account_request(request, "Failed to delete account").await
    }

    async fn account_request(&self, request: ApiRequest, fallback: &str) -> AccountResult {
        let response = match self.authenticated_request(request).await {
            Ok(response) => response,
            Err(err) => {
                log::error!("[api] {fallback}: {err}");
                return AccountResult::failed(err.message());
            }
        };
        if !response.is_success() {
            return AccountResult::failed(backend_error(&response, fallback).message());
        }
        response.json().unwrap_or_else(|err| {
            log::error!("[api] {fallback}: {err}");
            AccountResult::failed(fallback)
        })
    }
}

/// Build an [`Error::Backend`] from an error response.
///
/// The message is the body's `error` field, JSON-encoded when it is not a
/// string, or `fallback` when the body carries none.
pub(crate) fn backend_error(response: &ApiResponse, fallback: &str) -> Error {
    let body = response.json_or_empty();
    let message = match body.get("error") {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Null) | Some(Value::String(_)) | None => fallback.to_string(),
        Some(other) => other.to_string(),
    };
    let error_id = body
        .get("errorId")
        .and_then(Value::as_str)
        .map(String::from);
    Error::backend(response.status, message, error_id)
}

fn success(response: ApiResponse, message: &str) -> Result<ApiResponse> {
    if response.is_success() {
        Ok(response)
    } else {
        Err(Error::backend(response.status, message, None))
    }
}

/// Parse a JSON array, treating any other document as empty.
fn parse_list<T: DeserializeOwned>(response: ApiResponse) -> Result<Vec<T>> {
    match response.json::<Value>()? {
        Value::Array(items) => items
            .into_iter()
            .map(|item| serde_json::from_value(item).map_err(Error::from))
            .collect(),
        _ => Ok(Vec::new()),
    }
}

fn swallow<T>(what: &str, result: Result<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) => {
            log::error!("[api] failed to {what}: {err}");
            None
        }
    }
}
