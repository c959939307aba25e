//! In-process backend used by the unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value, json};
use tokio::sync::Semaphore;

use crate::client::{ApiClient, RouteSlot};
use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::session::{SessionKey, SessionManager};
use crate::transport::{ApiRequest, ApiResponse, FormPart, Method, RequestBody, Transport};
use crate::types::{ChatSummary, Message};

pub(crate) const PRIMARY: &str = "http://primary.test";
pub(crate) const SECONDARY: &str = "http://secondary.test";

pub(crate) const PASSWORD: &str = "secret";
pub(crate) const CREDENTIAL: &str = "good-credential";
pub(crate) const OTP: &str = "123456";

/// Holds requests to one path until opened.
#[derive(Clone)]
pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
    pub(crate) fn open(&self) {
        self.0.add_permits(1 << 16);
    }
}

struct Attempt {
    origin: String,
    request: ApiRequest,
    answered: bool,
}

#[derive(Default)]
struct State {
    unreachable: HashSet<String>,
    failures: HashMap<String, u16>,
    gates: HashMap<String, Arc<Semaphore>>,
    attempts: Vec<Attempt>,
    token_generation: u64,
    refresh_token: String,
    chats: Vec<ChatSummary>,
    messages: HashMap<String, Vec<Message>>,
    next_id: u64,
    replies: VecDeque<String>,
}

#[derive(Clone)]
pub(crate) struct FakeBackend {
    state: Arc<Mutex<State>>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        let state = State {
            token_generation: 1,
            refresh_token: "refresh-1".to_string(),
            ..State::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub(crate) fn set_unreachable(&self, origin: &str, down: bool) {
        let mut state = self.state();
        if down {
            state.unreachable.insert(origin.to_string());
        } else {
            state.unreachable.remove(origin);
        }
    }

    pub(crate) fn fail_path(&self, path: &str, status: u16) {
        self.state().failures.insert(path.to_string(), status);
    }

    pub(crate) fn gate_path(&self, path: &str) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.state()
            .gates
            .insert(path.to_string(), Arc::clone(&semaphore));
        Gate(semaphore)
    }

    pub(crate) fn push_reply(&self, reply: &str) {
        self.state().replies.push_back(reply.to_string());
    }

    pub(crate) fn refresh_token(&self) -> String {
        self.state().refresh_token.clone()
    }

    pub(crate) fn current_access_token(&self) -> String {
        format!("valid-{}", self.state().token_generation)
    }

    /// Invalidate the current access token.
    pub(crate) fn expire_access_token(&self) {
        self.state().token_generation += 1;
    }

    /// Put a signed-in user with valid tokens into `session`.
    pub(crate) fn sign_in(&self, session: &SessionManager) {
        session.set(SessionKey::IsAuthenticated, "1");
        session.set(SessionKey::UserEmail, "ada@example.com");
        session.set(SessionKey::UserName, "Ada");
        session.set(SessionKey::AccessToken, self.current_access_token());
        session.set(SessionKey::RefreshToken, self.refresh_token());
    }

    pub(crate) fn add_chat(&self, title: Option<&str>) -> String {
        let mut state = self.state();
        let id = next_id(&mut state, "chat");
        state
            .chats
            .insert(0, ChatSummary::new(id.clone(), title.map(String::from)));
        state.messages.insert(id.clone(), Vec::new());
        id
    }

    pub(crate) fn add_message(&self, chat_id: &str, message: Message) {
        self.state()
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .push(message);
    }

    pub(crate) fn chats(&self) -> Vec<ChatSummary> {
        self.state().chats.clone()
    }

    pub(crate) fn stored_messages(&self, chat_id: &str) -> Vec<Message> {
        self.state()
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Answered requests to `path` on any origin.
    pub(crate) fn count(&self, path: &str) -> usize {
        self.requests(path).len()
    }

    pub(crate) fn requests(&self, path: &str) -> Vec<ApiRequest> {
        self.state()
            .attempts
            .iter()
            .filter(|a| a.answered && a.request.path() == path)
            .map(|a| a.request.clone())
            .collect()
    }

    pub(crate) fn last_request(&self, path: &str) -> Option<ApiRequest> {
        self.requests(path).pop()
    }

    /// Every origin tried for `path`, reachable or not, in order.
    pub(crate) fn origins_for(&self, path: &str) -> Vec<String> {
        self.state()
            .attempts
            .iter()
            .filter(|a| a.request.path() == path)
            .map(|a| a.origin.clone())
            .collect()
    }

    /// Total answered requests.
    pub(crate) fn total(&self) -> usize {
        self.state().attempts.iter().filter(|a| a.answered).count()
    }

    fn route(&self, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state();
        if let Some(status) = state.failures.get(request.path()).copied() {
            return respond(status, json!({ "error": "forced failure" }));
        }
        let path = request.path().to_string();
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        let body = match &request.body {
            RequestBody::Json(value) => value.clone(),
            _ => Value::Null,
        };

        match (request.method, segments.as_slice()) {
            (Method::Post, ["api", "auth", "login"]) => {
                if body["password"] == PASSWORD && body["email"].is_string() {
                    respond(200, session_body(&state, &body["email"], None))
                } else {
                    respond(
                        401,
                        json!({ "ok": false, "error": "Invalid credentials", "errorId": "E-LOGIN" }),
                    )
                }
            }
            (Method::Post, ["api", "auth", "google"]) => {
                if body["credential"] == CREDENTIAL {
                    respond(
                        200,
                        session_body(
                            &state,
                            &json!("grace@example.com"),
                            Some("https://img.test/grace.png"),
                        ),
                    )
                } else {
                    respond(400, json!({ "ok": false, "error": "Invalid Google credential" }))
                }
            }
            (Method::Post, ["api", "auth", "forgot-password"]) => {
                respond(200, json!({ "ok": true }))
            }
            (Method::Post, ["api", "auth", "verify-reset-otp"]) => {
                if body["otp"] == OTP {
                    respond(200, json!({ "ok": true }))
                } else {
                    respond(400, json!({ "ok": false, "error": "Invalid OTP" }))
                }
            }
            (Method::Post, ["api", "auth", "reset-password"]) => {
                if body["otp"] == OTP && body["newPassword"].is_string() {
                    respond(200, json!({ "ok": true }))
                } else {
                    respond(400, json!({ "ok": false, "error": "Reset failed" }))
                }
            }
            (Method::Post, ["api", "auth", "refresh"]) => {
                if body["refreshToken"] == state.refresh_token.as_str() {
                    state.token_generation += 1;
                    let token = format!("valid-{}", state.token_generation);
                    respond(200, json!({ "accessToken": token }))
                } else {
                    respond(401, json!({ "error": "Invalid refresh token" }))
                }
            }
            (Method::Get, ["api", "messages", "latest", chat_id]) => {
                match state.messages.get(*chat_id).and_then(|m| m.last()) {
                    Some(message) => respond(200, to_json(message)),
                    None => respond(404, json!({ "error": "No messages" })),
                }
            }
            (Method::Post, ["api", "gemini"]) | (Method::Post, ["api", "ask-with-files"])
                if !bearer_ok(&state, request, false) =>
            {
                unauthorized()
            }
            (Method::Post, ["api", "gemini"]) => {
                let last = body["conversation"]
                    .as_array()
                    .and_then(|turns| turns.last())
                    .and_then(|turn| turn["content"].as_str())
                    .unwrap_or_default()
                    .to_string();
                let reply = state
                    .replies
                    .pop_front()
                    .unwrap_or_else(|| format!("echo: {last}"));
                respond(200, json!({ "response": reply }))
            }
            (Method::Post, ["api", "ask-with-files"]) => {
                let mut question = String::new();
                let mut names = Vec::new();
                if let RequestBody::Multipart(parts) = &request.body {
                    for part in parts {
                        match part {
                            FormPart::Text { name, value } if name == "question" => {
                                question = value.clone()
                            }
                            FormPart::File { file_name, .. } => names.push(file_name.clone()),
                            FormPart::Text { .. } => {}
                        }
                    }
                }
                respond(
                    200,
                    json!({ "answer": format!("files {}: {question}", names.join(",")) }),
                )
            }
            _ if !bearer_ok(&state, request, true) => unauthorized(),
            (Method::Get, ["api", "auth", "me"]) => respond(
                200,
                json!({ "user": { "email": "ada@example.com", "name": "Ada" } }),
            ),
            (Method::Put, ["api", "auth", "profile"]) => {
                let mut name = None;
                let mut picture = false;
                if let RequestBody::Multipart(parts) = &request.body {
                    for part in parts {
                        match part {
                            FormPart::Text { name: field, value } if field == "name" => {
                                name = Some(value.clone())
                            }
                            FormPart::File { name: field, .. } if field == "profilePicture" => {
                                picture = true
                            }
                            _ => {}
                        }
                    }
                }
                match name {
                    Some(name) => {
                        let mut user = json!({ "email": "ada@example.com", "name": name });
                        if picture {
                            user["profilePicture"] = json!("https://img.test/uploaded.png");
                        }
                        respond(200, json!({ "ok": true, "user": user }))
                    }
                    None => respond(400, json!({ "error": "Name is required" })),
                }
            }
            (Method::Delete, ["api", "auth", "account"]) => respond(200, json!({ "ok": true })),
            (Method::Get, ["api", "chats"]) => respond(200, json!(state.chats)),
            (Method::Post, ["api", "chats"]) => {
                let id = next_id(&mut state, "chat");
                let title = body["title"].as_str().map(String::from);
                let chat = ChatSummary::new(id.clone(), title);
                state.chats.insert(0, chat.clone());
                state.messages.insert(id, Vec::new());
                respond(201, json!(chat))
            }
            (Method::Patch, ["api", "chats", id]) => {
                let title = body["title"].as_str().map(String::from);
                match state.chats.iter_mut().find(|c| c.id == *id) {
                    Some(chat) => {
                        chat.title = title;
                        let chat = chat.clone();
                        respond(200, json!(chat))
                    }
                    None => respond(404, json!({ "error": "Chat not found" })),
                }
            }
            (Method::Delete, ["api", "chats", id]) => {
                let before = state.chats.len();
                state.chats.retain(|c| c.id != *id);
                state.messages.remove(*id);
                if state.chats.len() < before {
                    respond(200, json!({ "ok": true }))
                } else {
                    respond(404, json!({ "error": "Chat not found" }))
                }
            }
            (Method::Get, ["api", "messages"]) => {
                let query = request.endpoint.split_once('?').map(|(_, q)| q).unwrap_or("");
                let chat_id = url::form_urlencoded::parse(query.as_bytes())
                    .find(|(k, _)| k == "chatId")
                    .map(|(_, v)| v.into_owned())
                    .unwrap_or_default();
                let messages = state.messages.get(&chat_id).cloned().unwrap_or_default();
                respond(200, json!(messages.iter().map(to_json).collect::<Vec<_>>()))
            }
            (Method::Post, ["api", "messages"]) => {
                let chat_id = body["chatId"].as_str().unwrap_or_default().to_string();
                let mut message: Message = match serde_json::from_value(body.clone()) {
                    Ok(message) => message,
                    Err(err) => return respond(400, json!({ "error": err.to_string() })),
                };
                message.id = Some(next_id(&mut state, "msg"));
                state
                    .messages
                    .entry(chat_id)
                    .or_default()
                    .push(message.clone());
                respond(201, to_json(&message))
            }
            _ => respond(404, json!({ "error": format!("no route for {path}") })),
        }
    }
}

#[async_trait::async_trait]
impl Transport for FakeBackend {
    async fn execute(&self, origin: &str, request: &ApiRequest) -> Result<ApiResponse> {
        let gate = {
            let mut state = self.state();
            let down = state.unreachable.contains(origin);
            state.attempts.push(Attempt {
                origin: origin.to_string(),
                request: request.clone(),
                answered: !down,
            });
            if down {
                return Err(Error::connection(
                    format!("connection refused by {origin}"),
                    None,
                ));
            }
            state.gates.get(request.path()).cloned()
        };
        if let Some(gate) = gate {
            let _permit = gate.acquire().await.map_err(|_| {
                Error::connection("gate closed", None)
            })?;
        }
        Ok(self.route(request))
    }
}

/// A client over `backend` with two origins, an in-memory session, and a
/// recording navigator.
pub(crate) fn harness(backend: &FakeBackend) -> (ApiClient, Arc<SessionManager>, Arc<RouteSlot>) {
    let config = ClientConfig::new([PRIMARY, SECONDARY]).unwrap();
    let session = Arc::new(SessionManager::in_memory());
    let navigator = Arc::new(RouteSlot::new());
    let client = ApiClient::with_transport(
        Arc::new(backend.clone()),
        &config,
        Arc::clone(&session),
        navigator.clone(),
    );
    (client, session, navigator)
}

fn next_id(state: &mut State, prefix: &str) -> String {
    state.next_id += 1;
    format!("{prefix}-{}", state.next_id)
}

fn session_body(state: &State, email: &Value, picture: Option<&str>) -> Value {
    let mut user = json!({ "email": email });
    if let Some(picture) = picture {
        user["picture"] = json!(picture);
        user["name"] = json!("Grace");
    }
    json!({
        "ok": true,
        "user": user,
        "accessToken": format!("valid-{}", state.token_generation),
        "refreshToken": state.refresh_token,
    })
}

fn bearer_ok(state: &State, request: &ApiRequest, required: bool) -> bool {
    match request.header("Authorization") {
        Some(value) => value == format!("Bearer valid-{}", state.token_generation),
        None => !required,
    }
}

fn unauthorized() -> ApiResponse {
    respond(401, json!({ "error": "Unauthorized" }))
}

fn to_json(message: &Message) -> Value {
    serde_json::to_value(message).unwrap()
}

fn respond(status: u16, body: Value) -> ApiResponse {
    ApiResponse::json_body(status, &body)
}
