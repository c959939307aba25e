//! The chat view: conversations, the send flow, and message editing.
//!
//! A [`ChatView`] owns the in-memory conversation list.  Network calls are
//! never made while the state lock is held, so every operation locates its
//! conversation again by stable key once a call returns.  Replies that
//! arrive after their conversation was rewritten or deleted are dropped.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use bytes::Bytes;
use tokio::task::JoinHandle;

use crate::chat::attachments::PendingAttachment;
use crate::chat::config::ChatConfig;
use crate::chat::persist::{Exchange, flush_temporary, persist_exchange};
use crate::client::{ApiClient, Route};
use crate::error::{Error, Result};
use crate::observability::{
    CHAT_REPLY_DURATION, CHAT_SEND_FAILURES, CHAT_SEND_REJECTED, CHAT_SENDS, CHAT_STALE_REPLIES,
};
use crate::session::{SessionKey, SessionManager};
use crate::types::{Conversation, FileAnswer, Message, Persistence, Role};

/// Title given to chats the backend lists without one.
pub const UNTITLED_CHAT: &str = "Untitled Chat";

/// Title of the conversation shown when there is nothing to load.
pub const WELCOME_TITLE: &str = "Welcome";

const DELETE_MESSAGE_PROMPT: &str =
    "Are you sure you want to delete this message and all messages after it?";
const DELETE_CHAT_PROMPT: &str = "Delete this chat? This action cannot be undone.";
const LOAD_FAILED_TEXT: &str =
    "Messages could not be loaded. Sign in to view saved messages or check the server.";

/// Severity of a [`Notice`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Success,
    Error,
}

impl fmt::Display for NoticeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoticeLevel::Info => write!(f, "info"),
            NoticeLevel::Success => write!(f, "success"),
            NoticeLevel::Error => write!(f, "error"),
        }
    }
}

/// A transient message for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Asks the user to confirm a destructive action.
pub trait Confirm: Send + Sync {
    /// Returns true if the user accepted `prompt`.
    fn confirm(&self, prompt: &str) -> bool;
}

impl<F> Confirm for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn confirm(&self, prompt: &str) -> bool {
        self(prompt)
    }
}

/// Why a send was not attempted.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The text was empty or whitespace.
    Empty,
    /// Another send from this view has not finished.
    InFlight,
    /// There is no conversation to send to.
    NoConversation,
}

/// Result of a send.
#[derive(Debug, Clone)]
pub enum SendOutcome {
    /// Nothing was sent.
    Rejected(RejectReason),
    /// The reply was appended.
    Replied,
    /// No reply could be obtained; the error text was appended.
    Failed(Error),
    /// A reply arrived after its conversation was rewritten or removed.
    Stale,
}

impl SendOutcome {
    /// Returns true if a reply was appended.
    pub fn is_replied(&self) -> bool {
        matches!(self, SendOutcome::Replied)
    }
}

/// State shared between the view and its background tasks.
#[derive(Debug, Default)]
pub(crate) struct ViewState {
    pub(crate) conversations: Vec<Conversation>,
    pub(crate) current: usize,
    pub(crate) pending: Vec<PendingAttachment>,
    pub(crate) notices: Vec<Notice>,
    pub(crate) regenerating: Option<usize>,
    /// Contents of attachments sent from this process, by message id.
    pub(crate) uploads: HashMap<String, Vec<Option<Bytes>>>,
}

impl ViewState {
    pub(crate) fn find(&self, key: u64) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.key() == key)
    }

    pub(crate) fn find_mut(&mut self, key: u64) -> Option<&mut Conversation> {
        self.conversations.iter_mut().find(|c| c.key() == key)
    }

    pub(crate) fn notify(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        log::debug!("[chat] {level}: {message}");
        self.notices.push(Notice { level, message });
    }

    fn current_mut(&mut self) -> Option<&mut Conversation> {
        let current = self.current;
        self.conversations.get_mut(current)
    }

    /// Attachments of `message` as they can be composed again.
    fn restore_attachments(&self, message: &Message) -> Vec<PendingAttachment> {
        let held = message.id.as_ref().and_then(|id| self.uploads.get(id));
        message
            .files
            .iter()
            .enumerate()
            .map(|(i, file)| {
                let bytes = held.and_then(|h| h.get(i).cloned().flatten());
                PendingAttachment::restored(file, bytes)
            })
            .collect()
    }
}

pub(crate) fn lock(state: &Mutex<ViewState>) -> MutexGuard<'_, ViewState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Conversations and the operations a chat screen offers.
pub struct ChatView {
    client: ApiClient,
    config: Arc<ChatConfig>,
    confirm: Arc<dyn Confirm>,
    state: Arc<Mutex<ViewState>>,
    in_flight: AtomicBool,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatView {
    /// Create an empty view.  Call [`ChatView::load`] to populate it.
    pub fn new(client: ApiClient, config: ChatConfig, confirm: impl Confirm + 'static) -> Self {
        Self {
            client,
            config: Arc::new(config),
            confirm: Arc::new(confirm),
            state: Arc::new(Mutex::new(ViewState::default())),
            in_flight: AtomicBool::new(false),
            background: Mutex::new(Vec::new()),
        }
    }

    /// The client this view talks through.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// The view's configuration.
    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn session(&self) -> &Arc<SessionManager> {
        self.client.session()
    }

    fn state(&self) -> MutexGuard<'_, ViewState> {
        lock(&self.state)
    }

    /// A copy of every conversation, in sidebar order.
    pub fn conversations(&self) -> Vec<Conversation> {
        self.state().conversations.clone()
    }

    /// Index of the selected conversation.
    pub fn current_index(&self) -> usize {
        self.state().current
    }

    /// A copy of the selected conversation.
    pub fn current(&self) -> Option<Conversation> {
        let state = self.state();
        state.conversations.get(state.current).cloned()
    }

    /// Attachments that will go with the next send.
    pub fn pending_attachments(&self) -> Vec<PendingAttachment> {
        self.state().pending.clone()
    }

    /// Index of the bot message being regenerated, if any.
    pub fn regenerating(&self) -> Option<usize> {
        self.state().regenerating
    }

    /// Returns true while a send is waiting for its reply.
    pub fn is_sending(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Take every notice raised since the last call.
    pub fn drain_notices(&self) -> Vec<Notice> {
        std::mem::take(&mut self.state().notices)
    }

    fn notify(&self, level: NoticeLevel, message: impl Into<String>) {
        self.state().notify(level, message);
    }

    /// Wait for every scheduled background save to finish.
    pub async fn flush_background(&self) {
        loop {
            let handles = std::mem::take(
                &mut *self
                    .background
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner),
            );
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(err) = handle.await {
                    log::error!("[chat] background save panicked: {err}");
                }
            }
        }
    }

    fn spawn_background<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut background = self
            .background
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        background.retain(|handle| !handle.is_finished());
        background.push(tokio::spawn(task));
    }

    fn welcome(&self) -> Conversation {
        Conversation::local(Persistence::Temporary)
            .with_title(WELCOME_TITLE)
            .with_message(Message::new(Role::Bot, self.config.greeting.clone()))
    }

    /// Populate the view from the backend.
    ///
    /// Signed-in users get their stored chats with the first one opened;
    /// guests, and users without chats, get a welcome conversation.
    pub async fn load(&self) {
        if !self.session().is_authenticated() {
            log::debug!("[chat] no session, showing welcome conversation");
            self.show_welcome();
            return;
        }

        let status = self.client.check_auth_status().await;
        if !status.authenticated {
            self.session().remove_all(&[
                SessionKey::IsAuthenticated,
                SessionKey::UserEmail,
                SessionKey::UserName,
                SessionKey::UserPicture,
                SessionKey::AccessToken,
                SessionKey::RefreshToken,
            ]);
            self.notify(NoticeLevel::Error, "Session expired. Please login again.");
            self.client.navigator().navigate(Route::Login);
            return;
        }

        let chats = match self.client.get_chats().await {
            Ok(chats) => chats,
            Err(err) => {
                log::error!("[chat] failed to load chats: {err}");
                self.notify(NoticeLevel::Error, "Failed to load chats. Please try refreshing.");
                if self.state().conversations.is_empty() {
                    self.show_welcome();
                }
                return;
            }
        };
        if chats.is_empty() {
            self.show_welcome();
            return;
        }

        let conversations: Vec<Conversation> = chats
            .into_iter()
            .map(|chat| {
                let title = chat
                    .title
                    .filter(|t| !t.is_empty())
                    .unwrap_or_else(|| UNTITLED_CHAT.to_string());
                Conversation::saved(chat.id, Some(title))
            })
            .collect();
        let (first_key, first_id) = (conversations[0].key(), conversations[0].id.clone());
        {
            let mut state = self.state();
            state.conversations = conversations;
            state.current = 0;
        }
        match self.client.get_messages(&first_id).await {
            Ok(messages) => {
                if let Some(conversation) = self.state().find_mut(first_key) {
                    if conversation.messages.is_empty() {
                        conversation.messages = messages;
                    }
                }
            }
            Err(err) => log::warn!("[chat] failed to load messages for latest chat: {err}"),
        }
    }

    fn show_welcome(&self) {
        let welcome = self.welcome();
        let mut state = self.state();
        state.conversations = vec![welcome];
        state.current = 0;
    }

    /// Open conversation `index`, fetching its messages if none are loaded.
    pub async fn select_chat(&self, index: usize) -> Result<()> {
        let fetch = {
            let mut state = self.state();
            let conversation = state
                .conversations
                .get(index)
                .ok_or_else(|| Error::validation(format!("no chat at index {index}"), None))?;
            let fetch = (conversation.messages.is_empty()
                && !conversation.id.is_empty()
                && !conversation.is_temporary())
            .then(|| (conversation.key(), conversation.id.clone()));
            state.current = index;
            fetch
        };
        let Some((key, id)) = fetch else {
            return Ok(());
        };
        let result = self.client.get_messages(&id).await;
        let mut state = self.state();
        let Some(conversation) = state.find_mut(key) else {
            return Ok(());
        };
        match result {
            Ok(messages) => {
                if conversation.messages.is_empty() {
                    conversation.messages = messages;
                }
            }
            Err(err) => {
                log::warn!("[chat] failed to load messages for chat {id}: {err}");
                conversation.messages.push(Message::new(Role::Bot, LOAD_FAILED_TEXT));
            }
        }
        Ok(())
    }

    /// Start a new conversation at the top of the list and select it.
    ///
    /// In temporary mode the conversation stays local.  Otherwise a
    /// signed-in user's conversation is created on the backend right away.
    pub async fn new_chat(&self) {
        let signed_in = self.session().has_user();
        let temporary = signed_in && self.session().temporary_mode();
        let persistence = if temporary {
            Persistence::Temporary
        } else {
            Persistence::Pending
        };
        let conversation = Conversation::local(persistence)
            .with_message(Message::new(Role::Bot, self.config.greeting.clone()));
        let key = conversation.key();
        {
            let mut state = self.state();
            state.conversations.insert(0, conversation);
            state.current = 0;
        }

        if temporary {
            self.notify(NoticeLevel::Info, "Temporary chat created (not saved)");
            return;
        }
        if !signed_in {
            return;
        }
        if let Some(created) = self.client.create_chat("").await {
            let mut state = self.state();
            if let Some(conversation) = state.find_mut(key) {
                conversation.promote(created.id);
                state.notify(NoticeLevel::Success, "Chat created");
            }
        }
    }

    /// Retitle conversation `index`.
    pub async fn rename_chat(&self, index: usize, title: &str) -> Result<()> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation("Title cannot be empty", Some("title".to_string())));
        }
        let saved_id = {
            let mut state = self.state();
            let conversation = state
                .conversations
                .get_mut(index)
                .ok_or_else(|| Error::validation(format!("no chat at index {index}"), None))?;
            conversation.title = Some(title.to_string());
            let saved_id = conversation.is_saved().then(|| conversation.id.clone());
            state.notify(NoticeLevel::Success, "Chat title updated");
            saved_id
        };
        if let Some(id) = saved_id {
            self.client.update_chat(&id, title).await;
        }
        Ok(())
    }

    /// Remove conversation `index` after confirmation.
    ///
    /// Returns false if the user declined.
    pub async fn delete_chat(&self, index: usize) -> Result<bool> {
        if self.state().conversations.get(index).is_none() {
            return Err(Error::validation(format!("no chat at index {index}"), None));
        }
        if !self.confirm.confirm(DELETE_CHAT_PROMPT) {
            return Ok(false);
        }
        let saved_id = {
            let mut state = self.state();
            if index >= state.conversations.len() {
                return Ok(false);
            }
            let removed = state.conversations.remove(index);
            if state.current == index {
                state.current = index.saturating_sub(1);
            } else if state.current > index {
                state.current -= 1;
            }
            state.notify(NoticeLevel::Success, "Chat deleted");
            removed.is_saved().then_some(removed.id)
        };
        if let Some(id) = saved_id {
            self.client.delete_chat(&id).await;
        }
        Ok(true)
    }

    /// Turn temporary mode on or off.
    ///
    /// Turning it off stores every temporary conversation on the backend.
    pub async fn set_temporary_mode(&self, on: bool) {
        self.session().set_temporary_mode(on);
        if !on {
            self.flush_temporary_chats().await;
        }
    }

    /// Store every temporary conversation on the backend.
    pub async fn flush_temporary_chats(&self) {
        if !self.session().has_user() {
            return;
        }
        flush_temporary(&self.client, &self.state).await;
    }

    /// Indices and labels of conversations matching `query`.
    pub fn search(&self, query: &str) -> Vec<(usize, String)> {
        self.state()
            .conversations
            .iter()
            .enumerate()
            .filter(|(_, c)| c.matches(query))
            .map(|(i, c)| (i, c.label()))
            .collect()
    }

    /// Read a file and put it first among the pending attachments.
    pub async fn attach_file(&self, path: impl AsRef<Path>) -> Result<PendingAttachment> {
        let attachment = PendingAttachment::from_path(path).await?;
        self.attach(attachment.clone());
        Ok(attachment)
    }

    /// Put an attachment first among the pending attachments.
    pub fn attach(&self, attachment: PendingAttachment) {
        self.state().pending.insert(0, attachment);
    }

    /// Drop a pending attachment.  Returns false if no attachment has `id`.
    pub fn remove_attachment(&self, id: &str) -> bool {
        let mut state = self.state();
        let before = state.pending.len();
        state.pending.retain(|a| a.id != id);
        state.pending.len() != before
    }

    /// Send `text` with the pending attachments.
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.send_with(text, None).await
    }

    /// Send `text` with `attachments` instead of the pending ones.
    pub async fn send_with_files(&self, text: &str, attachments: Vec<PendingAttachment>) -> SendOutcome {
        self.send_with(text, Some(attachments)).await
    }

    async fn send_with(&self, text: &str, attachments: Option<Vec<PendingAttachment>>) -> SendOutcome {
        let text = text.trim();
        if text.is_empty() {
            CHAT_SEND_REJECTED.click();
            return SendOutcome::Rejected(RejectReason::Empty);
        }
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            CHAT_SEND_REJECTED.click();
            log::debug!("[chat] send rejected, another send is in flight");
            return SendOutcome::Rejected(RejectReason::InFlight);
        };

        let (key, generation, history, user, uploads) = {
            let mut state = self.state();
            let pending = std::mem::take(&mut state.pending);
            let attachments = attachments.unwrap_or(pending);
            let user = Message::user(text)
                .with_files(attachments.iter().map(PendingAttachment::to_file_ref).collect());
            if attachments.iter().any(PendingAttachment::has_bytes) {
                if let Some(id) = &user.id {
                    let held = attachments.iter().map(|a| a.bytes.clone()).collect();
                    state.uploads.insert(id.clone(), held);
                }
            }
            let Some(conversation) = state.current_mut() else {
                CHAT_SEND_REJECTED.click();
                return SendOutcome::Rejected(RejectReason::NoConversation);
            };
            conversation.messages.push(user.clone());
            let generation = conversation.bump_generation();
            let uploads: Vec<_> = attachments.iter().filter_map(PendingAttachment::to_upload).collect();
            (
                conversation.key(),
                generation,
                conversation.messages.clone(),
                user,
                uploads,
            )
        };

        CHAT_SENDS.click();
        let start = Instant::now();
        let reply = if uploads.is_empty() {
            self.client
                .get_gemini_response(&self.config.system_prompt, &history)
                .await
        } else {
            self.client
                .ask_with_files(text, uploads)
                .await
                .map(FileAnswer::into_text)
        };
        CHAT_REPLY_DURATION.add(start.elapsed().as_secs_f64());

        match reply {
            Ok(reply) => {
                let bot = Message::bot(reply);
                {
                    let mut state = self.state();
                    match state.find_mut(key) {
                        Some(conversation) if conversation.generation() == generation => {
                            conversation.messages.push(bot.clone());
                        }
                        _ => {
                            CHAT_STALE_REPLIES.click();
                            log::info!("[chat] discarding reply for a conversation that changed");
                            return SendOutcome::Stale;
                        }
                    }
                }
                let exchange = Exchange { key, user, bot };
                self.spawn_background(persist_exchange(
                    self.client.clone(),
                    Arc::clone(&self.state),
                    Arc::clone(&self.config),
                    exchange,
                ));
                SendOutcome::Replied
            }
            Err(err) => {
                CHAT_SEND_FAILURES.click();
                log::error!("[chat] failed to get response: {err}");
                let mut state = self.state();
                if let Some(conversation) = state.find_mut(key) {
                    if conversation.generation() == generation {
                        conversation
                            .messages
                            .push(Message::bot(self.config.error_text.clone()));
                    }
                }
                state.notify(NoticeLevel::Error, "Failed to get response");
                SendOutcome::Failed(err)
            }
        }
    }

    /// Replace user message `index` with `text` and ask again.
    ///
    /// Everything from `index` on is dropped and the message's attachments
    /// become the pending attachments.
    pub async fn edit_message(&self, index: usize, text: &str) -> Result<SendOutcome> {
        if text.trim().is_empty() {
            return Ok(SendOutcome::Rejected(RejectReason::Empty));
        }
        if self.is_sending() {
            return Ok(SendOutcome::Rejected(RejectReason::InFlight));
        }
        let restored = {
            let mut state = self.state();
            let message = state
                .conversations
                .get(state.current)
                .and_then(|c| c.messages.get(index))
                .cloned()
                .ok_or_else(|| Error::validation(format!("no message at index {index}"), None))?;
            if !message.is_user() {
                return Err(Error::validation("Only your own messages can be edited", None));
            }
            let restored = state.restore_attachments(&message);
            if let Some(conversation) = state.current_mut() {
                conversation.truncate(index);
            }
            state.notify(NoticeLevel::Info, "Sending edited message...");
            restored
        };
        Ok(self.send_with(text, Some(restored)).await)
    }

    /// Ask again for bot message `index`.
    ///
    /// The nearest user message before it is sent again, after everything
    /// from that user message on is dropped.
    pub async fn regenerate(&self, index: usize) -> Result<SendOutcome> {
        if self.is_sending() {
            return Ok(SendOutcome::Rejected(RejectReason::InFlight));
        }
        let (text, attachments) = {
            let mut state = self.state();
            let conversation = state
                .conversations
                .get(state.current)
                .ok_or_else(|| Error::validation("no chat selected", None))?;
            let message = conversation
                .messages
                .get(index)
                .ok_or_else(|| Error::validation(format!("no message at index {index}"), None))?;
            if !message.is_bot() {
                return Err(Error::validation("Only responses can be regenerated", None));
            }
            let Some(user_index) = conversation.nearest_user_before(index) else {
                state.notify(NoticeLevel::Error, "Cannot find user message to regenerate");
                return Err(Error::validation("Cannot find user message to regenerate", None));
            };
            let user = conversation.messages[user_index].clone();
            if user.text.trim().is_empty() {
                CHAT_SEND_REJECTED.click();
                return Ok(SendOutcome::Rejected(RejectReason::Empty));
            }
            let attachments = state.restore_attachments(&user);
            state.regenerating = Some(index);
            if let Some(conversation) = state.current_mut() {
                conversation.truncate(user_index);
            }
            state.notify(NoticeLevel::Info, "Regenerating response...");
            (user.text, attachments)
        };
        let outcome = self.send_with(&text, Some(attachments)).await;
        self.state().regenerating = None;
        Ok(outcome)
    }

    /// Drop message `index` and everything after it, after confirmation.
    ///
    /// Returns false if there is no such message or the user declined.
    pub fn delete_message(&self, index: usize) -> bool {
        let exists = {
            let state = self.state();
            state
                .conversations
                .get(state.current)
                .is_some_and(|c| index < c.messages.len())
        };
        if !exists || !self.confirm.confirm(DELETE_MESSAGE_PROMPT) {
            return false;
        }
        let mut state = self.state();
        match state.current_mut() {
            Some(conversation) if index < conversation.messages.len() => {
                conversation.truncate(index);
                state.notify(NoticeLevel::Success, "Message deleted");
                true
            }
            _ => false,
        }
    }
}

impl fmt::Debug for ChatView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatView")
            .field("client", &self.client)
            .field("sending", &self.is_sending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::client::RouteSlot;
    use crate::testing::{FakeBackend, harness};
    use crate::transport::RequestBody;

    fn view(backend: &FakeBackend) -> (ChatView, Arc<SessionManager>, Arc<RouteSlot>) {
        let (client, session, navigator) = harness(backend);
        let config = ChatConfig::new().with_save_delay(Duration::ZERO);
        (ChatView::new(client, config, |_: &str| true), session, navigator)
    }

    fn texts(conversation: &Conversation) -> Vec<String> {
        conversation.messages.iter().map(|m| m.text.clone()).collect()
    }

    fn last_model_prompt(backend: &FakeBackend) -> String {
        match backend.last_request("/api/gemini").unwrap().body {
            RequestBody::Json(body) => body["conversation"]
                .as_array()
                .and_then(|turns| turns.last())
                .and_then(|turn| turn["content"].as_str())
                .unwrap_or_default()
                .to_string(),
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn guest_load_shows_welcome() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;

        let conversations = view.conversations();
        assert_eq!(conversations.len(), 1);
        assert_eq!(
            texts(&conversations[0]),
            vec!["Hi! I'm Gemini — how can I help today?"]
        );
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn load_lists_chats_and_opens_the_first() {
        let backend = FakeBackend::new();
        let older = backend.add_chat(None);
        let newer = backend.add_chat(Some("Rust"));
        backend.add_message(&newer, Message::new(Role::User, "borrowck?"));
        let (view, session, _) = view(&backend);
        backend.sign_in(&session);

        view.load().await;
        let conversations = view.conversations();
        assert_eq!(conversations.len(), 2);
        assert_eq!(conversations[0].id, newer);
        assert_eq!(texts(&conversations[0]), vec!["borrowck?"]);
        assert_eq!(conversations[1].id, older);
        assert_eq!(conversations[1].title.as_deref(), Some(UNTITLED_CHAT));
        assert!(conversations.iter().all(Conversation::is_saved));
    }

    #[tokio::test]
    async fn load_with_rejected_session_redirects_to_login() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/auth/me", 403);
        let (view, session, navigator) = view(&backend);
        backend.sign_in(&session);
        session.set_temporary_mode(true);

        view.load().await;
        assert!(!session.is_authenticated());
        assert!(!session.has_user());
        assert!(session.get(SessionKey::AccessToken).is_none());
        assert!(session.temporary_mode());
        assert_eq!(navigator.take(), Some(Route::Login));
        assert_eq!(
            view.drain_notices()[0].message,
            "Session expired. Please login again."
        );
    }

    #[tokio::test]
    async fn load_failure_notifies() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/chats", 500);
        let (view, session, _) = view(&backend);
        backend.sign_in(&session);

        view.load().await;
        assert_eq!(view.conversations().len(), 1);
        assert!(
            view.drain_notices()
                .iter()
                .any(|n| n.message == "Failed to load chats. Please try refreshing.")
        );
    }

    #[tokio::test]
    async fn welcome_conversation_is_kept_local_until_flushed() {
        let backend = FakeBackend::new();
        let (view, session, _) = view(&backend);
        backend.sign_in(&session);
        view.load().await;
        assert!(view.current().unwrap().is_temporary());

        assert!(view.send("hello").await.is_replied());
        view.flush_background().await;
        assert!(backend.chats().is_empty());
        assert_eq!(backend.count("/api/messages"), 0);

        view.set_temporary_mode(false).await;
        let chats = backend.chats();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title.as_deref(), Some(WELCOME_TITLE));
        assert_eq!(backend.stored_messages(&chats[0].id).len(), 3);
        assert!(view.current().unwrap().is_saved());
    }

    #[tokio::test]
    async fn model_requests_carry_the_markdown_prompt() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        assert!(view.send("format this").await.is_replied());
        match backend.last_request("/api/gemini").unwrap().body {
            RequestBody::Json(body) => {
                let prompt = body["systemPrompt"].as_str().unwrap();
                assert_eq!(prompt, crate::chat::DEFAULT_SYSTEM_PROMPT);
                assert!(prompt.contains("proper Markdown formatting"));
            }
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[tokio::test]
    async fn flush_background_waits_for_delayed_saves() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let config = ChatConfig::new().with_save_delay(Duration::from_millis(100));
        let view = ChatView::new(client, config, |_: &str| true);
        view.load().await;
        view.new_chat().await;

        assert!(view.send("last words").await.is_replied());
        assert_eq!(backend.count("/api/messages"), 0);
        view.flush_background().await;
        let id = view.current().unwrap().id;
        assert_eq!(backend.stored_messages(&id).len(), 2);
    }

    #[tokio::test]
    async fn send_appends_user_and_bot_messages() {
        let backend = FakeBackend::new();
        backend.push_reply("Four.");
        let (view, _, _) = view(&backend);
        view.load().await;

        assert!(view.send("  2+2?  ").await.is_replied());
        let current = view.current().unwrap();
        assert_eq!(
            texts(&current),
            vec!["Hi! I'm Gemini — how can I help today?", "2+2?", "Four."]
        );
        assert!(current.messages[1].id.as_deref().unwrap().contains("-u-"));
        assert!(current.messages[1].timestamp.is_some());
    }

    #[tokio::test]
    async fn blank_sends_are_rejected_without_requests() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;

        assert!(matches!(
            view.send(" \n\t").await,
            SendOutcome::Rejected(RejectReason::Empty)
        ));
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn second_send_while_in_flight_issues_no_request() {
        let backend = FakeBackend::new();
        let gate = backend.gate_path("/api/gemini");
        let (view, _, _) = view(&backend);
        view.load().await;

        let first = view.send("one");
        let second = async {
            tokio::task::yield_now().await;
            assert!(view.is_sending());
            let outcome = view.send("two").await;
            gate.open();
            outcome
        };
        let (first, second) = tokio::join!(first, second);
        assert!(first.is_replied());
        assert!(matches!(second, SendOutcome::Rejected(RejectReason::InFlight)));
        assert_eq!(backend.count("/api/gemini"), 1);
        assert!(!view.is_sending());
    }

    #[tokio::test]
    async fn failed_send_appends_error_text() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/gemini", 500);
        let (view, _, _) = view(&backend);
        view.load().await;

        assert!(matches!(view.send("hello").await, SendOutcome::Failed(_)));
        let current = view.current().unwrap();
        assert_eq!(
            current.messages.last().unwrap().text,
            "⚠️ Sorry, I encountered an error. Please try again."
        );
        assert_eq!(view.drain_notices()[0].message, "Failed to get response");
        assert_eq!(backend.count("/api/gemini"), 1);
    }

    #[tokio::test]
    async fn reply_after_delete_is_discarded() {
        let backend = FakeBackend::new();
        let gate = backend.gate_path("/api/gemini");
        let (view, _, _) = view(&backend);
        view.load().await;

        let send = view.send("hello");
        let truncate = async {
            tokio::task::yield_now().await;
            assert!(view.delete_message(1));
            gate.open();
        };
        let (outcome, ()) = tokio::join!(send, truncate);
        assert!(matches!(outcome, SendOutcome::Stale));
        assert_eq!(view.current().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn reply_lands_in_its_own_conversation_after_switching() {
        let backend = FakeBackend::new();
        let gate = backend.gate_path("/api/gemini");
        let (view, _, _) = view(&backend);
        view.load().await;
        view.new_chat().await;
        view.select_chat(1).await.unwrap();
        let target = view.current().unwrap().key();

        let send = view.send("hello");
        let switch = async {
            tokio::task::yield_now().await;
            view.select_chat(0).await.unwrap();
            gate.open();
        };
        let (outcome, ()) = tokio::join!(send, switch);
        assert!(outcome.is_replied());
        let conversations = view.conversations();
        let landed = conversations.iter().find(|c| c.key() == target).unwrap();
        assert_eq!(landed.messages.len(), 3);
        assert_eq!(view.current().unwrap().messages.len(), 1);
    }

    #[tokio::test]
    async fn edit_keeps_prefix_and_appends_one_exchange() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        view.send("first").await;
        view.send("second").await;
        let before = view.current().unwrap();
        assert_eq!(before.messages.len(), 5);

        let outcome = view.edit_message(3, "second, edited").await.unwrap();
        assert!(outcome.is_replied());
        let after = view.current().unwrap();
        assert_eq!(after.messages.len(), 5);
        assert_eq!(after.messages[..3], before.messages[..3]);
        assert_eq!(after.messages[3].text, "second, edited");
        assert!(after.messages[3].is_user());
        assert_eq!(after.messages[4].text, "echo: second, edited");
        assert!(
            view.drain_notices()
                .iter()
                .any(|n| n.message == "Sending edited message...")
        );
    }

    #[tokio::test]
    async fn edit_rejects_bot_messages() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        assert!(view.edit_message(0, "x").await.unwrap_err().is_validation());
        assert!(view.edit_message(9, "x").await.is_err());
    }

    #[tokio::test]
    async fn regenerate_resends_nearest_user_message() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        view.send("first").await;
        view.send("second").await;
        let before = view.current().unwrap();
        backend.push_reply("another answer");

        let outcome = view.regenerate(4).await.unwrap();
        assert!(outcome.is_replied());
        assert_eq!(last_model_prompt(&backend), "second");
        let after = view.current().unwrap();
        assert_eq!(after.messages.len(), 5);
        assert_eq!(after.messages[..3], before.messages[..3]);
        assert_eq!(after.messages[3].text, "second");
        assert_eq!(after.messages[4].text, "another answer");
        assert!(view.regenerating().is_none());
    }

    #[tokio::test]
    async fn regenerate_without_user_message_fails() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;

        let err = view.regenerate(0).await.unwrap_err();
        assert!(err.is_validation());
        assert_eq!(
            view.drain_notices()[0].message,
            "Cannot find user message to regenerate"
        );
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn delete_message_requires_confirmation() {
        let backend = FakeBackend::new();
        let (client, _, _) = harness(&backend);
        let view = ChatView::new(client, ChatConfig::new(), |prompt: &str| {
            assert_eq!(
                prompt,
                "Are you sure you want to delete this message and all messages after it?"
            );
            false
        });
        view.load().await;
        assert!(!view.delete_message(0));
        assert_eq!(view.current().unwrap().messages.len(), 1);

        let (view, _, _) = self::view(&backend);
        view.load().await;
        view.send("hi").await;
        assert!(view.delete_message(1));
        assert_eq!(view.current().unwrap().messages.len(), 1);
        assert!(!view.delete_message(7));
    }

    #[tokio::test]
    async fn attachments_go_to_the_file_endpoint() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        view.attach(PendingAttachment::new("a.txt", &b"alpha"[..]));
        let doomed = PendingAttachment::new("b.txt", &b"beta"[..]);
        let doomed_id = doomed.id.clone();
        view.attach(doomed);
        assert!(view.remove_attachment(&doomed_id));
        assert!(!view.remove_attachment("missing"));

        assert!(view.send("what is this?").await.is_replied());
        let current = view.current().unwrap();
        assert_eq!(current.messages[1].files[0].name, "a.txt");
        assert_eq!(current.messages[2].text, "files a.txt: what is this?");
        assert!(view.pending_attachments().is_empty());
        assert_eq!(backend.count("/api/gemini"), 0);

        view.edit_message(1, "and now?").await.unwrap();
        assert_eq!(
            view.current().unwrap().messages[2].text,
            "files a.txt: and now?"
        );
    }

    #[tokio::test]
    async fn edit_sends_only_the_messages_own_files() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        assert!(view.send("plain question").await.is_replied());
        view.attach(PendingAttachment::new("unrelated.txt", &b"noise"[..]));

        let outcome = view.edit_message(1, "plain question, edited").await.unwrap();
        assert!(outcome.is_replied());
        let current = view.current().unwrap();
        assert!(current.messages[1].files.is_empty());
        assert_eq!(current.messages[2].text, "echo: plain question, edited");
        assert_eq!(backend.count("/api/gemini"), 2);
        assert_eq!(backend.count("/api/ask-with-files"), 0);
        assert_eq!(view.pending_attachments()[0].name, "unrelated.txt");
    }

    #[tokio::test]
    async fn regenerate_of_blank_message_keeps_conversation() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        {
            let mut state = view.state();
            let conversation = state.current_mut().unwrap();
            conversation.messages.push(Message::new(Role::User, ""));
            conversation.messages.push(Message::new(Role::Bot, "answer"));
        }

        let outcome = view.regenerate(2).await.unwrap();
        assert!(matches!(outcome, SendOutcome::Rejected(RejectReason::Empty)));
        assert_eq!(view.current().unwrap().messages.len(), 3);
        assert!(view.regenerating().is_none());
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn chat_management() {
        let backend = FakeBackend::new();
        let (view, session, _) = view(&backend);
        backend.sign_in(&session);
        view.load().await;

        view.new_chat().await;
        let created = view.current().unwrap();
        assert!(created.is_saved());
        assert_eq!(backend.chats().len(), 1);
        assert!(view.drain_notices().iter().any(|n| n.message == "Chat created"));

        view.rename_chat(0, "Plans").await.unwrap();
        assert_eq!(backend.chats()[0].title.as_deref(), Some("Plans"));
        assert!(view.rename_chat(0, " ").await.is_err());

        assert_eq!(view.search("plan"), vec![(0, "Plans".to_string())]);
        assert_eq!(view.search("").len(), 2);

        view.select_chat(1).await.unwrap();
        assert!(view.delete_chat(1).await.unwrap());
        assert_eq!(view.current_index(), 0);
        assert!(view.delete_chat(0).await.unwrap());
        assert!(backend.chats().is_empty());
        assert!(view.conversations().is_empty());
        assert!(view.delete_chat(0).await.is_err());
    }

    #[tokio::test]
    async fn delete_chat_shifts_later_selection() {
        let backend = FakeBackend::new();
        let (view, _, _) = view(&backend);
        view.load().await;
        view.new_chat().await;
        view.new_chat().await;
        view.select_chat(2).await.unwrap();

        assert!(view.delete_chat(0).await.unwrap());
        assert_eq!(view.current_index(), 1);
        assert_eq!(view.current().unwrap().title.as_deref(), Some(WELCOME_TITLE));
    }

    #[tokio::test]
    async fn select_chat_reports_unloadable_messages() {
        let backend = FakeBackend::new();
        let (view, session, _) = view(&backend);
        backend.add_chat(Some("A"));
        backend.add_chat(Some("B"));
        backend.sign_in(&session);
        view.load().await;
        backend.fail_path("/api/messages", 500);

        view.select_chat(1).await.unwrap();
        let current = view.current().unwrap();
        assert_eq!(current.messages.len(), 1);
        assert_eq!(current.messages[0].text, LOAD_FAILED_TEXT);
        assert!(view.select_chat(5).await.is_err());
    }
}
