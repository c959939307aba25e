//! Background persistence of chat exchanges.

use std::sync::{Arc, Mutex};

use crate::chat::config::ChatConfig;
use crate::chat::view::{NoticeLevel, ViewState, lock};
use crate::client::ApiClient;
use crate::observability::{PERSIST_CHATS_CREATED, PERSIST_DUPLICATES, PERSIST_MESSAGES_SAVED};
use crate::types::{Conversation, Message, NewMessage, Persistence};

/// A user message and the reply it received.
#[derive(Debug, Clone)]
pub(crate) struct Exchange {
    pub(crate) key: u64,
    pub(crate) user: Message,
    pub(crate) bot: Message,
}

/// Store `exchange` after the configured delay.
///
/// The conversation is looked up by key at each step, so promotion, renames
/// and deletions made in the meantime are observed.  Failures are logged.
pub(crate) async fn persist_exchange(
    client: ApiClient,
    state: Arc<Mutex<ViewState>>,
    config: Arc<ChatConfig>,
    exchange: Exchange,
) {
    if !config.save_delay.is_zero() {
        tokio::time::sleep(config.save_delay).await;
    }
    let Some(snapshot) = lock(&state).find(exchange.key).cloned() else {
        log::debug!("[chat] conversation removed before it could be saved");
        return;
    };

    let session = client.session();
    let signed_in = session.has_user();
    let allow_save = !snapshot.is_temporary() && !(signed_in && session.temporary_mode());

    let mut chat_id = snapshot.is_saved().then(|| snapshot.id.clone());
    if signed_in && allow_save && chat_id.is_none() {
        let title = snapshot.title.clone().unwrap_or_default();
        match client.create_chat(&title).await {
            Some(created) => {
                PERSIST_CHATS_CREATED.click();
                log::info!("[chat] created chat {} for a local conversation", created.id);
                if let Some(conversation) = lock(&state).find_mut(exchange.key) {
                    conversation.promote(created.id.clone());
                }
                chat_id = Some(created.id);
            }
            None => log::warn!("[chat] could not create a chat for a local conversation"),
        }
    }

    if let Some(id) = chat_id.as_deref().filter(|_| allow_save) {
        let stored = match client.get_messages(id).await {
            Ok(stored) => stored,
            Err(err) => {
                log::warn!("[chat] could not fetch stored messages for {id}: {err}");
                Vec::new()
            }
        };
        for message in [&exchange.user, &exchange.bot] {
            if stored
                .iter()
                .any(|existing| existing.same_utterance(message, config.duplicate_window))
            {
                PERSIST_DUPLICATES.click();
                log::debug!("[chat] skipping duplicate {:?} message", message.role);
                continue;
            }
            let request = NewMessage::new(message.clone(), id, snapshot.title.clone());
            if client.save_message(&request).await.is_some() {
                PERSIST_MESSAGES_SAVED.click();
            }
        }
    }

    if snapshot.title.is_none() {
        let Some(title) = snapshot.derive_title(config.title_words) else {
            return;
        };
        let update = {
            let mut state = lock(&state);
            match state.find_mut(exchange.key) {
                Some(conversation) if conversation.title.is_none() => {
                    conversation.title = Some(title.clone());
                    conversation.is_saved().then(|| conversation.id.clone())
                }
                _ => None,
            }
        };
        if let Some(id) = update {
            client.update_chat(&id, &title).await;
        }
    }
}

/// Create every temporary conversation on the backend and store its
/// messages.
pub(crate) async fn flush_temporary(client: &ApiClient, state: &Arc<Mutex<ViewState>>) {
    let temporary: Vec<Conversation> = {
        let state = lock(state);
        state
            .conversations
            .iter()
            .filter(|c| c.persistence == Persistence::Temporary)
            .cloned()
            .collect()
    };
    if temporary.is_empty() {
        return;
    }
    lock(state).notify(
        NoticeLevel::Info,
        format!("Saving {} temporary chat(s)...", temporary.len()),
    );

    let mut failed = false;
    for conversation in temporary {
        let title = conversation.title.clone().unwrap_or_default();
        let Some(created) = client.create_chat(&title).await else {
            log::error!("[chat] could not create a chat for a temporary conversation");
            failed = true;
            continue;
        };
        PERSIST_CHATS_CREATED.click();
        for message in &conversation.messages {
            let request =
                NewMessage::new(message.clone(), created.id.clone(), conversation.title.clone());
            match client.save_message(&request).await {
                Some(_) => PERSIST_MESSAGES_SAVED.click(),
                None => failed = true,
            }
        }
        if let Some(local) = lock(state).find_mut(conversation.key()) {
            local.promote(created.id);
        }
    }

    let mut state = lock(state);
    if failed {
        state.notify(NoticeLevel::Error, "Failed to save temporary chats");
    } else {
        state.notify(NoticeLevel::Success, "Temporary chats saved");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeBackend, harness};
    use crate::types::Role;

    fn config() -> Arc<ChatConfig> {
        Arc::new(ChatConfig::new().with_save_delay(Duration::ZERO))
    }

    fn state_with(conversation: Conversation) -> Arc<Mutex<ViewState>> {
        Arc::new(Mutex::new(ViewState {
            conversations: vec![conversation],
            ..ViewState::default()
        }))
    }

    fn exchange(conversation: &Conversation) -> Exchange {
        Exchange {
            key: conversation.key(),
            user: conversation.messages[0].clone(),
            bot: conversation.messages[1].clone(),
        }
    }

    fn talk() -> Conversation {
        Conversation::local(Persistence::Pending)
            .with_message(Message::user("what   is the borrow checker doing"))
            .with_message(Message::bot("keeping you honest"))
    }

    #[tokio::test]
    async fn signed_in_pending_conversation_is_created_and_saved() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let conversation = talk();
        let state = state_with(conversation.clone());

        persist_exchange(client, Arc::clone(&state), config(), exchange(&conversation)).await;

        let chats = backend.chats();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title.as_deref(), Some("what is the borrow"));
        let local = lock(&state).conversations[0].clone();
        assert_eq!(local.id, chats[0].id);
        assert_eq!(local.key(), conversation.key());
        assert_eq!(local.messages, conversation.messages);
        assert_eq!(local.title.as_deref(), Some("what is the borrow"));
        let stored = backend.stored_messages(&chats[0].id);
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].role, Role::User);
        assert_eq!(stored[1].text, "keeping you honest");
    }

    #[tokio::test]
    async fn repeated_exchange_is_saved_once() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let id = backend.add_chat(Some("Existing"));
        let mut conversation = talk();
        conversation.promote(id.clone());
        conversation.title = Some("Existing".to_string());
        let state = state_with(conversation.clone());

        for _ in 0..2 {
            persist_exchange(
                client.clone(),
                Arc::clone(&state),
                config(),
                exchange(&conversation),
            )
            .await;
        }
        assert_eq!(backend.stored_messages(&id).len(), 2);
        assert_eq!(backend.count("/api/chats"), 0);
    }

    #[tokio::test]
    async fn saved_chat_with_numeric_id_is_not_created_again() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let mut conversation = Conversation::saved("20240501", Some("Numbers".to_string()));
        conversation.messages = talk().messages;
        let state = state_with(conversation.clone());

        persist_exchange(client, Arc::clone(&state), config(), exchange(&conversation)).await;
        assert_eq!(backend.count("/api/chats"), 0);
        assert_eq!(backend.stored_messages("20240501").len(), 2);
        assert_eq!(lock(&state).conversations[0].id, "20240501");
    }

    #[tokio::test]
    async fn temporary_conversations_are_not_sent() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let conversation = Conversation::local(Persistence::Temporary)
            .with_message(Message::user("secret plans"))
            .with_message(Message::bot("noted"));
        let state = state_with(conversation.clone());

        persist_exchange(client, Arc::clone(&state), config(), exchange(&conversation)).await;
        assert_eq!(backend.total(), 0);
        assert_eq!(lock(&state).conversations[0].title.as_deref(), Some("secret plans"));
    }

    #[tokio::test]
    async fn temporary_mode_blocks_saving_pending_conversations() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        session.set_temporary_mode(true);
        let conversation = talk();
        let state = state_with(conversation.clone());

        persist_exchange(client, state, config(), exchange(&conversation)).await;
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn guests_only_get_a_local_title() {
        let backend = FakeBackend::new();
        let (client, _, _) = harness(&backend);
        let conversation = talk();
        let state = state_with(conversation.clone());

        persist_exchange(client, Arc::clone(&state), config(), exchange(&conversation)).await;
        assert_eq!(backend.total(), 0);
        let local = lock(&state).conversations[0].clone();
        assert!(!local.is_saved());
        assert_eq!(local.title.as_deref(), Some("what is the borrow"));
    }

    #[tokio::test]
    async fn removed_conversation_is_skipped() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let conversation = talk();
        let state = Arc::new(Mutex::new(ViewState::default()));

        persist_exchange(client, state, config(), exchange(&conversation)).await;
        assert_eq!(backend.total(), 0);
    }

    #[tokio::test]
    async fn flush_promotes_temporary_conversations() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let temporary = Conversation::local(Persistence::Temporary)
            .with_title("Draft")
            .with_message(Message::new(Role::Bot, "Hi!"))
            .with_message(Message::user("plan a trip"));
        let state = state_with(temporary.clone());

        flush_temporary(&client, &state).await;

        let chats = backend.chats();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].title.as_deref(), Some("Draft"));
        assert_eq!(backend.stored_messages(&chats[0].id).len(), 2);
        let state = lock(&state);
        assert!(state.conversations[0].is_saved());
        assert_eq!(state.conversations[0].id, chats[0].id);
        let notices: Vec<_> = state.notices.iter().map(|n| n.message.as_str()).collect();
        assert_eq!(
            notices,
            vec!["Saving 1 temporary chat(s)...", "Temporary chats saved"]
        );
    }

    #[tokio::test]
    async fn flush_reports_failures() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/chats", 500);
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);
        let state = state_with(Conversation::local(Persistence::Temporary));

        flush_temporary(&client, &state).await;
        let state = lock(&state);
        assert!(state.conversations[0].is_temporary());
        assert_eq!(
            state.notices.last().map(|n| n.message.as_str()),
            Some("Failed to save temporary chats")
        );
    }
}
