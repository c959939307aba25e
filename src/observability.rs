use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("parley.client.requests");
pub(crate) static CLIENT_FALLBACKS: Counter = Counter::new("parley.client.fallbacks");
pub(crate) static CLIENT_NETWORK_ERRORS: Counter = Counter::new("parley.client.network_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("parley.client.request_duration_seconds");
pub(crate) static CLIENT_UNAUTHORIZED: Counter = Counter::new("parley.client.unauthorized");

pub(crate) static REFRESH_ATTEMPTS: Counter = Counter::new("parley.refresh.attempts");
pub(crate) static REFRESH_FAILURES: Counter = Counter::new("parley.refresh.failures");
pub(crate) static REFRESH_SHARED: Counter = Counter::new("parley.refresh.shared");

pub(crate) static CHAT_SENDS: Counter = Counter::new("parley.chat.sends");
pub(crate) static CHAT_SEND_REJECTED: Counter = Counter::new("parley.chat.send_rejected");
pub(crate) static CHAT_SEND_FAILURES: Counter = Counter::new("parley.chat.send_failures");
pub(crate) static CHAT_STALE_REPLIES: Counter = Counter::new("parley.chat.stale_replies");
pub(crate) static CHAT_REPLY_DURATION: Moments =
    Moments::new("parley.chat.reply_duration_seconds");

pub(crate) static PERSIST_MESSAGES_SAVED: Counter = Counter::new("parley.persist.messages_saved");
pub(crate) static PERSIST_DUPLICATES: Counter = Counter::new("parley.persist.duplicates_suppressed");
pub(crate) static PERSIST_CHATS_CREATED: Counter = Counter::new("parley.persist.chats_created");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_FALLBACKS);
    collector.register_counter(&CLIENT_NETWORK_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);
    collector.register_counter(&CLIENT_UNAUTHORIZED);

    collector.register_counter(&REFRESH_ATTEMPTS);
    collector.register_counter(&REFRESH_FAILURES);
    collector.register_counter(&REFRESH_SHARED);

    collector.register_counter(&CHAT_SENDS);
    collector.register_counter(&CHAT_SEND_REJECTED);
    collector.register_counter(&CHAT_SEND_FAILURES);
    collector.register_counter(&CHAT_STALE_REPLIES);
    collector.register_moments(&CHAT_REPLY_DURATION);

    collector.register_counter(&PERSIST_MESSAGES_SAVED);
    collector.register_counter(&PERSIST_DUPLICATES);
    collector.register_counter(&PERSIST_CHATS_CREATED);
}
