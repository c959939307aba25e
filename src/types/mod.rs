// Public modules
pub mod chat;
pub mod conversation;
pub mod message;
pub mod payload;
pub mod user;

// Re-exports
pub use chat::ChatSummary;
pub use conversation::{Conversation, Persistence, UNTITLED_LABEL};
pub use message::{FileRef, Message, Role};
pub use payload::{ConversationTurn, FileAnswer, ModelRequest, NewMessage};
pub use user::{AccountResult, AuthStatus, User};
