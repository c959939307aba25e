// Public modules
pub mod auth;
pub mod chat;
pub mod client;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod observability;
pub mod render;
pub mod session;
pub mod transport;
pub mod types;
pub mod utils;

#[cfg(test)]
mod testing;

// Re-exports
pub use auth::{Auth, PasswordReset, ResetStep};
pub use client::{ApiClient, Navigator, Route, RouteSlot};
pub use config::ClientConfig;
pub use endpoints::Upload;
pub use error::{Error, OriginFailure, Result};
pub use observability::register_biometrics;
pub use session::{
    FileStorage, MemoryStorage, Session, SessionChange, SessionKey, SessionManager,
    SessionObserver, SessionStorage,
};
pub use transport::{ApiRequest, ApiResponse, FormPart, HttpTransport, Method, RequestBody, Transport};
pub use types::*;
