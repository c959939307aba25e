//! Error types for the parley client.
//!
//! Every fallible operation in the crate returns [`Error`].  The variants
//! separate failures that trigger backend fallback (connection-level) from
//! failures the caller has to act on (authentication, validation, backend
//! responses).

use std::error;
use std::fmt;
use std::io;
use std::sync::Arc;

/// A single origin that could not be reached while falling back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OriginFailure {
    /// The origin that was attempted.
    pub origin: String,
    /// Why the attempt failed.
    pub message: String,
}

/// The main error type for parley.
#[derive(Clone, Debug)]
pub enum Error {
    /// No configured backend could be reached.
    Network {
        /// Human-readable error message.
        message: String,
        /// One entry per origin that was attempted, in priority order.
        failures: Vec<OriginFailure>,
    },

    /// A single origin refused or dropped the connection.
    Connection {
        /// Human-readable error message.
        message: String,
        /// Underlying cause.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A single origin did not answer in time.
    Timeout {
        /// Human-readable error message.
        message: String,
        /// Duration of the timeout in seconds.
        duration: Option<f64>,
    },

    /// The credentials were rejected and could not be refreshed.
    Authentication {
        /// Human-readable error message.
        message: String,
    },

    /// Client-side validation of user input failed.
    Validation {
        /// Human-readable error message.
        message: String,
        /// Field that failed validation.
        param: Option<String>,
    },

    /// The backend answered with an error status or an `ok: false` payload.
    Backend {
        /// HTTP status code.
        status_code: u16,
        /// Human-readable error message.
        message: String,
        /// Server-side error identifier, when the backend reports one.
        error_id: Option<String>,
    },

    /// Error during JSON or YAML serialization or deserialization.
    Serialization {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// I/O error.
    Io {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Arc<io::Error>,
    },

    /// HTTP client error that happened after a response started.
    HttpClient {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    },

    /// A URL parsing or manipulation error.
    Url {
        /// Human-readable error message.
        message: String,
        /// The underlying error.
        source: Option<url::ParseError>,
    },

    /// Invalid client configuration.
    Config {
        /// Human-readable error message.
        message: String,
    },
}

impl Error {
    /// Creates a new network error from the per-origin failures.
    pub fn network(message: impl Into<String>, failures: Vec<OriginFailure>) -> Self {
        Error::Network {
            message: message.into(),
            failures,
        }
    }

    /// Creates a new connection error.
    pub fn connection(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Connection {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new timeout error.
    pub fn timeout(message: impl Into<String>, duration: Option<f64>) -> Self {
        Error::Timeout {
            message: message.into(),
            duration,
        }
    }

    /// Creates a new authentication error.
    pub fn authentication(message: impl Into<String>) -> Self {
        Error::Authentication {
            message: message.into(),
        }
    }

    /// Creates a new validation error.
    pub fn validation(message: impl Into<String>, param: Option<String>) -> Self {
        Error::Validation {
            message: message.into(),
            param,
        }
    }

    /// Creates a new backend error.
    pub fn backend(status_code: u16, message: impl Into<String>, error_id: Option<String>) -> Self {
        Error::Backend {
            status_code,
            message: message.into(),
            error_id,
        }
    }

    /// Creates a new serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::Serialization {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new I/O error.
    pub fn io(message: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source: Arc::new(source),
        }
    }

    /// Creates a new HTTP client error.
    pub fn http_client(
        message: impl Into<String>,
        source: Option<Box<dyn error::Error + Send + Sync>>,
    ) -> Self {
        Error::HttpClient {
            message: message.into(),
            source: source.map(Arc::from),
        }
    }

    /// Creates a new URL error.
    pub fn url(message: impl Into<String>, source: Option<url::ParseError>) -> Self {
        Error::Url {
            message: message.into(),
            source,
        }
    }

    /// Creates a new configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
        }
    }

    /// Returns true if no backend could be reached.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Network { .. })
    }

    /// Returns true if this error happened at the transport layer of one
    /// origin, before any HTTP status was received.
    ///
    /// These are the only errors that make the client try the next origin.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Timeout { .. })
    }

    /// Returns true if this error is related to authentication.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Error::Authentication { .. })
    }

    /// Returns true if this error is a validation error.
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Validation { .. })
    }

    /// Returns true if the backend reported the failure.
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::Backend { .. })
    }

    /// Returns the status code associated with this error, if any.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Backend { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Returns the message without the category prefix used by `Display`.
    ///
    /// This is the text shown to users in notifications.
    pub fn message(&self) -> &str {
        match self {
            Error::Network { message, .. }
            | Error::Connection { message, .. }
            | Error::Timeout { message, .. }
            | Error::Authentication { message }
            | Error::Validation { message, .. }
            | Error::Backend { message, .. }
            | Error::Serialization { message, .. }
            | Error::Io { message, .. }
            | Error::HttpClient { message, .. }
            | Error::Url { message, .. }
            | Error::Config { message } => message,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Network { message, failures } => {
                if failures.is_empty() {
                    write!(f, "Network error: {message}")
                } else {
                    let origins = failures
                        .iter()
                        .map(|failure| failure.origin.as_str())
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "Network error: {message} (tried {origins})")
                }
            }
            Error::Connection { message, .. } => {
                write!(f, "Connection error: {message}")
            }
            Error::Timeout { message, duration } => {
                if let Some(duration) = duration {
                    write!(f, "Timeout error: {message} ({duration} seconds)")
                } else {
                    write!(f, "Timeout error: {message}")
                }
            }
            Error::Authentication { message } => {
                write!(f, "Authentication error: {message}")
            }
            Error::Validation { message, param } => {
                if let Some(param) = param {
                    write!(f, "Validation error: {message} (field: {param})")
                } else {
                    write!(f, "Validation error: {message}")
                }
            }
            Error::Backend {
                status_code,
                message,
                error_id,
            } => {
                if let Some(error_id) = error_id {
                    write!(
                        f,
                        "Backend error ({status_code}): {message} (Error ID: {error_id})"
                    )
                } else {
                    write!(f, "Backend error ({status_code}): {message}")
                }
            }
            Error::Serialization { message, .. } => {
                write!(f, "Serialization error: {message}")
            }
            Error::Io { message, .. } => {
                write!(f, "I/O error: {message}")
            }
            Error::HttpClient { message, .. } => {
                write!(f, "HTTP client error: {message}")
            }
            Error::Url { message, .. } => {
                write!(f, "URL error: {message}")
            }
            Error::Config { message } => {
                write!(f, "Configuration error: {message}")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Connection { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Serialization { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Io { source, .. } => Some(source),
            Error::HttpClient { source, .. } => source
                .as_ref()
                .map(|e| e.as_ref() as &(dyn error::Error + 'static)),
            Error::Url { source, .. } => {
                source.as_ref().map(|e| e as &(dyn error::Error + 'static))
            }
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err.to_string(), err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::serialization(format!("JSON error: {err}"), Some(Box::new(err)))
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::serialization(format!("YAML error: {err}"), Some(Box::new(err)))
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::url(format!("URL parse error: {err}"), Some(err))
    }
}

/// A specialized Result type for parley operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_trigger_fallback() {
        assert!(Error::connection("refused", None).is_transport());
        assert!(Error::timeout("slow", Some(1.0)).is_transport());
        assert!(!Error::backend(500, "boom", None).is_transport());
        assert!(!Error::http_client("body", None).is_transport());
    }

    #[test]
    fn network_display_lists_origins() {
        let err = Error::network(
            "Unable to connect to server",
            vec![
                OriginFailure {
                    origin: "http://a".to_string(),
                    message: "refused".to_string(),
                },
                OriginFailure {
                    origin: "http://b".to_string(),
                    message: "refused".to_string(),
                },
            ],
        );
        assert_eq!(
            err.to_string(),
            "Network error: Unable to connect to server (tried http://a, http://b)"
        );
        assert_eq!(err.message(), "Unable to connect to server");
    }

    #[test]
    fn backend_error_carries_status() {
        let err = Error::backend(422, "Invalid OTP", Some("E42".to_string()));
        assert!(err.is_backend());
        assert_eq!(err.status_code(), Some(422));
        assert_eq!(
            err.to_string(),
            "Backend error (422): Invalid OTP (Error ID: E42)"
        );
    }

    #[test]
    fn validation_display_names_field() {
        let err = Error::validation("Please enter your email", Some("email".to_string()));
        assert!(err.is_validation());
        assert_eq!(
            err.to_string(),
            "Validation error: Please enter your email (field: email)"
        );
    }
}
