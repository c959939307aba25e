//! Client configuration resolved once at startup.
//!
//! Backends are tried in the order given.  Values come from, in increasing
//! precedence: built-in defaults, a YAML file, and the `PARLEY_BACKENDS`
//! environment variable.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Error, Result};

/// Origin used when nothing else is configured.
pub const DEFAULT_BACKEND: &str = "http://localhost:8080";

/// Environment variable holding a comma-separated list of origins.
pub const BACKENDS_ENV: &str = "PARLEY_BACKENDS";

/// Configuration for [`crate::ApiClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    backends: Vec<String>,
    timeout: Option<Duration>,
    session_file: Option<PathBuf>,
}

/// On-disk form of [`ClientConfig`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientConfigFile {
    #[serde(default)]
    backends: Vec<String>,
    #[serde(default)]
    timeout_secs: Option<f64>,
    #[serde(default)]
    session_file: Option<String>,
}

impl ClientConfig {
    /// Create a configuration for the given origins, in priority order.
    pub fn new<I, S>(backends: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let backends = backends
            .into_iter()
            .map(|b| normalize_origin(b.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        if backends.is_empty() {
            return Err(Error::config("at least one backend origin is required"));
        }
        Ok(Self {
            backends,
            timeout: None,
            session_file: None,
        })
    }

    /// Resolve the configuration from an optional YAML file and the
    /// environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_yaml_file(path)?,
            None => Self::default(),
        };
        if let Ok(list) = env::var(BACKENDS_ENV) {
            config.backends = parse_backend_list(&list)?;
        }
        Ok(config)
    }

    /// Load a YAML configuration file.
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|err| Error::io(format!("failed to read {}", path.display()), err))?;
        Self::from_yaml_str(&content)
    }

    /// Parse a YAML configuration document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let file: ClientConfigFile = serde_yaml::from_str(content)?;
        let mut config = if file.backends.is_empty() {
            Self::default()
        } else {
            Self::new(&file.backends)?
        };
        if let Some(secs) = file.timeout_secs {
            if !secs.is_finite() || secs <= 0.0 {
                return Err(Error::config("timeout_secs must be a positive number"));
            }
            let timeout = Duration::try_from_secs_f64(secs)
                .map_err(|_| Error::config("timeout_secs is out of range"))?;
            config.timeout = Some(timeout);
        }
        config.session_file = file.session_file.map(PathBuf::from);
        Ok(config)
    }

    /// Replace the origins with a comma-separated list.
    pub fn with_backend_list(mut self, list: &str) -> Result<Self> {
        self.backends = parse_backend_list(list)?;
        Ok(self)
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the session file.
    pub fn with_session_file(mut self, path: Option<PathBuf>) -> Self {
        self.session_file = path;
        self
    }

    /// Origins in priority order, without trailing slashes.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Per-request timeout; `None` leaves it to the transport.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Where the session is persisted, if anywhere.
    pub fn session_file(&self) -> Option<&Path> {
        self.session_file.as_deref()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            backends: vec![DEFAULT_BACKEND.to_string()],
            timeout: None,
            session_file: None,
        }
    }
}

fn parse_backend_list(list: &str) -> Result<Vec<String>> {
    let backends = list
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(normalize_origin)
        .collect::<Result<Vec<_>>>()?;
    if backends.is_empty() {
        return Err(Error::config("backend list is empty"));
    }
    Ok(backends)
}

fn normalize_origin(origin: &str) -> Result<String> {
    let url = Url::parse(origin.trim())?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(Error::config(format!(
            "backend {origin} must use http or https"
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::config(format!("backend {origin} has no host")));
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}
