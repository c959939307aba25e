//! HTTP plumbing beneath the API client.
//!
//! [`ApiRequest`] describes a request relative to an origin; a [`Transport`]
//! executes it against one origin.  The client decides which origin to use
//! and whether to retry, so a transport only has to tell connection-level
//! failures apart from answers.

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client as ReqwestClient, multipart};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// HTTP methods used by the chat backend.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(s)
    }
}

impl From<Method> for reqwest::Method {
    fn from(method: Method) -> Self {
        match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    /// A plain text field.
    Text {
        /// Field name.
        name: String,
        /// Field value.
        value: String,
    },
    /// A file upload.
    File {
        /// Field name.
        name: String,
        /// File name reported to the server.
        file_name: String,
        /// MIME type, when known.
        mime: Option<String>,
        /// File contents.
        bytes: Bytes,
    },
}

/// Request body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// A JSON document.
    Json(serde_json::Value),
    /// A multipart form.
    Multipart(Vec<FormPart>),
}

/// A request relative to a backend origin.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path and query, starting with `/`.
    pub endpoint: String,
    /// Extra headers, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: RequestBody,
}

impl ApiRequest {
    /// Create a request without a body.
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// A GET request.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Get, endpoint)
    }

    /// A DELETE request.
    pub fn delete(endpoint: impl Into<String>) -> Self {
        Self::new(Method::Delete, endpoint)
    }

    /// A request carrying `body` as JSON.
    pub fn json<T: Serialize>(method: Method, endpoint: impl Into<String>, body: &T) -> Result<Self> {
        let value = serde_json::to_value(body)?;
        Ok(Self::new(method, endpoint).with_body(RequestBody::Json(value)))
    }

    /// A request carrying a multipart form.
    pub fn multipart(method: Method, endpoint: impl Into<String>, parts: Vec<FormPart>) -> Self {
        Self::new(method, endpoint).with_body(RequestBody::Multipart(parts))
    }

    /// Set the body.
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }

    /// Set a header, replacing any previous value with the same
    /// case-insensitive name.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set a header in place.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
    }

    /// Attach `token` as a bearer credential.
    pub fn set_bearer(&mut self, token: &str) {
        self.set_header("Authorization", format!("Bearer {token}"));
    }

    /// The value of a header, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// The path portion of the endpoint, without the query string.
    pub fn path(&self) -> &str {
        self.endpoint
            .split_once('?')
            .map(|(path, _)| path)
            .unwrap_or(&self.endpoint)
    }
}

/// A response whose body has been read in full.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Create a new `ApiResponse`.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// A response with a JSON body.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// The body as (lossy) UTF-8 text.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parse the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(|e| {
            Error::serialization(
                format!("Failed to parse response: {}", e),
                Some(Box::new(e)),
            )
        })
    }

    /// Parse the body as JSON, yielding an empty object when it is not.
    pub fn json_or_empty(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Executes requests against a single origin.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Send `request` to `origin` and read the whole response.
    ///
    /// Must return an error satisfying [`Error::is_transport`] when the origin
    /// could not be reached; any HTTP answer, whatever its status, is `Ok`.
    async fn execute(&self, origin: &str, request: &ApiRequest) -> Result<ApiResponse>;
}

/// [`Transport`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: ReqwestClient,
    timeout: Option<Duration>,
}

impl HttpTransport {
    /// Create a transport, optionally bounding every request by `timeout`.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let mut builder = ReqwestClient::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| {
            Error::http_client(
                format!("Failed to build HTTP client: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(Self { client, timeout })
    }

    fn headers(request: &ApiRequest) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                Error::http_client(format!("Invalid header name {name}: {e}"), Some(Box::new(e)))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                Error::http_client(format!("Invalid header value: {e}"), Some(Box::new(e)))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn form(parts: &[FormPart]) -> Result<multipart::Form> {
        let mut form = multipart::Form::new();
        for part in parts {
            form = match part {
                FormPart::Text { name, value } => form.text(name.clone(), value.clone()),
                FormPart::File {
                    name,
                    file_name,
                    mime,
                    bytes,
                } => {
                    let mut file = multipart::Part::bytes(bytes.to_vec()).file_name(file_name.clone());
                    if let Some(mime) = mime {
                        file = file.mime_str(mime).map_err(|e| {
                            Error::http_client(format!("Invalid MIME type {mime}: {e}"), Some(Box::new(e)))
                        })?;
                    }
                    form.part(name.clone(), file)
                }
            };
        }
        Ok(form)
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, origin: &str, request: &ApiRequest) -> Result<ApiResponse> {
        let url = join_url(origin, &request.endpoint);
        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .headers(Self::headers(request)?);
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(Self::form(parts)?),
        };

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::timeout(
                    format!("Request timed out: {}", e),
                    self.timeout.map(|t| t.as_secs_f64()),
                )
            } else if e.is_connect() || e.is_request() {
                Error::connection(format!("Connection error: {}", e), Some(Box::new(e)))
            } else {
                Error::http_client(format!("Request failed: {}", e), Some(Box::new(e)))
            }
        })?;

        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| {
            Error::http_client(
                format!("Failed to read response: {}", e),
                Some(Box::new(e)),
            )
        })?;
        Ok(ApiResponse { status, body })
    }
}

/// Join an origin and an endpoint without doubling or dropping the slash.
pub fn join_url(origin: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        origin.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Percent-encode a single path segment.
pub fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

/// Build a `?a=b&c=d` query string with encoded values.
pub fn query_string(pairs: &[(&str, &str)]) -> String {
    if pairs.is_empty() {
        return String::new();
    }
    let encoded = url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();
    format!("?{encoded}")
}
