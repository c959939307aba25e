use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::Deserialize;
use serde_json::json;

use crate::config::ClientConfig;
use crate::error::{Error, OriginFailure, Result};
use crate::observability::{
    CLIENT_FALLBACKS, CLIENT_NETWORK_ERRORS, CLIENT_REQUEST_DURATION, CLIENT_REQUESTS,
    CLIENT_UNAUTHORIZED, REFRESH_ATTEMPTS, REFRESH_FAILURES, REFRESH_SHARED,
};
use crate::session::{SessionKey, SessionManager};
use crate::transport::{ApiRequest, ApiResponse, HttpTransport, Method, Transport};

const REFRESH_ENDPOINT: &str = "/api/auth/refresh";
const NETWORK_ERROR_MESSAGE: &str =
    "Unable to connect to server. Please check your connection.";

/// Screens the client can send the user to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Route {
    /// The login entry point, `/`.
    Entry,
    /// The login screen reached after an explicit sign-out, `/login`.
    Login,
    /// The chat screen, `/chat`.
    Chat,
}

impl Route {
    /// The path of this route.
    pub fn path(&self) -> &'static str {
        match self {
            Route::Entry => "/",
            Route::Login => "/login",
            Route::Chat => "/chat",
        }
    }

    /// Returns true for routes that require the user to sign in again.
    pub fn is_sign_in(&self) -> bool {
        matches!(self, Route::Entry | Route::Login)
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Moves the front-end between screens.
pub trait Navigator: Send + Sync {
    /// Switch to `route`.
    fn navigate(&self, route: Route);
}

/// A [`Navigator`] that remembers the last route requested.
///
/// Front-ends poll it with [`RouteSlot::take`] after every operation.
#[derive(Debug, Default)]
pub struct RouteSlot {
    route: Mutex<Option<Route>>,
}

impl RouteSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// The pending route, if any, leaving it in place.
    pub fn peek(&self) -> Option<Route> {
        *self.route.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the pending route.
    pub fn take(&self) -> Option<Route> {
        self.route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Navigator for RouteSlot {
    fn navigate(&self, route: Route) {
        *self.route.lock().unwrap_or_else(PoisonError::into_inner) = Some(route);
    }
}

type RefreshFuture = Shared<BoxFuture<'static, Result<()>>>;

/// Client for the chat backend.
///
/// Cloning is cheap; clones share the session, transport, and any
/// in-flight token refresh.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    backends: Arc<Vec<String>>,
    session: Arc<SessionManager>,
    navigator: Arc<dyn Navigator>,
    refresh: Arc<Mutex<Option<(u64, RefreshFuture)>>>,
    refresh_ids: Arc<AtomicU64>,
}

impl ApiClient {
    /// Create a client that talks HTTP to the configured backends.
    pub fn new(
        config: &ClientConfig,
        session: Arc<SessionManager>,
        navigator: Arc<dyn Navigator>,
    ) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config,
            session,
            navigator,
        ))
    }

    /// Create a client over an arbitrary transport.
    pub fn with_transport(
        transport: Arc<dyn Transport>,
        config: &ClientConfig,
        session: Arc<SessionManager>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            transport,
            backends: Arc::new(config.backends().to_vec()),
            session,
            navigator,
            refresh: Arc::new(Mutex::new(None)),
            refresh_ids: Arc::new(AtomicU64::new(0)),
        }
    }

    /// The session this client reads tokens from.
    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    /// The navigator this client redirects through.
    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Origins in the order they are tried.
    pub fn backends(&self) -> &[String] {
        &self.backends
    }

    /// Send `request` to the first origin that accepts the connection.
    ///
    /// Origins are tried in priority order.  Only connection-level failures
    /// move on to the next origin; an HTTP error status is returned as-is.
    pub async fn request(&self, request: &ApiRequest) -> Result<ApiResponse> {
        let mut failures = Vec::new();
        for origin in self.backends.iter() {
            log::debug!("[api] trying {} {}{}", request.method, origin, request.endpoint);
            CLIENT_REQUESTS.click();
            let start = Instant::now();
            match self.transport.execute(origin, request).await {
                Ok(response) => {
                    CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());
                    log::debug!("[api] {} answered {}", origin, response.status);
                    return Ok(response);
                }
                Err(err) if err.is_transport() => {
                    CLIENT_FALLBACKS.click();
                    log::warn!("[api] failed with {origin}: {err}");
                    failures.push(OriginFailure {
                        origin: origin.clone(),
                        message: err.to_string(),
                    });
                }
                Err(err) => return Err(err),
            }
        }
        CLIENT_NETWORK_ERRORS.click();
        log::error!("[api] all backends failed: {failures:?}");
        Err(Error::network(NETWORK_ERROR_MESSAGE, failures))
    }

    /// Send `request` with the stored bearer token, refreshing it once on 401.
    ///
    /// If the refresh fails the whole session is cleared, the navigator is
    /// sent to [`Route::Entry`], and [`Error::Authentication`] is returned.
    /// The retried response is returned whatever its status.
    pub async fn authenticated_request(&self, mut request: ApiRequest) -> Result<ApiResponse> {
        if let Some(token) = self.session.get(SessionKey::AccessToken) {
            request.set_bearer(&token);
        }
        let response = self.request(&request).await?;
        if response.status != 401 {
            return Ok(response);
        }

        CLIENT_UNAUTHORIZED.click();
        log::info!("[api] got 401 for {}, refreshing token", request.path());
        match self.refresh_token().await {
            Ok(()) => {
                if let Some(token) = self.session.get(SessionKey::AccessToken) {
                    request.set_bearer(&token);
                }
                self.request(&request).await
            }
            Err(err) => {
                log::info!("[api] token refresh failed, redirecting to login: {err}");
                self.session.clear();
                self.navigator.navigate(Route::Entry);
                Err(Error::authentication("Session expired. Please login again."))
            }
        }
    }

    /// Exchange the stored refresh token for a new access token.
    ///
    /// Concurrent callers share a single request to the refresh endpoint.
    /// Any failure clears the tokens and the authenticated flag.
    pub async fn refresh_token(&self) -> Result<()> {
        let (id, shared) = {
            let mut slot = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((id, shared)) => {
                    REFRESH_SHARED.click();
                    (*id, shared.clone())
                }
                None => {
                    let id = self.refresh_ids.fetch_add(1, Ordering::Relaxed);
                    let this = self.clone();
                    let shared = async move { this.refresh_once().await }.boxed().shared();
                    *slot = Some((id, shared.clone()));
                    (id, shared)
                }
            }
        };
        let result = shared.await;
        let mut slot = self.refresh.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|(current, _)| *current == id) {
            *slot = None;
        }
        result
    }

    async fn refresh_once(&self) -> Result<()> {
        REFRESH_ATTEMPTS.click();
        let result = self.exchange_refresh_token().await;
        if let Err(err) = &result {
            REFRESH_FAILURES.click();
            log::info!("[api] refresh failed: {err}");
            self.session.clear_tokens();
        } else {
            log::info!("[api] access token refreshed");
        }
        result
    }

    async fn exchange_refresh_token(&self) -> Result<()> {
        #[derive(Deserialize)]
        #[serde(rename_all = "camelCase")]
        struct RefreshResponse {
            access_token: Option<String>,
        }

        let refresh_token = self
            .session
            .get(SessionKey::RefreshToken)
            .ok_or_else(|| Error::authentication("No refresh token available"))?;
        let request = ApiRequest::json(
            Method::Post,
            REFRESH_ENDPOINT,
            &json!({ "refreshToken": refresh_token }),
        )?;
        let response = self.request(&request).await?;
        if !response.is_success() {
            return Err(Error::authentication(format!(
                "Failed to refresh token (status {})",
                response.status
            )));
        }
        let body: RefreshResponse = response.json()?;
        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                self.session.set(SessionKey::AccessToken, token);
                Ok(())
            }
            None => Err(Error::authentication(
                "Refresh response did not include an access token",
            )),
        }
    }
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("backends", &self.backends)
            .field("session", &self.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeBackend, harness};

    #[tokio::test]
    async fn falls_back_on_connection_failure_only() {
        let backend = FakeBackend::new();
        backend.set_unreachable("http://primary.test", true);
        let (client, session, _) = harness(&backend);
        backend.sign_in(&session);

        let response = client
            .authenticated_request(ApiRequest::get("/api/chats"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(
            backend.origins_for("/api/chats"),
            vec!["http://primary.test", "http://secondary.test"]
        );
    }

    #[tokio::test]
    async fn http_errors_do_not_fall_back() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/chats", 500);
        let (client, _, _) = harness(&backend);

        let response = client.request(&ApiRequest::get("/api/chats")).await.unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(backend.origins_for("/api/chats"), vec!["http://primary.test"]);
    }

    #[tokio::test]
    async fn all_origins_down_is_a_network_error() {
        let backend = FakeBackend::new();
        backend.set_unreachable("http://primary.test", true);
        backend.set_unreachable("http://secondary.test", true);
        let (client, _, _) = harness(&backend);

        let err = client.request(&ApiRequest::get("/api/chats")).await.unwrap_err();
        match err {
            Error::Network { failures, .. } => assert_eq!(failures.len(), 2),
            other => panic!("expected network error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bearer_token_is_attached() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        session.set(SessionKey::AccessToken, "valid-1");

        client
            .authenticated_request(ApiRequest::get("/api/auth/me"))
            .await
            .unwrap();
        assert_eq!(
            backend.last_request("/api/auth/me").unwrap().header("Authorization"),
            Some("Bearer valid-1")
        );
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_and_retried_once() {
        let backend = FakeBackend::new();
        let (client, session, navigator) = harness(&backend);
        session.set(SessionKey::AccessToken, "expired");
        session.set(SessionKey::RefreshToken, backend.refresh_token());

        let response = client
            .authenticated_request(ApiRequest::get("/api/auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(backend.count("/api/auth/me"), 2);
        assert_eq!(backend.count("/api/auth/refresh"), 1);
        assert_eq!(
            session.get(SessionKey::AccessToken),
            Some(backend.current_access_token())
        );
        assert!(navigator.peek().is_none());
    }

    #[tokio::test]
    async fn failed_refresh_clears_session_and_redirects() {
        let backend = FakeBackend::new();
        let (client, session, navigator) = harness(&backend);
        session.set(SessionKey::AccessToken, "expired");
        session.set(SessionKey::RefreshToken, "revoked");
        session.set(SessionKey::UserName, "Ada");
        session.set(SessionKey::IsAuthenticated, "1");

        let err = client
            .authenticated_request(ApiRequest::get("/api/chats"))
            .await
            .unwrap_err();
        assert!(err.is_authentication());
        for key in SessionKey::ALL {
            assert!(session.get(key).is_none(), "{key} survived");
        }
        assert_eq!(navigator.take(), Some(Route::Entry));
        assert_eq!(backend.count("/api/chats"), 1);
    }

    #[tokio::test]
    async fn missing_refresh_token_fails_without_request() {
        let backend = FakeBackend::new();
        let (client, session, _) = harness(&backend);
        session.set(SessionKey::AccessToken, "expired");

        assert!(client.refresh_token().await.is_err());
        assert_eq!(backend.count("/api/auth/refresh"), 0);
        assert!(session.get(SessionKey::AccessToken).is_none());
    }

    #[tokio::test]
    async fn concurrent_refreshes_share_one_request() {
        let backend = FakeBackend::new();
        let gate = backend.gate_path("/api/auth/refresh");
        let (client, session, _) = harness(&backend);
        session.set(SessionKey::AccessToken, "expired");
        session.set(SessionKey::RefreshToken, backend.refresh_token());

        let a = client.authenticated_request(ApiRequest::get("/api/auth/me"));
        let b = client.authenticated_request(ApiRequest::get("/api/chats"));
        let release = async {
            tokio::task::yield_now().await;
            gate.open();
        };
        let (a, b, ()) = tokio::join!(a, b, release);
        assert_eq!(a.unwrap().status, 200);
        assert_eq!(b.unwrap().status, 200);
        assert_eq!(backend.count("/api/auth/refresh"), 1);
    }

    #[tokio::test]
    async fn retry_returns_second_response_even_if_unauthorized() {
        let backend = FakeBackend::new();
        backend.fail_path("/api/auth/me", 401);
        let (client, session, navigator) = harness(&backend);
        session.set(SessionKey::AccessToken, "expired");
        session.set(SessionKey::RefreshToken, backend.refresh_token());

        let response = client
            .authenticated_request(ApiRequest::get("/api/auth/me"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(backend.count("/api/auth/me"), 2);
        assert!(navigator.peek().is_none());
    }

    #[test]
    fn routes() {
        assert_eq!(Route::Entry.path(), "/");
        assert_eq!(Route::Login.to_string(), "/login");
        assert!(!Route::Chat.is_sign_in());
        let slot = RouteSlot::new();
        slot.navigate(Route::Chat);
        assert_eq!(slot.peek(), Some(Route::Chat));
        assert_eq!(slot.take(), Some(Route::Chat));
        assert_eq!(slot.take(), None);
    }
}
