//! Sign-in, password reset, and account management.
//!
//! Sign-in and reset requests go out without credentials; profile and
//! account requests are authenticated.  Successful flows write the session
//! and move the navigator.

use serde::Deserialize;
use serde_json::{Value, json};

use crate::client::{ApiClient, Route};
use crate::endpoints::{Upload, backend_error};
use crate::error::{Error, Result};
use crate::transport::{ApiRequest, ApiResponse, Method};
use crate::types::{AccountResult, User};
use crate::session::SessionKey;

/// Minimum length of a new password.
pub const MIN_PASSWORD_LEN: usize = 6;

/// Largest accepted profile picture, in bytes.
pub const MAX_PICTURE_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInBody {
    #[serde(default)]
    ok: Option<bool>,
    #[serde(default)]
    user: Option<User>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    error: Option<Value>,
    #[serde(default)]
    error_id: Option<String>,
    #[serde(default)]
    needs_signup: bool,
}

impl SignInBody {
    /// Parse a body that may not be JSON.  Non-JSON text becomes the error.
    fn parse(response: &ApiResponse) -> Self {
        let text = response.text();
        if text.trim().is_empty() {
            return Self::default();
        }
        serde_json::from_str(&text).unwrap_or_else(|_| Self {
            error: Some(Value::String(text)),
            ..Self::default()
        })
    }

    fn error_message(&self, fallback: &str) -> String {
        match &self.error {
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            Some(Value::Null) | Some(Value::String(_)) | None => fallback.to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Account flows bound to one client.
#[derive(Clone, Debug)]
pub struct Auth {
    client: ApiClient,
}

impl Auth {
    /// Create a new `Auth`.
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    /// The underlying client.
    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Sign in with an email and password.
    ///
    /// Success is the body's `ok` when present, otherwise the HTTP status.
    pub async fn login(&self, email: &str, password: &str) -> Result<User> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::validation("Please enter your email", Some("email".to_string())));
        }
        if password.is_empty() {
            return Err(Error::validation(
                "Please enter your password",
                Some("password".to_string()),
            ));
        }
        let request = ApiRequest::json(
            Method::Post,
            "/api/auth/login",
            &json!({ "email": email, "password": password }),
        )?;
        let response = self.client.request(&request).await?;
        log::debug!("[auth] login answered {}", response.status);
        let body = SignInBody::parse(&response);

        if body.ok.unwrap_or_else(|| response.is_success()) {
            let user = body.user.clone().unwrap_or_default();
            self.client.session().store_login(
                &user,
                body.access_token.as_deref(),
                body.refresh_token.as_deref(),
            );
            log::info!("[auth] signed in as {}", user.display_name());
            self.client.navigator().navigate(Route::Chat);
            Ok(user)
        } else {
            if let Some(error_id) = &body.error_id {
                log::error!("[auth] login failed with server error id {error_id}");
            }
            Err(Error::backend(
                response.status,
                body.error_message("Login failed"),
                body.error_id,
            ))
        }
    }

    /// Exchange an OAuth credential for a session.
    pub async fn google_login(&self, credential: &str) -> Result<User> {
        if credential.trim().is_empty() {
            return Err(Error::validation(
                "Google login failed",
                Some("credential".to_string()),
            ));
        }
        let request = ApiRequest::json(
            Method::Post,
            "/api/auth/google",
            &json!({ "credential": credential }),
        )?;
        let response = self.client.request(&request).await?;
        let body = SignInBody::parse(&response);

        if response.is_success() && body.ok == Some(true) {
            let user = body.user.clone().unwrap_or_default();
            self.client.session().store_login(
                &user,
                body.access_token.as_deref(),
                body.refresh_token.as_deref(),
            );
            log::info!("[auth] signed in with Google as {}", user.display_name());
            self.client.navigator().navigate(Route::Chat);
            Ok(user)
        } else if body.needs_signup {
            Err(Error::backend(response.status, "Please sign up first", None))
        } else {
            Err(Error::backend(
                response.status,
                body.error_message("Google login failed"),
                body.error_id,
            ))
        }
    }

    /// Start a password reset.
    pub fn password_reset(&self) -> PasswordReset {
        PasswordReset::new(self.client.clone())
    }

    /// Change the display name and, optionally, the profile picture.
    ///
    /// Input is checked before anything is sent.  On success the session's
    /// `userName` and, when the backend returns one, `userPicture` are
    /// replaced.
    pub async fn update_profile(&self, name: &str, picture: Option<Upload>) -> Result<AccountResult> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::validation("Name cannot be empty", Some("name".to_string())));
        }
        if let Some(picture) = &picture {
            if !picture.is_image() {
                return Err(Error::validation(
                    "Please select an image file",
                    Some("profilePicture".to_string()),
                ));
            }
            if picture.bytes.len() > MAX_PICTURE_BYTES {
                return Err(Error::validation(
                    "Image must be less than 5MB",
                    Some("profilePicture".to_string()),
                ));
            }
        }

        let result = self.client.update_profile(name, picture).await;
        if result.ok {
            let session = self.client.session();
            let user = result.user.clone().unwrap_or_default();
            let display = user.name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| name.to_string());
            session.set(SessionKey::UserName, display);
            if let Some(picture) = user.avatar() {
                session.set(SessionKey::UserPicture, picture);
            }
            log::info!("[auth] profile updated");
        } else {
            log::warn!("[auth] profile update failed: {:?}", result.error);
        }
        Ok(result)
    }

    /// Delete the account, then forget the session and return to the entry
    /// screen.
    pub async fn delete_account(&self) -> AccountResult {
        let result = self.client.delete_account().await;
        if result.ok {
            log::info!("[auth] account deleted");
            self.client.session().clear();
            self.client.navigator().navigate(Route::Entry);
        }
        result
    }

    /// Forget the session and return to the login screen.
    pub fn logout(&self) {
        log::info!("[auth] signed out");
        self.client.session().clear();
        self.client.navigator().navigate(Route::Login);
    }
}

/// Position in the password reset flow.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResetStep {
    /// Waiting for the account email.
    Email,
    /// Waiting for the emailed code.
    Otp,
    /// Waiting for the new password.
    NewPassword,
    /// The password was changed.
    Done,
}

/// The three-step emailed-code password reset.
#[derive(Debug)]
pub struct PasswordReset {
    client: ApiClient,
    step: ResetStep,
    email: String,
    otp: String,
}

impl PasswordReset {
    /// Create a reset at the [`ResetStep::Email`] step.
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            step: ResetStep::Email,
            email: String::new(),
            otp: String::new(),
        }
    }

    /// The current step.
    pub fn step(&self) -> ResetStep {
        self.step
    }

    /// The email the code was sent to.
    pub fn email(&self) -> &str {
        &self.email
    }

    /// Email a reset code to `email`.
    ///
    /// Allowed again while waiting for the code, to resend it.
    pub async fn request_code(&mut self, email: &str) -> Result<()> {
        self.expect_step(&[ResetStep::Email, ResetStep::Otp])?;
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::validation("Please enter your email", Some("email".to_string())));
        }
        self.post(
            "/api/auth/forgot-password",
            json!({ "email": email }),
            "Failed to send reset code",
        )
        .await?;
        log::info!("[auth] reset code sent");
        self.email = email.to_string();
        self.step = ResetStep::Otp;
        Ok(())
    }

    /// Check the emailed code.
    pub async fn verify_code(&mut self, otp: &str) -> Result<()> {
        self.expect_step(&[ResetStep::Otp])?;
        let otp = otp.trim();
        if otp.is_empty() {
            return Err(Error::validation("Please enter the OTP", Some("otp".to_string())));
        }
        self.post(
            "/api/auth/verify-reset-otp",
            json!({ "email": self.email, "otp": otp }),
            "Invalid OTP",
        )
        .await?;
        self.otp = otp.to_string();
        self.step = ResetStep::NewPassword;
        Ok(())
    }

    /// Set the new password and return to the entry screen.
    pub async fn reset(&mut self, new_password: &str, confirm: &str) -> Result<()> {
        self.expect_step(&[ResetStep::NewPassword])?;
        if new_password.is_empty() || confirm.is_empty() {
            return Err(Error::validation("Please fill all fields", None));
        }
        if new_password.chars().count() < MIN_PASSWORD_LEN {
            return Err(Error::validation(
                "Password must be at least 6 characters",
                Some("newPassword".to_string()),
            ));
        }
        if new_password != confirm {
            return Err(Error::validation(
                "Passwords do not match",
                Some("confirmPassword".to_string()),
            ));
        }
        self.post(
            "/api/auth/reset-password",
            json!({ "email": self.email, "otp": self.otp, "newPassword": new_password }),
            "Failed to reset password",
        )
        .await?;
        log::info!("[auth] password reset");
        self.step = ResetStep::Done;
        self.client.navigator().navigate(Route::Entry);
        Ok(())
    }

    fn expect_step(&self, allowed: &[ResetStep]) -> Result<()> {
        if allowed.contains(&self.step) {
            return Ok(());
        }
        let message = match self.step {
            ResetStep::Email => "Request a reset code first",
            ResetStep::Otp => "Verify the reset code first",
            ResetStep::NewPassword => "Choose a new password",
            ResetStep::Done => "Password was already reset",
        };
        Err(Error::validation(message, None))
    }

    async fn post(&self, endpoint: &str, body: Value, fallback: &str) -> Result<()> {
        let request = ApiRequest::json(Method::Post, endpoint, &body)?;
        let response = self.client.request(&request).await?;
        let ok = response.json_or_empty().get("ok").and_then(Value::as_bool) == Some(true);
        if response.is_success() && ok {
            Ok(())
        } else {
            let err = backend_error(&response, fallback);
            log::warn!("[auth] {endpoint} failed: {err}");
            Err(err)
        }
    }
}
