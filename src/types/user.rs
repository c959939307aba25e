use serde::{Deserialize, Serialize};

/// Identity fields the backend reports for the signed-in user.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    /// Login email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Avatar URL from the OAuth provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,

    /// Avatar URL uploaded through the profile endpoint.
    #[serde(
        rename = "profilePicture",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub profile_picture: Option<String>,
}

impl User {
    /// The name to show for this user.
    ///
    /// Falls back to the local part of the email address, then to "".
    pub fn display_name(&self) -> String {
        if let Some(name) = self.name.as_deref().filter(|n| !n.is_empty()) {
            return name.to_string();
        }
        self.email
            .as_deref()
            .and_then(|email| email.split('@').next())
            .unwrap_or_default()
            .to_string()
    }

    /// The avatar URL, preferring an uploaded picture over the OAuth one.
    pub fn avatar(&self) -> Option<&str> {
        self.profile_picture
            .as_deref()
            .or(self.picture.as_deref())
            .filter(|p| !p.is_empty())
    }
}

/// Result of checking whether the stored credentials are still valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthStatus {
    /// Whether the backend accepted the credentials.
    pub authenticated: bool,
    /// The user the backend reported, when authenticated.
    pub user: Option<User>,
}

/// Outcome of an account operation that reports failure in its payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountResult {
    /// Whether the operation succeeded.
    #[serde(default)]
    pub ok: bool,

    /// Failure reason when `ok` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Updated user, for profile changes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl AccountResult {
    /// A failed result carrying `error`.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(error.into()),
            user: None,
        }
    }
}
