//! Session client error types.

use thiserror::Error;

/// Errors surfaced by the session controller and provider client.
///
/// `RefreshFailed` and `BrokeringFailed` always leave the session
/// anonymous; callers should present them as "please sign in again".
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The held token could not be refreshed.
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The provider could not complete a brokered login.
    #[error("Brokered login failed: {0}")]
    BrokeringFailed(String),

    /// Silent authentication returned something other than a code or a
    /// login-required answer.
    #[error("Silent authentication failed: {0}")]
    SilentAuthFailed(String),

    /// Callback URL does not match a pending login.
    #[error("Invalid callback: {0}")]
    InvalidCallback(String),

    /// No authenticated session.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// Provider request failed or was rejected.
    #[error("Identity provider error: {0}")]
    Provider(String),

    /// A provider request exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid configuration or caller input.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SessionError {
    /// True if the session was dropped to anonymous by this error.
    pub fn ends_session(&self) -> bool {
        matches!(
            self,
            SessionError::RefreshFailed(_) | SessionError::BrokeringFailed(_)
        )
    }
}
