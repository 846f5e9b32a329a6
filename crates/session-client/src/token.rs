//! Tokens held by a session.

use common::secret::SecretString;
use serde::Deserialize;
use std::time::Duration;

/// Token endpoint response (RFC 6749 section 5.1).
#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("id_token", &self.id_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Tokens from one successful login or refresh.
///
/// Replaced whole on every refresh; never updated field by field.
#[derive(Debug, Clone)]
pub struct TokenSet {
    /// Bearer token for resource servers.
    pub access_token: SecretString,

    /// Token used to obtain the next set, if the provider issued one.
    pub refresh_token: Option<SecretString>,

    /// ID token, used as the logout hint.
    pub id_token: Option<SecretString>,

    /// Access token expiry (Unix epoch seconds).
    pub expires_at: i64,
}

impl TokenSet {
    pub(crate) fn from_response(response: TokenResponse, now: i64) -> Self {
        Self {
            access_token: SecretString::from(response.access_token),
            refresh_token: response.refresh_token.map(SecretString::from),
            id_token: response.id_token.map(SecretString::from),
            expires_at: now.saturating_add(response.expires_in.max(0)),
        }
    }

    /// Seconds until expiry (negative once expired).
    pub fn remaining(&self, now: i64) -> i64 {
        self.expires_at.saturating_sub(now)
    }

    /// Whether less than `margin` remains before expiry.
    pub fn expires_within(&self, margin: Duration, now: i64) -> bool {
        let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
        self.remaining(now) < margin
    }
}
