//! OpenID Connect client for the home realm.
//!
//! Covers the parts of the provider a browser session needs: the
//! authorization URL (interactive or `prompt=none`), code exchange, refresh
//! and the logout URL.
//!
//! # Security
//!
//! - Authorization-code flow with PKCE S256 only; no client secret
//! - Redirects are never followed automatically: the `prompt=none` answer
//!   is read from the redirect target
//! - Token values are never logged; error bodies only at trace level

use crate::error::SessionError;
use crate::pkce::CHALLENGE_METHOD;
use crate::token::{TokenResponse, TokenSet};
use async_trait::async_trait;
use common::realm::RealmEndpoint;
use common::secret::{ExposeSecret, SecretString};
use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;
use url::Url;

/// `prompt=none` errors meaning "no provider session, ask the user".
const LOGIN_REQUIRED_ERRORS: &[&str] = &["login_required", "interaction_required", "consent_required"];

/// Parameters of one authorization request.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    /// Value echoed back on the redirect.
    pub state: String,

    /// PKCE S256 challenge.
    pub code_challenge: String,

    /// Ask the provider not to show any UI.
    pub prompt_none: bool,

    /// Alias of the upstream provider to broker through (`kc_idp_hint`).
    pub idp_hint: Option<String>,
}

/// Answer to a `prompt=none` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SilentAuthOutcome {
    /// The provider session is live; exchange this code.
    Code(String),

    /// No usable provider session.
    LoginRequired,
}

/// Parameters the provider appended to the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Read callback parameters from a URL.
    pub fn from_url(url: &Url) -> Self {
        let mut params = Self::default();
        for (key, value) in url.query_pairs() {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            slot.get_or_insert_with(|| value.into_owned());
        }
        params
    }

    /// Whether the URL is a provider callback at all.
    pub fn is_callback(&self) -> bool {
        self.state.is_some() && (self.code.is_some() || self.error.is_some())
    }
}

/// Operations the session controller needs from an identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// URL that starts an authorization request.
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, SessionError>;

    /// Send a `prompt=none` authorization request and read the answer.
    async fn silent_authenticate(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<SilentAuthOutcome, SessionError>;

    /// Exchange an authorization code for tokens.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &SecretString,
    ) -> Result<TokenSet, SessionError>;

    /// Obtain a new token set with a refresh token.
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, SessionError>;

    /// URL that ends the provider session.
    fn logout_url(
        &self,
        id_token: Option<&SecretString>,
        post_logout_redirect: &Url,
    ) -> Result<Url, SessionError>;
}

/// OAuth error body (RFC 6749 section 5.2).
#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
}

/// [`IdentityProvider`] backed by a realm's OpenID Connect endpoints.
pub struct OidcProvider {
    endpoint: RealmEndpoint,
    client_id: String,
    redirect_uri: Url,
    http_client: reqwest::Client,
}

impl OidcProvider {
    /// Create a provider client.
    ///
    /// The HTTP client keeps a cookie jar, so a provider session created by
    /// an earlier login through this client is visible to `prompt=none`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        endpoint: RealmEndpoint,
        client_id: impl Into<String>,
        redirect_uri: Url,
        timeout: Duration,
    ) -> Result<Self, SessionError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .redirect(Policy::none())
            .cookie_store(true)
            .build()
            .map_err(|e| SessionError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            endpoint,
            client_id: client_id.into(),
            redirect_uri,
            http_client,
        })
    }

    /// The realm this client talks to.
    pub fn endpoint(&self) -> &RealmEndpoint {
        &self.endpoint
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenSet, SessionError> {
        let response = self
            .http_client
            .post(self.endpoint.token_url())
            .form(form)
            .send()
            .await
            .map_err(|e| {
                tracing::debug!(target: "session.provider", error = %e, "Token request failed");
                if e.is_timeout() {
                    SessionError::Timeout("token request".to_string())
                } else {
                    SessionError::Provider(format!("token request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::trace!(target: "session.provider", body = %body, "Token error response body");
            let reason = serde_json::from_str::<OAuthErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or_else(|_| status.to_string());
            tracing::warn!(target: "session.provider", status = %status, reason = %reason, "Token request rejected");
            return Err(SessionError::Provider(reason));
        }

        let token_response: TokenResponse = response.json().await.map_err(|e| {
            tracing::warn!(target: "session.provider", error = %e, "Failed to parse token response");
            SessionError::Provider(format!("invalid token response: {e}"))
        })?;

        Ok(TokenSet::from_response(token_response, chrono::Utc::now().timestamp()))
    }
}

#[async_trait]
impl IdentityProvider for OidcProvider {
    fn authorization_url(&self, request: &AuthorizationRequest) -> Result<Url, SessionError> {
        let mut url = parse_endpoint(&self.endpoint.authorization_url())?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.client_id)
                .append_pair("redirect_uri", self.redirect_uri.as_str())
                .append_pair("scope", "openid")
                .append_pair("state", &request.state)
                .append_pair("code_challenge", &request.code_challenge)
                .append_pair("code_challenge_method", CHALLENGE_METHOD);
            if request.prompt_none {
                query.append_pair("prompt", "none");
            }
            if let Some(alias) = &request.idp_hint {
                query.append_pair("kc_idp_hint", alias);
            }
        }

        Ok(url)
    }

    #[instrument(skip_all, fields(realm = %self.endpoint.realm()))]
    async fn silent_authenticate(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<SilentAuthOutcome, SessionError> {
        let url = self.authorization_url(request)?;

        let response = self.http_client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::Timeout("silent authentication".to_string())
            } else {
                SessionError::SilentAuthFailed(format!("request failed: {e}"))
            }
        })?;

        if !response.status().is_redirection() {
            return Err(SessionError::SilentAuthFailed(format!(
                "expected redirect, got {}",
                response.status()
            )));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| SessionError::SilentAuthFailed("redirect without location".to_string()))?;

        let target = self
            .redirect_uri
            .join(location)
            .map_err(|e| SessionError::SilentAuthFailed(format!("invalid redirect location: {e}")))?;

        let params = CallbackParams::from_url(&target);

        if params.state.as_deref() != Some(request.state.as_str()) {
            tracing::warn!(target: "session.provider", "Silent authentication state mismatch");
            return Err(SessionError::SilentAuthFailed("state mismatch".to_string()));
        }

        match (params.code, params.error) {
            (Some(code), None) => Ok(SilentAuthOutcome::Code(code)),
            (_, Some(error)) if LOGIN_REQUIRED_ERRORS.contains(&error.as_str()) => {
                tracing::debug!(target: "session.provider", error = %error, "No provider session");
                Ok(SilentAuthOutcome::LoginRequired)
            }
            (_, Some(error)) => Err(SessionError::SilentAuthFailed(error)),
            (None, None) => Err(SessionError::SilentAuthFailed(
                "redirect carried neither code nor error".to_string(),
            )),
        }
    }

    #[instrument(skip_all, fields(realm = %self.endpoint.realm()))]
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &SecretString,
    ) -> Result<TokenSet, SessionError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier.expose_secret()),
        ])
        .await
    }

    #[instrument(skip_all, fields(realm = %self.endpoint.realm()))]
    async fn refresh(&self, refresh_token: &SecretString) -> Result<TokenSet, SessionError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.expose_secret()),
            ("client_id", self.client_id.as_str()),
        ])
        .await
    }

    fn logout_url(
        &self,
        id_token: Option<&SecretString>,
        post_logout_redirect: &Url,
    ) -> Result<Url, SessionError> {
        let mut url = parse_endpoint(&self.endpoint.end_session_url())?;

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.client_id)
                .append_pair("post_logout_redirect_uri", post_logout_redirect.as_str());
            if let Some(id_token) = id_token {
                query.append_pair("id_token_hint", id_token.expose_secret());
            }
        }

        Ok(url)
    }
}

fn parse_endpoint(url: &str) -> Result<Url, SessionError> {
    Url::parse(url).map_err(|e| SessionError::Configuration(format!("invalid provider endpoint: {e}")))
}
