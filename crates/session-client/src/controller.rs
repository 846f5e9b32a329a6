//! Session controller.
//!
//! Owns one browser session's token and its state machine:
//!
//! ```text
//! Uninitialized -> Checking -> Authenticated | Anonymous
//! ```
//!
//! All state changes go through one async mutex. It is held across the
//! provider round trip of a refresh, so a second caller asking for a token
//! while a refresh is running waits for that refresh and then sees its
//! result instead of starting another.
//!
//! # Security
//!
//! - `state` and PKCE verifier are fresh per authorization request
//! - A callback is accepted only for the pending request's `state`
//! - A failed refresh drops the token; a stale token is never returned
//! - Tokens are held as `SecretString` and never logged

use crate::broker_link::{BrokerHint, BrokerPolicy};
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::pkce::{generate_state, Pkce};
use crate::provider::{
    AuthorizationRequest, CallbackParams, IdentityProvider, OidcProvider, SilentAuthOutcome,
};
use crate::token::TokenSet;
use common::secret::SecretString;
use ring::rand::SystemRandom;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

/// Observable session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// `init` has not run.
    Uninitialized,

    /// Silent authentication in progress.
    Checking,

    /// A token is held.
    Authenticated {
        /// Access token expiry (Unix epoch seconds).
        expires_at: i64,
    },

    /// No token is held.
    Anonymous,
}

impl SessionStatus {
    /// Whether a token is held.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated { .. })
    }
}

/// What the application should do after [`SessionController::init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitOutcome {
    /// The session holds a token.
    Authenticated,

    /// No session; show the signed-out view.
    Anonymous,

    /// Navigate the browser to this URL (brokered login).
    Redirect(Url),
}

/// Interactive login waiting for its callback.
struct PendingLogin {
    state: String,
    verifier: SecretString,
    broker_alias: Option<String>,
}

#[derive(Default)]
struct Inner {
    tokens: Option<TokenSet>,
    pending: Option<PendingLogin>,
}

/// Session controller for one browser session.
pub struct SessionController {
    provider: Arc<dyn IdentityProvider>,
    broker_policy: BrokerPolicy,
    refresh_margin: Duration,
    request_timeout: Duration,
    rng: SystemRandom,
    inner: Mutex<Inner>,
    status: watch::Sender<SessionStatus>,
}

impl SessionController {
    /// Create a controller talking to the configured home realm.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        let provider = OidcProvider::new(
            config.home.clone(),
            config.client_id.clone(),
            config.redirect_uri.clone(),
            config.request_timeout,
        )?;
        Ok(Self::with_provider(config, Arc::new(provider)))
    }

    /// Create a controller with a custom provider.
    pub fn with_provider(config: &SessionConfig, provider: Arc<dyn IdentityProvider>) -> Self {
        let (status, _) = watch::channel(SessionStatus::Uninitialized);
        Self {
            provider,
            broker_policy: config.broker_policy(),
            refresh_margin: config.refresh_margin,
            request_timeout: config.request_timeout,
            rng: SystemRandom::new(),
            inner: Mutex::new(Inner::default()),
            status,
        }
    }

    /// Current state.
    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// Watch state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Start the session from the application's entry URL.
    ///
    /// - An entry URL carrying a provider callback completes the pending
    ///   login.
    /// - A callback that matches no pending login (reload, back navigation,
    ///   fresh controller) is dropped and treated as a plain entry URL.
    /// - Otherwise a `prompt=none` request checks for a provider session.
    /// - If that finds none and the URL carries an accepted brokering hint,
    ///   the outcome is a redirect into a brokered login.
    ///
    /// Silent-authentication failures and timeouts land in `Anonymous`.
    ///
    /// # Errors
    ///
    /// Callback errors from [`handle_callback`](Self::handle_callback)
    /// other than `InvalidCallback`.
    #[instrument(skip_all, name = "session.init")]
    pub async fn init(&self, entry_url: &Url) -> Result<InitOutcome, SessionError> {
        let callback = CallbackParams::from_url(entry_url);
        if callback.is_callback() {
            match self.handle_callback(entry_url).await {
                Ok(()) => return Ok(InitOutcome::Authenticated),
                Err(SessionError::InvalidCallback(reason)) => {
                    info!(
                        target: "session.controller",
                        reason = %reason,
                        "Ignoring callback without a matching login, checking for a provider session"
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let mut inner = self.inner.lock().await;
        self.publish(SessionStatus::Checking);

        match self.silent_login().await {
            Ok(Some(tokens)) => {
                info!(target: "session.controller", "Silent authentication succeeded");
                self.install(&mut inner, tokens);
                return Ok(InitOutcome::Authenticated);
            }
            Ok(None) => debug!(target: "session.controller", "No provider session"),
            Err(e) => warn!(target: "session.controller", error = %e, "Silent authentication failed"),
        }

        inner.tokens = None;

        if let Some(hint) = BrokerHint::from_entry_url(entry_url, &self.broker_policy) {
            info!(
                target: "session.controller",
                alias = %hint.alias(),
                "Arrived by brokered link, starting brokered login"
            );
            let url = self.begin_login(&mut inner, Some(hint.alias().to_string()))?;
            self.publish(SessionStatus::Anonymous);
            return Ok(InitOutcome::Redirect(url));
        }

        self.publish(SessionStatus::Anonymous);
        Ok(InitOutcome::Anonymous)
    }

    /// Start an interactive login, optionally brokered through `idp_hint`.
    ///
    /// Returns the URL to send the browser to. Replaces any pending login.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` for an alias the brokering
    /// policy does not accept.
    #[instrument(skip_all, name = "session.login")]
    pub async fn login(&self, idp_hint: Option<&str>) -> Result<Url, SessionError> {
        if let Some(alias) = idp_hint {
            if !self.broker_policy.accepts(alias) {
                return Err(SessionError::Configuration(format!(
                    "identity provider alias '{alias}' is not accepted"
                )));
            }
        }

        let mut inner = self.inner.lock().await;
        self.begin_login(&mut inner, idp_hint.map(String::from))
    }

    /// Complete an interactive login from the provider's callback URL.
    ///
    /// # Errors
    ///
    /// - `InvalidCallback` when no login is pending, the `state` does not
    ///   match, or the URL carries neither code nor error
    /// - `BrokeringFailed` when a brokered login comes back with an error
    /// - `Provider` when a direct login comes back with an error or the
    ///   code exchange fails
    /// - `Timeout` when the code exchange exceeds its deadline
    #[instrument(skip_all, name = "session.callback")]
    pub async fn handle_callback(&self, callback_url: &Url) -> Result<(), SessionError> {
        let params = CallbackParams::from_url(callback_url);
        let mut inner = self.inner.lock().await;

        let Some(pending) = inner.pending.take() else {
            self.settle(&inner);
            return Err(SessionError::InvalidCallback("no login is pending".to_string()));
        };

        if params.state.as_deref() != Some(pending.state.as_str()) {
            warn!(target: "session.controller", "Callback state mismatch");
            self.settle(&inner);
            return Err(SessionError::InvalidCallback("state mismatch".to_string()));
        }

        let result = match (params.code, params.error) {
            (_, Some(error)) => Err(match &pending.broker_alias {
                Some(alias) => SessionError::BrokeringFailed(format!("{alias}: {error}")),
                None => SessionError::Provider(error),
            }),
            (Some(code), None) => {
                self.with_timeout(
                    "code exchange",
                    self.provider.exchange_code(&code, &pending.verifier),
                )
                .await
            }
            (None, None) => Err(SessionError::InvalidCallback(
                "callback carried neither code nor error".to_string(),
            )),
        };

        match result {
            Ok(tokens) => {
                info!(
                    target: "session.controller",
                    brokered = pending.broker_alias.is_some(),
                    "Interactive login completed"
                );
                self.install(&mut inner, tokens);
                Ok(())
            }
            Err(e) => {
                warn!(target: "session.controller", error = %e, "Interactive login failed");
                self.clear(&mut inner);
                Err(e)
            }
        }
    }

    /// End the session. Returns the provider logout URL to navigate to.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if the logout URL cannot be built.
    #[instrument(skip_all, name = "session.logout")]
    pub async fn logout(&self, post_logout_redirect: &Url) -> Result<Url, SessionError> {
        let mut inner = self.inner.lock().await;
        let id_token = inner.tokens.as_ref().and_then(|t| t.id_token.clone());
        inner.pending = None;
        self.clear(&mut inner);

        info!(target: "session.controller", "Signed out");
        self.provider.logout_url(id_token.as_ref(), post_logout_redirect)
    }

    /// Return an access token valid for at least the refresh margin.
    ///
    /// Refreshes first when less than the margin remains. Concurrent callers
    /// share one refresh.
    ///
    /// # Errors
    ///
    /// - `NotAuthenticated` when no token is held
    /// - `RefreshFailed` when a needed refresh fails or times out; the
    ///   session is anonymous afterwards
    #[instrument(skip_all, name = "session.get_valid_token")]
    pub async fn get_valid_token(&self) -> Result<SecretString, SessionError> {
        let mut inner = self.inner.lock().await;

        let tokens = inner.tokens.as_ref().ok_or(SessionError::NotAuthenticated)?;
        let now = chrono::Utc::now().timestamp();
        if !tokens.expires_within(self.refresh_margin, now) {
            return Ok(tokens.access_token.clone());
        }

        debug!(
            target: "session.controller",
            remaining_secs = tokens.remaining(now),
            "Token inside refresh margin, refreshing"
        );

        let refreshed = match tokens.refresh_token.clone() {
            Some(refresh_token) => {
                self.with_timeout("token refresh", self.provider.refresh(&refresh_token))
                    .await
            }
            None => Err(SessionError::Provider("no refresh token held".to_string())),
        };

        match refreshed {
            Ok(tokens) => {
                debug!(target: "session.controller", expires_at = tokens.expires_at, "Token refreshed");
                let access_token = tokens.access_token.clone();
                self.install(&mut inner, tokens);
                Ok(access_token)
            }
            Err(e) => {
                warn!(target: "session.controller", error = %e, "Token refresh failed, session ended");
                self.clear(&mut inner);
                Err(SessionError::RefreshFailed(e.to_string()))
            }
        }
    }

    /// Spawn a task that keeps the token fresh while the session lasts.
    ///
    /// Every `interval` the task runs the same refresh path as
    /// [`get_valid_token`](Self::get_valid_token). It holds only a weak
    /// reference and exits once the controller is dropped; abort the
    /// returned handle to stop it earlier.
    pub fn spawn_refresh_task(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;

                let Some(controller) = controller.upgrade() else {
                    debug!(target: "session.controller", "Controller dropped, stopping refresh task");
                    break;
                };

                if !controller.status().is_authenticated() {
                    continue;
                }

                if let Err(e) = controller.get_valid_token().await {
                    warn!(target: "session.controller", error = %e, "Background refresh failed");
                }
            }
        })
    }

    async fn silent_login(&self) -> Result<Option<TokenSet>, SessionError> {
        let pkce = Pkce::generate(&self.rng)?;
        let request = AuthorizationRequest {
            state: generate_state(&self.rng)?,
            code_challenge: pkce.challenge().to_string(),
            prompt_none: true,
            idp_hint: None,
        };

        let outcome = self
            .with_timeout(
                "silent authentication",
                self.provider.silent_authenticate(&request),
            )
            .await?;

        match outcome {
            SilentAuthOutcome::Code(code) => {
                let tokens = self
                    .with_timeout(
                        "code exchange",
                        self.provider.exchange_code(&code, pkce.verifier()),
                    )
                    .await?;
                Ok(Some(tokens))
            }
            SilentAuthOutcome::LoginRequired => Ok(None),
        }
    }

    fn begin_login(
        &self,
        inner: &mut Inner,
        broker_alias: Option<String>,
    ) -> Result<Url, SessionError> {
        let pkce = Pkce::generate(&self.rng)?;
        let state = generate_state(&self.rng)?;

        let url = self.provider.authorization_url(&AuthorizationRequest {
            state: state.clone(),
            code_challenge: pkce.challenge().to_string(),
            prompt_none: false,
            idp_hint: broker_alias.clone(),
        })?;

        inner.pending = Some(PendingLogin {
            state,
            verifier: pkce.into_verifier(),
            broker_alias,
        });

        Ok(url)
    }

    async fn with_timeout<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T, SessionError>>,
    ) -> Result<T, SessionError> {
        tokio::time::timeout(self.request_timeout, fut)
            .await
            .map_err(|_| SessionError::Timeout(operation.to_string()))?
    }

    fn install(&self, inner: &mut Inner, tokens: TokenSet) {
        let expires_at = tokens.expires_at;
        inner.tokens = Some(tokens);
        self.publish(SessionStatus::Authenticated { expires_at });
    }

    fn clear(&self, inner: &mut Inner) {
        inner.tokens = None;
        self.publish(SessionStatus::Anonymous);
    }

    /// Leave `Uninitialized`/`Checking` for `Anonymous` when no token is
    /// held. A held token stays authenticated.
    fn settle(&self, inner: &Inner) {
        if inner.tokens.is_none() {
            self.publish(SessionStatus::Anonymous);
        }
    }

    fn publish(&self, status: SessionStatus) {
        self.status.send_replace(status);
    }
}
