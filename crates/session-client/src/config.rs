//! Session client configuration.

use crate::broker_link::{is_valid_alias, BrokerPolicy};
use crate::error::SessionError;
use common::realm::RealmEndpoint;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use url::Url;

/// Default safety margin before expiry at which a token is refreshed.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(30);

/// Default deadline for one provider request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default name of the brokering query parameter.
pub const DEFAULT_BROKER_HINT_PARAM: &str = "idp_hint";

/// Configuration for a [`SessionController`](crate::SessionController).
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Home realm on the region's identity provider.
    pub home: RealmEndpoint,

    /// Public OIDC client id.
    pub client_id: String,

    /// Where the provider sends the browser after authorization.
    pub redirect_uri: Url,

    /// Refresh when less than this remains before expiry.
    pub refresh_margin: Duration,

    /// Deadline for one provider request.
    pub request_timeout: Duration,

    /// Query parameter carrying the brokering alias on entry URLs.
    pub broker_hint_param: String,

    /// Aliases accepted from entry URLs. Empty accepts any well-formed alias.
    pub broker_aliases: Vec<String>,
}

impl SessionConfig {
    /// Create a configuration with default margin, timeout and parameter.
    #[must_use]
    pub fn new(home: RealmEndpoint, client_id: impl Into<String>, redirect_uri: Url) -> Self {
        Self {
            home,
            client_id: client_id.into(),
            redirect_uri,
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            broker_hint_param: DEFAULT_BROKER_HINT_PARAM.to_string(),
            broker_aliases: Vec::new(),
        }
    }

    /// Set the refresh safety margin.
    #[must_use]
    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    /// Set the provider request deadline.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Restrict the aliases accepted from entry URLs.
    #[must_use]
    pub fn with_broker_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.broker_aliases = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, SessionError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, SessionError> {
        let required = |name: &str| {
            vars.get(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| {
                    SessionError::Configuration(format!("missing environment variable {name}"))
                })
        };

        let home = RealmEndpoint::new(required("HOME_KEYCLOAK_URL")?, required("HOME_REALM")?)
            .map_err(|e| SessionError::Configuration(e.to_string()))?;

        let client_id = required("CLIENT_ID")?.trim().to_string();

        let redirect_uri = Url::parse(required("REDIRECT_URI")?.trim())
            .map_err(|e| SessionError::Configuration(format!("REDIRECT_URI: {e}")))?;

        let refresh_margin = match vars.get("TOKEN_REFRESH_MARGIN_SECONDS") {
            Some(value) => Duration::from_secs(parse_seconds("TOKEN_REFRESH_MARGIN_SECONDS", value)?),
            None => DEFAULT_REFRESH_MARGIN,
        };

        let request_timeout = match vars.get("AUTH_REQUEST_TIMEOUT_SECONDS") {
            Some(value) => {
                let secs = parse_seconds("AUTH_REQUEST_TIMEOUT_SECONDS", value)?;
                if secs == 0 {
                    return Err(SessionError::Configuration(
                        "AUTH_REQUEST_TIMEOUT_SECONDS must be greater than 0".to_string(),
                    ));
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let broker_hint_param = match vars.get("BROKER_HINT_PARAM").map(|v| v.trim()) {
            Some(param) if !is_valid_alias(param) => {
                return Err(SessionError::Configuration(format!(
                    "BROKER_HINT_PARAM '{param}' is not a plain identifier"
                )));
            }
            Some(param) => param.to_string(),
            None => DEFAULT_BROKER_HINT_PARAM.to_string(),
        };

        let broker_aliases: Vec<String> = vars
            .get("BROKER_ALIASES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        if let Some(bad) = broker_aliases.iter().find(|a| !is_valid_alias(a)) {
            return Err(SessionError::Configuration(format!(
                "BROKER_ALIASES entry '{bad}' is not a valid alias"
            )));
        }

        Ok(Self {
            home,
            client_id,
            redirect_uri,
            refresh_margin,
            request_timeout,
            broker_hint_param,
            broker_aliases,
        })
    }

    /// Brokering policy for links and entry URLs.
    pub fn broker_policy(&self) -> BrokerPolicy {
        BrokerPolicy::new(&self.broker_hint_param).with_allowed_aliases(self.broker_aliases.clone())
    }
}

fn parse_seconds(name: &str, value: &str) -> Result<u64, SessionError> {
    value.trim().parse::<u64>().map_err(|e| {
        SessionError::Configuration(format!("{name} must be a whole number of seconds, got '{value}': {e}"))
    })
}
