//! Cross-region brokered links.
//!
//! An authenticated application links to a peer region's application with
//! one query parameter naming the identity-provider alias that, on the
//! peer's provider, brokers back to this region. The peer reads the alias
//! from its entry URL and, if its own silent check comes back anonymous,
//! sends the browser straight to its provider with that alias as the
//! `kc_idp_hint`.
//!
//! The parameter is an unsigned hint. It can only choose which configured
//! alias the peer's provider is asked to use; it cannot carry or forge a
//! credential. Aliases are format-checked and, when an allow-list is
//! configured, must be listed, so a crafted link cannot be used to enumerate
//! arbitrary provider aliases.

use crate::config::DEFAULT_BROKER_HINT_PARAM;
use crate::error::SessionError;
use std::collections::HashSet;
use url::Url;

/// Longest alias accepted from a URL.
const MAX_ALIAS_LEN: usize = 64;

/// Whether `alias` is a plain identifier (`[A-Za-z0-9._-]{1,64}`).
pub fn is_valid_alias(alias: &str) -> bool {
    !alias.is_empty()
        && alias.len() <= MAX_ALIAS_LEN
        && alias
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// Parameter name and accepted aliases for brokered links.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerPolicy {
    param: String,
    allowed: HashSet<String>,
}

impl Default for BrokerPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BROKER_HINT_PARAM)
    }
}

impl BrokerPolicy {
    /// Policy using `param` and accepting any well-formed alias.
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
            allowed: HashSet::new(),
        }
    }

    /// Only accept the listed aliases. An empty list accepts any
    /// well-formed alias.
    #[must_use]
    pub fn with_allowed_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = aliases.into_iter().map(Into::into).collect();
        self
    }

    /// Query parameter name.
    pub fn param(&self) -> &str {
        &self.param
    }

    /// Whether `alias` may be used for a brokered login.
    pub fn accepts(&self, alias: &str) -> bool {
        is_valid_alias(alias) && (self.allowed.is_empty() || self.allowed.contains(alias))
    }
}

/// Builder for links into a peer region.
pub struct BrokerLink;

impl BrokerLink {
    /// Link to `peer_entry_url` asking the peer to broker through `alias`.
    ///
    /// Any existing value of the parameter is replaced, so building a link
    /// from a link yields the same URL.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if `alias` is not a valid alias.
    pub fn for_peer(
        peer_entry_url: &Url,
        alias: &str,
        policy: &BrokerPolicy,
    ) -> Result<Url, SessionError> {
        if !is_valid_alias(alias) {
            return Err(SessionError::Configuration(format!(
                "'{alias}' is not a valid identity provider alias"
            )));
        }

        let mut link = peer_entry_url.clone();
        let kept: Vec<(String, String)> = peer_entry_url
            .query_pairs()
            .filter(|(k, _)| k != policy.param())
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();

        link.query_pairs_mut()
            .clear()
            .extend_pairs(kept)
            .append_pair(policy.param(), alias);

        Ok(link)
    }
}

/// Brokering hint read from an entry URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerHint {
    alias: String,
}

impl BrokerHint {
    /// Extract the hint from `entry_url`.
    ///
    /// Returns `None` when the parameter is absent, repeated with
    /// different values, malformed, or not allowed by `policy`.
    pub fn from_entry_url(entry_url: &Url, policy: &BrokerPolicy) -> Option<Self> {
        let mut values = entry_url
            .query_pairs()
            .filter(|(k, _)| k == policy.param())
            .map(|(_, v)| v.into_owned());

        let alias = values.next()?;
        if values.any(|other| other != alias) {
            tracing::warn!(target: "session.broker", "Conflicting brokering hints ignored");
            return None;
        }

        if !policy.accepts(&alias) {
            tracing::warn!(target: "session.broker", "Brokering hint not accepted");
            return None;
        }

        Some(Self { alias })
    }

    /// Identity-provider alias to pass as `kc_idp_hint`.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}
