//! Identity-provider realm endpoints.
//!
//! A realm is addressed as `<base-url>/realms/<realm>`; that string is also
//! the issuer identity the provider writes into every token it mints. The
//! same realm may be reachable through two base URLs (an internal one on the
//! service network and a public one behind a reverse proxy), so callers build
//! one `RealmEndpoint` per base URL.

use thiserror::Error;
use url::Url;

/// Path segment separating a provider base URL from the realm name.
const REALMS_SEGMENT: &str = "/realms/";

/// OpenID Connect protocol prefix under a realm.
const OIDC_PREFIX: &str = "protocol/openid-connect";

/// Errors raised while building a realm endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RealmError {
    /// Base URL is not an absolute http(s) URL.
    #[error("Invalid provider base URL '{0}'")]
    InvalidBaseUrl(String),

    /// Realm name is empty or contains characters outside `[A-Za-z0-9._-]`.
    #[error("Invalid realm name '{0}'")]
    InvalidRealm(String),
}

/// A realm on one identity provider, reached through one base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealmEndpoint {
    /// Base URL without trailing slash (e.g. `http://keycloak-us:8080`).
    base_url: String,

    /// Realm name (e.g. `us-realm`).
    realm: String,
}

impl RealmEndpoint {
    /// Create a realm endpoint.
    ///
    /// Trailing slashes on `base_url` are dropped so that the derived issuer
    /// matches what the provider writes into tokens.
    ///
    /// # Errors
    ///
    /// Returns `RealmError` if the base URL is not http(s) or the realm name
    /// is not a plain identifier.
    pub fn new(base_url: &str, realm: &str) -> Result<Self, RealmError> {
        let trimmed = base_url.trim().trim_end_matches('/');
        let parsed =
            Url::parse(trimmed).map_err(|_| RealmError::InvalidBaseUrl(base_url.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(RealmError::InvalidBaseUrl(base_url.to_string()));
        }

        if !is_plain_identifier(realm) {
            return Err(RealmError::InvalidRealm(realm.to_string()));
        }

        Ok(Self {
            base_url: trimmed.to_string(),
            realm: realm.to_string(),
        })
    }

    /// Provider base URL (no trailing slash).
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Realm name.
    #[must_use]
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Issuer identity: `<base-url>/realms/<realm>`.
    #[must_use]
    pub fn issuer(&self) -> String {
        format!("{}{}{}", self.base_url, REALMS_SEGMENT, self.realm)
    }

    /// Key-discovery endpoint.
    #[must_use]
    pub fn certs_url(&self) -> String {
        self.oidc_url("certs")
    }

    /// Authorization endpoint (interactive and `prompt=none` requests).
    #[must_use]
    pub fn authorization_url(&self) -> String {
        self.oidc_url("auth")
    }

    /// Token endpoint (code exchange and refresh).
    #[must_use]
    pub fn token_url(&self) -> String {
        self.oidc_url("token")
    }

    /// RP-initiated logout endpoint.
    #[must_use]
    pub fn end_session_url(&self) -> String {
        self.oidc_url("logout")
    }

    fn oidc_url(&self, endpoint: &str) -> String {
        format!("{}/{OIDC_PREFIX}/{endpoint}", self.issuer())
    }
}

/// Derive the realm name from an issuer string.
///
/// Returns `None` when the issuer does not end in `/realms/<name>`.
#[must_use]
pub fn realm_from_issuer(issuer: &str) -> Option<&str> {
    let (_, realm) = issuer.rsplit_once(REALMS_SEGMENT)?;
    is_plain_identifier(realm).then_some(realm)
}

fn is_plain_identifier(value: &str) -> bool {
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_are_derived_from_issuer() {
        let endpoint = RealmEndpoint::new("http://keycloak-us:8080", "us-realm").unwrap();

        assert_eq!(endpoint.issuer(), "http://keycloak-us:8080/realms/us-realm");
        assert_eq!(
            endpoint.certs_url(),
            "http://keycloak-us:8080/realms/us-realm/protocol/openid-connect/certs"
        );
        assert_eq!(
            endpoint.authorization_url(),
            "http://keycloak-us:8080/realms/us-realm/protocol/openid-connect/auth"
        );
        assert_eq!(
            endpoint.token_url(),
            "http://keycloak-us:8080/realms/us-realm/protocol/openid-connect/token"
        );
        assert_eq!(
            endpoint.end_session_url(),
            "http://keycloak-us:8080/realms/us-realm/protocol/openid-connect/logout"
        );
    }

    #[test]
    fn test_trailing_slash_is_dropped() {
        let endpoint = RealmEndpoint::new("http://localhost:8080/", "eu-realm").unwrap();
        assert_eq!(endpoint.base_url(), "http://localhost:8080");
        assert_eq!(endpoint.issuer(), "http://localhost:8080/realms/eu-realm");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        assert!(matches!(
            RealmEndpoint::new("ftp://keycloak", "r"),
            Err(RealmError::InvalidBaseUrl(_))
        ));
        assert!(matches!(
            RealmEndpoint::new("not a url", "r"),
            Err(RealmError::InvalidBaseUrl(_))
        ));
    }

    #[test]
    fn test_rejects_bad_realm_names() {
        for realm in ["", "us/realm", "us realm", "../admin"] {
            assert!(
                matches!(
                    RealmEndpoint::new("http://localhost:8080", realm),
                    Err(RealmError::InvalidRealm(_))
                ),
                "realm {realm:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_realm_from_issuer() {
        assert_eq!(
            realm_from_issuer("http://localhost:8080/realms/us-realm"),
            Some("us-realm")
        );
        assert_eq!(
            realm_from_issuer("https://sso.example.com/auth/realms/eu-realm"),
            Some("eu-realm")
        );
        assert_eq!(realm_from_issuer("https://sso.example.com/issuer"), None);
        assert_eq!(realm_from_issuer("https://sso.example.com/realms/"), None);
        assert_eq!(
            realm_from_issuer("https://sso.example.com/realms/a/extra"),
            None
        );
    }
}
