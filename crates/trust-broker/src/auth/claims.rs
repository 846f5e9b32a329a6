//! Token claims.
//!
//! [`TokenClaims`] is the Keycloak-shaped payload as decoded from a token.
//! [`VerifiedClaims`] is what handlers see after verification: the same data
//! plus the derived realm, auth source and verifying region. Subject and
//! email are redacted in Debug output of both.

use common::realm::realm_from_issuer;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raw access token payload.
#[derive(Clone, Deserialize)]
pub struct TokenClaims {
    /// Issuer identity (`<base-url>/realms/<realm>`).
    pub iss: String,

    /// Subject (user id in the issuing realm).
    #[serde(default)]
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default)]
    pub iat: Option<i64>,

    /// Provider session id.
    #[serde(default)]
    pub sid: Option<String>,

    /// Authorized party (client the token was issued to).
    #[serde(default)]
    pub azp: Option<String>,

    /// Space-separated scopes.
    #[serde(default)]
    pub scope: Option<String>,

    #[serde(default)]
    pub realm_access: Option<RealmAccess>,

    #[serde(default)]
    pub preferred_username: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    /// Alias of the upstream provider that authenticated the user when the
    /// login was brokered.
    #[serde(default)]
    pub identity_provider: Option<String>,
}

/// `realm_access` claim.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("iss", &self.iss)
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("azp", &self.azp)
            .field("scope", &self.scope)
            .field("identity_provider", &self.identity_provider)
            .finish_non_exhaustive()
    }
}

/// How the user authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthSource {
    /// Credentials entered at the issuing provider.
    Direct,

    /// Issuing provider delegated to another provider.
    Brokered,
}

impl AuthSource {
    pub fn as_str(self) -> &'static str {
        match self {
            AuthSource::Direct => "direct",
            AuthSource::Brokered => "brokered",
        }
    }
}

/// Claims of a token that passed every verification step.
#[derive(Clone, Serialize)]
pub struct VerifiedClaims {
    pub issuer: String,
    pub subject: String,
    pub expires_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issued_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorized_party: Option<String>,
    pub scopes: Vec<String>,
    pub roles: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,

    /// Realm name taken from the issuer.
    pub realm: String,

    pub auth_source: AuthSource,

    /// Region whose published key verified the signature.
    pub verified_by_region: String,
}

impl VerifiedClaims {
    /// Build verified claims from a decoded payload.
    pub fn from_token(claims: TokenClaims, verified_by_region: impl Into<String>) -> Self {
        let realm = realm_from_issuer(&claims.iss)
            .unwrap_or("unknown")
            .to_string();

        let identity_provider = claims.identity_provider.filter(|idp| !idp.is_empty());
        let auth_source = if identity_provider.is_some() {
            AuthSource::Brokered
        } else {
            AuthSource::Direct
        };

        let scopes = claims
            .scope
            .as_deref()
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();

        Self {
            issuer: claims.iss,
            subject: claims.sub,
            expires_at: claims.exp,
            issued_at: claims.iat,
            session_id: claims.sid,
            authorized_party: claims.azp,
            scopes,
            roles: claims.realm_access.unwrap_or_default().roles,
            preferred_username: claims.preferred_username,
            email: claims.email,
            name: claims.name,
            identity_provider,
            realm,
            auth_source,
            verified_by_region: verified_by_region.into(),
        }
    }

    /// Check if the token has a specific scope.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.iter().any(|s| s == scope)
    }

    /// Check if the user holds a realm role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl fmt::Debug for VerifiedClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VerifiedClaims")
            .field("issuer", &self.issuer)
            .field("subject", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .field("realm", &self.realm)
            .field("auth_source", &self.auth_source)
            .field("verified_by_region", &self.verified_by_region)
            .field("scopes", &self.scopes)
            .field("roles", &self.roles)
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}
