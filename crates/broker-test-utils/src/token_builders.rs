//! Builder patterns for test data construction
//!
//! Provides a fluent API for Keycloak-shaped access token claims.

use chrono::{Duration, Utc};
use serde_json::json;

/// Builder for Keycloak-style access token claims
///
/// # Example
/// ```rust,ignore
/// let claims = KeycloakClaimsBuilder::new("http://localhost:8080/realms/us-realm")
///     .for_user("alice")
///     .expires_in(300)
///     .brokered_by("us-keycloak")
///     .build();
/// ```
pub struct KeycloakClaimsBuilder {
    iss: String,
    sub: String,
    exp: i64,
    iat: i64,
    azp: String,
    scope: String,
    roles: Vec<String>,
    preferred_username: String,
    email: String,
    identity_provider: Option<String>,
}

impl KeycloakClaimsBuilder {
    /// Create a new claims builder with defaults
    pub fn new(issuer: &str) -> Self {
        let now = Utc::now();
        Self {
            iss: issuer.to_string(),
            sub: "test-subject".to_string(),
            exp: (now + Duration::seconds(300)).timestamp(),
            iat: now.timestamp(),
            azp: "test-app".to_string(),
            scope: "openid profile email".to_string(),
            roles: vec!["user".to_string()],
            preferred_username: "alice".to_string(),
            email: "alice@example.com".to_string(),
            identity_provider: None,
        }
    }

    /// Set the subject and username
    pub fn for_user(mut self, username: &str) -> Self {
        self.sub = format!("{username}-id");
        self.preferred_username = username.to_string();
        self.email = format!("{username}@example.com");
        self
    }

    /// Set the scope (space-separated)
    pub fn with_scope(mut self, scope: &str) -> Self {
        self.scope = scope.to_string();
        self
    }

    /// Set realm roles
    pub fn with_roles(mut self, roles: &[&str]) -> Self {
        self.roles = roles.iter().map(|r| r.to_string()).collect();
        self
    }

    /// Set the authorized party
    pub fn for_client(mut self, azp: &str) -> Self {
        self.azp = azp.to_string();
        self
    }

    /// Set expiration in seconds from now (negative for already expired)
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Set an absolute expiration timestamp
    pub fn expires_at(mut self, timestamp: i64) -> Self {
        self.exp = timestamp;
        self
    }

    /// Set issued-at timestamp
    pub fn issued_at(mut self, timestamp: i64) -> Self {
        self.iat = timestamp;
        self
    }

    /// Mark the login as brokered through an upstream provider alias
    pub fn brokered_by(mut self, alias: &str) -> Self {
        self.identity_provider = Some(alias.to_string());
        self
    }

    /// Build the claims as a JSON value
    pub fn build(self) -> serde_json::Value {
        let mut claims = json!({
            "iss": self.iss,
            "sub": self.sub,
            "exp": self.exp,
            "iat": self.iat,
            "typ": "Bearer",
            "azp": self.azp,
            "sid": "test-session",
            "scope": self.scope,
            "realm_access": { "roles": self.roles },
            "preferred_username": self.preferred_username,
            "email": self.email,
        });
        if let Some(idp) = self.identity_provider {
            claims["identity_provider"] = json!(idp);
        }
        claims
    }
}
