//! Current user handler.
//!
//! Echoes the verified identity so a front end can show who it is signed
//! in as and how the token reached this region.

use crate::auth::AuthSource;
use crate::errors::BrokerError;
use crate::middleware::ClaimsExt;
use axum::{extract::Request, Json};
use serde::Serialize;
use tracing::instrument;

/// Response for `/api/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// Subject in the issuing realm.
    pub sub: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Realm that issued the token.
    pub realm: String,

    /// Direct or brokered login.
    pub auth_source: AuthSource,

    /// Upstream provider alias for brokered logins.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity_provider: Option<String>,

    /// Region whose key verified the token.
    pub verified_by_region: String,

    pub roles: Vec<String>,

    pub scopes: Vec<String>,

    /// Token expiration timestamp.
    pub exp: i64,
}

/// Handler for GET /api/me
///
/// Requires the auth middleware.
///
/// ## Response
///
/// ```json
/// {
///   "sub": "f2b1c3d4-...",
///   "username": "alice",
///   "email": "alice@example.com",
///   "realm": "eu-realm",
///   "auth_source": "brokered",
///   "identity_provider": "us-keycloak",
///   "verified_by_region": "EU",
///   "roles": ["user"],
///   "scopes": ["openid", "profile", "email"],
///   "exp": 1700000300
/// }
/// ```
#[instrument(skip_all, name = "broker.handlers.me")]
pub async fn get_me(req: Request) -> Result<Json<MeResponse>, BrokerError> {
    let claims = req.claims().ok_or_else(|| {
        tracing::error!(target: "broker.handlers.me", "Claims missing; auth middleware not applied");
        BrokerError::Internal
    })?;

    tracing::debug!(target: "broker.handlers.me", "Returning verified claims");

    Ok(Json(MeResponse {
        sub: claims.subject.clone(),
        username: claims.preferred_username.clone(),
        email: claims.email.clone(),
        realm: claims.realm.clone(),
        auth_source: claims.auth_source,
        identity_provider: claims.identity_provider.clone(),
        verified_by_region: claims.verified_by_region.clone(),
        roles: claims.roles.clone(),
        scopes: claims.scopes.clone(),
        exp: claims.expires_at,
    }))
}
