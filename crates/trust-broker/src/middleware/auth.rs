//! Authentication middleware for protected routes.
//!
//! Extracts the Bearer token from the Authorization header, verifies it
//! with the [`TokenVerifier`], and injects the verified claims into request
//! extensions.

use crate::auth::{TokenVerifier, VerifiedClaims};
use crate::errors::BrokerError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Token verifier with per-region key resolvers.
    pub verifier: Arc<TokenVerifier>,
}

/// Authentication middleware that verifies bearer tokens.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// The scheme is matched case-insensitively.
///
/// # Response
///
/// - 401 `MISSING_CREDENTIAL` if the header is absent, uses another scheme,
///   or carries an empty token. No key lookup is attempted.
/// - 401 with `error="invalid_token"` if verification rejects the token
/// - Continues to next handler with [`VerifiedClaims`] in extensions
#[instrument(skip(state, req, next), name = "broker.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    let token = extract_bearer_token(req.headers())?;

    let claims = state.verifier.verify(token).await?;

    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}

/// Extract the bearer token from request headers.
///
/// # Errors
///
/// Returns `BrokerError::MissingCredential` when there is no usable bearer
/// credential.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, BrokerError> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            tracing::debug!(target: "broker.middleware.auth", "Missing Authorization header");
            BrokerError::MissingCredential
        })?;

    let (scheme, token) = auth_header.trim().split_once(' ').ok_or_else(|| {
        tracing::debug!(target: "broker.middleware.auth", "Invalid Authorization header format");
        BrokerError::MissingCredential
    })?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        tracing::debug!(target: "broker.middleware.auth", "Unsupported Authorization scheme");
        return Err(BrokerError::MissingCredential);
    }

    let token = token.trim();
    if token.is_empty() {
        tracing::debug!(target: "broker.middleware.auth", "Empty bearer token");
        return Err(BrokerError::MissingCredential);
    }

    Ok(token)
}

/// Extension trait for extracting claims from request.
///
/// Provides a convenient method for handlers to get the verified claims.
pub trait ClaimsExt {
    /// Get the verified claims from request extensions.
    ///
    /// Returns `None` if auth middleware was not applied to this request.
    fn claims(&self) -> Option<&VerifiedClaims>;
}

impl<B> ClaimsExt for axum::extract::Request<B> {
    fn claims(&self) -> Option<&VerifiedClaims> {
        self.extensions().get::<VerifiedClaims>()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    // Full middleware tests require a mocked key-discovery endpoint and
    // live in tests/auth_tests.rs.

    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(
            extract_bearer_token(&headers_with("Bearer abc.def.ghi")).unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            extract_bearer_token(&headers_with("bearer abc.def.ghi")).unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            extract_bearer_token(&headers_with("BEARER   abc.def.ghi  ")).unwrap(),
            "abc.def.ghi"
        );
    }

    #[test]
    fn test_missing_or_malformed_credentials() {
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()).unwrap_err(),
            BrokerError::MissingCredential
        );

        for value in ["Bearer", "Bearer ", "Basic dXNlcjpwYXNz", "Token abc", "abc.def.ghi"] {
            assert_eq!(
                extract_bearer_token(&headers_with(value)).unwrap_err(),
                BrokerError::MissingCredential,
                "{value:?}"
            );
        }
    }
}
