//! Trust broker error types.
//!
//! Every error maps to an HTTP status and a short taxonomy code via the
//! `IntoResponse` impl. Response bodies never carry key material, cache
//! state or trust-list contents; details are logged server-side only.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Realm advertised in `WWW-Authenticate` challenges.
const CHALLENGE_REALM: &str = "trust-broker";

/// Trust broker error type.
///
/// Maps to HTTP status codes:
/// - MissingCredential: 401 Unauthorized (plain challenge)
/// - Malformed, UnknownSigningKey, BadSignature, UntrustedIssuer, Expired:
///   401 Unauthorized with `error="invalid_token"`
/// - OriginNotAllowed: 403 Forbidden
/// - KeySourceUnavailable: 503 Service Unavailable
/// - Internal: 500 Internal Server Error
///
/// `Clone` is required because key-set fetch outcomes are shared between
/// every caller waiting on the same in-flight fetch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Missing bearer credential")]
    MissingCredential,

    #[error("Malformed token")]
    Malformed,

    #[error("Unknown signing key")]
    UnknownSigningKey,

    #[error("Bad signature")]
    BadSignature,

    #[error("Untrusted issuer")]
    UntrustedIssuer,

    #[error("Token expired")]
    Expired,

    #[error("Key source unavailable: {0}")]
    KeySourceUnavailable(String),

    #[error("Origin not allowed")]
    OriginNotAllowed,

    #[error("Internal server error")]
    Internal,
}

impl BrokerError {
    /// Returns the HTTP status code for this error (for metrics recording).
    pub fn status_code(&self) -> u16 {
        match self {
            BrokerError::MissingCredential
            | BrokerError::Malformed
            | BrokerError::UnknownSigningKey
            | BrokerError::BadSignature
            | BrokerError::UntrustedIssuer
            | BrokerError::Expired => 401,
            BrokerError::OriginNotAllowed => 403,
            BrokerError::KeySourceUnavailable(_) => 503,
            BrokerError::Internal => 500,
        }
    }

    /// Taxonomy code returned to clients.
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::MissingCredential => "MISSING_CREDENTIAL",
            BrokerError::Malformed => "MALFORMED",
            BrokerError::UnknownSigningKey => "UNKNOWN_SIGNING_KEY",
            BrokerError::BadSignature => "BAD_SIGNATURE",
            BrokerError::UntrustedIssuer => "UNTRUSTED_ISSUER",
            BrokerError::Expired => "EXPIRED",
            BrokerError::KeySourceUnavailable(_) => "KEY_SOURCE_UNAVAILABLE",
            BrokerError::OriginNotAllowed => "ORIGIN_NOT_ALLOWED",
            BrokerError::Internal => "INTERNAL_ERROR",
        }
    }

    /// Bounded metric label for this error.
    pub fn label(&self) -> &'static str {
        match self {
            BrokerError::MissingCredential => "missing_credential",
            BrokerError::Malformed => "malformed",
            BrokerError::UnknownSigningKey => "unknown_signing_key",
            BrokerError::BadSignature => "bad_signature",
            BrokerError::UntrustedIssuer => "untrusted_issuer",
            BrokerError::Expired => "expired",
            BrokerError::KeySourceUnavailable(_) => "key_source_unavailable",
            BrokerError::OriginNotAllowed => "origin_not_allowed",
            BrokerError::Internal => "internal",
        }
    }

    /// True for the verification taxonomy (credential present but rejected).
    pub fn is_invalid_token(&self) -> bool {
        matches!(
            self,
            BrokerError::Malformed
                | BrokerError::UnknownSigningKey
                | BrokerError::BadSignature
                | BrokerError::UntrustedIssuer
                | BrokerError::Expired
        )
    }

    fn client_message(&self) -> &'static str {
        match self {
            BrokerError::MissingCredential => "A bearer token is required",
            BrokerError::Malformed => "The access token is not a well-formed JWT",
            BrokerError::UnknownSigningKey => {
                "The access token was signed by a key no trusted region publishes"
            }
            BrokerError::BadSignature => "The access token signature is invalid",
            BrokerError::UntrustedIssuer => "The access token issuer is not trusted here",
            BrokerError::Expired => "The access token has expired",
            BrokerError::KeySourceUnavailable(_) => "Service temporarily unavailable",
            BrokerError::OriginNotAllowed => "Cross-origin requests from this origin are not allowed",
            BrokerError::Internal => "An internal error occurred",
        }
    }

    fn challenge(&self) -> Option<String> {
        match self {
            BrokerError::MissingCredential => Some(format!("Bearer realm=\"{CHALLENGE_REALM}\"")),
            e if e.is_invalid_token() => Some(format!(
                "Bearer realm=\"{CHALLENGE_REALM}\", error=\"invalid_token\""
            )),
            _ => None,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        match &self {
            BrokerError::KeySourceUnavailable(reason) => {
                tracing::warn!(target: "broker.availability", reason = %reason, "Key source unavailable");
            }
            BrokerError::Internal => {
                tracing::error!(target: "broker.errors", "Internal error while handling request");
            }
            _ => {}
        }

        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: self.code().to_string(),
                message: self.client_message().to_string(),
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if let Some(challenge) = self.challenge() {
            if let Ok(header_value) = HeaderValue::from_str(&challenge) {
                response
                    .headers_mut()
                    .insert(header::WWW_AUTHENTICATE, header_value);
            }
        }

        response
    }
}
