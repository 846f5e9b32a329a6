//! JWT inspection utilities shared by the broker and the session client.
//!
//! This module provides the structural, *unverified* view of a token:
//! - Size limits for DoS prevention
//! - Clock skew bounds for expiry validation
//! - Header parsing (`alg`, `kid`) used to pick a verification key
//! - Payload parsing used only to reject garbage before any key lookup
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Nothing returned here is trustworthy until the signature is verified
//! - Error messages are generic; details are logged at debug level
//!
//! # Usage
//!
//! ```rust,ignore
//! use common::jwt::parse_unverified;
//!
//! let unverified = parse_unverified(token)?;
//! let key = federation.resolve(&unverified.header.kid).await;
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum allowed JWT size in bytes (8KB).
///
/// Identity-provider access tokens with realm roles and brokering claims are
/// typically 1-2KB. Anything larger than this is rejected before base64
/// decoding or any cryptographic work.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

/// Default clock skew tolerance applied to `exp` (none).
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(0);

/// Maximum configurable clock skew tolerance (5 minutes).
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(300);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while inspecting a token's structure.
///
/// Every variant renders the same message so that callers surfacing the
/// error cannot be used as a parsing oracle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    /// Token size exceeds maximum allowed.
    #[error("The access token is invalid or expired")]
    TokenTooLarge,

    /// Token format is invalid (not a valid JWT structure).
    #[error("The access token is invalid or expired")]
    MalformedToken,

    /// Token is missing the `kid` header, or it is empty / not a string.
    #[error("The access token is invalid or expired")]
    MissingKid,

    /// Token is missing the `alg` header.
    #[error("The access token is invalid or expired")]
    MissingAlgorithm,
}

// =============================================================================
// Types
// =============================================================================

/// The parts of a JWT header needed to choose a verification key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Algorithm claimed by the token (not trusted; compared to a pinned value).
    pub alg: String,

    /// Key identifier used to look up the public key.
    pub kid: String,

    /// Optional token type (`JWT`, `at+jwt`, ...).
    pub typ: Option<String>,
}

/// A token that is structurally sound but whose signature is NOT verified.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    /// Parsed header.
    pub header: TokenHeader,

    /// Issuer claim as written in the payload, if present.
    pub issuer: Option<String>,
}

#[derive(Deserialize)]
struct RawHeader {
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    kid: Option<serde_json::Value>,
    #[serde(default)]
    typ: Option<String>,
}

// =============================================================================
// Functions
// =============================================================================

/// Parse a JWT's header and payload without verifying the signature.
///
/// Checks, in order: size limit, three dot-separated non-empty segments,
/// base64url JSON header, a non-empty string `kid`, an `alg`, and a base64url
/// payload that decodes to a JSON object.
///
/// # Errors
///
/// - `TokenTooLarge` - Token exceeds [`MAX_JWT_SIZE_BYTES`]
/// - `MalformedToken` - Wrong structure, bad base64, or invalid JSON
/// - `MissingKid` - Header has no usable `kid`
/// - `MissingAlgorithm` - Header has no `alg`
pub fn parse_unverified(token: &str) -> Result<UnverifiedToken, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let mut parts = token.split('.');
    let (Some(header_part), Some(payload_part), Some(signature_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(JwtValidationError::MalformedToken);
    };

    if header_part.is_empty() || payload_part.is_empty() || signature_part.is_empty() {
        tracing::debug!(target: "common.jwt", "Token rejected: empty JWT segment");
        return Err(JwtValidationError::MalformedToken);
    }

    let header = parse_header(header_part)?;

    let payload_bytes = URL_SAFE_NO_PAD.decode(payload_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT payload base64");
        JwtValidationError::MalformedToken
    })?;

    let payload: serde_json::Value = serde_json::from_slice(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT payload JSON");
        JwtValidationError::MalformedToken
    })?;

    let serde_json::Value::Object(payload) = payload else {
        tracing::debug!(target: "common.jwt", "JWT payload is not a JSON object");
        return Err(JwtValidationError::MalformedToken);
    };

    let issuer = payload
        .get("iss")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string);

    Ok(UnverifiedToken { header, issuer })
}

fn parse_header(header_part: &str) -> Result<TokenHeader, JwtValidationError> {
    let header_bytes = URL_SAFE_NO_PAD.decode(header_part).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT header base64");
        JwtValidationError::MalformedToken
    })?;

    let raw: RawHeader = serde_json::from_slice(&header_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT header JSON");
        JwtValidationError::MalformedToken
    })?;

    // Reject non-string and empty kid values
    let kid = raw
        .kid
        .as_ref()
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .ok_or(JwtValidationError::MissingKid)?;

    let alg = raw
        .alg
        .filter(|s| !s.is_empty())
        .ok_or(JwtValidationError::MissingAlgorithm)?;

    Ok(TokenHeader {
        alg,
        kid,
        typ: raw.typ,
    })
}

// =============================================================================
// Tests
// =============================================================================
