//! Common utilities and types shared across the regional SSO components.

#![warn(clippy::pedantic)]

/// Module for unverified JWT inspection (size limits, header and payload parsing)
pub mod jwt;

/// Module for identity-provider realm endpoints and issuer identities
pub mod realm;

/// Module for secret types that prevent accidental logging
pub mod secret;
