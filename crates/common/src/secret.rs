//! Secret types for protecting tokens from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Access tokens,
//! refresh tokens, id tokens and PKCE verifiers are all bearer material: anyone
//! who sees one in a log line can replay it against a resource server.
//!
//! `SecretString` implements `Debug` with redaction, so any struct that
//! derives `Debug` and holds a token is safe to pass to `tracing`.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct HeldToken {
//!     expires_at: i64,
//!     access_token: SecretString,
//! }
//!
//! let held = HeldToken {
//!     expires_at: 1_700_000_000,
//!     access_token: SecretString::from("eyJhbGciOi..."),
//! };
//!
//! // Debug output shows the expiry but not the token
//! println!("{held:?}");
//!
//! // Building the Authorization header requires an explicit call
//! let header = format!("Bearer {}", held.access_token.expose_secret());
//! # assert!(header.starts_with("Bearer "));
//! ```

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
