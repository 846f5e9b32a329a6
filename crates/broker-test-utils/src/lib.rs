//! # Broker Test Utilities
//!
//! Shared test utilities for the trust broker and session client.
//!
//! This crate provides:
//! - Deterministic signing keys (Ed25519 from a seed, one fixed RSA key)
//! - Keycloak-shaped claim builders
//! - Mock realms on `wiremock`: key discovery, silent and brokered
//!   authorization redirects, token grants
//!
//! ## Usage
//!
//! ```rust,ignore
//! use broker_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let realm = MockRealm::start("us-realm").await;
//!     let key = TestKeypair::new(1, "us-key-1");
//!     realm.serve_keys(vec![key.public_jwk()]).await;
//!
//!     let token = key.sign(
//!         &KeycloakClaimsBuilder::new(&realm.issuer())
//!             .for_user("alice")
//!             .expires_in(300)
//!             .build(),
//!     );
//! }
//! ```

pub mod crypto_fixtures;
pub mod mock_realm;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::*;
pub use mock_realm::*;
pub use token_builders::*;
