//! Token trust: key resolution, issuer policy and verification.
//!
//! ```text
//! TokenVerifier -> FederatedKeyLookup -> KeyResolver (one per region)
//!               -> IssuerTrustPolicy
//! ```

pub mod claims;
pub mod federation;
pub mod jwks;
pub mod jwt;
pub mod trust;

pub use claims::{AuthSource, VerifiedClaims};
pub use federation::{FederatedKeyLookup, KeyResolution};
pub use jwks::{CacheStatus, Jwk, KeyResolver, ResolverSettings};
pub use jwt::TokenVerifier;
pub use trust::IssuerTrustPolicy;
