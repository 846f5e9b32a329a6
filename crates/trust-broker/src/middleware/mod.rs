//! Middleware for the trust broker.
//!
//! # Components
//!
//! - `origin` - Cross-origin allow-list, checked before any identity work
//! - `auth` - Bearer token verification for protected routes

pub mod auth;
pub mod origin;

pub use auth::{require_auth, AuthState, ClaimsExt};
pub use origin::{enforce_origin, OriginPolicy};
