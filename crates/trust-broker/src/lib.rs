//! Trust Broker Library
//!
//! Cross-region token trust for a multi-region identity deployment. A token
//! issued by any configured region's realm is accepted by every region,
//! using that region's published keys and an explicit issuer allow-list.
//!
//! # Modules
//!
//! - `auth` - Key resolution, federation, issuer trust, token verification
//! - `config` - Service configuration
//! - `errors` - Error types and HTTP mapping
//! - `handlers` - HTTP request handlers
//! - `middleware` - Authentication gate and origin policy
//! - `observability` - Prometheus metrics
//! - `routes` - Router and application state

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod observability;
pub mod routes;
