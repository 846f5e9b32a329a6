//! Cross-origin policy.
//!
//! A request whose `Origin` header is not on the allow-list is rejected
//! with 403 before any identity work. Requests without `Origin` (server to
//! server, same-origin GETs) pass. The same list drives the CORS response
//! headers.

use crate::errors::BrokerError;
use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method},
    middleware::Next,
    response::IntoResponse,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};

/// How long browsers may cache a preflight result.
const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(600);

/// Exact-match origin allow-list.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
}

impl OriginPolicy {
    /// Build the policy from configured origins.
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: origins.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `origin` is allowed.
    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.contains(origin)
    }

    /// CORS layer answering for the allowed origins.
    pub fn cors_layer(&self) -> CorsLayer {
        let origins: Vec<HeaderValue> = self
            .allowed
            .iter()
            .filter_map(|o| HeaderValue::from_str(o).ok())
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(PREFLIGHT_MAX_AGE)
    }
}

/// Middleware rejecting requests from origins not on the allow-list.
pub async fn enforce_origin(
    State(policy): State<Arc<OriginPolicy>>,
    req: Request,
    next: Next,
) -> Result<impl IntoResponse, BrokerError> {
    if let Some(origin) = req.headers().get(header::ORIGIN) {
        let allowed = origin.to_str().is_ok_and(|o| policy.is_allowed(o));
        if !allowed {
            tracing::debug!(
                target: "broker.middleware.origin",
                origin = ?origin,
                "Origin not allowed"
            );
            return Err(BrokerError::OriginNotAllowed);
        }
    }

    Ok(next.run(req).await)
}
