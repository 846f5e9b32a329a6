//! HTTP routes for the trust broker.
//!
//! Defines the Axum router and application state.

use crate::auth::{FederatedKeyLookup, IssuerTrustPolicy, KeyResolver, ResolverSettings, TokenVerifier};
use crate::config::{Config, Region};
use crate::handlers;
use crate::middleware::{enforce_origin, require_auth, AuthState, OriginPolicy};
use axum::{middleware, routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Service configuration.
    pub config: Config,

    /// Token verifier over the local and peer regions.
    pub verifier: Arc<TokenVerifier>,
}

impl AppState {
    /// Build the verifier stack from configuration.
    ///
    /// One key resolver per region, local first, then peers in configured
    /// order. Every configured region's issuers are trusted.
    pub fn from_config(config: Config) -> Self {
        let settings = ResolverSettings {
            cache_ttl: config.jwks_cache_ttl,
            refetch_cooldown: config.jwks_refetch_cooldown,
            http_timeout: config.jwks_http_timeout,
        };

        let local = resolver_for(&config.local_region, settings);
        let peers = config
            .peer_regions
            .iter()
            .map(|region| resolver_for(region, settings))
            .collect();

        let lookup = Arc::new(FederatedKeyLookup::new(local, peers));
        let trust = IssuerTrustPolicy::from_regions(config.all_regions());
        let verifier = Arc::new(TokenVerifier::new(
            lookup,
            trust,
            config.jwt_algorithm,
            config.jwt_clock_skew_seconds,
        ));

        Self { config, verifier }
    }
}

fn resolver_for(region: &Region, settings: ResolverSettings) -> Arc<KeyResolver> {
    Arc::new(KeyResolver::with_settings(
        region.id.clone(),
        region.internal.certs_url(),
        settings,
    ))
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - Region and key cache status - public
/// - `/metrics` - Prometheus metrics endpoint - public
/// - `/api/me` - Verified identity echo - requires authentication
/// - Origin allow-list enforcement and CORS headers
/// - TraceLayer for request logging
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let auth_state = Arc::new(AuthState {
        verifier: state.verifier.clone(),
    });
    let origin_policy = Arc::new(OriginPolicy::new(state.config.allowed_origins.clone()));

    // Public routes (no authentication required)
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .with_state(state);

    // Metrics route with its own state
    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        .route("/api/me", get(handlers::get_me))
        .route_layer(middleware::from_fn_with_state(auth_state, require_auth));

    // Merge routes and apply global middleware layers
    // Layer order (each .layer() wraps everything added before it):
    // 1. TraceLayer - Log request details (innermost)
    // 2. TimeoutLayer - Timeout the request, traced span included
    // 3. CorsLayer - Answer preflights, add CORS headers
    // 4. enforce_origin - Reject disallowed origins (outermost)
    public_routes
        .merge(metrics_routes)
        .merge(protected_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(origin_policy.cors_layer())
        .layer(middleware::from_fn_with_state(origin_policy, enforce_origin))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::collections::HashMap;
    use tower::ServiceExt;

    fn test_config() -> Config {
        let vars: HashMap<String, String> = [
            ("LOCAL_REGION", "us"),
            ("PEER_REGIONS", "eu"),
            ("REGION_US_KEYCLOAK_URL", "http://127.0.0.1:9"),
            ("REGION_US_REALM", "us-realm"),
            ("REGION_EU_KEYCLOAK_URL", "http://127.0.0.1:9"),
            ("REGION_EU_REALM", "eu-realm"),
            ("ALLOWED_ORIGINS", "http://localhost:3000"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_vars(&vars).unwrap()
    }

    fn test_router() -> Router {
        let state = Arc::new(AppState::from_config(test_config()));
        let handle = PrometheusBuilder::new().build_recorder().handle();
        build_routes(state, handle)
    }

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }

    #[test]
    fn test_from_config_orders_resolvers() {
        let state = AppState::from_config(test_config());
        let regions: Vec<&str> = state
            .verifier
            .lookup()
            .resolvers()
            .map(|r| r.region())
            .collect();

        assert_eq!(regions, vec!["US", "EU"]);
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = test_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["region"], "US");
        assert_eq!(json["key_caches"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_me_requires_credential() {
        let response = test_router()
            .oneshot(Request::builder().uri("/api/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let challenge = response
            .headers()
            .get(header::WWW_AUTHENTICATE)
            .unwrap()
            .to_str()
            .unwrap();
        assert!(!challenge.contains("invalid_token"));
    }

    #[tokio::test]
    async fn test_disallowed_origin_is_forbidden_before_auth() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/api/me")
                    .header(header::ORIGIN, "https://evil.example.com")
                    .header(header::AUTHORIZATION, "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_allowed_origin_gets_cors_headers() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn test_preflight_answered_by_cors_before_auth() {
        let response = test_router()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/me")
                    .header(header::ORIGIN, "http://localhost:3000")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
                    .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "authorization")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(header::WWW_AUTHENTICATE).is_none());
        assert_eq!(
            response
                .headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "http://localhost:3000"
        );
    }
}
