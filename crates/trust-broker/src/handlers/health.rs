//! Health check handler.

use crate::auth::CacheStatus;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Response for `/health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" when the process can answer.
    pub status: String,

    /// Local region id.
    pub region: String,

    /// Key cache state per region, in lookup order.
    pub key_caches: Vec<CacheStatus>,
}

/// Health check handler.
///
/// Reports the local region and each region's key cache. The check does
/// not contact identity providers; an empty cache is normal before the
/// first verified request.
///
/// ## Example Response
///
/// ```json
/// {
///   "status": "healthy",
///   "region": "US",
///   "key_caches": [
///     {"region": "US", "key_count": 2, "age_seconds": 41, "fresh": true},
///     {"region": "EU", "key_count": 0, "fresh": false}
///   ]
/// }
/// ```
#[instrument(skip_all, name = "broker.health.check")]
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        region: state.config.local_region.id.clone(),
        key_caches: state.verifier.lookup().cache_status(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            region: "US".to_string(),
            key_caches: vec![CacheStatus {
                region: "EU".to_string(),
                key_count: 0,
                age_seconds: None,
                fresh: false,
            }],
        };

        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["region"], "US");
        assert_eq!(json["key_caches"][0]["region"], "EU");
        assert!(json["key_caches"][0].get("age_seconds").is_none());
    }
}
