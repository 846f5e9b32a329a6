//! Metrics definitions for the trust broker.
//!
//! All metrics follow Prometheus naming conventions:
//! - `broker_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `outcome`: `accepted` plus the rejection taxonomy (~8 values)
//! - `region`: bounded by configured regions (local + peers)
//! - `status`: 2 values (success, error)
//! - `result`: 4 values (hit, miss, unknown_kid, stale)
//!
//! Key ids, issuers and subjects are never used as labels.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded. Verification buckets are
/// sub-millisecond at the low end (cache hits) and reach into seconds for
/// requests that waited on a key fetch.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("broker_token_verification".to_string()),
            &[
                0.0005, 0.001, 0.0025, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000,
                2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set token verification buckets: {e}"))?
        .set_buckets_for_metric(
            Matcher::Prefix("broker_jwks_fetch".to_string()),
            &[
                0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.000,
            ],
        )
        .map_err(|e| format!("Failed to set JWKS fetch buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

// ============================================================================
// Token Verification Metrics
// ============================================================================

/// Record a token verification decision.
///
/// Metric: `broker_token_verifications_total`, `broker_token_verification_duration_seconds`
/// Labels: `outcome`
///
/// Duration includes any key-set fetch the verification had to wait on.
pub fn record_token_verification(outcome: &'static str, duration: Duration) {
    histogram!("broker_token_verification_duration_seconds",
        "outcome" => outcome
    )
    .record(duration.as_secs_f64());

    counter!("broker_token_verifications_total",
        "outcome" => outcome
    )
    .increment(1);
}

// ============================================================================
// Key Resolver Metrics
// ============================================================================

/// Record a key-discovery fetch against one region.
///
/// Metric: `broker_jwks_fetches_total`, `broker_jwks_fetch_duration_seconds`
/// Labels: `region`, `status`
///
/// Coalesced callers share one fetch, so this counts network requests, not
/// lookups.
pub fn record_jwks_fetch(region: &str, status: &'static str, duration: Duration) {
    histogram!("broker_jwks_fetch_duration_seconds",
        "region" => region.to_string(),
        "status" => status
    )
    .record(duration.as_secs_f64());

    counter!("broker_jwks_fetches_total",
        "region" => region.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a key cache lookup result.
///
/// Metric: `broker_jwks_cache_total`
/// Labels: `region`, `result`
///
/// Results:
/// - `hit`: kid found in a fresh set
/// - `miss`: set missing or expired, fetch required
/// - `unknown_kid`: set fresh but kid absent
/// - `stale`: fetch failed, previous set served
pub fn record_jwks_cache(region: &str, result: &'static str) {
    counter!("broker_jwks_cache_total",
        "region" => region.to_string(),
        "result" => result
    )
    .increment(1);
}
