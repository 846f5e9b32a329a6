//! Authentication gate integration tests.
//!
//! Runs the real router against two mock regions (US local, EU peer) and
//! drives it over HTTP with `reqwest`.

use broker_test_utils::{KeycloakClaimsBuilder, MockRealm, RsaTestKey, TestKeypair};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use tokio::task::JoinHandle;
use trust_broker::config::Config;
use trust_broker::observability::metrics::init_metrics_recorder;
use trust_broker::routes::{build_routes, AppState};

const ALLOWED_ORIGIN: &str = "http://localhost:3000";

/// One recorder per test binary; every server renders the same registry.
fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE
        .get_or_init(|| {
            init_metrics_recorder()
                .unwrap_or_else(|_| PrometheusBuilder::new().build_recorder().handle())
        })
        .clone()
}

/// A broker deployed in the US region with EU as its peer.
struct TestBroker {
    addr: SocketAddr,
    us: MockRealm,
    eu: MockRealm,
    _handle: JoinHandle<()>,
}

impl TestBroker {
    async fn spawn(algorithm: &str) -> Result<Self, anyhow::Error> {
        let us = MockRealm::start("us-realm").await;
        let eu = MockRealm::start("eu-realm").await;

        let vars: HashMap<String, String> = [
            ("BIND_ADDRESS", "127.0.0.1:0".to_string()),
            ("LOCAL_REGION", "US".to_string()),
            ("PEER_REGIONS", "EU".to_string()),
            ("REGION_US_KEYCLOAK_URL", us.base_url()),
            ("REGION_US_REALM", us.realm().to_string()),
            ("REGION_EU_KEYCLOAK_URL", eu.base_url()),
            ("REGION_EU_REALM", eu.realm().to_string()),
            ("ALLOWED_ORIGINS", ALLOWED_ORIGIN.to_string()),
            ("JWT_ALGORITHM", algorithm.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let config = Config::from_vars(&vars)?;
        let state = Arc::new(AppState::from_config(config));
        let app = build_routes(state, metrics_handle());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            us,
            eu,
            _handle: handle,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    async fn get_me(&self, token: &str) -> Result<reqwest::Response, anyhow::Error> {
        Ok(reqwest::Client::new()
            .get(self.url("/api/me"))
            .bearer_auth(token)
            .send()
            .await?)
    }
}

async fn error_code(response: reqwest::Response) -> Result<String, anyhow::Error> {
    let body: serde_json::Value = response.json().await?;
    Ok(body
        .pointer("/error/code")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string())
}

fn challenge(response: &reqwest::Response) -> String {
    response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

#[tokio::test]
async fn test_local_token_is_accepted() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(
        &KeycloakClaimsBuilder::new(&broker.us.issuer())
            .for_user("alice")
            .with_roles(&["user"])
            .build(),
    );

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["username"], "alice");
    assert_eq!(body["realm"], "us-realm");
    assert_eq!(body["auth_source"], "direct");
    assert_eq!(body["verified_by_region"], "US");
    assert_eq!(body["roles"], serde_json::json!(["user"]));

    Ok(())
}

#[tokio::test]
async fn test_peer_issued_brokered_token_is_accepted() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let us_key = TestKeypair::new(1, "us-key-1");
    let eu_key = TestKeypair::new(2, "eu-key-1");
    broker.us.serve_keys(vec![us_key.public_jwk()]).await;
    broker.eu.serve_keys(vec![eu_key.public_jwk()]).await;

    // Logged in at EU by way of the US provider
    let token = eu_key.sign(
        &KeycloakClaimsBuilder::new(&broker.eu.issuer())
            .for_user("alice")
            .brokered_by("us-keycloak")
            .build(),
    );

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["realm"], "eu-realm");
    assert_eq!(body["auth_source"], "brokered");
    assert_eq!(body["identity_provider"], "us-keycloak");
    assert_eq!(body["verified_by_region"], "EU");

    Ok(())
}

#[tokio::test]
async fn test_rs256_realm_key_is_accepted() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("RS256").await?;
    let key = RsaTestKey::new("us-rsa-1");
    // Keycloak publishes its encryption key next to the signing key
    broker
        .us
        .serve_keys(vec![key.public_jwk(), RsaTestKey::new("us-enc-1").encryption_jwk()])
        .await;

    let token = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).build());

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 200);

    Ok(())
}

#[tokio::test]
async fn test_unknown_kid_is_rejected() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    broker
        .us
        .serve_keys(vec![TestKeypair::new(1, "us-key-1").public_jwk()])
        .await;
    broker
        .eu
        .serve_keys(vec![TestKeypair::new(2, "eu-key-1").public_jwk()])
        .await;

    let stranger = TestKeypair::new(9, "nobody-key");
    let token = stranger.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).build());

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 401);
    assert!(challenge(&response).contains("error=\"invalid_token\""));
    assert_eq!(error_code(response).await?, "UNKNOWN_SIGNING_KEY");

    Ok(())
}

#[tokio::test]
async fn test_untrusted_issuer_signed_by_known_key_is_rejected() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(&KeycloakClaimsBuilder::new("https://evil.example.com/realms/us-realm").build());

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 401);
    assert_eq!(error_code(response).await?, "UNTRUSTED_ISSUER");

    Ok(())
}

#[tokio::test]
async fn test_expired_token_is_rejected() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(
        &KeycloakClaimsBuilder::new(&broker.us.issuer())
            .expires_in(-60)
            .build(),
    );

    let response = broker.get_me(&token).await?;
    assert_eq!(response.status(), 401);
    assert_eq!(error_code(response).await?, "EXPIRED");

    Ok(())
}

#[tokio::test]
async fn test_tampered_payload_is_rejected() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).for_user("alice").build());
    let forged = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).for_user("mallory").build());

    // Header and signature from alice's token, payload from mallory's
    let mut parts: Vec<&str> = token.split('.').collect();
    let forged_payload = forged.split('.').nth(1).unwrap_or_default();
    if let Some(payload) = parts.get_mut(1) {
        *payload = forged_payload;
    }

    let response = broker.get_me(&parts.join(".")).await?;
    assert_eq!(response.status(), 401);
    assert_eq!(error_code(response).await?, "BAD_SIGNATURE");

    Ok(())
}

#[tokio::test]
async fn test_missing_credential_makes_no_key_lookup() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;

    let response = reqwest::Client::new()
        .get(broker.url("/api/me"))
        .send()
        .await?;

    assert_eq!(response.status(), 401);
    let challenge = challenge(&response);
    assert!(challenge.starts_with("Bearer realm="));
    assert!(!challenge.contains("invalid_token"));
    assert_eq!(error_code(response).await?, "MISSING_CREDENTIAL");

    assert_eq!(broker.us.certs_requests().await, 0);
    assert_eq!(broker.eu.certs_requests().await, 0);

    Ok(())
}

#[tokio::test]
async fn test_disallowed_origin_is_forbidden() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;
    let token = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).build());

    let response = reqwest::Client::new()
        .get(broker.url("/api/me"))
        .header("origin", "https://evil.example.com")
        .bearer_auth(&token)
        .send()
        .await?;

    assert_eq!(response.status(), 403);
    assert_eq!(error_code(response).await?, "ORIGIN_NOT_ALLOWED");
    assert_eq!(broker.us.certs_requests().await, 0);

    let response = reqwest::Client::new()
        .get(broker.url("/api/me"))
        .header("origin", ALLOWED_ORIGIN)
        .bearer_auth(&token)
        .send()
        .await?;

    assert_eq!(response.status(), 200);
    assert_eq!(
        response
            .headers()
            .get("access-control-allow-origin")
            .and_then(|v| v.to_str().ok()),
        Some(ALLOWED_ORIGIN)
    );

    Ok(())
}

#[tokio::test]
async fn test_health_reports_key_caches() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).build());
    assert_eq!(broker.get_me(&token).await?.status(), 200);

    let body: serde_json::Value = reqwest::get(broker.url("/health")).await?.json().await?;

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["region"], "US");
    assert_eq!(body["key_caches"][0]["region"], "US");
    assert_eq!(body["key_caches"][0]["key_count"], 1);
    assert_eq!(body["key_caches"][0]["fresh"], true);
    assert_eq!(body["key_caches"][1]["region"], "EU");
    assert_eq!(body["key_caches"][1]["key_count"], 0);

    Ok(())
}

#[tokio::test]
async fn test_metrics_record_verification_outcomes() -> Result<(), anyhow::Error> {
    let broker = TestBroker::spawn("EdDSA").await?;
    let key = TestKeypair::new(1, "us-key-1");
    broker.us.serve_keys(vec![key.public_jwk()]).await;

    let token = key.sign(&KeycloakClaimsBuilder::new(&broker.us.issuer()).build());
    assert_eq!(broker.get_me(&token).await?.status(), 200);

    let body = reqwest::get(broker.url("/metrics")).await?.text().await?;

    assert!(body.contains("broker_token_verifications_total"));
    assert!(body.contains("outcome=\"accepted\""));
    assert!(body.contains("broker_jwks_fetches_total"));
    assert!(!body.contains("us-key-1"), "kids must not appear as labels");

    Ok(())
}
