//! Mock Keycloak realm for integration tests
//!
//! Starts a `wiremock` server and serves a realm's key-discovery endpoint
//! at the same path Keycloak uses, so issuer and certs URLs line up with
//! what production code derives from a base URL and realm name.
//!
//! Login helpers stand in for the provider's authorization and token
//! endpoints. The authorization endpoint answers like a provider that has
//! (or lacks) a session cookie: a 302 back to the request's `redirect_uri`
//! carrying the request's `state`.

use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Answers an authorization request with a redirect to its `redirect_uri`.
///
/// The redirect carries either a code or an OAuth error, plus the request's
/// own `state`.
#[derive(Debug, Clone)]
pub enum AuthorizeRedirect {
    /// Provider session exists; issue this code.
    Code(String),
    /// Provider answers with this OAuth error.
    Error(String),
}

impl Respond for AuthorizeRedirect {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let param = |name: &str| {
            request
                .url
                .query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };

        let Some(redirect_uri) = param("redirect_uri") else {
            return ResponseTemplate::new(400).set_body_string("missing redirect_uri");
        };
        let state = param("state").unwrap_or_default();

        let (key, value) = match self {
            AuthorizeRedirect::Code(code) => ("code", code.as_str()),
            AuthorizeRedirect::Error(error) => ("error", error.as_str()),
        };
        let separator = if redirect_uri.contains('?') { '&' } else { '?' };

        ResponseTemplate::new(302).insert_header(
            "Location",
            format!("{redirect_uri}{separator}{key}={value}&state={state}").as_str(),
        )
    }
}

/// A realm served by a mock identity provider.
pub struct MockRealm {
    server: MockServer,
    realm: String,
}

impl MockRealm {
    /// Start a mock provider hosting `realm`.
    pub async fn start(realm: &str) -> Self {
        Self {
            server: MockServer::start().await,
            realm: realm.to_string(),
        }
    }

    /// The underlying mock server, for mounting extra endpoints.
    pub fn server(&self) -> &MockServer {
        &self.server
    }

    /// Provider base URL (no trailing slash).
    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    /// Realm name.
    pub fn realm(&self) -> &str {
        &self.realm
    }

    /// Issuer identity for this realm.
    pub fn issuer(&self) -> String {
        format!("{}/realms/{}", self.server.uri(), self.realm)
    }

    /// Path of an OpenID Connect endpoint under this realm.
    pub fn oidc_path(&self, endpoint: &str) -> String {
        format!("/realms/{}/protocol/openid-connect/{}", self.realm, endpoint)
    }

    /// Path of the key-discovery endpoint.
    pub fn certs_path(&self) -> String {
        self.oidc_path("certs")
    }

    /// Full key-discovery URL.
    pub fn certs_url(&self) -> String {
        format!("{}{}", self.server.uri(), self.certs_path())
    }

    /// Serve `keys` from the key-discovery endpoint.
    pub async fn serve_keys(&self, keys: Vec<serde_json::Value>) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` and verify the endpoint is hit exactly `calls` times
    /// when the server is dropped.
    pub async fn serve_keys_expecting(&self, keys: Vec<serde_json::Value>, calls: u64) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_document(keys)))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Serve `keys` after a delay, so concurrent callers overlap one fetch.
    pub async fn serve_keys_slowly(
        &self,
        keys: Vec<serde_json::Value>,
        delay: Duration,
        calls: u64,
    ) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(jwks_document(keys))
                    .set_delay(delay),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Make the key-discovery endpoint fail with `status`.
    pub async fn fail_certs(&self, status: u16) {
        Mock::given(method("GET"))
            .and(path(self.certs_path()))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Full URL of an OpenID Connect endpoint under this realm.
    pub fn oidc_url(&self, endpoint: &str) -> String {
        format!("{}{}", self.server.uri(), self.oidc_path(endpoint))
    }

    /// Answer `prompt=none` requests as a provider with a live session.
    pub async fn serve_provider_session(&self, code: &str) {
        Mock::given(method("GET"))
            .and(path(self.oidc_path("auth")))
            .and(query_param("prompt", "none"))
            .respond_with(AuthorizeRedirect::Code(code.to_string()))
            .mount(&self.server)
            .await;
    }

    /// Answer `prompt=none` requests as a provider without a session.
    pub async fn serve_no_provider_session(&self) {
        self.serve_silent_error("login_required").await;
    }

    /// Answer `prompt=none` requests with an OAuth error.
    pub async fn serve_silent_error(&self, error: &str) {
        Mock::given(method("GET"))
            .and(path(self.oidc_path("auth")))
            .and(query_param("prompt", "none"))
            .respond_with(AuthorizeRedirect::Error(error.to_string()))
            .mount(&self.server)
            .await;
    }

    /// Answer `prompt=none` requests after a delay.
    pub async fn serve_silent_slowly(&self, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(self.oidc_path("auth")))
            .and(query_param("prompt", "none"))
            .respond_with(ResponseTemplate::new(302).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Answer logins brokered through `alias` as if the upstream provider
    /// already had a session: redirect straight back with `outcome`.
    pub async fn serve_brokered_login(&self, alias: &str, outcome: AuthorizeRedirect) {
        Mock::given(method("GET"))
            .and(path(self.oidc_path("auth")))
            .and(query_param("kc_idp_hint", alias))
            .and(query_param_is_missing("prompt"))
            .respond_with(outcome)
            .mount(&self.server)
            .await;
    }

    /// Serve the login form for plain interactive logins, expecting it to be
    /// shown exactly `calls` times.
    pub async fn serve_login_form(&self, calls: u64) {
        Mock::given(method("GET"))
            .and(path(self.oidc_path("auth")))
            .and(query_param_is_missing("prompt"))
            .and(query_param_is_missing("kc_idp_hint"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<html><form id=\"kc-form-login\"></form></html>"),
            )
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer token requests of `grant_type` with `body`, after `delay`,
    /// expecting exactly `calls` of them.
    pub async fn serve_token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
        delay: Duration,
        calls: u64,
    ) {
        Mock::given(method("POST"))
            .and(path(self.oidc_path("token")))
            .and(body_string_contains(format!("grant_type={grant_type}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(body).set_delay(delay))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Reject token requests of `grant_type` with an OAuth error body.
    pub async fn fail_token_grant(&self, grant_type: &str, status: u16, error: &str) {
        Mock::given(method("POST"))
            .and(path(self.oidc_path("token")))
            .and(body_string_contains(format!("grant_type={grant_type}")))
            .respond_with(ResponseTemplate::new(status).set_body_json(json!({
                "error": error,
                "error_description": "rejected by mock realm"
            })))
            .mount(&self.server)
            .await;
    }

    /// Drop every mounted endpoint (and its expectations).
    pub async fn reset(&self) {
        self.server.reset().await;
    }

    /// Number of key-discovery requests received so far.
    pub async fn certs_requests(&self) -> usize {
        let certs_path = self.certs_path();
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == certs_path)
            .count()
    }
}

/// Token endpoint response body.
pub fn token_response(access_token: &str, expires_in: i64, refresh_token: &str) -> serde_json::Value {
    json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": expires_in,
        "refresh_token": refresh_token,
        "refresh_expires_in": 1800,
        "id_token": format!("id-{access_token}"),
        "scope": "openid profile email"
    })
}

/// Wrap keys in a JWKS document.
pub fn jwks_document(keys: Vec<serde_json::Value>) -> serde_json::Value {
    json!({ "keys": keys })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_realm_urls_follow_keycloak_layout() {
        let realm = MockRealm::start("us-realm").await;

        assert!(realm.issuer().ends_with("/realms/us-realm"));
        assert_eq!(
            realm.certs_path(),
            "/realms/us-realm/protocol/openid-connect/certs"
        );
        assert!(realm.certs_url().starts_with(&realm.base_url()));
    }

    #[tokio::test]
    async fn test_serves_keys_and_counts_requests() {
        let realm = MockRealm::start("eu-realm").await;
        realm.serve_keys(vec![json!({"kid": "k1", "kty": "OKP"})]).await;

        let body: serde_json::Value = reqwest::get(realm.certs_url())
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["keys"][0]["kid"], "k1");
        assert_eq!(realm.certs_requests().await, 1);
    }

    #[tokio::test]
    async fn test_authorize_redirect_echoes_state() {
        let realm = MockRealm::start("eu-realm").await;
        realm.serve_provider_session("code-1").await;

        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        let response = client
            .get(realm.oidc_url("auth"))
            .query(&[
                ("redirect_uri", "http://localhost:3001/"),
                ("state", "abc"),
                ("prompt", "none"),
            ])
            .send()
            .await
            .unwrap();

        assert_eq!(response.status().as_u16(), 302);
        assert_eq!(
            response.headers()["location"].to_str().unwrap(),
            "http://localhost:3001/?code=code-1&state=abc"
        );
    }
}
