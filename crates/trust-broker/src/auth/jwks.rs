//! Per-region key resolver.
//!
//! Fetches the public signing keys a region's identity provider publishes at
//! `<issuer>/protocol/openid-connect/certs` and caches them as one immutable
//! [`KeySet`].
//!
//! # Concurrency
//!
//! - Readers load the current set through `ArcSwapOption` without locking.
//! - A refresh builds a complete new set and swaps it in; readers never see
//!   a mix of old and new keys.
//! - Concurrent lookups that need a fetch share one in-flight request. The
//!   `in_flight` mutex guards only the "is a fetch pending" slot, never key
//!   material.
//! - A failed fetch leaves the previous set in place and lookups keep using
//!   it until a fetch succeeds. For one refetch cooldown after a failure an
//!   expired set is served without another fetch attempt.

use crate::errors::BrokerError;
use crate::observability::metrics::{record_jwks_cache, record_jwks_fetch};
use arc_swap::ArcSwapOption;
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::instrument;

/// Default cache TTL in seconds (10 minutes).
const DEFAULT_CACHE_TTL_SECONDS: u64 = 600;

/// Default minimum set age before an unknown kid may trigger a refetch.
const DEFAULT_REFETCH_COOLDOWN_SECONDS: u64 = 10;

/// Default key-discovery request timeout.
const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// JSON Web Key from a key-discovery endpoint.
///
/// Only the members needed to build a verification key are kept. Which ones
/// are present depends on `kty`: `n`/`e` for RSA, `crv`/`x`/`y` for EC,
/// `crv`/`x` for OKP.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Jwk {
    /// Key type ("RSA", "EC" or "OKP").
    pub kty: String,

    /// Key ID - used to select the correct key for verification.
    pub kid: String,

    /// Algorithm the key is meant for (e.g. "RS256").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,

    /// Key use ("sig" or "enc").
    #[serde(default, rename = "use", skip_serializing_if = "Option::is_none")]
    pub key_use: Option<String>,

    /// RSA modulus (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<String>,

    /// RSA public exponent (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub e: Option<String>,

    /// Curve name for EC and OKP keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crv: Option<String>,

    /// EC x coordinate or OKP public key (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<String>,

    /// EC y coordinate (base64url).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<String>,
}

impl Jwk {
    /// Whether this key may verify signatures.
    ///
    /// Keys without `use` are accepted; Keycloak publishes its `RSA-OAEP`
    /// encryption key with `use: "enc"` next to the signing key.
    pub fn is_signing_key(&self) -> bool {
        self.key_use.as_deref().map_or(true, |u| u == "sig")
    }
}

/// Raw key-discovery document.
///
/// Keys are parsed one by one so a single unusable entry does not discard
/// the whole document.
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<serde_json::Value>,
}

/// One complete fetch of a region's signing keys.
#[derive(Debug)]
pub struct KeySet {
    keys: HashMap<String, Jwk>,
    fetched_at: Instant,
    expires_at: Instant,
}

impl KeySet {
    fn new(keys: HashMap<String, Jwk>, ttl: Duration) -> Self {
        let fetched_at = Instant::now();
        Self {
            keys,
            fetched_at,
            expires_at: fetched_at + ttl,
        }
    }

    /// Look up a key by kid.
    pub fn get(&self, kid: &str) -> Option<&Jwk> {
        self.keys.get(kid)
    }

    /// Number of signing keys in the set.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the set holds no signing keys.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Time since this set was fetched.
    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    /// Whether the set is still within its TTL.
    pub fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// Snapshot of a resolver's cache for operators and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheStatus {
    /// Region id.
    pub region: String,

    /// Keys in the cached set (0 when nothing is cached).
    pub key_count: usize,

    /// Seconds since the cached set was fetched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age_seconds: Option<u64>,

    /// Whether the cached set is within its TTL.
    pub fresh: bool,
}

/// Cache tuning for a [`KeyResolver`].
#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    /// How long a fetched set is used before it is refetched.
    pub cache_ttl: Duration,

    /// Minimum set age before an unknown kid triggers a refetch.
    pub refetch_cooldown: Duration,

    /// Timeout for one key-discovery request.
    pub http_timeout: Duration,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECONDS),
            refetch_cooldown: Duration::from_secs(DEFAULT_REFETCH_COOLDOWN_SECONDS),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
        }
    }
}

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<KeySet>, BrokerError>>>;

/// Key resolver for one region.
///
/// Owns that region's cached [`KeySet`] exclusively.
pub struct KeyResolver {
    /// Region id, used for logs and metric labels.
    region: String,

    /// URL to the region's key-discovery endpoint.
    certs_url: String,

    /// HTTP client for fetching keys.
    http_client: reqwest::Client,

    /// Current key set, replaced whole on refresh.
    cache: Arc<ArcSwapOption<KeySet>>,

    /// Fetch currently in flight, shared by every waiting caller.
    in_flight: Mutex<Option<SharedFetch>>,

    /// When the most recent fetch failed; cleared by a successful fetch.
    last_failure: Arc<ArcSwapOption<Instant>>,

    settings: ResolverSettings,
}

impl KeyResolver {
    /// Create a resolver with default cache settings.
    ///
    /// # Arguments
    ///
    /// * `region` - Region id used in logs and metrics
    /// * `certs_url` - The region's key-discovery endpoint
    pub fn new(region: impl Into<String>, certs_url: impl Into<String>) -> Self {
        Self::with_settings(region, certs_url, ResolverSettings::default())
    }

    /// Create a resolver with custom cache settings.
    pub fn with_settings(
        region: impl Into<String>,
        certs_url: impl Into<String>,
        settings: ResolverSettings,
    ) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(settings.http_timeout)
            .connect_timeout(settings.http_timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "broker.auth.jwks", error = %e, "Failed to build HTTP client with custom config, using defaults");
                reqwest::Client::new()
            });

        Self {
            region: region.into(),
            certs_url: certs_url.into(),
            http_client,
            cache: Arc::new(ArcSwapOption::empty()),
            in_flight: Mutex::new(None),
            last_failure: Arc::new(ArcSwapOption::empty()),
            settings,
        }
    }

    /// Region id this resolver serves.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Key-discovery endpoint this resolver polls.
    pub fn certs_url(&self) -> &str {
        &self.certs_url
    }

    /// Get a signing key by kid.
    ///
    /// Returns `Ok(None)` when the region does not publish the kid.
    ///
    /// A fetch happens when no set is cached, when the cached set has
    /// expired, or when the kid is unknown and the set is older than the
    /// refetch cooldown. Concurrent callers share one fetch.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::KeySourceUnavailable` if a fetch is needed, it
    /// fails, and no previous set exists to fall back on.
    #[instrument(skip(self), fields(region = %self.region, kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Option<Jwk>, BrokerError> {
        if let Some(set) = self.cache.load_full() {
            if set.is_fresh() {
                if let Some(key) = set.get(kid) {
                    tracing::debug!(target: "broker.auth.jwks", "JWKS cache hit");
                    record_jwks_cache(&self.region, "hit");
                    return Ok(Some(key.clone()));
                }
                if set.age() < self.settings.refetch_cooldown {
                    tracing::debug!(target: "broker.auth.jwks", "Key not found in fresh JWKS, within refetch cooldown");
                    record_jwks_cache(&self.region, "unknown_kid");
                    return Ok(None);
                }
            } else if self.recently_failed() {
                tracing::debug!(target: "broker.auth.jwks", "Key source failed recently, serving previous key set");
                record_jwks_cache(&self.region, "stale");
                return Ok(set.get(kid).cloned());
            }
        }

        record_jwks_cache(&self.region, "miss");

        match self.shared_fetch(Some(kid)).await {
            Ok(set) => Ok(set.get(kid).cloned()),
            Err(e) => match self.cache.load_full() {
                Some(stale) => {
                    tracing::warn!(
                        target: "broker.auth.jwks",
                        error = %e,
                        age_seconds = stale.age().as_secs(),
                        "JWKS fetch failed, serving previous key set"
                    );
                    record_jwks_cache(&self.region, "stale");
                    Ok(stale.get(kid).cloned())
                }
                None => Err(e),
            },
        }
    }

    /// Fetch the key set now, regardless of cache state.
    ///
    /// Joins a fetch that is already in flight instead of starting another.
    /// Returns the number of signing keys in the new set.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::KeySourceUnavailable` if the fetch fails. The
    /// previous set stays cached.
    #[instrument(skip(self), fields(region = %self.region))]
    pub async fn force_refresh(&self) -> Result<usize, BrokerError> {
        let set = self.shared_fetch(None).await?;
        Ok(set.len())
    }

    /// Snapshot of the cache state.
    pub fn status(&self) -> CacheStatus {
        match self.cache.load_full() {
            Some(set) => CacheStatus {
                region: self.region.clone(),
                key_count: set.len(),
                age_seconds: Some(set.age().as_secs()),
                fresh: set.is_fresh(),
            },
            None => CacheStatus {
                region: self.region.clone(),
                key_count: 0,
                age_seconds: None,
                fresh: false,
            },
        }
    }

    /// Join the in-flight fetch or start one.
    ///
    /// `kid` is the key that prompted the fetch; `None` forces a fetch.
    async fn shared_fetch(&self, kid: Option<&str>) -> Result<Arc<KeySet>, BrokerError> {
        let fetch = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(pending) if pending.peek().is_none() => {
                    tracing::debug!(target: "broker.auth.jwks", "Joining in-flight JWKS fetch");
                    pending.clone()
                }
                _ => {
                    // A fetch may have completed while this caller waited for the lock
                    if let (Some(kid), Some(set)) = (kid, self.cache.load_full()) {
                        if !self.needs_fetch(&set, kid) {
                            return Ok(set);
                        }
                    }
                    let fetch = self.start_fetch();
                    *slot = Some(fetch.clone());
                    fetch
                }
            }
        };

        let result = fetch.await;

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|f| f.peek().is_some()) {
            *slot = None;
        }

        result
    }

    /// Whether a fetch failed less than one refetch cooldown ago.
    fn recently_failed(&self) -> bool {
        self.last_failure
            .load_full()
            .is_some_and(|failed_at| failed_at.elapsed() < self.settings.refetch_cooldown)
    }

    fn needs_fetch(&self, set: &KeySet, kid: &str) -> bool {
        if !set.is_fresh() {
            return true;
        }
        set.get(kid).is_none() && set.age() >= self.settings.refetch_cooldown
    }

    fn start_fetch(&self) -> SharedFetch {
        let http_client = self.http_client.clone();
        let certs_url = self.certs_url.clone();
        let region = self.region.clone();
        let cache = Arc::clone(&self.cache);
        let last_failure = Arc::clone(&self.last_failure);
        let ttl = self.settings.cache_ttl;

        async move {
            let start = Instant::now();
            let result = fetch_key_set(&http_client, &certs_url, ttl).await;
            match &result {
                Ok(set) => {
                    record_jwks_fetch(&region, "success", start.elapsed());
                    tracing::info!(
                        target: "broker.auth.jwks",
                        region = %region,
                        key_count = set.len(),
                        "JWKS cache refreshed"
                    );
                    cache.store(Some(Arc::clone(set)));
                    last_failure.store(None);
                }
                Err(_) => {
                    record_jwks_fetch(&region, "error", start.elapsed());
                    last_failure.store(Some(Arc::new(Instant::now())));
                }
            }
            result
        }
        .boxed()
        .shared()
    }
}

/// Fetch and parse one key-discovery document.
async fn fetch_key_set(
    http_client: &reqwest::Client,
    certs_url: &str,
    ttl: Duration,
) -> Result<Arc<KeySet>, BrokerError> {
    tracing::debug!(target: "broker.auth.jwks", url = %certs_url, "Fetching JWKS");

    let response = http_client.get(certs_url).send().await.map_err(|e| {
        tracing::error!(target: "broker.auth.jwks", error = %e, "Failed to fetch JWKS");
        BrokerError::KeySourceUnavailable(format!("request failed: {e}"))
    })?;

    if !response.status().is_success() {
        tracing::error!(
            target: "broker.auth.jwks",
            status = %response.status(),
            "JWKS endpoint returned error"
        );
        return Err(BrokerError::KeySourceUnavailable(format!(
            "endpoint returned {}",
            response.status()
        )));
    }

    let document: JwksDocument = response.json().await.map_err(|e| {
        tracing::error!(target: "broker.auth.jwks", error = %e, "Failed to parse JWKS response");
        BrokerError::KeySourceUnavailable(format!("invalid document: {e}"))
    })?;

    Ok(Arc::new(KeySet::new(signing_keys(document), ttl)))
}

/// Keep the entries that parse as JWKs and may verify signatures.
fn signing_keys(document: JwksDocument) -> HashMap<String, Jwk> {
    document
        .keys
        .into_iter()
        .filter_map(|value| match serde_json::from_value::<Jwk>(value) {
            Ok(jwk) => Some(jwk),
            Err(e) => {
                tracing::debug!(target: "broker.auth.jwks", error = %e, "Skipping unparseable JWK");
                None
            }
        })
        .filter(Jwk::is_signing_key)
        .map(|jwk| (jwk.kid.clone(), jwk))
        .collect()
}
