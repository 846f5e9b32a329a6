//! Trust broker configuration.
//!
//! Configuration is loaded from environment variables. Regions are declared
//! by id (`LOCAL_REGION`, `PEER_REGIONS`) and each id pulls its provider
//! URLs and realm from `REGION_<ID>_*` variables.

use common::jwt::{DEFAULT_CLOCK_SKEW, MAX_CLOCK_SKEW};
use common::realm::RealmEndpoint;
use jsonwebtoken::Algorithm;
use std::collections::{HashMap, HashSet};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default server bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3001";

/// Default key-set cache TTL in seconds (10 minutes).
pub const DEFAULT_JWKS_CACHE_TTL_SECONDS: u64 = 600;

/// Default minimum key-set age before an unknown `kid` may trigger a refetch.
pub const DEFAULT_JWKS_REFETCH_COOLDOWN_SECONDS: u64 = 10;

/// Default timeout for key-discovery requests.
pub const DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default pinned signing algorithm (Keycloak's realm default).
pub const DEFAULT_JWT_ALGORITHM: Algorithm = Algorithm::RS256;

/// One region's identity provider.
///
/// `internal` is how this process reaches the provider; `external` is the
/// URL browsers use. Both forms appear as `iss` in practice, depending on
/// which URL the token was requested through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    /// Upper-cased region id (e.g. "US").
    pub id: String,

    /// Internally reachable realm endpoint (used for key discovery).
    pub internal: RealmEndpoint,

    /// Externally reachable realm endpoint.
    pub external: RealmEndpoint,
}

impl Region {
    /// Realm name shared by both endpoints.
    pub fn realm(&self) -> &str {
        self.internal.realm()
    }

    /// Issuer identities this region may stamp into tokens (deduplicated).
    pub fn issuers(&self) -> Vec<String> {
        let internal = self.internal.issuer();
        let external = self.external.issuer();
        if internal == external {
            vec![internal]
        } else {
            vec![internal, external]
        }
    }
}

/// Trust broker configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server bind address (default: "0.0.0.0:3001").
    pub bind_address: String,

    /// The region this process is deployed in.
    pub local_region: Region,

    /// Peer regions in lookup order.
    pub peer_regions: Vec<Region>,

    /// Exact origins allowed to make cross-origin calls.
    pub allowed_origins: Vec<String>,

    /// Key-set cache TTL.
    pub jwks_cache_ttl: Duration,

    /// Minimum key-set age before an unknown `kid` triggers a refetch.
    pub jwks_refetch_cooldown: Duration,

    /// Timeout for key-discovery requests.
    pub jwks_http_timeout: Duration,

    /// Expiry leeway in seconds.
    pub jwt_clock_skew_seconds: i64,

    /// Pinned asymmetric signing algorithm.
    pub jwt_algorithm: Algorithm,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid region configuration: {0}")]
    InvalidRegion(String),

    #[error("Invalid origin configuration: {0}")]
    InvalidOrigin(String),

    #[error("Invalid duration configuration: {0}")]
    InvalidDuration(String),

    #[error("Invalid JWT clock skew configuration: {0}")]
    InvalidJwtClockSkew(String),

    #[error("Invalid JWT algorithm configuration: {0}")]
    InvalidJwtAlgorithm(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let local_id = vars
            .get("LOCAL_REGION")
            .map(|v| normalize_region_id(v))
            .transpose()?
            .ok_or_else(|| ConfigError::MissingEnvVar("LOCAL_REGION".to_string()))?;

        let local_region = load_region(vars, &local_id)?;

        // Peer order is the lookup order
        let mut seen = HashSet::from([local_id.clone()]);
        let mut peer_regions = Vec::new();
        for raw in split_list(vars.get("PEER_REGIONS")) {
            let id = normalize_region_id(raw)?;
            if !seen.insert(id.clone()) {
                return Err(ConfigError::InvalidRegion(format!(
                    "PEER_REGIONS lists '{}' more than once or repeats LOCAL_REGION",
                    id
                )));
            }
            peer_regions.push(load_region(vars, &id)?);
        }

        let allowed_origins = split_list(vars.get("ALLOWED_ORIGINS"))
            .map(normalize_origin)
            .collect::<Result<Vec<_>, _>>()?;

        let jwks_cache_ttl = parse_seconds(
            vars,
            "JWKS_CACHE_TTL_SECONDS",
            DEFAULT_JWKS_CACHE_TTL_SECONDS,
            false,
        )?;
        let jwks_refetch_cooldown = parse_seconds(
            vars,
            "JWKS_REFETCH_COOLDOWN_SECONDS",
            DEFAULT_JWKS_REFETCH_COOLDOWN_SECONDS,
            true,
        )?;
        let jwks_http_timeout = parse_seconds(
            vars,
            "JWKS_HTTP_TIMEOUT_SECONDS",
            DEFAULT_JWKS_HTTP_TIMEOUT_SECONDS,
            false,
        )?;

        // Parse JWT clock skew tolerance with validation
        let jwt_clock_skew_seconds = if let Some(value_str) = vars.get("JWT_CLOCK_SKEW_SECONDS") {
            let value: i64 = value_str.parse().map_err(|e| {
                ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must be a valid integer, got '{}': {}",
                    value_str, e
                ))
            })?;

            if value < 0 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not be negative, got {}",
                    value
                )));
            }

            if value > MAX_CLOCK_SKEW.as_secs() as i64 {
                return Err(ConfigError::InvalidJwtClockSkew(format!(
                    "JWT_CLOCK_SKEW_SECONDS must not exceed {} seconds, got {}",
                    MAX_CLOCK_SKEW.as_secs(),
                    value
                )));
            }

            value
        } else {
            DEFAULT_CLOCK_SKEW.as_secs() as i64
        };

        let jwt_algorithm = match vars.get("JWT_ALGORITHM") {
            Some(value) => parse_signing_algorithm(value)?,
            None => DEFAULT_JWT_ALGORITHM,
        };

        Ok(Config {
            bind_address,
            local_region,
            peer_regions,
            allowed_origins,
            jwks_cache_ttl,
            jwks_refetch_cooldown,
            jwks_http_timeout,
            jwt_clock_skew_seconds,
            jwt_algorithm,
        })
    }

    /// Local region followed by peers, in lookup order.
    pub fn all_regions(&self) -> impl Iterator<Item = &Region> {
        std::iter::once(&self.local_region).chain(self.peer_regions.iter())
    }
}

/// Parse a pinned signing algorithm, rejecting symmetric ones.
///
/// `none` is not a variant of [`Algorithm`], so it fails to parse.
pub fn parse_signing_algorithm(value: &str) -> Result<Algorithm, ConfigError> {
    let algorithm = Algorithm::from_str(value.trim()).map_err(|_| {
        ConfigError::InvalidJwtAlgorithm(format!("JWT_ALGORITHM '{}' is not recognised", value))
    })?;

    match algorithm {
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(ConfigError::InvalidJwtAlgorithm(format!(
                "JWT_ALGORITHM must be asymmetric, got '{}'",
                value
            )))
        }
        other => Ok(other),
    }
}

fn load_region(vars: &HashMap<String, String>, id: &str) -> Result<Region, ConfigError> {
    let url_var = format!("REGION_{id}_KEYCLOAK_URL");
    let public_url_var = format!("REGION_{id}_KEYCLOAK_PUBLIC_URL");
    let realm_var = format!("REGION_{id}_REALM");

    let internal_url = vars
        .get(&url_var)
        .ok_or_else(|| ConfigError::MissingEnvVar(url_var.clone()))?;
    let realm = vars
        .get(&realm_var)
        .ok_or_else(|| ConfigError::MissingEnvVar(realm_var.clone()))?;
    let external_url = vars.get(&public_url_var).unwrap_or(internal_url);

    let internal = RealmEndpoint::new(internal_url, realm)
        .map_err(|e| ConfigError::InvalidRegion(format!("{url_var}: {e}")))?;
    let external = RealmEndpoint::new(external_url, realm)
        .map_err(|e| ConfigError::InvalidRegion(format!("{public_url_var}: {e}")))?;

    Ok(Region {
        id: id.to_string(),
        internal,
        external,
    })
}

fn normalize_region_id(raw: &str) -> Result<String, ConfigError> {
    let id = raw.trim().to_ascii_uppercase();
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(id)
    } else {
        Err(ConfigError::InvalidRegion(format!(
            "region id '{}' must be alphanumeric",
            raw
        )))
    }
}

fn normalize_origin(raw: &str) -> Result<String, ConfigError> {
    let origin = raw.trim_end_matches('/');
    let valid = (origin.starts_with("http://") || origin.starts_with("https://"))
        && !origin
            .split_once("://")
            .map_or("", |(_, rest)| rest)
            .contains('/');
    if valid {
        Ok(origin.to_string())
    } else {
        Err(ConfigError::InvalidOrigin(format!(
            "ALLOWED_ORIGINS entry '{}' must be scheme://host[:port]",
            raw
        )))
    }
}

fn split_list(value: Option<&String>) -> impl Iterator<Item = &str> {
    value
        .map(String::as_str)
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn parse_seconds(
    vars: &HashMap<String, String>,
    name: &str,
    default: u64,
    allow_zero: bool,
) -> Result<Duration, ConfigError> {
    let Some(value_str) = vars.get(name) else {
        return Ok(Duration::from_secs(default));
    };

    let value: u64 = value_str.parse().map_err(|e| {
        ConfigError::InvalidDuration(format!(
            "{} must be a valid non-negative integer, got '{}': {}",
            name, value_str, e
        ))
    })?;

    if value == 0 && !allow_zero {
        return Err(ConfigError::InvalidDuration(format!(
            "{} must be greater than 0",
            name
        )));
    }

    Ok(Duration::from_secs(value))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([
            ("LOCAL_REGION".to_string(), "us".to_string()),
            (
                "REGION_US_KEYCLOAK_URL".to_string(),
                "http://keycloak-us:8080".to_string(),
            ),
            ("REGION_US_REALM".to_string(), "us-realm".to_string()),
        ])
    }

    fn with_eu(mut vars: HashMap<String, String>) -> HashMap<String, String> {
        vars.insert("PEER_REGIONS".to_string(), "EU".to_string());
        vars.insert(
            "REGION_EU_KEYCLOAK_URL".to_string(),
            "http://keycloak-eu:8080".to_string(),
        );
        vars.insert(
            "REGION_EU_KEYCLOAK_PUBLIC_URL".to_string(),
            "http://localhost:8081".to_string(),
        );
        vars.insert("REGION_EU_REALM".to_string(), "eu-realm".to_string());
        vars
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(config.bind_address, "0.0.0.0:3001");
        assert_eq!(config.local_region.id, "US");
        assert_eq!(config.local_region.realm(), "us-realm");
        assert_eq!(
            config.local_region.issuers(),
            vec!["http://keycloak-us:8080/realms/us-realm".to_string()]
        );
        assert!(config.peer_regions.is_empty());
        assert!(config.allowed_origins.is_empty());
        assert_eq!(config.jwks_cache_ttl, Duration::from_secs(600));
        assert_eq!(config.jwks_refetch_cooldown, Duration::from_secs(10));
        assert_eq!(config.jwks_http_timeout, Duration::from_secs(10));
        assert_eq!(config.jwt_clock_skew_seconds, 0);
        assert_eq!(config.jwt_algorithm, Algorithm::RS256);
    }

    #[test]
    fn test_peer_region_with_public_url() {
        let config = Config::from_vars(&with_eu(base_vars())).unwrap();

        assert_eq!(config.peer_regions.len(), 1);
        let eu = config.peer_regions.first().unwrap();
        assert_eq!(eu.id, "EU");
        assert_eq!(
            eu.issuers(),
            vec![
                "http://keycloak-eu:8080/realms/eu-realm".to_string(),
                "http://localhost:8081/realms/eu-realm".to_string(),
            ]
        );

        let ids: Vec<&str> = config.all_regions().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["US", "EU"]);
    }

    #[test]
    fn test_missing_local_region() {
        let mut vars = base_vars();
        vars.remove("LOCAL_REGION");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "LOCAL_REGION"));
    }

    #[test]
    fn test_missing_peer_realm() {
        let mut vars = with_eu(base_vars());
        vars.remove("REGION_EU_REALM");

        let result = Config::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "REGION_EU_REALM"));
    }

    #[test]
    fn test_duplicate_peer_rejected() {
        let mut vars = with_eu(base_vars());
        vars.insert("PEER_REGIONS".to_string(), "EU, eu".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidRegion(_))
        ));

        vars.insert("PEER_REGIONS".to_string(), "US".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_invalid_region_url() {
        let mut vars = base_vars();
        vars.insert(
            "REGION_US_KEYCLOAK_URL".to_string(),
            "keycloak-us".to_string(),
        );
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidRegion(_))
        ));
    }

    #[test]
    fn test_allowed_origins_are_normalized() {
        let mut vars = base_vars();
        vars.insert(
            "ALLOWED_ORIGINS".to_string(),
            "http://localhost:3000/, https://app.eu.example.com".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(
            config.allowed_origins,
            vec![
                "http://localhost:3000".to_string(),
                "https://app.eu.example.com".to_string()
            ]
        );
    }

    #[test]
    fn test_allowed_origin_with_path_rejected() {
        let mut vars = base_vars();
        vars.insert(
            "ALLOWED_ORIGINS".to_string(),
            "http://localhost:3000/app".to_string(),
        );
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidOrigin(_))
        ));
    }

    #[test]
    fn test_cache_ttl_rejects_zero() {
        let mut vars = base_vars();
        vars.insert("JWKS_CACHE_TTL_SECONDS".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidDuration(_))
        ));
    }

    #[test]
    fn test_refetch_cooldown_accepts_zero() {
        let mut vars = base_vars();
        vars.insert("JWKS_REFETCH_COOLDOWN_SECONDS".to_string(), "0".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.jwks_refetch_cooldown, Duration::ZERO);
    }

    #[test]
    fn test_jwt_clock_skew_rejects_negative() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "-5".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));
    }

    #[test]
    fn test_jwt_clock_skew_rejects_too_large() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "301".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidJwtClockSkew(_))
        ));
    }

    #[test]
    fn test_jwt_clock_skew_accepts_max() {
        let mut vars = base_vars();
        vars.insert("JWT_CLOCK_SKEW_SECONDS".to_string(), "300".to_string());
        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.jwt_clock_skew_seconds, 300);
    }

    #[test]
    fn test_jwt_algorithm_rejects_symmetric_and_none() {
        for alg in ["HS256", "HS384", "HS512", "none", "rot13"] {
            let mut vars = base_vars();
            vars.insert("JWT_ALGORITHM".to_string(), alg.to_string());
            assert!(
                matches!(
                    Config::from_vars(&vars),
                    Err(ConfigError::InvalidJwtAlgorithm(_))
                ),
                "{alg} should be rejected"
            );
        }
    }

    #[test]
    fn test_jwt_algorithm_accepts_asymmetric() {
        for (alg, expected) in [
            ("RS512", Algorithm::RS512),
            ("PS256", Algorithm::PS256),
            ("ES256", Algorithm::ES256),
            ("EdDSA", Algorithm::EdDSA),
        ] {
            let mut vars = base_vars();
            vars.insert("JWT_ALGORITHM".to_string(), alg.to_string());
            assert_eq!(Config::from_vars(&vars).unwrap().jwt_algorithm, expected);
        }
    }
}
