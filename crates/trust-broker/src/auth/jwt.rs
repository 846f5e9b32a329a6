//! Token verification.
//!
//! Composes federated key lookup, signature verification with a pinned
//! algorithm, the issuer trust policy and the expiry check into one
//! decision: `Ok(VerifiedClaims)` or `Err` with the rejection reason.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - The algorithm is pinned by configuration; the header `alg` must match
//!   it exactly, and symmetric algorithms can never be pinned
//! - The verification key's type and declared `alg` must match the pinned
//!   algorithm, closing RSA/HMAC style algorithm confusion
//! - Issuer membership is exact string equality
//! - Client-facing messages are a short taxonomy; details go to logs

use crate::auth::claims::{TokenClaims, VerifiedClaims};
use crate::auth::federation::{FederatedKeyLookup, KeyResolution};
use crate::auth::jwks::Jwk;
use crate::auth::trust::IssuerTrustPolicy;
use crate::errors::BrokerError;
use crate::observability::metrics::record_token_verification;
use common::jwt::parse_unverified;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;
use tracing::instrument;

/// Token verifier.
pub struct TokenVerifier {
    /// Key lookup across local and peer regions.
    lookup: Arc<FederatedKeyLookup>,

    /// Issuer allow-list.
    trust: IssuerTrustPolicy,

    /// Pinned asymmetric signing algorithm.
    algorithm: Algorithm,

    /// Expiry leeway in seconds.
    clock_skew_seconds: i64,
}

impl TokenVerifier {
    /// Create a new verifier.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Federated key lookup
    /// * `trust` - Issuer allow-list
    /// * `algorithm` - Pinned signing algorithm
    /// * `clock_skew_seconds` - Expiry leeway
    pub fn new(
        lookup: Arc<FederatedKeyLookup>,
        trust: IssuerTrustPolicy,
        algorithm: Algorithm,
        clock_skew_seconds: i64,
    ) -> Self {
        Self {
            lookup,
            trust,
            algorithm,
            clock_skew_seconds,
        }
    }

    /// The key lookup this verifier uses.
    pub fn lookup(&self) -> &Arc<FederatedKeyLookup> {
        &self.lookup
    }

    /// Verify a token against the current wall clock.
    pub async fn verify(&self, token: &str) -> Result<VerifiedClaims, BrokerError> {
        self.verify_at(token, chrono::Utc::now().timestamp()).await
    }

    /// Verify a token as of `now` (Unix epoch seconds).
    ///
    /// # Checks, in order
    ///
    /// 1. Structure: size, three segments, JSON header with `kid` and `alg`,
    ///    JSON object payload (`Malformed`)
    /// 2. Key lookup by kid, local region first (`UnknownSigningKey`)
    /// 3. Pinned algorithm and signature (`BadSignature`)
    /// 4. Issuer on the allow-list (`UntrustedIssuer`)
    /// 5. `now < exp + skew` (`Expired`)
    ///
    /// # Errors
    ///
    /// Returns the first failing check's `BrokerError`.
    #[instrument(skip_all)]
    pub async fn verify_at(&self, token: &str, now: i64) -> Result<VerifiedClaims, BrokerError> {
        let start = Instant::now();
        let result = self.run_checks(token, now).await;

        let outcome = match &result {
            Ok(claims) => {
                tracing::debug!(
                    target: "broker.auth.jwt",
                    realm = %claims.realm,
                    region = %claims.verified_by_region,
                    auth_source = claims.auth_source.as_str(),
                    "Token verified"
                );
                "accepted"
            }
            Err(e) => {
                tracing::debug!(target: "broker.auth.jwt", reason = e.label(), "Token rejected");
                e.label()
            }
        };
        record_token_verification(outcome, start.elapsed());

        result
    }

    async fn run_checks(&self, token: &str, now: i64) -> Result<VerifiedClaims, BrokerError> {
        // 1. Structure (includes size check via common::jwt)
        let unverified = parse_unverified(token).map_err(|e| {
            tracing::debug!(target: "broker.auth.jwt", error = ?e, "Token structure check failed");
            BrokerError::Malformed
        })?;

        // 2. Key lookup
        let (jwk, region) = match self.lookup.resolve(&unverified.header.kid).await {
            KeyResolution::Found { key, region } => (key, region),
            KeyResolution::Unresolved => {
                tracing::debug!(
                    target: "broker.auth.jwt",
                    kid = %unverified.header.kid,
                    "No region publishes the signing key"
                );
                return Err(BrokerError::UnknownSigningKey);
            }
        };

        // 3. Pinned algorithm and signature
        let header_alg = Algorithm::from_str(&unverified.header.alg).ok();
        if header_alg != Some(self.algorithm) {
            tracing::warn!(
                target: "broker.auth.jwt",
                alg = %unverified.header.alg,
                "Token algorithm does not match pinned algorithm"
            );
            return Err(BrokerError::BadSignature);
        }

        let claims = verify_signature(token, &jwk, self.algorithm)?;

        // 4. Issuer
        if !self.trust.is_trusted(&claims.iss) {
            tracing::warn!(
                target: "broker.auth.jwt",
                region = %region,
                "Token issuer is not on the allow-list"
            );
            return Err(BrokerError::UntrustedIssuer);
        }

        // 5. Expiry
        if now >= claims.exp.saturating_add(self.clock_skew_seconds) {
            tracing::debug!(target: "broker.auth.jwt", exp = claims.exp, now, "Token expired");
            return Err(BrokerError::Expired);
        }

        Ok(VerifiedClaims::from_token(claims, region))
    }
}

/// Verify the signature with `jwk` and decode the payload.
///
/// Claim validation is left to the caller so each failure keeps its own
/// taxonomy entry.
fn verify_signature(token: &str, jwk: &Jwk, algorithm: Algorithm) -> Result<TokenClaims, BrokerError> {
    let decoding_key = decoding_key(jwk, algorithm)?;

    let mut validation = Validation::new(algorithm);
    validation.validate_exp = false;
    validation.validate_nbf = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();
    validation.leeway = 0;

    let token_data = decode::<TokenClaims>(token, &decoding_key, &validation).map_err(|e| {
        tracing::debug!(target: "broker.auth.jwt", error = %e, "Token verification failed");
        match e.kind() {
            ErrorKind::InvalidSignature
            | ErrorKind::InvalidAlgorithm
            | ErrorKind::InvalidAlgorithmName
            | ErrorKind::InvalidKeyFormat
            | ErrorKind::InvalidRsaKey(_)
            | ErrorKind::InvalidEcdsaKey => BrokerError::BadSignature,
            _ => BrokerError::Malformed,
        }
    })?;

    Ok(token_data.claims)
}

/// Build a verification key from a JWK for the pinned algorithm.
///
/// A key whose type, curve or declared `alg` does not fit the algorithm
/// cannot have produced a valid signature, so it rejects as `BadSignature`.
fn decoding_key(jwk: &Jwk, algorithm: Algorithm) -> Result<DecodingKey, BrokerError> {
    let reject = |reason: &str| {
        tracing::warn!(
            target: "broker.auth.jwt",
            kid = %jwk.kid,
            kty = %jwk.kty,
            reason,
            "JWK does not fit pinned algorithm"
        );
        BrokerError::BadSignature
    };

    if let Some(alg) = &jwk.alg {
        if Algorithm::from_str(alg).ok() != Some(algorithm) {
            return Err(reject("alg mismatch"));
        }
    }

    match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => {
            let (Some(n), Some(e)) = (&jwk.n, &jwk.e) else {
                return Err(reject("missing RSA components"));
            };
            if jwk.kty != "RSA" {
                return Err(reject("key type is not RSA"));
            }
            DecodingKey::from_rsa_components(n, e).map_err(|_| reject("invalid RSA components"))
        }
        Algorithm::ES256 | Algorithm::ES384 => {
            let expected_curve = if algorithm == Algorithm::ES256 {
                "P-256"
            } else {
                "P-384"
            };
            let (Some(x), Some(y)) = (&jwk.x, &jwk.y) else {
                return Err(reject("missing EC coordinates"));
            };
            if jwk.kty != "EC" || jwk.crv.as_deref() != Some(expected_curve) {
                return Err(reject("key type or curve mismatch"));
            }
            DecodingKey::from_ec_components(x, y).map_err(|_| reject("invalid EC coordinates"))
        }
        Algorithm::EdDSA => {
            let Some(x) = &jwk.x else {
                return Err(reject("missing OKP public key"));
            };
            if jwk.kty != "OKP" || jwk.crv.as_deref() != Some("Ed25519") {
                return Err(reject("key type or curve mismatch"));
            }
            DecodingKey::from_ed_components(x).map_err(|_| reject("invalid OKP public key"))
        }
        Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512 => {
            Err(reject("symmetric algorithm pinned"))
        }
    }
}
