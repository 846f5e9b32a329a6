//! PKCE (RFC 7636) and `state` generation.
//!
//! Verifiers are 32 random bytes, base64url-encoded without padding
//! (43 characters); the S256 challenge is the base64url SHA-256 of the
//! verifier string.

use crate::error::SessionError;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use common::secret::SecretString;
use ring::digest::{digest, SHA256};
use ring::rand::{SecureRandom, SystemRandom};

/// Challenge method sent with authorization requests.
pub const CHALLENGE_METHOD: &str = "S256";

const VERIFIER_BYTES: usize = 32;
const STATE_BYTES: usize = 16;

/// A PKCE verifier and its S256 challenge.
#[derive(Debug)]
pub struct Pkce {
    verifier: SecretString,
    challenge: String,
}

impl Pkce {
    /// Generate a fresh verifier.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Configuration` if the system RNG fails.
    pub fn generate(rng: &SystemRandom) -> Result<Self, SessionError> {
        let verifier = random_token(rng, VERIFIER_BYTES)?;
        let challenge = s256_challenge(&verifier);
        Ok(Self {
            verifier: SecretString::from(verifier),
            challenge,
        })
    }

    /// Verifier to send with the code exchange.
    pub fn verifier(&self) -> &SecretString {
        &self.verifier
    }

    /// Challenge to send with the authorization request.
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    /// Give up the verifier, keeping it for the code exchange.
    pub fn into_verifier(self) -> SecretString {
        self.verifier
    }
}

/// Generate an unguessable `state` value.
///
/// # Errors
///
/// Returns `SessionError::Configuration` if the system RNG fails.
pub fn generate_state(rng: &SystemRandom) -> Result<String, SessionError> {
    random_token(rng, STATE_BYTES)
}

/// S256 challenge for a verifier string.
pub fn s256_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(digest(&SHA256, verifier.as_bytes()))
}

fn random_token(rng: &SystemRandom, len: usize) -> Result<String, SessionError> {
    let mut bytes = vec![0u8; len];
    rng.fill(&mut bytes)
        .map_err(|_| SessionError::Configuration("system random number generator failed".to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    #[test]
    fn test_rfc7636_appendix_b_vector() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            s256_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_generated_verifier_shape() {
        let rng = SystemRandom::new();
        let pkce = Pkce::generate(&rng).unwrap();
        let verifier = pkce.verifier().expose_secret();

        assert_eq!(verifier.len(), 43);
        assert!(verifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_eq!(s256_challenge(verifier), pkce.challenge());
    }

    #[test]
    fn test_values_are_unique() {
        let rng = SystemRandom::new();
        let a = Pkce::generate(&rng).unwrap();
        let b = Pkce::generate(&rng).unwrap();
        assert_ne!(a.challenge(), b.challenge());

        assert_ne!(generate_state(&rng).unwrap(), generate_state(&rng).unwrap());
        assert_eq!(generate_state(&rng).unwrap().len(), 22);
    }

    #[test]
    fn test_debug_redacts_verifier() {
        let rng = SystemRandom::new();
        let pkce = Pkce::generate(&rng).unwrap();
        let debug = format!("{pkce:?}");
        assert!(!debug.contains(pkce.verifier().expose_secret()));
    }
}
