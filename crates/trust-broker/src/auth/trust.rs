//! Issuer trust policy.
//!
//! A fixed allow-list of issuer identities, built once from configuration.
//! Membership is exact string equality: no prefix, substring or pattern
//! matching, so `https://evil.example/realms/us-realm` never matches
//! `https://sso.example/realms/us-realm`.

use crate::config::Region;
use std::collections::HashSet;

/// Exact-match issuer allow-list.
#[derive(Debug, Clone, Default)]
pub struct IssuerTrustPolicy {
    trusted: HashSet<String>,
}

impl IssuerTrustPolicy {
    /// Build the policy from configured regions.
    ///
    /// Every region contributes its internal and external issuer.
    pub fn from_regions<'a>(regions: impl IntoIterator<Item = &'a Region>) -> Self {
        Self {
            trusted: regions.into_iter().flat_map(Region::issuers).collect(),
        }
    }

    /// Build the policy from explicit issuer strings.
    pub fn from_issuers<I, S>(issuers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            trusted: issuers.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether `issuer` is on the allow-list.
    pub fn is_trusted(&self, issuer: &str) -> bool {
        self.trusted.contains(issuer)
    }

    /// Number of trusted issuers.
    pub fn len(&self) -> usize {
        self.trusted.len()
    }

    /// Whether the allow-list is empty.
    pub fn is_empty(&self) -> bool {
        self.trusted.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::realm::RealmEndpoint;

    fn region(id: &str, internal: &str, external: &str, realm: &str) -> Region {
        Region {
            id: id.to_string(),
            internal: RealmEndpoint::new(internal, realm).unwrap(),
            external: RealmEndpoint::new(external, realm).unwrap(),
        }
    }

    fn policy() -> IssuerTrustPolicy {
        let us = region("US", "http://keycloak-us:8080", "http://localhost:8080", "us-realm");
        let eu = region("EU", "http://keycloak-eu:8080", "http://localhost:8081", "eu-realm");
        IssuerTrustPolicy::from_regions([&us, &eu])
    }

    #[test]
    fn test_union_of_internal_and_external_issuers() {
        let policy = policy();

        assert_eq!(policy.len(), 4);
        assert!(policy.is_trusted("http://keycloak-us:8080/realms/us-realm"));
        assert!(policy.is_trusted("http://localhost:8080/realms/us-realm"));
        assert!(policy.is_trusted("http://keycloak-eu:8080/realms/eu-realm"));
        assert!(policy.is_trusted("http://localhost:8081/realms/eu-realm"));
    }

    #[test]
    fn test_rejects_lookalike_issuers() {
        let policy = policy();

        for issuer in [
            "https://evil.example/realms/us-realm",
            "http://localhost:8080/realms/us-realm/",
            "http://localhost:8080/realms/us-realm.evil",
            "http://LOCALHOST:8080/realms/us-realm",
            "http://localhost:8080/realms/eu-realm",
            "localhost:8080/realms/us-realm",
            "",
        ] {
            assert!(!policy.is_trusted(issuer), "{issuer:?} must not be trusted");
        }
    }

    #[test]
    fn test_same_internal_and_external_counted_once() {
        let us = region("US", "http://kc:8080", "http://kc:8080", "us-realm");
        let policy = IssuerTrustPolicy::from_regions([&us]);
        assert_eq!(policy.len(), 1);
    }

    #[test]
    fn test_empty_policy_trusts_nothing() {
        let policy = IssuerTrustPolicy::default();
        assert!(policy.is_empty());
        assert!(!policy.is_trusted("http://localhost:8080/realms/us-realm"));
    }
}
