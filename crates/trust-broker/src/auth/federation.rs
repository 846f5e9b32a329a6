//! Federated key lookup across regions.
//!
//! A kid does not say which region minted a token, so lookup walks the
//! local region first and then each peer in configured order. The first
//! region that publishes the kid wins.

use crate::auth::jwks::{CacheStatus, Jwk, KeyResolver};
use std::sync::Arc;
use tracing::instrument;

/// Outcome of a federated lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    /// A region publishes the kid.
    Found {
        /// The signing key.
        key: Jwk,
        /// Id of the region whose resolver returned the key.
        region: String,
    },

    /// No region publishes the kid, or every region that might has failed.
    Unresolved,
}

/// Ordered set of per-region resolvers.
pub struct FederatedKeyLookup {
    local: Arc<KeyResolver>,
    peers: Vec<Arc<KeyResolver>>,
}

impl FederatedKeyLookup {
    /// Create a lookup over a local resolver and ordered peers.
    pub fn new(local: Arc<KeyResolver>, peers: Vec<Arc<KeyResolver>>) -> Self {
        Self { local, peers }
    }

    /// Resolvers in lookup order.
    pub fn resolvers(&self) -> impl Iterator<Item = &Arc<KeyResolver>> {
        std::iter::once(&self.local).chain(self.peers.iter())
    }

    /// Resolve a kid to a key and the region that published it.
    ///
    /// A resolver error (key source down with nothing cached) is logged and
    /// the walk continues with the next region. The result is `Unresolved`
    /// when every region came back empty or failed.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn resolve(&self, kid: &str) -> KeyResolution {
        for resolver in self.resolvers() {
            match resolver.get_key(kid).await {
                Ok(Some(key)) => {
                    tracing::debug!(
                        target: "broker.auth.federation",
                        region = %resolver.region(),
                        "Key resolved"
                    );
                    return KeyResolution::Found {
                        key,
                        region: resolver.region().to_string(),
                    };
                }
                Ok(None) => {
                    tracing::debug!(
                        target: "broker.auth.federation",
                        region = %resolver.region(),
                        "Key not published by region"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        target: "broker.auth.federation",
                        region = %resolver.region(),
                        error = %e,
                        "Region key source unavailable, trying next region"
                    );
                }
            }
        }

        KeyResolution::Unresolved
    }

    /// Cache status for every region, in lookup order.
    pub fn cache_status(&self) -> Vec<CacheStatus> {
        self.resolvers().map(|r| r.status()).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_resolvers_are_local_first_then_peers_in_order() {
        let lookup = FederatedKeyLookup::new(
            Arc::new(KeyResolver::new("US", "http://us/certs")),
            vec![
                Arc::new(KeyResolver::new("EU", "http://eu/certs")),
                Arc::new(KeyResolver::new("AP", "http://ap/certs")),
            ],
        );

        let order: Vec<&str> = lookup.resolvers().map(|r| r.region()).collect();
        assert_eq!(order, vec!["US", "EU", "AP"]);

        let status: Vec<String> = lookup.cache_status().into_iter().map(|s| s.region).collect();
        assert_eq!(status, vec!["US", "EU", "AP"]);
    }
}
