//! Failed-attempt tracking per source address.
//!
//! Each qualifying failure increments a counter in the key-value store and
//! pushes its expiry out by the rolling window, so an address stays banned
//! until it has been quiet for a full window. The store cannot decrement every
//! key at once, which is why the window rolls instead of sliding.
//!
//! Reads fail open: a counter that is missing, unparsable or unreadable
//! counts as zero. Availability of the login endpoint is preferred over
//! strict enforcement while the store is degraded.

use super::store::KeyValueStore;
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{instrument, warn};

const IPSCORE_NAMESPACE: &str = "IPSCORE";

#[derive(Debug, Clone)]
pub struct BanPolicy {
    /// Failures tolerated inside the window; one more bans the address.
    pub threshold: i64,

    /// Expiry applied to the counter after every failure.
    pub window: Duration,

    /// Addresses that are never banned (health checkers, office egress).
    pub allowed: HashSet<String>,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            threshold: 9,
            window: Duration::from_secs(300),
            allowed: ["127.0.0.1", "localhost"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl BanPolicy {
    #[must_use]
    pub fn with_allowed<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = addresses.into_iter().map(Into::into).collect();
        self
    }
}

pub struct AbuseGuard {
    store: Arc<dyn KeyValueStore>,
    policy: BanPolicy,
    key_prefix: String,
}

impl AbuseGuard {
    #[must_use]
    pub fn new(store: Arc<dyn KeyValueStore>, policy: BanPolicy, key_prefix: &str) -> Self {
        Self {
            store,
            policy,
            key_prefix: format!("{key_prefix}:{IPSCORE_NAMESPACE}:"),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &BanPolicy {
        &self.policy
    }

    fn counter_key(&self, address: &str) -> String {
        format!("{}{address}", self.key_prefix)
    }

    /// Current failure count for `address`; zero when absent or unreadable.
    pub async fn failure_count(&self, address: &str) -> i64 {
        match self.store.get(&self.counter_key(address)).await {
            Ok(Some(value)) => value.trim().parse().unwrap_or_else(|_| {
                warn!("Ignoring unparsable failure counter for {address}: {value:?}");
                0
            }),
            Ok(None) => 0,
            Err(err) => {
                warn!("Failed to read failure counter for {address}: {err}");
                0
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn is_banned(&self, address: &str) -> bool {
        if self.policy.allowed.contains(address) {
            return false;
        }

        self.failure_count(address).await > self.policy.threshold
    }

    /// Count one failure for `address` and restart its window.
    ///
    /// The increment stands even if restarting the window fails; the counter
    /// then keeps whatever expiry it had.
    #[instrument(skip(self))]
    pub async fn record_failure(&self, address: &str) {
        let key = self.counter_key(address);

        if let Err(err) = self.store.incr(&key).await {
            warn!("Failed to increment failure counter for {address}: {err}");
            return;
        }

        if let Err(err) = self.store.expire(&key, self.policy.window).await {
            warn!("Failed to reset failure window for {address}: {err}");
        }
    }
}
